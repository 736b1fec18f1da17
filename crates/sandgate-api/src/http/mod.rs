//! HTTP layer of the gateway.
//!
//! Sandbox hosts are proxied; the proxy domain itself serves health, the
//! OIDC callback, the warning-accept endpoint, toolbox paths and build logs.

pub mod auth;
pub mod build_logs;
pub mod cookies;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod router;
pub mod warning;

//! Infrastructure layer for Sandgate.
//!
//! Contains implementations of the ports defined in `sandgate-core`:
//! the REST control-plane client, the Redis cache store, the AES-256-GCM
//! cookie envelope, the OIDC provider client, and the TOML config loader.

pub mod cache;
pub mod config;
pub mod control_plane;
pub mod crypto;
pub mod oidc;

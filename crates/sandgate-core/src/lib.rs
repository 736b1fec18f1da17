//! Gateway logic and port trait definitions for Sandgate.
//!
//! This crate defines the ports (`ControlPlane`, `CacheStore`) that the
//! infrastructure layer implements, plus everything that decides what happens
//! to a request: target resolution, access validation, backend location, the
//! wake state machine, activity throttling and OIDC transaction state.
//! It depends only on `sandgate-types` -- never on `sandgate-infra` or any
//! HTTP client.

pub mod access;
pub mod activity;
pub mod cache;
pub mod control_plane;
pub mod locator;
pub mod oidc;
pub mod target;
pub mod wake;

#[cfg(test)]
pub(crate) mod test_support;

//! Shared domain types for Sandgate.
//!
//! This crate contains the types shared by every layer of the gateway:
//! sandbox lifecycle state, resolved runner backends, control-plane DTOs,
//! gateway configuration, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde and thiserror.

pub mod config;
pub mod control_plane;
pub mod error;
pub mod runner;
pub mod sandbox;

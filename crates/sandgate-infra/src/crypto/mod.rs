//! Cryptographic operations for Sandgate.
//!
//! - `cookie`: AES-256-GCM envelope for session, PKCE and state cookies

pub mod cookie;

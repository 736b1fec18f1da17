//! OIDC transaction state that round-trips through the browser.
//!
//! The authorization request carries an encoded [`AuthState`] in its `state`
//! parameter; the provider hands it back unchanged to `/callback`, which uses
//! it to find the sandbox and the URL the user originally asked for.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthStateError {
    #[error("state is not valid base64url")]
    Encoding,

    #[error("state is not valid JSON: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    /// Random nonce.
    pub state: String,
    /// Absolute URL to send the browser back to after login.
    pub return_to: String,
    pub sandbox_id: String,
}

impl AuthState {
    pub fn new(state: impl Into<String>, return_to: impl Into<String>, sandbox_id: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            return_to: return_to.into(),
            sandbox_id: sandbox_id.into(),
        }
    }

    /// base64url (unpadded) of the JSON form.
    pub fn encode(&self) -> String {
        // Serializing three strings cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> Result<Self, AuthStateError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|_| AuthStateError::Encoding)?;
        serde_json::from_slice(&bytes).map_err(|e| AuthStateError::Json(e.to_string()))
    }
}

/// S256 code challenge for a PKCE verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

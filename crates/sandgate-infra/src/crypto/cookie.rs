//! AES-256-GCM envelope for gateway cookies.
//!
//! CookieCrypto seals short strings (a sandbox ID, a PKCE verifier) into
//! cookie values that the browser can carry but neither read nor forge.
//!
//! - The 32-byte key is derived from the configured secret with HMAC-SHA256.
//! - The cookie name is bound as associated data, so a value sealed for one
//!   cookie does not open under another name.
//! - The plaintext carries its own expiry; an expired envelope does not open.
//!
//! Encoded format: `base64url(nonce (12 bytes) || ciphertext)`.
//!
//! SECURITY: Any failure to open is reported as `None`. Callers treat it
//! exactly like a missing cookie.

use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Domain separation label for key derivation.
const KEY_LABEL: &[u8] = b"sandgate-cookie-v1";

#[derive(Debug, Error)]
pub enum CookieCryptoError {
    #[error("cookie secret is empty")]
    EmptySecret,

    #[error("encryption failed")]
    EncryptionFailed,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    /// Sealed value.
    v: String,
    /// Expiry, unix seconds.
    exp: i64,
}

pub struct CookieCrypto {
    cipher: Aes256Gcm,
}

impl CookieCrypto {
    /// Derive the envelope key from a configured secret.
    pub fn from_secret(secret: &str) -> Result<Self, CookieCryptoError> {
        if secret.is_empty() {
            return Err(CookieCryptoError::EmptySecret);
        }
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
            .map_err(|_| CookieCryptoError::EmptySecret)?;
        mac.update(KEY_LABEL);
        let mut key = [0u8; 32];
        key.copy_from_slice(&mac.finalize().into_bytes());
        Ok(Self::new(&key))
    }

    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Seal `value` for the cookie called `name`, valid for `ttl`.
    pub fn seal(&self, name: &str, value: &str, ttl: Duration) -> Result<String, CookieCryptoError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let envelope = Envelope {
            v: value.to_string(),
            exp: Utc::now().timestamp().saturating_add(ttl_secs),
        };
        let plaintext =
            serde_json::to_vec(&envelope).map_err(|_| CookieCryptoError::EncryptionFailed)?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieCryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Open a value sealed by [`seal`](Self::seal) for the same cookie name.
    ///
    /// Returns `None` for malformed, tampered, mis-named or expired input.
    pub fn open(&self, name: &str, sealed: &str) -> Option<String> {
        let data = URL_SAFE_NO_PAD.decode(sealed.trim()).ok()?;
        if data.len() < NONCE_SIZE {
            return None;
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .ok()?;

        let envelope: Envelope = serde_json::from_slice(&plaintext).ok()?;
        if envelope.exp <= Utc::now().timestamp() {
            return None;
        }
        Some(envelope.v)
    }
}

/// `len` bytes from the OS CSPRNG, base64url encoded.
pub fn random_token(len: usize) -> String {
    use aes_gcm::aead::rand_core::RngCore;
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn crypto() -> CookieCrypto {
        CookieCrypto::from_secret(SECRET).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let c = crypto();
        let sealed = c
            .seal("daytona-sandbox-auth-sb1", "sb1", Duration::from_secs(3600))
            .unwrap();
        assert!(!sealed.contains("sb1"));
        assert_eq!(c.open("daytona-sandbox-auth-sb1", &sealed).as_deref(), Some("sb1"));
    }

    #[test]
    fn test_tampered_value_fails_closed() {
        let c = crypto();
        let sealed = c.seal("n", "sb1", Duration::from_secs(60)).unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert!(c.open("n", &tampered).is_none());
    }

    #[test]
    fn test_wrong_cookie_name_fails() {
        let c = crypto();
        let sealed = c
            .seal("daytona-sandbox-auth-sb1", "sb1", Duration::from_secs(60))
            .unwrap();
        assert!(c.open("daytona-sandbox-auth-sb2", &sealed).is_none());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = crypto().seal("n", "v", Duration::from_secs(60)).unwrap();
        let other = CookieCrypto::from_secret("another-secret-another-secret-xx").unwrap();
        assert!(other.open("n", &sealed).is_none());
    }

    #[test]
    fn test_expired_envelope_fails() {
        let c = crypto();
        let sealed = c.seal("n", "v", Duration::ZERO).unwrap();
        assert!(c.open("n", &sealed).is_none());
    }

    #[test]
    fn test_garbage_input_fails() {
        let c = crypto();
        assert!(c.open("n", "").is_none());
        assert!(c.open("n", "not base64 !!").is_none());
        assert!(c.open("n", "AAAA").is_none());
    }

    #[test]
    fn test_random_nonce_produces_different_values() {
        let c = crypto();
        let a = c.seal("n", "v", Duration::from_secs(60)).unwrap();
        let b = c.seal("n", "v", Duration::from_secs(60)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            CookieCrypto::from_secret(""),
            Err(CookieCryptoError::EmptySecret)
        ));
    }

    #[test]
    fn test_random_token_length() {
        let token = random_token(32);
        assert_eq!(token.len(), 43);
        assert_ne!(token, random_token(32));
    }
}

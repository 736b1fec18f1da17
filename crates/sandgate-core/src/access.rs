//! Cached access decisions.
//!
//! Every question the authenticator asks the control plane goes through
//! here: is the sandbox public, is this preview key valid, does this bearer
//! token grant access, is this identifier a signed preview token. Answers are
//! cached so a busy sandbox does not turn every request into a control-plane
//! round trip.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use sandgate_types::error::ControlPlaneError;

use crate::cache::{BoxCacheStore, Cache};
use crate::control_plane::{ControlPlane, interpret_check};

/// Attempts per validation before the error is propagated.
pub const AUTH_VALIDATION_RETRIES: u32 = 2;
/// Fixed pause between validation attempts.
pub const AUTH_VALIDATION_RETRY_DELAY: Duration = Duration::from_millis(250);

pub const AUTH_CACHE_TTL: Duration = Duration::from_secs(2 * 60);
pub const PUBLIC_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const SIGNED_TOKEN_CACHE_TTL: Duration = Duration::from_secs(2 * 60);

/// Cache key for a `(sandbox, credential)` pair.
///
/// The credential is hashed so raw keys and tokens never reach a shared store.
pub fn credential_cache_key(sandbox_id: &str, credential: &str) -> String {
    format!("{}:{:x}", sandbox_id, Sha256::digest(credential.as_bytes()))
}

/// Memoize a yes/no validation for `(sandbox_id, credential)`.
///
/// On a cache hit the stored answer is returned. Otherwise `check` runs up
/// to [`AUTH_VALIDATION_RETRIES`] times; the first `Ok` answer is cached and
/// returned. If every attempt fails the last error is returned and nothing
/// is cached.
pub async fn validate_and_cache<F, Fut>(
    cache: &Cache<bool>,
    sandbox_id: &str,
    credential: &str,
    mut check: F,
) -> Result<bool, ControlPlaneError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ControlPlaneError>>,
{
    let key = credential_cache_key(sandbox_id, credential);
    if let Ok(valid) = cache.get(&key).await {
        debug!(sandbox_id, valid, "auth decision cache hit");
        return Ok(valid);
    }

    let mut attempt = 1;
    let valid = loop {
        match check().await {
            Ok(valid) => break valid,
            Err(e) if attempt < AUTH_VALIDATION_RETRIES => {
                warn!(
                    sandbox_id,
                    attempt,
                    max = AUTH_VALIDATION_RETRIES,
                    error = %e,
                    "auth validation failed, retrying"
                );
                tokio::time::sleep(AUTH_VALIDATION_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    };

    if let Err(e) = cache.set(&key, &valid, AUTH_CACHE_TTL).await {
        warn!(sandbox_id, error = %e, "failed to cache auth decision");
    }
    Ok(valid)
}

/// Control-plane access checks with caching.
pub struct AccessValidator<C> {
    control_plane: Arc<C>,
    public: Cache<bool>,
    auth: Cache<bool>,
    signed_tokens: Cache<Option<String>>,
}

impl<C: ControlPlane> AccessValidator<C> {
    pub fn new(control_plane: Arc<C>, store: BoxCacheStore) -> Self {
        Self {
            control_plane,
            public: Cache::new(store.clone(), "public"),
            auth: Cache::new(store.clone(), "auth"),
            signed_tokens: Cache::new(store, "token"),
        }
    }

    /// Whether the sandbox is viewable without credentials.
    ///
    /// Any answer other than 2xx, including a failed call, counts as private.
    /// The answer is cached for an hour.
    pub async fn is_public(&self, sandbox_id: &str) -> bool {
        if let Ok(public) = self.public.get(sandbox_id).await {
            return public;
        }

        let public = match self.control_plane.is_sandbox_public(sandbox_id).await {
            Ok(()) => true,
            Err(e) => {
                if !e.is_definitive_denial() {
                    warn!(sandbox_id, error = %e, "public check failed, treating sandbox as private");
                }
                false
            }
        };

        if let Err(e) = self.public.set(sandbox_id, &public, PUBLIC_CACHE_TTL).await {
            warn!(sandbox_id, error = %e, "failed to cache public flag");
        }
        public
    }

    /// Validate a sandbox-scoped preview key.
    pub async fn is_auth_key_valid(
        &self,
        sandbox_id: &str,
        auth_key: &str,
    ) -> Result<bool, ControlPlaneError> {
        let control_plane = &self.control_plane;
        validate_and_cache(&self.auth, sandbox_id, auth_key, || async move {
            interpret_check(control_plane.is_valid_auth_token(sandbox_id, auth_key).await)
        })
        .await
    }

    /// Validate a user bearer token against the sandbox, cached.
    pub async fn has_bearer_access(
        &self,
        sandbox_id: &str,
        bearer_token: &str,
    ) -> Result<bool, ControlPlaneError> {
        let control_plane = &self.control_plane;
        validate_and_cache(&self.auth, sandbox_id, bearer_token, || async move {
            interpret_check(control_plane.has_sandbox_access(sandbox_id, bearer_token).await)
        })
        .await
    }

    /// Single uncached access check, used right after an OIDC code exchange.
    pub async fn has_sandbox_access(
        &self,
        sandbox_id: &str,
        bearer_token: &str,
    ) -> Result<bool, ControlPlaneError> {
        interpret_check(self.control_plane.has_sandbox_access(sandbox_id, bearer_token).await)
    }

    /// Resolve `identifier` as a signed preview token for `port`.
    ///
    /// `Ok(None)` means the control plane does not recognise it as a token,
    /// so it should be treated as a plain sandbox ID. Both outcomes are
    /// cached; transient failures are not.
    pub async fn resolve_signed_token(
        &self,
        identifier: &str,
        port: u16,
    ) -> Result<Option<String>, ControlPlaneError> {
        let key = format!("{identifier}:{port}");
        if let Ok(resolved) = self.signed_tokens.get(&key).await {
            return Ok(resolved);
        }

        let resolved = match self
            .control_plane
            .sandbox_id_from_signed_token(identifier, port)
            .await
        {
            Ok(sandbox_id) => Some(sandbox_id),
            Err(e) if e.is_definitive_denial() => None,
            Err(e) => return Err(e),
        };

        if let Err(e) = self
            .signed_tokens
            .set(&key, &resolved, SIGNED_TOKEN_CACHE_TTL)
            .await
        {
            warn!(error = %e, "failed to cache signed token resolution");
        }
        Ok(resolved)
    }
}

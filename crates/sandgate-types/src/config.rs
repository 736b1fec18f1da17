//! Gateway configuration types.
//!
//! `GatewayConfig` mirrors the `sandgate.toml` file. Every section has
//! defaults so a partial file (or none at all, with environment overrides)
//! is enough to start the gateway. `validate()` enforces the settings the
//! gateway cannot run without.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Minimum length of the cookie secret in bytes.
pub const MIN_COOKIE_SECRET_LEN: usize = 32;

/// Top-level configuration for the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub proxy: ProxyConfig,
    pub tls: TlsConfig,
    pub control_plane: ControlPlaneConfig,
    pub oidc: OidcConfig,
    pub cookie: CookieConfig,
    pub cache: CacheConfig,
}

impl GatewayConfig {
    /// Check the settings the gateway cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.domain.trim().is_empty() {
            return Err(ConfigError::Invalid("proxy.domain is required".to_string()));
        }
        if self.control_plane.url.trim().is_empty() {
            return Err(ConfigError::Invalid("control_plane.url is required".to_string()));
        }
        if self.tls.enabled && (self.tls.cert_file.is_none() || self.tls.key_file.is_none()) {
            return Err(ConfigError::Invalid(
                "tls.cert_file and tls.key_file are required when TLS is enabled".to_string(),
            ));
        }
        if self.cache.backend == CacheBackendKind::Redis
            && self.cache.redis_url.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Invalid(
                "cache.redis_url is required for the redis cache backend".to_string(),
            ));
        }
        if self.cookie.secret.len() < MIN_COOKIE_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "cookie.secret must be at least {MIN_COOKIE_SECRET_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// Where and how the gateway listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub port: u16,
    /// Public domain of the gateway itself (e.g. `proxy.example.com`).
    pub domain: String,
    /// Scheme clients use to reach the gateway (`http` or `https`).
    pub protocol: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            domain: String::new(),
            protocol: "http".to_string(),
        }
    }
}

impl ProxyConfig {
    /// `<protocol>://<domain>`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Whether clients reach the gateway over TLS (possibly terminated upstream).
    pub fn is_secure(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("https")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub url: String,
    /// Service credential sent as `Authorization: Bearer`.
    pub api_key: String,
    /// Per-call timeout.
    pub timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

impl fmt::Debug for ControlPlaneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Identity provider settings for the authorization-code + PKCE flow.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Issuer URL reachable from the gateway (may be an internal address).
    pub domain: String,
    /// Issuer URL as seen by browsers, when it differs from `domain`.
    pub public_domain: Option<String>,
    pub audience: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            domain: String::new(),
            public_domain: None,
            audience: None,
            timeout_secs: 10,
        }
    }
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("domain", &self.domain)
            .field("public_domain", &self.public_domain)
            .field("audience", &self.audience)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Key material for the cookie envelope.
    pub secret: String,
    /// Domain attribute for session cookies; defaults to the request host.
    pub domain: Option<String>,
}

impl fmt::Debug for CookieConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieConfig")
            .field("secret", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Which cache backend to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Process-local map.
    #[default]
    Local,
    /// Shared Redis store.
    Redis,
}

impl fmt::Display for CacheBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendKind::Local => write!(f, "local"),
            CacheBackendKind::Redis => write!(f, "redis"),
        }
    }
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "memory" => Ok(CacheBackendKind::Local),
            "redis" => Ok(CacheBackendKind::Redis),
            other => Err(format!("invalid cache backend: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    /// Prefix for every key written to a shared store.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Local,
            redis_url: None,
            key_prefix: "sandgate".to_string(),
        }
    }
}

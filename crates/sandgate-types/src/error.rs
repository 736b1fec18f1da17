use thiserror::Error;

/// Errors from control-plane calls.
///
/// A `Status` error carrying a 4xx code other than 408/429 is a definitive
/// "no" from the control plane; everything else may be transient.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("control plane returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("control plane request failed: {0}")]
    Transport(String),

    #[error("failed to decode control plane response: {0}")]
    Decode(String),
}

impl ControlPlaneError {
    /// HTTP status code, if the control plane answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ControlPlaneError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 4xx other than 408 (timeout) and 429 (rate limit).
    pub fn is_definitive_denial(&self) -> bool {
        matches!(self.status(), Some(code) if (400..500).contains(&code) && code != 408 && code != 429)
    }
}

/// Errors from cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key is absent or its entry has outlived its TTL.
    #[error("cache miss")]
    Miss,

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache codec error: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }
}

/// Gateway-level failure taxonomy surfaced to clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed host/path, malformed OIDC callback, unparseable target URL.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Indistinguishable from "sandbox does not exist".
    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// The sandbox is (re)starting; the client should retry.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String, retry_after_secs: u64 },
}

/// Errors from loading or validating gateway configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitive_denial_classification() {
        let status = |code| ControlPlaneError::Status {
            status: code,
            message: String::new(),
        };
        assert!(status(401).is_definitive_denial());
        assert!(status(403).is_definitive_denial());
        assert!(status(404).is_definitive_denial());
        assert!(!status(408).is_definitive_denial());
        assert!(!status(429).is_definitive_denial());
        assert!(!status(500).is_definitive_denial());
        assert!(!ControlPlaneError::Transport("refused".into()).is_definitive_denial());
    }

    #[test]
    fn test_cache_miss_helper() {
        assert!(CacheError::Miss.is_miss());
        assert!(!CacheError::Backend("down".into()).is_miss());
    }

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::NotFound("sandbox not found".to_string());
        assert_eq!(err.to_string(), "not found: sandbox not found");
    }
}

use serde::{Deserialize, Serialize};

use std::fmt;

/// A resolved backend for a sandbox or snapshot.
///
/// Written to the cache as JSON, so the API key lives in plain form here;
/// `Debug` redacts it so the struct can be logged safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerInfo {
    /// Base URL of the runner's proxy API (no trailing slash).
    pub api_url: String,
    /// Credential the runner expects in `X-Daytona-Authorization`.
    pub api_key: String,
}

impl RunnerInfo {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Value for the `X-Daytona-Authorization` header sent to the runner.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

impl fmt::Debug for RunnerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerInfo")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let info = RunnerInfo::new("http://runner-1:3000/", "k");
        assert_eq!(info.api_url, "http://runner-1:3000");
    }

    #[test]
    fn test_debug_redacts_key() {
        let info = RunnerInfo::new("http://runner-1:3000", "super-secret-key");
        let dbg = format!("{info:?}");
        assert!(!dbg.contains("super-secret-key"));
        assert!(dbg.contains("runner-1"));
    }

    #[test]
    fn test_authorization_header_value() {
        let info = RunnerInfo::new("http://r", "abc");
        assert_eq!(info.authorization(), "Bearer abc");
    }
}

//! ApiClient -- REST implementation of the [`ControlPlane`] port.
//!
//! Every call carries the gateway's service credential as
//! `Authorization: Bearer <apiKey>`, except the calls made on behalf of a
//! user (`list_organizations`, `has_sandbox_access`), which forward the
//! user's own token instead.
//!
//! The service credential is wrapped in [`SecretString`] and never logged.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use sandgate_core::control_plane::ControlPlane;
use sandgate_types::config::ControlPlaneConfig;
use sandgate_types::control_plane::{
    OrganizationDto, RunnerDto, SandboxInfoDto, SignedTokenSandboxDto, SnapshotDto,
    ToolboxProxyUrlDto,
};
use sandgate_types::error::ControlPlaneError;

/// Longest error body kept in a `ControlPlaneError::Status` message.
const MAX_ERROR_BODY: usize = 512;

pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
}

impl ApiClient {
    pub fn new(config: &ControlPlaneConfig) -> Result<Self, ControlPlaneError> {
        let base_url = Url::parse(config.url.trim())
            .map_err(|e| ControlPlaneError::Transport(format!("invalid control plane URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ControlPlaneError::Transport(format!(
                "control plane URL cannot be a base: {base_url}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ControlPlaneError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: SecretString::from(config.api_key.clone()),
        })
    }

    /// `<base>/<segments...>` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn get(&self, segments: &[&str]) -> RequestBuilder {
        self.client
            .get(self.endpoint(segments))
            .bearer_auth(self.api_key.expose_secret())
    }

    fn post(&self, segments: &[&str]) -> RequestBuilder {
        self.client
            .post(self.endpoint(segments))
            .bearer_auth(self.api_key.expose_secret())
    }

    /// Send and turn any non-2xx answer into `ControlPlaneError::Status`.
    async fn send(request: RequestBuilder) -> Result<Response, ControlPlaneError> {
        let response = request
            .send()
            .await
            .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        debug!(status = status.as_u16(), "control plane returned error status");
        Err(ControlPlaneError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ControlPlaneError> {
        Self::send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ControlPlaneError::Decode(e.to_string()))
    }
}

impl ControlPlane for ApiClient {
    async fn get_runner_by_sandbox(&self, sandbox_id: &str) -> Result<RunnerDto, ControlPlaneError> {
        Self::send_json(self.get(&["runners", "by-sandbox", sandbox_id])).await
    }

    async fn get_runner(&self, runner_id: &str) -> Result<RunnerDto, ControlPlaneError> {
        Self::send_json(self.get(&["runners", runner_id])).await
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotDto, ControlPlaneError> {
        Self::send_json(self.get(&["snapshots", snapshot_id])).await
    }

    async fn list_organizations(
        &self,
        bearer_token: &str,
    ) -> Result<Vec<OrganizationDto>, ControlPlaneError> {
        let request = self
            .client
            .get(self.endpoint(&["organizations"]))
            .bearer_auth(bearer_token);
        Self::send_json(request).await
    }

    async fn get_sandbox_info(&self, sandbox_id: &str) -> Result<SandboxInfoDto, ControlPlaneError> {
        Self::send_json(self.get(&["preview", sandbox_id, "info"])).await
    }

    async fn is_sandbox_public(&self, sandbox_id: &str) -> Result<(), ControlPlaneError> {
        Self::send(self.get(&["preview", sandbox_id, "public"])).await?;
        Ok(())
    }

    async fn is_valid_auth_token(
        &self,
        sandbox_id: &str,
        auth_token: &str,
    ) -> Result<(), ControlPlaneError> {
        Self::send(self.get(&["preview", sandbox_id, "validate", auth_token])).await?;
        Ok(())
    }

    async fn has_sandbox_access(
        &self,
        sandbox_id: &str,
        bearer_token: &str,
    ) -> Result<(), ControlPlaneError> {
        let request = self
            .client
            .get(self.endpoint(&["preview", sandbox_id, "access"]))
            .bearer_auth(bearer_token);
        Self::send(request).await?;
        Ok(())
    }

    async fn sandbox_id_from_signed_token(
        &self,
        token: &str,
        port: u16,
    ) -> Result<String, ControlPlaneError> {
        let port = port.to_string();
        let dto: SignedTokenSandboxDto = Self::send_json(self.get(&[
            "preview",
            "signed",
            token,
            "ports",
            &port,
            "sandbox-id",
        ]))
        .await?;
        Ok(dto.sandbox_id)
    }

    async fn start_sandbox(&self, sandbox_id: &str) -> Result<(), ControlPlaneError> {
        Self::send(self.post(&["sandbox", sandbox_id, "start"])).await?;
        Ok(())
    }

    async fn update_last_activity(&self, sandbox_id: &str) -> Result<(), ControlPlaneError> {
        Self::send(self.post(&["sandbox", sandbox_id, "last-activity"])).await?;
        Ok(())
    }

    async fn get_toolbox_proxy_url(&self, sandbox_id: &str) -> Result<String, ControlPlaneError> {
        let dto: ToolboxProxyUrlDto =
            Self::send_json(self.get(&["sandbox", sandbox_id, "toolbox-proxy-url"])).await?;
        Ok(dto.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> ApiClient {
        ApiClient::new(&ControlPlaneConfig {
            url: url.to_string(),
            api_key: "svc-key".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_appends_to_base_path() {
        let c = client("http://api:3000/api");
        assert_eq!(
            c.endpoint(&["runners", "by-sandbox", "sb-1"]).as_str(),
            "http://api:3000/api/runners/by-sandbox/sb-1"
        );
    }

    #[test]
    fn test_endpoint_handles_trailing_slash() {
        let c = client("http://api:3000/api/");
        assert_eq!(
            c.endpoint(&["preview", "sb", "info"]).as_str(),
            "http://api:3000/api/preview/sb/info"
        );
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let c = client("http://api:3000");
        let url = c.endpoint(&["preview", "sb", "validate", "a/b c"]);
        assert_eq!(url.as_str(), "http://api:3000/preview/sb/validate/a%2Fb%20c");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = ApiClient::new(&ControlPlaneConfig {
            url: "not a url".to_string(),
            api_key: String::new(),
            timeout_secs: 5,
        });
        assert!(matches!(result, Err(ControlPlaneError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_is_transport_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let c = client("http://127.0.0.1:9");
        let err = c.get_sandbox_info("sb").await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Transport(_)));
        assert!(!err.is_definitive_denial());
    }
}

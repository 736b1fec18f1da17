//! DTOs returned by the control-plane REST API.
//!
//! Field names follow the control plane's camelCase JSON.

use serde::{Deserialize, Serialize};

use crate::sandbox::{SandboxState, WakeOnRequest};

/// A runner as described by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerDto {
    pub id: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
}

/// Preview-facing sandbox information: current state and wake policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfoDto {
    pub state: SandboxState,
    #[serde(default)]
    pub wake_on_request: WakeOnRequest,
}

/// A snapshot and the runner it was first built on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDto {
    pub id: String,
    #[serde(default, rename = "ref")]
    pub snapshot_ref: Option<String>,
    pub organization_id: String,
    #[serde(default)]
    pub initial_runner_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTokenSandboxDto {
    pub sandbox_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolboxProxyUrlDto {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_dto_without_proxy_url() {
        let dto: RunnerDto = serde_json::from_str(r#"{"id":"r1","apiKey":"k"}"#).unwrap();
        assert!(dto.proxy_url.is_none());
        assert_eq!(dto.api_key, "k");
    }

    #[test]
    fn test_sandbox_info_defaults_wake_policy() {
        let dto: SandboxInfoDto = serde_json::from_str(r#"{"state":"stopped"}"#).unwrap();
        assert_eq!(dto.state, SandboxState::Stopped);
        assert_eq!(dto.wake_on_request, WakeOnRequest::None);
    }

    #[test]
    fn test_snapshot_ref_rename() {
        let dto: SnapshotDto = serde_json::from_str(
            r#"{"id":"s1","ref":"registry/img:1","organizationId":"org","initialRunnerId":"r9"}"#,
        )
        .unwrap();
        assert_eq!(dto.snapshot_ref.as_deref(), Some("registry/img:1"));
        assert_eq!(dto.initial_runner_id.as_deref(), Some("r9"));
    }
}

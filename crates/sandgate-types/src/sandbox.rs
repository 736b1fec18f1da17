use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Sandbox lifecycle states as reported by the control plane.
///
/// Unrecognised values deserialize to `Unknown` so a newer control plane
/// never breaks the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Creating,
    Restoring,
    Destroyed,
    Destroying,
    Started,
    Stopped,
    Starting,
    Stopping,
    Error,
    BuildFailed,
    PendingBuild,
    BuildingSnapshot,
    PullingSnapshot,
    Archived,
    Archiving,
    #[serde(other)]
    Unknown,
}

impl SandboxState {
    /// States from which a start request cannot recover.
    pub fn is_unrecoverable(self) -> bool {
        matches!(self, SandboxState::Error | SandboxState::BuildFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SandboxState::Creating => "creating",
            SandboxState::Restoring => "restoring",
            SandboxState::Destroyed => "destroyed",
            SandboxState::Destroying => "destroying",
            SandboxState::Started => "started",
            SandboxState::Stopped => "stopped",
            SandboxState::Starting => "starting",
            SandboxState::Stopping => "stopping",
            SandboxState::Error => "error",
            SandboxState::BuildFailed => "build_failed",
            SandboxState::PendingBuild => "pending_build",
            SandboxState::BuildingSnapshot => "building_snapshot",
            SandboxState::PullingSnapshot => "pulling_snapshot",
            SandboxState::Archived => "archived",
            SandboxState::Archiving => "archiving",
            SandboxState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-sandbox policy deciding whether inbound traffic auto-starts a stopped sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeOnRequest {
    Http,
    Ssh,
    HttpAndSsh,
    /// Also covers policies this gateway does not know.
    #[default]
    #[serde(other)]
    None,
}

impl WakeOnRequest {
    /// Whether HTTP traffic should wake the sandbox.
    pub fn wakes_on_http(self) -> bool {
        matches!(self, WakeOnRequest::Http | WakeOnRequest::HttpAndSsh)
    }
}

impl fmt::Display for WakeOnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeOnRequest::None => write!(f, "none"),
            WakeOnRequest::Http => write!(f, "http"),
            WakeOnRequest::Ssh => write!(f, "ssh"),
            WakeOnRequest::HttpAndSsh => write!(f, "http_and_ssh"),
        }
    }
}

impl FromStr for WakeOnRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(WakeOnRequest::None),
            "http" => Ok(WakeOnRequest::Http),
            "ssh" => Ok(WakeOnRequest::Ssh),
            "http_and_ssh" => Ok(WakeOnRequest::HttpAndSsh),
            other => Err(format!("invalid wake-on-request policy: '{other}'")),
        }
    }
}

/// Cached observation of a sandbox's state and wake policy.
///
/// `wake_on_request` is `None` when the entry was written after a wake
/// completed and the policy has not been re-read yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStateInfo {
    pub state: SandboxState,
    #[serde(default)]
    pub wake_on_request: Option<WakeOnRequest>,
}

impl SandboxStateInfo {
    pub fn new(state: SandboxState, wake_on_request: WakeOnRequest) -> Self {
        Self {
            state,
            wake_on_request: Some(wake_on_request),
        }
    }

    /// A freshly started sandbox whose wake policy is not known.
    pub fn started() -> Self {
        Self {
            state: SandboxState::Started,
            wake_on_request: None,
        }
    }

    /// Stopped and configured to be woken by HTTP traffic.
    pub fn is_wakeable(&self) -> bool {
        self.state == SandboxState::Stopped
            && self.wake_on_request.is_some_and(WakeOnRequest::wakes_on_http)
    }
}

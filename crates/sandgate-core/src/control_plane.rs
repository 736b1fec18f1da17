//! Control-plane port.
//!
//! The control plane is the system of record for sandboxes, runners and
//! snapshots. The gateway only reads from it, asks it to start sandboxes and
//! reports activity. `sandgate-infra` provides the REST implementation.

use std::future::Future;

use sandgate_types::control_plane::{OrganizationDto, RunnerDto, SandboxInfoDto, SnapshotDto};
use sandgate_types::error::ControlPlaneError;

/// Typed client for the control-plane API.
///
/// Yes/no check methods (`is_sandbox_public`, `is_valid_auth_token`,
/// `has_sandbox_access`) answer with `Ok(())` on 2xx and a
/// `ControlPlaneError::Status` otherwise; use [`interpret_check`] to turn
/// that into a yes/no answer.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait ControlPlane: Send + Sync {
    /// Runner currently hosting `sandbox_id`.
    fn get_runner_by_sandbox(
        &self,
        sandbox_id: &str,
    ) -> impl Future<Output = Result<RunnerDto, ControlPlaneError>> + Send;

    fn get_runner(
        &self,
        runner_id: &str,
    ) -> impl Future<Output = Result<RunnerDto, ControlPlaneError>> + Send;

    fn get_snapshot(
        &self,
        snapshot_id: &str,
    ) -> impl Future<Output = Result<SnapshotDto, ControlPlaneError>> + Send;

    /// Organizations visible to the holder of `bearer_token`.
    fn list_organizations(
        &self,
        bearer_token: &str,
    ) -> impl Future<Output = Result<Vec<OrganizationDto>, ControlPlaneError>> + Send;

    /// Current lifecycle state and wake-on-request policy.
    fn get_sandbox_info(
        &self,
        sandbox_id: &str,
    ) -> impl Future<Output = Result<SandboxInfoDto, ControlPlaneError>> + Send;

    fn is_sandbox_public(
        &self,
        sandbox_id: &str,
    ) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;

    /// Whether `auth_token` is a valid sandbox-scoped preview key.
    fn is_valid_auth_token(
        &self,
        sandbox_id: &str,
        auth_token: &str,
    ) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;

    /// Whether the holder of `bearer_token` may access the sandbox.
    fn has_sandbox_access(
        &self,
        sandbox_id: &str,
        bearer_token: &str,
    ) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;

    /// Resolve a signed preview token issued for `port` to its sandbox ID.
    fn sandbox_id_from_signed_token(
        &self,
        token: &str,
        port: u16,
    ) -> impl Future<Output = Result<String, ControlPlaneError>> + Send;

    fn start_sandbox(
        &self,
        sandbox_id: &str,
    ) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;

    fn update_last_activity(
        &self,
        sandbox_id: &str,
    ) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;

    /// Public toolbox proxy URL the control plane advertises for a sandbox.
    fn get_toolbox_proxy_url(
        &self,
        sandbox_id: &str,
    ) -> impl Future<Output = Result<String, ControlPlaneError>> + Send;
}

/// Map an access-check result to a boolean.
///
/// 2xx is `true`, a definitive 4xx is `false`, anything else is an error the
/// caller may retry.
pub fn interpret_check(result: Result<(), ControlPlaneError>) -> Result<bool, ControlPlaneError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_definitive_denial() => Ok(false),
        Err(e) => Err(e),
    }
}

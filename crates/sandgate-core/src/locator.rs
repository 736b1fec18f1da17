//! Backend location: sandbox or snapshot to runner.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use sandgate_types::control_plane::{RunnerDto, SnapshotDto};
use sandgate_types::error::ControlPlaneError;
use sandgate_types::runner::RunnerInfo;

use crate::cache::{BoxCacheStore, Cache};
use crate::control_plane::ControlPlane;

pub const RUNNER_CACHE_TTL: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("runner proxy URL not found for runner {0}")]
    MissingProxyUrl(String),

    #[error("snapshot {0} has no initial runner")]
    MissingInitialRunner(String),
}

/// Resolves sandboxes and snapshots to the runner serving them.
///
/// Lookups go cache-first; a miss falls back to the control plane and the
/// answer is cached for [`RUNNER_CACHE_TTL`].
pub struct BackendLocator<C> {
    control_plane: Arc<C>,
    sandbox_runners: Cache<RunnerInfo>,
    snapshot_runners: Cache<RunnerInfo>,
}

impl<C: ControlPlane> BackendLocator<C> {
    pub fn new(control_plane: Arc<C>, store: BoxCacheStore) -> Self {
        Self {
            control_plane,
            sandbox_runners: Cache::new(store.clone(), "runner"),
            snapshot_runners: Cache::new(store, "snapshot"),
        }
    }

    /// Runner hosting `sandbox_id`.
    pub async fn get_sandbox_runner(&self, sandbox_id: &str) -> Result<RunnerInfo, LocatorError> {
        if let Ok(info) = self.sandbox_runners.get(sandbox_id).await {
            debug!(sandbox_id, "runner cache hit");
            return Ok(info);
        }

        let runner = self.control_plane.get_runner_by_sandbox(sandbox_id).await?;
        let info = runner_info(runner)?;

        if let Err(e) = self
            .sandbox_runners
            .set(sandbox_id, &info, RUNNER_CACHE_TTL)
            .await
        {
            warn!(sandbox_id, error = %e, "failed to cache runner info");
        }
        Ok(info)
    }

    /// Runner that first built `snapshot`; build logs live there.
    pub async fn get_snapshot_runner(&self, snapshot: &SnapshotDto) -> Result<RunnerInfo, LocatorError> {
        if let Ok(info) = self.snapshot_runners.get(&snapshot.id).await {
            debug!(snapshot_id = %snapshot.id, "snapshot runner cache hit");
            return Ok(info);
        }

        let runner_id = snapshot
            .initial_runner_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LocatorError::MissingInitialRunner(snapshot.id.clone()))?;
        let runner = self.control_plane.get_runner(runner_id).await?;
        let info = runner_info(runner)?;

        if let Err(e) = self
            .snapshot_runners
            .set(&snapshot.id, &info, RUNNER_CACHE_TTL)
            .await
        {
            warn!(snapshot_id = %snapshot.id, error = %e, "failed to cache snapshot runner info");
        }
        Ok(info)
    }

    /// Forget the cached runner; a restarted sandbox may land elsewhere.
    pub async fn invalidate_sandbox(&self, sandbox_id: &str) {
        if let Err(e) = self.sandbox_runners.delete(sandbox_id).await {
            warn!(sandbox_id, error = %e, "failed to invalidate runner cache");
        }
    }
}

fn runner_info(runner: RunnerDto) -> Result<RunnerInfo, LocatorError> {
    match runner.proxy_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(RunnerInfo::new(url, runner.api_key)),
        _ => Err(LocatorError::MissingProxyUrl(runner.id)),
    }
}

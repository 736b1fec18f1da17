//! Wake-on-request orchestration.
//!
//! Sandboxes can be stopped to save resources and configured to start again
//! when traffic arrives. Before a request is forwarded the dispatcher calls
//! [`WakeOrchestrator::ensure_started`], which consults a short-lived state
//! cache (falling back to the control plane) and, for a stopped sandbox with
//! an HTTP wake policy, starts it and polls until it reports `started`.
//!
//! When the proactive check is skipped or stale, the forwarder can fall back
//! to [`WakeOrchestrator::try_wake`] after a connection error or a 502/503/504
//! from the runner.
//!
//! Concurrent wakes of the same sandbox inside one process share a single
//! start-and-poll sequence.

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sandgate_types::error::ControlPlaneError;
use sandgate_types::sandbox::{SandboxState, SandboxStateInfo};

use crate::cache::{BoxCacheStore, Cache};
use crate::control_plane::ControlPlane;
use crate::locator::BackendLocator;

/// Error substrings that suggest the sandbox behind the runner is down.
const WAKEABLE_ERROR_MARKERS: &[&str] = &[
    "connection refused",
    "no such host",
    "no route to host",
    "i/o timeout",
    "connection reset",
    "failed to lookup address",
    "timed out",
];

/// Timing knobs for the wake state machine.
#[derive(Debug, Clone)]
pub struct WakeSettings {
    /// Give up waiting for `started` after this long.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Cache TTL for states other than `started`.
    pub state_ttl: Duration,
    pub started_ttl: Duration,
    /// Grace period after `started` so in-sandbox services can boot.
    pub post_start_delay: Duration,
}

impl Default for WakeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            state_ttl: Duration::from_secs(5),
            started_ttl: Duration::from_secs(30),
            post_start_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum WakeError {
    #[error("failed to start sandbox: {0}")]
    StartFailed(#[source] ControlPlaneError),

    #[error("timed out after {0:?} waiting for sandbox to start")]
    Timeout(Duration),

    #[error("wake cancelled")]
    Cancelled,

    #[error("sandbox entered unrecoverable state '{0}'")]
    Unrecoverable(SandboxState),
}

pub struct WakeOrchestrator<C> {
    control_plane: Arc<C>,
    locator: Arc<BackendLocator<C>>,
    states: Cache<SandboxStateInfo>,
    inflight: InflightMap,
    settings: WakeSettings,
}

impl<C: ControlPlane> WakeOrchestrator<C> {
    pub fn new(
        control_plane: Arc<C>,
        locator: Arc<BackendLocator<C>>,
        store: BoxCacheStore,
        settings: WakeSettings,
    ) -> Self {
        Self {
            control_plane,
            locator,
            states: Cache::new(store, "state"),
            inflight: DashMap::new(),
            settings,
        }
    }

    /// Make sure a wakeable sandbox is running before its request is forwarded.
    ///
    /// Returns `Ok(())` when the request should proceed: the sandbox is
    /// started, in a state the gateway leaves alone, or its state could not
    /// be read. Returns an error only when a wake was attempted and failed.
    pub async fn ensure_started(
        &self,
        sandbox_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WakeError> {
        let info = match self.states.get(sandbox_id).await {
            Ok(info) => {
                debug!(sandbox_id, state = %info.state, "sandbox state cache hit");
                info
            }
            Err(_) => match self.fetch_state(sandbox_id).await {
                Some(info) => info,
                None => return Ok(()),
            },
        };

        if info.is_wakeable() {
            info!(sandbox_id, "sandbox is stopped, starting it proactively");
            return self.start_and_wait(sandbox_id, cancel).await;
        }
        Ok(())
    }

    /// Reactive wake after the runner failed to serve a request.
    ///
    /// Reads live state (bypassing the cache) and wakes only a stopped
    /// sandbox with an HTTP wake policy. Returns whether the sandbox is now
    /// started.
    pub async fn try_wake(&self, sandbox_id: &str, cancel: &CancellationToken) -> bool {
        let info = match self.control_plane.get_sandbox_info(sandbox_id).await {
            Ok(dto) => SandboxStateInfo::new(dto.state, dto.wake_on_request),
            Err(e) => {
                error!(sandbox_id, error = %e, "failed to get sandbox info for reactive wake");
                return false;
            }
        };

        if !info.is_wakeable() {
            debug!(sandbox_id, state = %info.state, "sandbox not wakeable, not waking");
            return false;
        }

        // A cached `started` is stale if the control plane says stopped.
        if let Err(e) = self.states.delete(sandbox_id).await {
            warn!(sandbox_id, error = %e, "failed to clear state cache");
        }

        info!(sandbox_id, "waking sandbox after upstream failure");
        match self.start_and_wait(sandbox_id, cancel).await {
            Ok(()) => true,
            Err(e) => {
                warn!(sandbox_id, error = %e, "reactive wake failed");
                false
            }
        }
    }

    /// Start the sandbox and poll until it is running.
    ///
    /// Serialized per sandbox: a caller that waited behind another wake
    /// returns as soon as it sees the cached `started` state.
    pub async fn start_and_wait(
        &self,
        sandbox_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WakeError> {
        let slot = InflightSlot::join(&self.inflight, sandbox_id);
        let guard = tokio::select! {
            guard = slot.lock.lock() => guard,
            _ = cancel.cancelled() => return Err(WakeError::Cancelled),
        };

        let cached = self.states.get(sandbox_id).await;
        let result = if matches!(cached, Ok(info) if info.state == SandboxState::Started) {
            debug!(sandbox_id, "sandbox already started by a concurrent wake");
            Ok(())
        } else {
            self.start_and_poll(sandbox_id, cancel).await
        };
        drop(guard);
        result
    }

    async fn start_and_poll(
        &self,
        sandbox_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WakeError> {
        self.control_plane
            .start_sandbox(sandbox_id)
            .await
            .map_err(|e| {
                error!(sandbox_id, error = %e, "failed to start sandbox");
                WakeError::StartFailed(e)
            })?;

        self.locator.invalidate_sandbox(sandbox_id).await;
        if let Err(e) = self.states.delete(sandbox_id).await {
            warn!(sandbox_id, error = %e, "failed to clear state cache");
        }

        self.wait_for_started(sandbox_id, cancel).await?;

        if let Err(e) = self
            .states
            .set(sandbox_id, &SandboxStateInfo::started(), self.settings.started_ttl)
            .await
        {
            warn!(sandbox_id, error = %e, "failed to cache started state");
        }

        debug!(
            sandbox_id,
            delay_ms = self.settings.post_start_delay.as_millis() as u64,
            "sandbox started, waiting for services to initialize"
        );
        tokio::time::sleep(self.settings.post_start_delay).await;
        Ok(())
    }

    async fn wait_for_started(
        &self,
        sandbox_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WakeError> {
        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);
        let mut ticker = interval_at(
            Instant::now() + self.settings.poll_interval,
            self.settings.poll_interval,
        );

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(sandbox_id, "timeout waiting for sandbox to start");
                    return Err(WakeError::Timeout(self.settings.timeout));
                }
                _ = cancel.cancelled() => {
                    warn!(sandbox_id, "cancelled while waiting for sandbox to start");
                    return Err(WakeError::Cancelled);
                }
                _ = ticker.tick() => {
                    let state = match self.control_plane.get_sandbox_info(sandbox_id).await {
                        Ok(dto) => dto.state,
                        Err(e) => {
                            error!(sandbox_id, error = %e, "failed to get sandbox info while polling");
                            continue;
                        }
                    };

                    if state == SandboxState::Started {
                        info!(sandbox_id, "sandbox is now started");
                        return Ok(());
                    }
                    if state.is_unrecoverable() {
                        error!(sandbox_id, %state, "sandbox failed to start");
                        return Err(WakeError::Unrecoverable(state));
                    }
                    debug!(sandbox_id, %state, "waiting for sandbox to start");
                }
            }
        }
    }

    async fn fetch_state(&self, sandbox_id: &str) -> Option<SandboxStateInfo> {
        let dto = match self.control_plane.get_sandbox_info(sandbox_id).await {
            Ok(dto) => dto,
            Err(e) => {
                warn!(sandbox_id, error = %e, "failed to get sandbox info, proceeding");
                return None;
            }
        };

        let info = SandboxStateInfo::new(dto.state, dto.wake_on_request);
        let ttl = if info.state == SandboxState::Started {
            self.settings.started_ttl
        } else {
            self.settings.state_ttl
        };
        if let Err(e) = self.states.set(sandbox_id, &info, ttl).await {
            warn!(sandbox_id, error = %e, "failed to cache sandbox state");
        }
        Some(info)
    }
}

type InflightMap = DashMap<String, Arc<Mutex<()>>>;

/// One caller's share of a sandbox's wake lock.
///
/// Dropping the last share removes the map entry, also when the waiting
/// future is dropped before it finishes.
struct InflightSlot<'a> {
    inflight: &'a InflightMap,
    sandbox_id: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn join(inflight: &'a InflightMap, sandbox_id: &'a str) -> Self {
        let lock = inflight
            .entry(sandbox_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self {
            inflight,
            sandbox_id,
            lock,
        }
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // The map and this slot are the only owners left.
        self.inflight.remove_if(self.sandbox_id, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

/// Whether a forwarding error looks like the sandbox is not running.
///
/// Walks the whole source chain, since HTTP clients wrap the underlying
/// socket error.
pub fn is_wakeable_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let wakeable_kind = e.downcast_ref::<io::Error>().is_some_and(|io_err| {
            matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
            )
        });
        if wakeable_kind {
            return true;
        }
        let message = e.to_string().to_lowercase();
        if WAKEABLE_ERROR_MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

/// 502, 503 and 504 from the runner usually mean the sandbox is down.
pub fn is_wakeable_status(status: u16) -> bool {
    matches!(status, 502..=504)
}

//! Activity reporting.
//!
//! The control plane auto-stops idle sandboxes, so the gateway reports
//! traffic as "last activity". Reports are debounced through a presence-only
//! cache marker and, for the lifetime of a request or WebSocket connection,
//! repeated by a background ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, interval_at};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error};

use crate::cache::{BoxCacheStore, Cache};
use crate::control_plane::ControlPlane;

/// How often a kept-alive connection re-reports activity.
pub const ACTIVITY_POLL_INTERVAL: Duration = Duration::from_secs(50);
/// The marker expires slightly before the next tick so no interval is skipped.
pub const ACTIVITY_MARKER_MARGIN: Duration = Duration::from_secs(5);

pub struct ActivityThrottler<C> {
    control_plane: Arc<C>,
    markers: Cache<bool>,
    poll_interval: Duration,
}

impl<C: ControlPlane + 'static> ActivityThrottler<C> {
    pub fn new(control_plane: Arc<C>, store: BoxCacheStore) -> Self {
        Self::with_interval(control_plane, store, ACTIVITY_POLL_INTERVAL)
    }

    pub fn with_interval(control_plane: Arc<C>, store: BoxCacheStore, poll_interval: Duration) -> Self {
        Self {
            control_plane,
            markers: Cache::new(store, "activity"),
            poll_interval,
        }
    }

    fn marker_ttl(&self) -> Duration {
        self.poll_interval.saturating_sub(ACTIVITY_MARKER_MARGIN)
    }

    /// Report activity unless it was reported recently.
    ///
    /// If the marker cannot be read the report is skipped, so a broken cache
    /// never turns into a flood of control-plane calls.
    pub async fn touch(&self, sandbox_id: &str) {
        match self.markers.has(sandbox_id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                error!(sandbox_id, error = %e, "failed to check activity marker, skipping update");
                return;
            }
        }

        if let Err(e) = self.control_plane.update_last_activity(sandbox_id).await {
            error!(sandbox_id, error = %e, "failed to update last activity");
            return;
        }
        debug!(sandbox_id, "reported sandbox activity");

        if let Err(e) = self.markers.set(sandbox_id, &true, self.marker_ttl()).await {
            error!(sandbox_id, error = %e, "failed to set activity marker");
        }
    }

    /// Touch now and keep touching until the returned guard is dropped.
    pub fn keep_alive(self: &Arc<Self>, sandbox_id: &str) -> ActivityGuard {
        let token = CancellationToken::new();
        let child = token.clone();
        let throttler = Arc::clone(self);
        let sandbox_id = sandbox_id.to_string();

        tokio::spawn(async move {
            throttler.touch(&sandbox_id).await;

            let mut ticker = interval_at(
                Instant::now() + throttler.poll_interval,
                throttler.poll_interval,
            );
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => throttler.touch(&sandbox_id).await,
                }
            }
            debug!(sandbox_id, "activity keep-alive stopped");
        });

        ActivityGuard {
            _guard: token.drop_guard(),
        }
    }
}

/// Stops the keep-alive ticker when dropped.
///
/// Attach it to whatever lives as long as the connection: the response body
/// for plain HTTP, the bridge task for WebSockets.
pub struct ActivityGuard {
    _guard: DropGuard,
}

impl ActivityGuard {
    /// Stop the ticker explicitly.
    pub fn stop(self) {}
}

impl std::fmt::Debug for ActivityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Calls, MockControlPlane, memory_store};

    fn throttler() -> (Arc<MockControlPlane>, Arc<ActivityThrottler<MockControlPlane>>) {
        let cp = Arc::new(MockControlPlane::new());
        let throttler = Arc::new(ActivityThrottler::new(cp.clone(), memory_store()));
        (cp, throttler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_is_debounced() {
        let (cp, throttler) = throttler();
        throttler.touch("sb").await;
        throttler.touch("sb").await;
        assert_eq!(Calls::get(&cp.calls.activity), 1);

        tokio::time::advance(ACTIVITY_POLL_INTERVAL - ACTIVITY_MARKER_MARGIN + Duration::from_secs(1)).await;
        throttler.touch("sb").await;
        assert_eq!(Calls::get(&cp.calls.activity), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_sets_no_marker() {
        let (cp, throttler) = throttler();
        *cp.activity_fails.lock().unwrap() = true;
        throttler.touch("sb").await;
        throttler.touch("sb").await;
        assert_eq!(Calls::get(&cp.calls.activity), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_ticks_until_dropped() {
        let (cp, throttler) = throttler();
        let guard = throttler.keep_alive("sb");

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(Calls::get(&cp.calls.activity), 1);

        tokio::time::sleep(ACTIVITY_POLL_INTERVAL).await;
        assert_eq!(Calls::get(&cp.calls.activity), 2);

        drop(guard);
        tokio::time::sleep(ACTIVITY_POLL_INTERVAL * 3).await;
        assert_eq!(Calls::get(&cp.calls.activity), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_ticker() {
        let (cp, throttler) = throttler();
        let guard = throttler.keep_alive("sb");
        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.stop();
        tokio::time::sleep(ACTIVITY_POLL_INTERVAL * 2).await;
        assert_eq!(Calls::get(&cp.calls.activity), 1);
    }
}

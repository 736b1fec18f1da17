//! Application state wiring all gateway components together.
//!
//! The core components are generic over the control-plane port; AppState
//! pins them to the REST client from `sandgate-infra` and shares one cache
//! backend between all of them.

use std::sync::Arc;
use std::time::Duration;

use sandgate_core::access::AccessValidator;
use sandgate_core::activity::ActivityThrottler;
use sandgate_core::locator::BackendLocator;
use sandgate_core::wake::{WakeOrchestrator, WakeSettings};
use sandgate_infra::cache::CacheBackend;
use sandgate_infra::control_plane::ApiClient;
use sandgate_infra::crypto::cookie::CookieCrypto;
use sandgate_infra::oidc::OidcClient;
use sandgate_types::config::GatewayConfig;
use tokio_util::sync::CancellationToken;

use crate::http::cookies::{CookieOptions, strip_port};

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type ConcreteAccessValidator = AccessValidator<ApiClient>;
pub type ConcreteLocator = BackendLocator<ApiClient>;
pub type ConcreteWakeOrchestrator = WakeOrchestrator<ApiClient>;
pub type ConcreteActivityThrottler = ActivityThrottler<ApiClient>;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub control_plane: Arc<ApiClient>,
    pub access: Arc<ConcreteAccessValidator>,
    pub locator: Arc<ConcreteLocator>,
    pub wake: Arc<ConcreteWakeOrchestrator>,
    pub activity: Arc<ConcreteActivityThrottler>,
    pub cookie_crypto: Arc<CookieCrypto>,
    /// `None` when no identity provider is configured; browsers without a
    /// credential then get a 401 instead of a login redirect.
    pub oidc: Option<Arc<OidcClient>>,
    /// Client used to forward requests to runners. Never follows redirects.
    pub upstream: reqwest::Client,
    pub cache: Arc<CacheBackend>,
}

impl AppState {
    /// Build every component from a validated configuration.
    pub async fn init(config: GatewayConfig) -> anyhow::Result<Self> {
        let control_plane = Arc::new(ApiClient::new(&config.control_plane)?);

        let cache = CacheBackend::from_config(&config.cache).await?;
        tracing::info!(backend = %cache.kind(), "cache backend ready");
        let store = cache.store();

        let locator = Arc::new(BackendLocator::new(control_plane.clone(), store.clone()));
        let access = AccessValidator::new(control_plane.clone(), store.clone());
        let wake = WakeOrchestrator::new(
            control_plane.clone(),
            locator.clone(),
            store.clone(),
            WakeSettings::default(),
        );
        let activity = ActivityThrottler::new(control_plane.clone(), store);

        let cookie_crypto = CookieCrypto::from_secret(&config.cookie.secret)?;

        let oidc = if config.oidc.client_id.trim().is_empty() {
            tracing::warn!("OIDC is not configured; private sandboxes require a preview token");
            None
        } else {
            Some(Arc::new(OidcClient::new(&config.oidc)?))
        };

        let upstream = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            control_plane,
            access: Arc::new(access),
            locator,
            wake: Arc::new(wake),
            activity: Arc::new(activity),
            cookie_crypto: Arc::new(cookie_crypto),
            oidc,
            upstream,
            cache: Arc::new(cache),
        })
    }

    /// Attributes for gateway-issued auth cookies.
    ///
    /// Scoped to the configured cookie domain (or the proxy domain) so that
    /// a cookie set at `/callback` is sent to every sandbox subdomain.
    pub fn cookie_options(&self) -> CookieOptions {
        let domain = self
            .config
            .cookie
            .domain
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| strip_port(&self.config.proxy.domain).to_string());
        CookieOptions::new(Some(domain), self.config.proxy.is_secure())
    }

    /// Redirect URI registered with the identity provider.
    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.config.proxy.base_url())
    }

    /// Periodically drop expired entries from the in-process cache.
    ///
    /// No-op for the Redis backend, which expires keys itself.
    pub fn spawn_cache_sweeper(&self, shutdown: CancellationToken) {
        let CacheBackend::Memory(store) = self.cache.as_ref() else {
            return;
        };
        let store = store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, remaining = store.len(), "swept expired cache entries");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }
}

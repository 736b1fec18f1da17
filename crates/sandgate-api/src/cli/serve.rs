//! `sandgate serve`: run the gateway until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sandgate_infra::cache::CacheBackend;
use sandgate_types::config::GatewayConfig;

use crate::http::router::build_router;
use crate::state::AppState;

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    config.validate()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.proxy.port));
    let tls = config.tls.clone();
    let base_url = config.proxy.base_url();

    let state = AppState::init(config).await?;
    let shutdown = CancellationToken::new();
    state.spawn_cache_sweeper(shutdown.clone());
    let router = build_router(state.clone());

    println!(
        "  {} Sandgate listening on {} for {}",
        style("⚡").bold(),
        style(addr).cyan(),
        style(&base_url).cyan()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    // Shared by the TLS listener and wss:// connections to runners.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("a rustls crypto provider was already installed");
    }

    if tls.enabled {
        let (Some(cert), Some(key)) = (tls.cert_file, tls.key_file) else {
            anyhow::bail!("tls.cert_file and tls.key_file are required when TLS is enabled");
        };
        let rustls_config = RustlsConfig::from_pem_file(&cert, &key)
            .await
            .with_context(|| format!("failed to load TLS certificate {}", cert.display()))?;

        let handle = Handle::new();
        tokio::spawn({
            let handle = handle.clone();
            async move {
                shutdown_signal().await;
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            }
        });

        info!(%addr, "serving HTTPS");
        axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(router.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "serving HTTP");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    shutdown.cancel();
    if let CacheBackend::Redis(store) = state.cache.as_ref() {
        if let Err(e) = store.quit().await {
            warn!(error = %e, "failed to close redis connection");
        }
    }
    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

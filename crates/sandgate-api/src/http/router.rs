//! Axum router configuration with middleware.
//!
//! Layers, outermost first: request tracing, the preview warning, host
//! routing. Host routing sits in front of the gateway routes so that a
//! sandbox host never reaches them, whatever its path.

use axum::Json;
use axum::Router;
use axum::http::Uri;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::http::error::AppError;
use crate::http::warning::ACCEPT_WARNING_PATH;
use crate::http::{auth, build_logs, dispatch, warning};
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let gateway_routes = Router::new()
        .route("/health", get(health))
        .route("/callback", get(auth::callback))
        .route(ACCEPT_WARNING_PATH, post(warning::accept_warning))
        .route(
            "/snapshots/{snapshot_id}/build-logs",
            get(build_logs::stream_build_logs),
        )
        .route("/toolbox/{*path}", any(dispatch::proxy_toolbox))
        .fallback(not_found)
        .with_state(state.clone());

    Router::new()
        .fallback_service(gateway_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            dispatch::route_by_host,
        ))
        .layer(middleware::from_fn_with_state(
            state,
            warning::browser_warning,
        ))
        .layer(TraceLayer::new_for_http())
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found(uri: Uri) -> Response {
    AppError::not_found("route not found")
        .at(uri.path())
        .into_response()
}

//! Snapshot build-log streaming.
//!
//! `GET /snapshots/{snapshotId}/build-logs` is served from the runner that
//! first built the snapshot. Callers must belong to the snapshot's
//! organization.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use sandgate_core::control_plane::ControlPlane;
use sandgate_types::control_plane::SnapshotDto;
use sandgate_types::runner::RunnerInfo;

use crate::http::auth::BearerToken;
use crate::http::dispatch::request_host;
use crate::http::error::AppError;
use crate::http::forward::{FORWARDED_HOST_HEADER, RUNNER_AUTHORIZATION_HEADER};
use crate::state::AppState;

/// Shared by a missing snapshot and one the caller may not see.
const SNAPSHOT_NOT_FOUND: &str = "snapshot not found";

/// Response headers passed back from the runner.
const PASSED_HEADERS: [header::HeaderName; 2] = [header::CONTENT_TYPE, header::CACHE_CONTROL];

#[derive(Debug, Default, Deserialize)]
pub struct BuildLogsQuery {
    #[serde(default)]
    follow: bool,
}

/// GET /snapshots/{snapshot_id}/build-logs
pub async fn stream_build_logs(
    State(state): State<AppState>,
    Path(snapshot_id): Path<String>,
    Query(query): Query<BuildLogsQuery>,
    BearerToken(token): BearerToken,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    let path = uri.path().to_string();

    // Token first: the answer must not reveal whether the snapshot exists.
    let organizations = match state.control_plane.list_organizations(&token).await {
        Ok(organizations) => organizations,
        Err(e) if e.is_definitive_denial() => {
            return Err(AppError::unauthorized("invalid bearer token").at(path));
        }
        Err(e) => return Err(AppError::from(e).at(path)),
    };

    let snapshot = fetch_snapshot(&state, &snapshot_id)
        .await
        .map_err(|e| e.at(path.clone()))?;
    if !organizations
        .iter()
        .any(|org| org.id == snapshot.organization_id)
    {
        debug!(snapshot_id, "caller is not a member of the snapshot organization");
        return Err(AppError::not_found(SNAPSHOT_NOT_FOUND).at(path));
    }

    let snapshot_ref = snapshot
        .snapshot_ref
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::not_found("snapshot has no image reference").at(path.clone()))?;
    let runner = state
        .locator
        .get_snapshot_runner(&snapshot)
        .await
        .map_err(|e| AppError::from(e).at(path.clone()))?;

    let url = logs_url(&runner, snapshot_ref, query.follow).map_err(|e| e.at(path.clone()))?;
    let host = request_host(&headers, &uri);
    let mut request = state
        .upstream
        .get(url)
        .header(RUNNER_AUTHORIZATION_HEADER, runner.authorization());
    if let Ok(host) = HeaderValue::from_str(&host) {
        request = request.header(FORWARDED_HOST_HEADER, host);
    }

    let upstream = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(snapshot_id, error = %e.without_url(), "failed to reach runner for build logs");
            return Ok((StatusCode::BAD_GATEWAY, "Bad Gateway").into_response());
        }
    };

    let mut builder = Response::builder().status(upstream.status());
    for name in PASSED_HEADERS {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::internal(format!("failed to build response: {e}")).at(path))
}

async fn fetch_snapshot(state: &AppState, snapshot_id: &str) -> Result<SnapshotDto, AppError> {
    state
        .control_plane
        .get_snapshot(snapshot_id)
        .await
        .map_err(|e| match e.status() {
            Some(404) => AppError::not_found(SNAPSHOT_NOT_FOUND),
            _ => AppError::from(e),
        })
}

/// `<runner>/snapshots/logs?snapshotRef=<ref>&follow=<bool>`
fn logs_url(runner: &RunnerInfo, snapshot_ref: &str, follow: bool) -> Result<Url, AppError> {
    let mut url = Url::parse(&format!("{}/snapshots/logs", runner.api_url))
        .map_err(|e| AppError::internal(format!("invalid runner URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("snapshotRef", snapshot_ref)
        .append_pair("follow", if follow { "true" } else { "false" });
    Ok(url)
}

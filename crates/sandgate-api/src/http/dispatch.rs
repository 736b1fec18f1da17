//! Request dispatch: from an inbound request to a forwarded one.
//!
//! Requests whose host names a sandbox (`<port>-<id>.<domain>`) never reach
//! the gateway's own routes; [`route_by_host`] sends them straight into the
//! proxy pipeline. On the proxy domain itself, `/toolbox/<id>/...` enters
//! the same pipeline through [`proxy_toolbox`].
//!
//! The pipeline is: public check, authenticate, wake, locate the runner,
//! start the activity keep-alive, forward.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use sandgate_core::target::{
    ProxyTarget, RouteMode, TargetError, is_privileged_port, parse_host, parse_toolbox_subpath,
    take_query_param,
};

use crate::http::auth::{
    self, AUTH_KEY_QUERY_PARAM, AuthOutcome, Credential, PREVIEW_TOKEN_HEADER,
};
use crate::http::cookies::strip_port;
use crate::http::error::AppError;
use crate::http::forward;
use crate::http::warning::{ACCEPT_WARNING_PATH, header_is_true, is_websocket_upgrade};
use crate::state::AppState;

pub const SKIP_ACTIVITY_UPDATE_HEADER: &str = "x-daytona-skip-activity-update";

/// `Host` header, falling back to the URI authority (HTTP/2).
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Middleware: divert sandbox-host requests into the proxy pipeline.
///
/// The proxy domain, hosts that do not look like a sandbox label at all
/// (bare IPs, `localhost`) and the warning-accept POST go to the router.
pub async fn route_by_host(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::POST && request.uri().path() == ACCEPT_WARNING_PATH {
        return next.run(request).await;
    }

    let host = request_host(request.headers(), request.uri());
    if strip_port(&host).eq_ignore_ascii_case(strip_port(&state.config.proxy.domain)) {
        return next.run(request).await;
    }

    match parse_host(&host) {
        Ok(target) => {
            let path = request.uri().path().to_string();
            dispatch(state, request, target.identifier, RouteMode::Port(target.port), path).await
        }
        Err(
            TargetError::EmptyHost | TargetError::MissingSubdomain | TargetError::MissingSeparator,
        ) => next.run(request).await,
        Err(e) => AppError::from(e).at(request.uri().path()).into_response(),
    }
}

/// ANY /toolbox/{sandboxId}/{*path} on the proxy domain.
pub async fn proxy_toolbox(State(state): State<AppState>, request: Request) -> Response {
    match parse_toolbox_subpath(request.uri().path()) {
        Ok(target) => {
            dispatch(state, request, target.sandbox_id, RouteMode::Toolbox, target.path).await
        }
        Err(e) => AppError::from(e).at(request.uri().path()).into_response(),
    }
}

async fn dispatch(
    state: AppState,
    request: Request,
    identifier: String,
    mode: RouteMode,
    path: String,
) -> Response {
    let request_path = request.uri().path().to_string();
    let span = info_span!("proxy", port = mode.port(), path = %request_path);
    match proxy(&state, request, identifier, mode, path).instrument(span).await {
        Ok(response) => response,
        Err(e) => e.at(request_path).into_response(),
    }
}

async fn proxy(
    state: &AppState,
    request: Request,
    identifier: String,
    mode: RouteMode,
    path: String,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();
    let port = mode.port();
    let host = request_host(&parts.headers, &parts.uri);
    let (query_key, query) = take_query_param(parts.uri.query(), AUTH_KEY_QUERY_PARAM);

    let mut set_cookies = Vec::new();
    let sandbox_id = if !is_privileged_port(port) && state.access.is_public(&identifier).await {
        debug!(sandbox_id = %identifier, "public sandbox, skipping authentication");
        identifier
    } else {
        let return_to = format!(
            "{}://{}{}",
            if state.config.proxy.is_secure() { "https" } else { "http" },
            host,
            parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
        );
        match auth::authenticate(state, &parts.headers, &identifier, port, query_key, &return_to)
            .await?
        {
            AuthOutcome::Granted {
                sandbox_id,
                credential,
                set_cookie,
            } => {
                if credential == Credential::Bearer {
                    parts.headers.remove(header::AUTHORIZATION);
                }
                set_cookies.extend(set_cookie);
                sandbox_id
            }
            AuthOutcome::Redirect(response) => return Ok(response),
        }
    };

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    state.wake.ensure_started(&sandbox_id, &cancel).await?;

    let runner = state.locator.get_sandbox_runner(&sandbox_id).await?;

    let skip_activity = header_is_true(&parts.headers, SKIP_ACTIVITY_UPDATE_HEADER);
    parts.headers.remove(SKIP_ACTIVITY_UPDATE_HEADER);
    parts.headers.remove(PREVIEW_TOKEN_HEADER);
    let activity = (!skip_activity).then(|| state.activity.keep_alive(&sandbox_id));

    let target = ProxyTarget {
        sandbox_id,
        mode,
        path,
        query,
    };
    let upstream = forward::Upstream {
        url: target.url(&runner),
        runner,
        host,
        sandbox_id: target.sandbox_id,
    };

    let mut response = if is_websocket_upgrade(&parts.headers) {
        forward::websocket(state, parts, upstream, activity).await?
    } else {
        forward::http(state, parts, body, upstream, activity).await?
    };
    for cookie in set_cookies {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_host_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("3000-sb.proxy.example.com"));
        let uri: Uri = "http://other.example.com/x".parse().unwrap();
        assert_eq!(request_host(&headers, &uri), "3000-sb.proxy.example.com");
    }

    #[test]
    fn test_request_host_falls_back_to_authority() {
        let uri: Uri = "https://3000-sb.proxy.example.com:4000/x".parse().unwrap();
        assert_eq!(
            request_host(&HeaderMap::new(), &uri),
            "3000-sb.proxy.example.com:4000"
        );
        assert_eq!(request_host(&HeaderMap::new(), &"/x".parse().unwrap()), "");
    }
}

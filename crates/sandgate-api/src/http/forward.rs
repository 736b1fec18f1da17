//! Forwarding to the runner: streamed HTTP and bridged WebSockets.
//!
//! Failures that look like a stopped sandbox (connection refused, 502-504)
//! trigger a reactive wake; when it succeeds the client gets a holding page
//! with `Retry-After` instead of the upstream failure.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::FromRequestParts;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sandgate_core::activity::ActivityGuard;
use sandgate_core::wake::{is_wakeable_error, is_wakeable_status};
use sandgate_types::runner::RunnerInfo;

use crate::http::cookies::forwardable_cookies;
use crate::http::error::{AppError, RETRY_AFTER_SECS};
use crate::state::AppState;

pub const RUNNER_AUTHORIZATION_HEADER: &str = "x-daytona-authorization";
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

/// Hop-by-hop headers (RFC 9110 §7.6.1) plus `Host`.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Handshake headers tungstenite generates itself.
const WEBSOCKET_HANDSHAKE_HEADERS: &[&str] = &[
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "sec-websocket-accept",
];

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where a request is going.
#[derive(Debug)]
pub struct Upstream {
    pub url: String,
    pub runner: RunnerInfo,
    /// Host the client originally asked for.
    pub host: String,
    pub sandbox_id: String,
}

/// Forward a plain HTTP request and stream the answer back.
///
/// The activity guard moves into the response body, so the keep-alive
/// lasts until the client has read the whole response.
pub async fn http(
    state: &AppState,
    parts: Parts,
    body: Body,
    upstream: Upstream,
    activity: Option<ActivityGuard>,
) -> Result<Response, AppError> {
    let headers = upstream_headers(&parts.headers, &upstream)?;
    let result = state
        .upstream
        .request(parts.method, &upstream.url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            if is_wakeable_error(&e) && reactive_wake(state, &upstream.sandbox_id).await {
                return Ok(starting_page());
            }
            warn!(sandbox_id = %upstream.sandbox_id, error = %e.without_url(), "upstream request failed");
            return Ok(bad_gateway());
        }
    };

    let status = response.status();
    if is_wakeable_status(status.as_u16()) && reactive_wake(state, &upstream.sandbox_id).await {
        return Ok(starting_page());
    }

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        copy_headers(response.headers(), headers);
    }
    let stream = WithActivity {
        inner: response.bytes_stream().boxed(),
        _activity: activity,
    };
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::internal(format!("failed to build response: {e}")))
}

/// Upstream body that holds the activity guard until the client has read
/// it to the end or gone away.
struct WithActivity {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    _activity: Option<ActivityGuard>,
}

impl Stream for WithActivity {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Upgrade the client connection and bridge it to the runner.
///
/// The upstream handshake happens first so that a refused connection can
/// still wake the sandbox and answer with a normal HTTP response.
pub async fn websocket(
    state: &AppState,
    mut parts: Parts,
    upstream: Upstream,
    activity: Option<ActivityGuard>,
) -> Result<Response, AppError> {
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, state)
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let url = websocket_url(&upstream.url);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| AppError::bad_request(format!("invalid upstream WebSocket URL: {e}")))?;
    let headers = upstream_headers(&parts.headers, &upstream)?;
    for (name, value) in &headers {
        if !WEBSOCKET_HANDSHAKE_HEADERS.contains(&name.as_str()) {
            request.headers_mut().append(name.clone(), value.clone());
        }
    }

    let (socket, handshake) = match tokio_tungstenite::connect_async(request).await {
        Ok(connected) => connected,
        Err(tungstenite::Error::Http(response)) => {
            let status = response.status().as_u16();
            if is_wakeable_status(status) && reactive_wake(state, &upstream.sandbox_id).await {
                return Ok(starting_page());
            }
            debug!(sandbox_id = %upstream.sandbox_id, status, "upstream refused WebSocket upgrade");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            return Ok(status.into_response());
        }
        Err(e) => {
            if is_wakeable_error(&e) && reactive_wake(state, &upstream.sandbox_id).await {
                return Ok(starting_page());
            }
            warn!(sandbox_id = %upstream.sandbox_id, error = %e, "upstream WebSocket connect failed");
            return Ok(bad_gateway());
        }
    };

    let protocol = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let upgrade = match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    let sandbox_id = upstream.sandbox_id;
    Ok(upgrade.on_upgrade(move |client| async move {
        bridge(client, socket).await;
        drop(activity);
        debug!(sandbox_id, "WebSocket bridge closed");
    }))
}

/// Copy frames both ways until either side closes.
async fn bridge(client: WebSocket, upstream: UpstreamSocket) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let Some(message) = to_upstream(message) else {
                continue;
            };
            let closing = message.is_close();
            if upstream_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            let closing = matches!(message, ws::Message::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = client_to_upstream => {},
        _ = upstream_to_client => {},
    }
}

/// Pings and pongs are answered by each side's own WebSocket stack.
fn to_upstream(message: ws::Message) -> Option<Message> {
    match message {
        ws::Message::Text(text) => Some(Message::text(text.as_str().to_owned())),
        ws::Message::Binary(data) => Some(Message::binary(data)),
        ws::Message::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        ws::Message::Ping(_) | ws::Message::Pong(_) => None,
    }
}

fn to_client(message: Message) -> Option<ws::Message> {
    match message {
        Message::Text(text) => Some(ws::Message::Text(text.as_str().to_owned().into())),
        Message::Binary(data) => Some(ws::Message::Binary(data)),
        Message::Close(frame) => Some(ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

/// `http(s)://` to `ws(s)://`.
fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

async fn reactive_wake(state: &AppState, sandbox_id: &str) -> bool {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let woke = state.wake.try_wake(sandbox_id, &cancel).await;
    if woke {
        info!(sandbox_id, "sandbox woken after upstream failure, asking client to retry");
    }
    woke
}

/// Headers for the runner: the client's minus hop-by-hop and gateway auth
/// cookies, plus the runner credential and the original host.
fn upstream_headers(incoming: &HeaderMap, upstream: &Upstream) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::with_capacity(incoming.len() + 2);
    copy_headers(incoming, &mut headers);
    headers.remove(header::COOKIE);
    if let Some(cookies) = forwardable_cookies(incoming) {
        headers.insert(header::COOKIE, cookies);
    }

    let authorization = HeaderValue::from_str(&upstream.runner.authorization())
        .map_err(|_| AppError::internal("runner API key is not a valid header value"))?;
    headers.insert(RUNNER_AUTHORIZATION_HEADER, authorization);

    let host = HeaderValue::from_str(&upstream.host)
        .map_err(|_| AppError::bad_request("invalid host header"))?;
    headers.insert(FORWARDED_HOST_HEADER, host);
    Ok(headers)
}

/// Copy end-to-end headers, dropping hop-by-hop ones and any named in
/// `Connection`.
fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    let listed: Vec<HeaderName> = from
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for (name, value) in from {
        if STRIPPED_HEADERS.contains(&name.as_str()) || listed.contains(name) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
}

/// Holding page served while a just-woken sandbox finishes booting.
pub fn starting_page() -> Response {
    const PAGE: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta http-equiv="refresh" content="3" />
    <title>Sandbox Starting...</title>
    <style>
      body { font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; background: #f5f5f5; }
      .container { text-align: center; padding: 2rem; }
      .spinner { width: 40px; height: 40px; border: 4px solid #e0e0e0; border-top-color: #333; border-radius: 50%; animation: spin 1s linear infinite; margin: 0 auto 1rem; }
      @keyframes spin { to { transform: rotate(360deg); } }
      p { color: #666; }
    </style>
  </head>
  <body>
    <div class="container">
      <div class="spinner"></div>
      <h2>Sandbox is starting...</h2>
      <p>This page will automatically refresh in 3 seconds.</p>
    </div>
  </body>
</html>"#;

    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
        Html(PAGE),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> Upstream {
        Upstream {
            url: "http://runner-1:3000/sandboxes/sb/toolbox/proxy/3000/".to_string(),
            runner: RunnerInfo::new("http://runner-1:3000", "runner-key"),
            host: "3000-sb.proxy.example.com".to_string(),
            sandbox_id: "sb".to_string(),
        }
    }

    #[test]
    fn test_upstream_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::HOST, HeaderValue::from_static("3000-sb.proxy.example.com"));
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-custom-hop"));
        incoming.insert("x-custom-hop", HeaderValue::from_static("1"));
        incoming.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        incoming.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        incoming.append(header::COOKIE, HeaderValue::from_static("a=1"));
        incoming.append(header::COOKIE, HeaderValue::from_static("b=2"));

        let headers = upstream_headers(&incoming, &upstream()).unwrap();
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-custom-hop").is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers[header::ACCEPT], "text/html");
        assert_eq!(headers.get_all(header::COOKIE).iter().count(), 1);
        assert_eq!(headers[header::COOKIE], "a=1; b=2");
        assert_eq!(headers[RUNNER_AUTHORIZATION_HEADER], "Bearer runner-key");
        assert_eq!(headers[FORWARDED_HOST_HEADER], "3000-sb.proxy.example.com");
    }

    #[tokio::test]
    async fn test_activity_body_yields_upstream_chunks() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from("he")), Ok(Bytes::from("llo"))];
        let body = Body::from_stream(WithActivity {
            inner: futures_util::stream::iter(chunks).boxed(),
            _activity: None,
        });
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[test]
    fn test_gateway_credentials_stay_at_the_gateway() {
        let mut incoming = HeaderMap::new();
        incoming.insert(
            header::COOKIE,
            HeaderValue::from_static("daytona-sandbox-auth-victim=SEALED; app=1"),
        );
        incoming.append(header::COOKIE, HeaderValue::from_static("daytona-pkce-verifier-sb=v"));

        let headers = upstream_headers(&incoming, &upstream()).unwrap();
        assert_eq!(headers[header::COOKIE], "app=1");

        let mut incoming = HeaderMap::new();
        incoming.insert(header::COOKIE, HeaderValue::from_static("daytona-sandbox-auth-sb=SEALED"));
        let headers = upstream_headers(&incoming, &upstream()).unwrap();
        assert!(headers.get(header::COOKIE).is_none());
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("http://runner:3000/x?y=1"), "ws://runner:3000/x?y=1");
        assert_eq!(websocket_url("https://runner/x"), "wss://runner/x");
    }

    #[test]
    fn test_frame_conversion() {
        assert!(to_upstream(ws::Message::Ping(Default::default())).is_none());
        match to_upstream(ws::Message::Text("hello".into())) {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), "hello"),
            other => panic!("unexpected message: {other:?}"),
        }
        match to_client(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))) {
            Some(ws::Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1000);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_starting_page() {
        let response = starting_page();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "5");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(r#"http-equiv="refresh" content="3""#));
        assert!(body.contains("Sandbox is starting..."));
    }
}

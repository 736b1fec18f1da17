//! Preview warning interstitial.
//!
//! Browsers visiting a sandbox for the first time get a static page asking
//! them to confirm they trust the link. Accepting posts to
//! [`ACCEPT_WARNING_PATH`], which sets a one-day cookie and redirects back.
//! Programmatic clients, WebSocket upgrades and the web terminal are never
//! interrupted.

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use url::form_urlencoded;

use sandgate_core::target::{TERMINAL_PORT, parse_host};

use crate::http::cookies::{
    CookieOptions, WARNING_ACCEPTED_COOKIE, WARNING_COOKIE_TTL, read_cookie, strip_port,
};
use crate::http::dispatch::request_host;
use crate::state::AppState;

pub const SKIP_PREVIEW_WARNING_HEADER: &str = "x-daytona-skip-preview-warning";
pub const ACCEPT_WARNING_PATH: &str = "/accept-daytona-preview-warning";

const BROWSER_TOKENS: &[&str] = &[
    "chrome/",
    "chromium/",
    "firefox/",
    "safari/",
    "edg/",
    "opr/",
    "brave",
    "vivaldi",
    "samsungbrowser",
];

/// Middleware: show the interstitial or let the request through.
pub async fn browser_warning(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request_host(request.headers(), request.uri());
    if passes_through(request.method(), request.uri().path(), request.headers(), &host) {
        return next.run(request).await;
    }

    let scheme = if state.config.proxy.is_secure() { "https" } else { "http" };
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    warning_page(&format!("{scheme}://{host}{path_and_query}"))
}

fn passes_through(method: &Method, path: &str, headers: &HeaderMap, host: &str) -> bool {
    if header_is_true(headers, SKIP_PREVIEW_WARNING_HEADER) {
        return true;
    }
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !is_browser(user_agent) || is_websocket_upgrade(headers) {
        return true;
    }
    if read_cookie(headers, WARNING_ACCEPTED_COOKIE).as_deref() == Some("true") {
        return true;
    }
    if path == ACCEPT_WARNING_PATH {
        return true;
    }
    match parse_host(host) {
        Ok(target) => target.port == TERMINAL_PORT,
        Err(_) => method == Method::GET && matches!(path, "/callback" | "/health"),
    }
}

pub fn header_is_true(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Whether the user agent belongs to a mainstream web browser.
pub fn is_browser(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    ua.starts_with("mozilla/") && BROWSER_TOKENS.iter().any(|token| ua.contains(token))
}

pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
    upgrade && connection
}

#[derive(Debug, Deserialize)]
pub struct AcceptQuery {
    redirect: Option<String>,
}

/// POST /accept-daytona-preview-warning?redirect=<url>
pub async fn accept_warning(
    State(state): State<AppState>,
    Query(query): Query<AcceptQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let host = request_host(&headers, &uri);
    let secure = state.config.proxy.is_secure();
    let options = CookieOptions::new(Some(strip_port(&host).to_string()), secure);

    let target = query
        .redirect
        .filter(|url| is_same_host_redirect(url, &host))
        .unwrap_or_else(|| "/".to_string());

    let mut response = (StatusCode::FOUND, [(header::LOCATION, target)]).into_response();
    if let Some(cookie) = options.set(WARNING_ACCEPTED_COOKIE, "true", WARNING_COOKIE_TTL) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

/// Relative paths and absolute URLs on the requesting host only.
fn is_same_host_redirect(target: &str, host: &str) -> bool {
    if target.starts_with('/') {
        return !target.starts_with("//");
    }
    match url::Url::parse(target) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str() == Some(strip_port(host))
        }
        Err(_) => false,
    }
}

fn warning_page(requested_url: &str) -> Response {
    let accept_action = format!(
        "{ACCEPT_WARNING_PATH}?redirect={}",
        form_urlencoded::byte_serialize(requested_url.as_bytes()).collect::<String>()
    );
    let html = format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Preview - Warning</title>
    <style>
      body {{ font-family: system-ui, sans-serif; background: #0a0a0a; color: #fff; min-height: 100vh; margin: 0; display: flex; align-items: center; justify-content: center; }}
      .card {{ background: #1a1a1a; border: 1px solid #333; border-radius: 12px; padding: 2.5rem; max-width: 600px; text-align: center; }}
      .notes {{ text-align: left; color: #ccc; line-height: 1.6; background: #0f0f0f; border: 1px solid #2a2a2a; border-radius: 8px; padding: 1.25rem; margin: 1.5rem 0; }}
      .url {{ color: #ffa500; word-break: break-all; }}
      button {{ background: #0066ff; color: #fff; border: none; border-radius: 8px; padding: 0.875rem 2rem; font-size: 1rem; font-weight: 600; cursor: pointer; }}
    </style>
  </head>
  <body>
    <div class="card">
      <h1>Preview URL Warning</h1>
      <p>You are about to visit <strong class="url">{url}</strong></p>
      <div class="notes">
        &bull; This page is served from a sandbox preview, not by the gateway operator<br />
        &bull; Content and functionality may change without notice<br />
        &bull; Only continue if you trust whoever sent you this link<br />
        &bull; Do not enter passwords or payment details unless you know the site
      </div>
      <form action="{action}" method="POST" style="margin: 0">
        <button type="submit">I Understand, Continue</button>
      </form>
    </div>
  </body>
</html>"#,
        url = escape_html(requested_url),
        action = escape_html(&accept_action),
    );
    Html(html).into_response()
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const CHROME: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

    fn browser_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(CHROME));
        headers
    }

    #[test]
    fn test_is_browser() {
        assert!(is_browser(CHROME));
        assert!(is_browser(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.5; rv:127.0) Gecko/20100101 Firefox/127.0"
        ));
        assert!(!is_browser("curl/8.5.0"));
        assert!(!is_browser("python-requests/2.31"));
        assert!(!is_browser(""));
    }

    #[test]
    fn test_browser_on_sandbox_host_gets_warning() {
        let headers = browser_headers();
        assert!(!passes_through(&Method::GET, "/", &headers, "3000-sb.proxy.example.com"));
    }

    #[test]
    fn test_pass_through_rules() {
        let host = "3000-sb.proxy.example.com";

        let mut skip = browser_headers();
        skip.insert(SKIP_PREVIEW_WARNING_HEADER, HeaderValue::from_static("true"));
        assert!(passes_through(&Method::GET, "/", &skip, host));

        let mut accepted = browser_headers();
        accepted.insert(header::COOKIE, HeaderValue::from_static("daytona-preview-page-accepted=true"));
        assert!(passes_through(&Method::GET, "/", &accepted, host));

        let mut ws = browser_headers();
        ws.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        ws.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(passes_through(&Method::GET, "/", &ws, host));

        let headers = browser_headers();
        assert!(passes_through(&Method::GET, "/", &headers, "22222-sb.proxy.example.com"));
        assert!(passes_through(&Method::POST, ACCEPT_WARNING_PATH, &headers, host));
        assert!(passes_through(&Method::GET, "/health", &headers, "proxy.example.com"));
        assert!(passes_through(&Method::GET, "/callback", &headers, "proxy.example.com"));
        assert!(!passes_through(&Method::POST, "/health", &headers, "proxy.example.com"));
    }

    #[test]
    fn test_redirect_restricted_to_host() {
        let host = "3000-sb.proxy.example.com:4000";
        assert!(is_same_host_redirect("/app?x=1", host));
        assert!(is_same_host_redirect("https://3000-sb.proxy.example.com/app", host));
        assert!(!is_same_host_redirect("//evil.example", host));
        assert!(!is_same_host_redirect("https://evil.example/", host));
        assert!(!is_same_host_redirect("javascript:alert(1)", host));
    }

    #[tokio::test]
    async fn test_warning_page_escapes_url() {
        let response = warning_page("https://3000-sb.proxy.example.com/?q=<script>");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(!body.contains("<script>"));
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("/accept-daytona-preview-warning?redirect=https%3A%2F%2F3000-sb"));
    }
}

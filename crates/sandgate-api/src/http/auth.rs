//! Preview authentication and the OIDC login flow.
//!
//! Credentials are tried in a fixed order: signed preview URL, preview-key
//! header, bearer token, preview-key query parameter, session cookie. A
//! request with none of them is sent to the identity provider; `/callback`
//! completes the login and mints the session cookie.

use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Redirect, Response};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info, warn};

use sandgate_core::oidc::AuthState;
use sandgate_infra::oidc::generate_state_nonce;

use crate::http::cookies::{
    PKCE_COOKIE_TTL, SESSION_COOKIE_TTL, pkce_cookie_name, read_cookie, session_cookie_name,
    strip_port,
};
use crate::http::error::AppError;
use crate::state::AppState;

pub const PREVIEW_TOKEN_HEADER: &str = "x-daytona-preview-token";
pub const AUTH_KEY_QUERY_PARAM: &str = "DAYTONA_SANDBOX_AUTH_KEY";
const CALLBACK_PATH: &str = "/callback";

/// What let a request through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    SignedUrl,
    PreviewKey,
    /// The caller's `Authorization: Bearer` token.
    Bearer,
    SessionCookie,
}

/// Result of authenticating a proxied request.
#[derive(Debug)]
pub enum AuthOutcome {
    Granted {
        sandbox_id: String,
        credential: Credential,
        /// Session cookie to attach to the eventual response.
        set_cookie: Option<HeaderValue>,
    },
    /// The response is a login redirect; nothing should be forwarded.
    Redirect(Response),
}

impl AuthOutcome {
    fn granted(sandbox_id: impl Into<String>, credential: Credential) -> Self {
        AuthOutcome::Granted {
            sandbox_id: sandbox_id.into(),
            credential,
            set_cookie: None,
        }
    }
}

/// Authenticate a request for `identifier` (a sandbox ID or signed token).
///
/// `query_key` is the preview key already stripped from the query string;
/// `return_to` is where the browser comes back to after an OIDC login.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    identifier: &str,
    port: u16,
    query_key: Option<String>,
    return_to: &str,
) -> Result<AuthOutcome, AppError> {
    if let Some(sandbox_id) = state.access.resolve_signed_token(identifier, port).await? {
        debug!(sandbox_id, port, "signed preview URL accepted");
        return Ok(AuthOutcome::granted(sandbox_id, Credential::SignedUrl));
    }
    let sandbox_id = identifier;

    if let Some(key) = header_str(headers, PREVIEW_TOKEN_HEADER) {
        return preview_key(state, sandbox_id, key).await;
    }

    if let Some(token) = bearer_token(headers) {
        if state.access.has_bearer_access(sandbox_id, token).await? {
            return Ok(AuthOutcome::granted(sandbox_id, Credential::Bearer));
        }
        debug!(sandbox_id, "bearer token denied, trying other credentials");
    }

    if let Some(key) = query_key {
        return preview_key(state, sandbox_id, &key).await;
    }

    let cookie_name = session_cookie_name(sandbox_id);
    if let Some(sealed) = read_cookie(headers, &cookie_name) {
        return match state.cookie_crypto.open(&cookie_name, &sealed) {
            Some(value) if value == sandbox_id => {
                Ok(AuthOutcome::granted(sandbox_id, Credential::SessionCookie))
            }
            _ => {
                debug!(sandbox_id, "session cookie rejected");
                Err(AppError::not_found("sandbox not found"))
            }
        };
    }

    start_login(state, sandbox_id, return_to).await
}

/// Validate a sandbox-scoped preview key and mint a session cookie for it.
async fn preview_key(
    state: &AppState,
    sandbox_id: &str,
    key: &str,
) -> Result<AuthOutcome, AppError> {
    if !state.access.is_auth_key_valid(sandbox_id, key).await? {
        return Err(AppError::unauthorized("invalid preview token"));
    }
    Ok(AuthOutcome::Granted {
        sandbox_id: sandbox_id.to_string(),
        credential: Credential::PreviewKey,
        set_cookie: session_cookie(state, sandbox_id),
    })
}

fn session_cookie(state: &AppState, sandbox_id: &str) -> Option<HeaderValue> {
    let name = session_cookie_name(sandbox_id);
    match state.cookie_crypto.seal(&name, sandbox_id, SESSION_COOKIE_TTL) {
        Ok(sealed) => state.cookie_options().set(&name, &sealed, SESSION_COOKIE_TTL),
        Err(e) => {
            warn!(sandbox_id, error = %e, "failed to seal session cookie");
            None
        }
    }
}

/// Redirect the browser to the identity provider.
async fn start_login(
    state: &AppState,
    sandbox_id: &str,
    return_to: &str,
) -> Result<AuthOutcome, AppError> {
    let Some(oidc) = &state.oidc else {
        return Err(AppError::unauthorized("authentication required"));
    };

    let auth_state = AuthState::new(generate_state_nonce(), return_to, sandbox_id);
    let request = oidc
        .authorization_request(&state.callback_url(), &auth_state)
        .await?;

    let cookie_name = pkce_cookie_name(sandbox_id);
    let sealed = state
        .cookie_crypto
        .seal(&cookie_name, &request.code_verifier, PKCE_COOKIE_TTL)
        .map_err(|e| AppError::internal(e.to_string()))?;

    let mut response = Redirect::temporary(&request.url).into_response();
    if let Some(cookie) = state.cookie_options().set(&cookie_name, &sealed, PKCE_COOKIE_TTL) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    debug!(sandbox_id, "redirecting to identity provider");
    Ok(AuthOutcome::Redirect(response))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /callback
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let (code, auth_state) = match parse_callback(query) {
        Ok(parsed) => parsed,
        Err(e) => return e.at(CALLBACK_PATH).into_response(),
    };

    let cookie_name = pkce_cookie_name(&auth_state.sandbox_id);
    let mut response = match complete_login(&state, &headers, &code, &auth_state, &cookie_name).await
    {
        Ok(response) => response,
        Err(e) => e.at(CALLBACK_PATH).into_response(),
    };
    if let Some(clear) = state.cookie_options().clear(&cookie_name) {
        response.headers_mut().append(header::SET_COOKIE, clear);
    }
    response
}

fn parse_callback(query: CallbackQuery) -> Result<(String, AuthState), AppError> {
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        return Err(AppError::bad_request(format!(
            "authentication failed: {error} {description}"
        )));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::bad_request("no authorization code received"))?;
    let encoded = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::bad_request("no state parameter received"))?;
    let auth_state = AuthState::decode(&encoded)
        .map_err(|e| AppError::bad_request(format!("invalid state parameter: {e}")))?;
    Ok((code, auth_state))
}

async fn complete_login(
    state: &AppState,
    headers: &HeaderMap,
    code: &str,
    auth_state: &AuthState,
    pkce_cookie: &str,
) -> Result<Response, AppError> {
    let verifier = read_cookie(headers, pkce_cookie)
        .and_then(|sealed| state.cookie_crypto.open(pkce_cookie, &sealed))
        .ok_or_else(|| AppError::unauthorized("authentication state verification failed"))?;

    if !is_gateway_url(&auth_state.return_to, &state.config.proxy.domain) {
        return Err(AppError::bad_request("invalid return URL"));
    }

    let oidc = state
        .oidc
        .as_ref()
        .ok_or_else(|| AppError::unauthorized("authentication required"))?;
    let token = oidc
        .exchange_code(code, &verifier, &state.callback_url())
        .await?;

    let sandbox_id = auth_state.sandbox_id.as_str();
    match state
        .access
        .has_sandbox_access(sandbox_id, token.expose_secret())
        .await
    {
        Ok(true) => {}
        Ok(false) => return Err(AppError::not_found("sandbox not found")),
        Err(e) => return Err(AppError::internal(format!("failed to verify sandbox access: {e}"))),
    }

    info!(sandbox_id, "preview login completed");
    let mut response = Redirect::temporary(&auth_state.return_to).into_response();
    if let Some(cookie) = session_cookie(state, sandbox_id) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

/// An absolute http(s) URL on the proxy domain or one of its subdomains.
fn is_gateway_url(target: &str, proxy_domain: &str) -> bool {
    let Ok(url) = url::Url::parse(target) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let domain = strip_port(proxy_domain).to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    matches!(url.scheme(), "http" | "https")
        && (host == domain || host.ends_with(&format!(".{domain}")))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Extractor for endpoints that require a caller bearer token.
pub struct BearerToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(&parts.headers)
            .map(|token| BearerToken(token.to_string()))
            .ok_or_else(|| {
                AppError::unauthorized("missing bearer token")
                    .at(parts.uri.path().to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn test_return_url_must_stay_on_gateway() {
        let domain = "proxy.example.com:4000";
        assert!(is_gateway_url("https://3000-sb.proxy.example.com/app", domain));
        assert!(is_gateway_url("http://proxy.example.com/toolbox/sb/files", domain));
        assert!(!is_gateway_url("https://evil.example.com/", domain));
        assert!(!is_gateway_url("https://notproxy.example.com/", domain));
        assert!(!is_gateway_url("javascript:alert(1)", domain));
        assert!(!is_gateway_url("/relative", domain));
    }

    #[test]
    fn test_parse_callback_errors() {
        let query = |code: Option<&str>, state: Option<&str>, error: Option<&str>| CallbackQuery {
            code: code.map(String::from),
            state: state.map(String::from),
            error: error.map(String::from),
            error_description: None,
        };

        let err = parse_callback(query(Some("c"), Some("s"), Some("access_denied"))).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

        assert!(parse_callback(query(None, Some("s"), None)).is_err());
        assert!(parse_callback(query(Some("c"), None, None)).is_err());
        assert!(parse_callback(query(Some("c"), Some("!!not-base64!!"), None)).is_err());

        let encoded = AuthState::new("n", "https://3000-sb.proxy.example.com/", "sb").encode();
        let (code, state) = parse_callback(query(Some("c"), Some(&encoded), None)).unwrap();
        assert_eq!(code, "c");
        assert_eq!(state.sandbox_id, "sb");
    }
}

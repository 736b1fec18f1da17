//! Cookie names and `Cookie` / `Set-Cookie` header handling.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};

/// Session cookie proving a prior login for one sandbox.
pub const SESSION_COOKIE_PREFIX: &str = "daytona-sandbox-auth-";
/// PKCE verifier held between the OIDC redirect and `/callback`.
pub const PKCE_COOKIE_PREFIX: &str = "daytona-pkce-verifier-";
pub const WARNING_ACCEPTED_COOKIE: &str = "daytona-preview-page-accepted";

pub const SESSION_COOKIE_TTL: Duration = Duration::from_secs(60 * 60);
pub const PKCE_COOKIE_TTL: Duration = Duration::from_secs(5 * 60);
pub const WARNING_COOKIE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn session_cookie_name(sandbox_id: &str) -> String {
    format!("{SESSION_COOKIE_PREFIX}{sandbox_id}")
}

pub fn pkce_cookie_name(sandbox_id: &str) -> String {
    format!("{PKCE_COOKIE_PREFIX}{sandbox_id}")
}

/// First value of cookie `name` across all `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// Session and PKCE cookies minted by the gateway itself.
pub fn is_gateway_auth_cookie(name: &str) -> bool {
    name.starts_with(SESSION_COOKIE_PREFIX) || name.starts_with(PKCE_COOKIE_PREFIX)
}

/// The request's cookies folded into one `Cookie` value, minus the
/// gateway's auth cookies.
///
/// Those cookies are scoped to the whole proxy domain, so the browser sends
/// every sandbox's session to every sandbox host. Returns `None` when
/// nothing is left to forward.
pub fn forwardable_cookies(headers: &HeaderMap) -> Option<HeaderValue> {
    let kept: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
            !is_gateway_auth_cookie(name.trim())
        })
        .collect();
    if kept.is_empty() {
        return None;
    }
    HeaderValue::from_str(&kept.join("; ")).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    None,
}

/// Attributes of a `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl CookieOptions {
    /// HttpOnly, path `/`, SameSite=None over TLS and Lax otherwise.
    pub fn new(domain: Option<String>, secure: bool) -> Self {
        Self {
            domain,
            secure,
            http_only: true,
            same_site: if secure { SameSite::None } else { SameSite::Lax },
        }
    }

    pub fn set(&self, name: &str, value: &str, max_age: Duration) -> Option<HeaderValue> {
        let mut cookie = format!("{name}={value}; Path=/; Max-Age={}", max_age.as_secs());
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str(match self.same_site {
            SameSite::Lax => "; SameSite=Lax",
            SameSite::None => "; SameSite=None",
        });
        HeaderValue::from_str(&cookie).ok()
    }

    /// Expire cookie `name` immediately.
    pub fn clear(&self, name: &str) -> Option<HeaderValue> {
        self.set(name, "", Duration::ZERO)
    }
}

/// Host without a `:port` suffix.
pub fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

//! Target resolution: where does an inbound request go?
//!
//! Two routing conventions exist:
//!
//! - host-based, `<port>-<sandboxIdOrToken>.<base domain>`, e.g.
//!   `8080-abc123.proxy.example.com`
//! - path-based toolbox, `/toolbox/<sandboxId>/<rest>` on the proxy domain
//!
//! Everything here is pure string handling; nothing talks to the network.

use thiserror::Error;
use url::form_urlencoded;

use sandgate_types::runner::RunnerInfo;

/// In-sandbox toolbox daemon.
pub const TOOLBOX_PORT: u16 = 2280;
/// Web terminal.
pub const TERMINAL_PORT: u16 = 22222;
/// Screen recording dashboard.
pub const RECORDING_DASHBOARD_PORT: u16 = 33333;

const TOOLBOX_PREFIX: &str = "/toolbox/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("host is required")]
    EmptyHost,

    #[error("invalid host format: must have subdomain")]
    MissingSubdomain,

    #[error("invalid host format: port and sandbox ID not found")]
    MissingSeparator,

    #[error("invalid port '{0}': must be numeric")]
    InvalidPort(String),

    #[error("sandbox ID or signed token is required")]
    MissingIdentifier,

    #[error("path is required")]
    EmptyPath,

    #[error("path must be of format /toolbox/<sandboxId>/<path>")]
    MalformedToolboxPath,
}

/// Parsed `<port>-<identifier>.<base domain>` host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub port: u16,
    /// Sandbox ID or signed preview token.
    pub identifier: String,
    pub base_domain: String,
}

/// Parse a host header of the form `<port>-<identifier>.<base domain>`.
///
/// The first `-` separates the port from the identifier, so identifiers may
/// themselves contain dashes. A `:port` suffix on the host is ignored.
pub fn parse_host(host: &str) -> Result<HostTarget, TargetError> {
    let host = strip_host_port(host.trim());
    if host.is_empty() {
        return Err(TargetError::EmptyHost);
    }

    let Some((prefix, base_domain)) = host.split_once('.') else {
        return Err(TargetError::MissingSubdomain);
    };
    if base_domain.is_empty() {
        return Err(TargetError::MissingSubdomain);
    }

    let Some((port, identifier)) = prefix.split_once('-') else {
        return Err(TargetError::MissingSeparator);
    };

    let port = parse_port(port)?;
    if identifier.is_empty() {
        return Err(TargetError::MissingIdentifier);
    }

    Ok(HostTarget {
        port,
        identifier: identifier.to_string(),
        base_domain: base_domain.to_string(),
    })
}

/// Parsed `/toolbox/<sandboxId>/<rest>` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolboxTarget {
    pub sandbox_id: String,
    /// Remaining path with exactly one leading slash.
    pub path: String,
}

/// Parse a toolbox subpath. The target port is always [`TOOLBOX_PORT`].
pub fn parse_toolbox_subpath(path: &str) -> Result<ToolboxTarget, TargetError> {
    if path.is_empty() {
        return Err(TargetError::EmptyPath);
    }
    let rest = path
        .strip_prefix(TOOLBOX_PREFIX)
        .ok_or(TargetError::MalformedToolboxPath)?;

    let (sandbox_id, remainder) = rest
        .split_once('/')
        .ok_or(TargetError::MalformedToolboxPath)?;
    if sandbox_id.is_empty() {
        return Err(TargetError::MissingIdentifier);
    }

    Ok(ToolboxTarget {
        sandbox_id: sandbox_id.to_string(),
        path: normalize_path(remainder),
    })
}

/// Exactly one leading slash; empty becomes `/`.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// How a resolved request maps onto the runner's API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    /// Forward to a port inside the sandbox through the toolbox proxy.
    Port(u16),
    /// Talk to the toolbox daemon API directly.
    Toolbox,
}

impl RouteMode {
    pub fn port(self) -> u16 {
        match self {
            RouteMode::Port(port) => port,
            RouteMode::Toolbox => TOOLBOX_PORT,
        }
    }
}

/// A fully resolved forwarding target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub sandbox_id: String,
    pub mode: RouteMode,
    /// Path to request on the sandbox side.
    pub path: String,
    /// Query string without the leading `?`.
    pub query: Option<String>,
}

impl ProxyTarget {
    /// Absolute URL on the runner.
    ///
    /// `<runner>/sandboxes/<id>/toolbox/proxy/<port><path>` for port routing,
    /// `<runner>/sandboxes/<id>/toolbox<path>` for the toolbox API.
    pub fn url(&self, runner: &RunnerInfo) -> String {
        let base = match self.mode {
            RouteMode::Port(port) => format!(
                "{}/sandboxes/{}/toolbox/proxy/{}",
                runner.api_url, self.sandbox_id, port
            ),
            RouteMode::Toolbox => format!("{}/sandboxes/{}/toolbox", runner.api_url, self.sandbox_id),
        };
        let path = normalize_path(&self.path);
        match self.query.as_deref() {
            Some(q) if !q.is_empty() => format!("{base}{path}?{q}"),
            _ => format!("{base}{path}"),
        }
    }
}

/// Ports that require authentication even on a public sandbox.
pub fn is_privileged_port(port: u16) -> bool {
    matches!(port, TERMINAL_PORT | TOOLBOX_PORT | RECORDING_DASHBOARD_PORT)
}

/// Remove every `name` parameter from a query string.
///
/// Returns the first value found and the remaining query (`None` when
/// nothing is left). Other parameters keep their order.
pub fn take_query_param(query: Option<&str>, name: &str) -> (Option<String>, Option<String>) {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return (None, None);
    };

    let mut taken = None;
    let mut remaining = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0usize;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == name {
            if taken.is_none() {
                taken = Some(value.into_owned());
            }
        } else {
            remaining.append_pair(&key, &value);
            kept += 1;
        }
    }

    if taken.is_none() {
        return (None, Some(query.to_string()));
    }
    let remaining = (kept > 0).then(|| remaining.finish());
    (taken, remaining)
}

fn parse_port(raw: &str) -> Result<u16, TargetError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TargetError::InvalidPort(raw.to_string()));
    }
    raw.parse::<u16>()
        .map_err(|_| TargetError::InvalidPort(raw.to_string()))
}

fn strip_host_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

//! CLI command definitions for the `sandgate` binary.
//!
//! Every configuration option can be given in the TOML file, as a flag, or
//! as a `SANDGATE_*` environment variable; flags and variables win.

pub mod resolve;
pub mod serve;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use sandgate_observe::LogFormat;
use sandgate_types::config::{CacheBackendKind, GatewayConfig};

/// Authenticating gateway in front of sandbox previews.
#[derive(Parser)]
#[command(name = "sandgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, env = "SANDGATE_CONFIG", default_value = "sandgate.toml")]
    pub config: PathBuf,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log output format (plain or json).
    #[arg(long, global = true, env = "SANDGATE_LOG_FORMAT", default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "SANDGATE_OTEL")]
    pub otel: bool,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway.
    Serve,

    /// Show where a sandbox is served from and how it would be treated.
    Resolve {
        /// Sandbox ID to look up.
        sandbox_id: String,
    },
}

/// Per-option overrides layered on top of the configuration file.
#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    #[arg(long, global = true, env = "SANDGATE_PROXY_PORT")]
    pub proxy_port: Option<u16>,

    #[arg(long, global = true, env = "SANDGATE_PROXY_DOMAIN")]
    pub proxy_domain: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_PROXY_PROTOCOL")]
    pub proxy_protocol: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_API_URL")]
    pub api_url: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_COOKIE_DOMAIN")]
    pub cookie_domain: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_COOKIE_SECRET", hide_env_values = true)]
    pub cookie_secret: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_OIDC_CLIENT_ID")]
    pub oidc_client_id: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_OIDC_CLIENT_SECRET", hide_env_values = true)]
    pub oidc_client_secret: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_OIDC_DOMAIN")]
    pub oidc_domain: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_OIDC_PUBLIC_DOMAIN")]
    pub oidc_public_domain: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_OIDC_AUDIENCE")]
    pub oidc_audience: Option<String>,

    #[arg(long, global = true, env = "SANDGATE_TLS_ENABLED")]
    pub tls_enabled: Option<bool>,

    #[arg(long, global = true, env = "SANDGATE_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, global = true, env = "SANDGATE_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    #[arg(long, global = true, env = "SANDGATE_CACHE_BACKEND")]
    pub cache_backend: Option<CacheBackendKind>,

    #[arg(long, global = true, env = "SANDGATE_REDIS_URL", hide_env_values = true)]
    pub redis_url: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut GatewayConfig) {
        if let Some(port) = self.proxy_port {
            config.proxy.port = port;
        }
        if let Some(domain) = self.proxy_domain {
            config.proxy.domain = domain;
        }
        if let Some(protocol) = self.proxy_protocol {
            config.proxy.protocol = protocol;
        }
        if let Some(url) = self.api_url {
            config.control_plane.url = url;
        }
        if let Some(key) = self.api_key {
            config.control_plane.api_key = key;
        }
        if let Some(domain) = self.cookie_domain {
            config.cookie.domain = Some(domain);
        }
        if let Some(secret) = self.cookie_secret {
            config.cookie.secret = secret;
        }
        if let Some(client_id) = self.oidc_client_id {
            config.oidc.client_id = client_id;
        }
        if let Some(secret) = self.oidc_client_secret {
            config.oidc.client_secret = secret;
        }
        if let Some(domain) = self.oidc_domain {
            config.oidc.domain = domain;
        }
        if let Some(domain) = self.oidc_public_domain {
            config.oidc.public_domain = Some(domain);
        }
        if let Some(audience) = self.oidc_audience {
            config.oidc.audience = Some(audience);
        }
        if let Some(enabled) = self.tls_enabled {
            config.tls.enabled = enabled;
        }
        if let Some(cert) = self.tls_cert {
            config.tls.cert_file = Some(cert);
        }
        if let Some(key) = self.tls_key {
            config.tls.key_file = Some(key);
        }
        if let Some(backend) = self.cache_backend {
            config.cache.backend = backend;
        }
        if let Some(url) = self.redis_url {
            config.cache.redis_url = Some(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve() {
        let cli = Cli::try_parse_from([
            "sandgate",
            "--config",
            "/etc/sandgate.toml",
            "--log-format",
            "json",
            "serve",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/sandgate.toml"));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn test_cli_parses_resolve_with_overrides() {
        let cli = Cli::try_parse_from([
            "sandgate",
            "resolve",
            "sb-1",
            "--json",
            "--api-url",
            "http://api:3000",
            "--cache-backend",
            "redis",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Resolve { sandbox_id } => assert_eq!(sandbox_id, "sb-1"),
            Commands::Serve => panic!("expected resolve"),
        }
        assert_eq!(cli.overrides.cache_backend, Some(CacheBackendKind::Redis));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = GatewayConfig::default();
        config.proxy.domain = "from-file.example.com".to_string();
        config.proxy.port = 4000;

        ConfigOverrides {
            proxy_domain: Some("proxy.example.com".to_string()),
            tls_enabled: Some(true),
            cookie_domain: Some("example.com".to_string()),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.proxy.domain, "proxy.example.com");
        assert_eq!(config.proxy.port, 4000);
        assert!(config.tls.enabled);
        assert_eq!(config.cookie.domain.as_deref(), Some("example.com"));
    }
}

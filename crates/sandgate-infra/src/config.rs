//! Gateway configuration loader.
//!
//! Reads `sandgate.toml` (or the path given with `--config`) into
//! [`GatewayConfig`]. A missing file yields defaults so the gateway can be
//! configured purely from the environment; a file that exists but does not
//! parse is an error, since silently defaulting auth settings is unsafe.

use std::path::Path;

use sandgate_types::config::GatewayConfig;
use sandgate_types::error::ConfigError;

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`GatewayConfig::default()`].
/// - If the file cannot be read or parsed, returns an error.
///
/// Does not validate; callers apply overrides first, then call
/// [`GatewayConfig::validate`].
pub async fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            return Ok(GatewayConfig::default());
        }
        Err(err) => {
            return Err(ConfigError::Read(format!("{}: {err}", path.display())));
        }
    };

    toml::from_str::<GatewayConfig>(&content)
        .map_err(|err| ConfigError::Parse(format!("{}: {err}", path.display())))
}

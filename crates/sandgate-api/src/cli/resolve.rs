//! `sandgate resolve <sandboxId>`: operator diagnostic.
//!
//! Asks the control plane everything the gateway would ask for a request to
//! this sandbox and prints the answers. Individual lookups may fail without
//! aborting the report.

use std::sync::Arc;

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde::Serialize;

use sandgate_core::access::AccessValidator;
use sandgate_core::cache::BoxCacheStore;
use sandgate_core::cache::memory::MemoryCacheStore;
use sandgate_core::control_plane::ControlPlane;
use sandgate_core::locator::BackendLocator;
use sandgate_infra::control_plane::ApiClient;
use sandgate_types::config::GatewayConfig;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub sandbox_id: String,
    pub runner_url: Option<String>,
    pub state: Option<String>,
    pub wake_on_request: Option<String>,
    pub public: bool,
    pub toolbox_proxy_url: Option<String>,
    /// Lookups that failed, as `(what, error)`.
    pub errors: Vec<(String, String)>,
}

pub async fn resolve(config: GatewayConfig, sandbox_id: &str, json: bool) -> anyhow::Result<()> {
    if config.control_plane.url.trim().is_empty() {
        anyhow::bail!("control_plane.url is required");
    }
    let client = Arc::new(ApiClient::new(&config.control_plane)?);
    let resolution = lookup(client, sandbox_id).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
        return Ok(());
    }
    print_table(&resolution);
    Ok(())
}

pub async fn lookup<C: ControlPlane>(control_plane: Arc<C>, sandbox_id: &str) -> Resolution {
    let store = BoxCacheStore::new(MemoryCacheStore::new());
    let locator = BackendLocator::new(control_plane.clone(), store.clone());
    let access = AccessValidator::new(control_plane.clone(), store);

    let mut resolution = Resolution {
        sandbox_id: sandbox_id.to_string(),
        ..Default::default()
    };

    match locator.get_sandbox_runner(sandbox_id).await {
        Ok(runner) => resolution.runner_url = Some(runner.api_url),
        Err(e) => resolution.errors.push(("runner".to_string(), e.to_string())),
    }

    match control_plane.get_sandbox_info(sandbox_id).await {
        Ok(info) => {
            resolution.state = Some(info.state.to_string());
            resolution.wake_on_request = Some(info.wake_on_request.to_string());
        }
        Err(e) => resolution.errors.push(("state".to_string(), e.to_string())),
    }

    resolution.public = access.is_public(sandbox_id).await;

    match control_plane.get_toolbox_proxy_url(sandbox_id).await {
        Ok(url) => resolution.toolbox_proxy_url = Some(url),
        Err(e) => resolution
            .errors
            .push(("toolbox proxy URL".to_string(), e.to_string())),
    }

    resolution
}

fn print_table(resolution: &Resolution) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Field").fg(Color::White),
        Cell::new("Value").fg(Color::White),
    ]);

    let or_dash = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    table.add_row(vec![Cell::new("Sandbox"), Cell::new(&resolution.sandbox_id)]);
    table.add_row(vec![Cell::new("Runner"), Cell::new(or_dash(&resolution.runner_url))]);
    table.add_row(vec![Cell::new("State"), Cell::new(or_dash(&resolution.state))]);
    table.add_row(vec![
        Cell::new("Wake on request"),
        Cell::new(or_dash(&resolution.wake_on_request)),
    ]);
    let public = if resolution.public {
        Cell::new("● public").fg(Color::Green)
    } else {
        Cell::new("○ private").fg(Color::Yellow)
    };
    table.add_row(vec![Cell::new("Visibility"), public]);
    table.add_row(vec![
        Cell::new("Toolbox proxy"),
        Cell::new(or_dash(&resolution.toolbox_proxy_url)),
    ]);

    println!();
    println!("{table}");
    for (what, error) in &resolution.errors {
        println!("  {} {what}: {error}", style("!").red().bold());
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::json;
    use sandgate_types::config::ControlPlaneConfig;

    async fn control_plane() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let router = Router::new()
            .route(
                "/runners/by-sandbox/{id}",
                get(|| async { Json(json!({ "id": "r1", "proxyUrl": "http://runner-1:3003/", "apiKey": "k" })) }),
            )
            .route(
                "/preview/{id}/info",
                get(|| async { Json(json!({ "state": "stopped", "wakeOnRequest": "http" })) }),
            )
            .route("/preview/{id}/public", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/sandbox/{id}/toolbox-proxy-url",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            );
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        base
    }

    #[tokio::test]
    async fn test_lookup_collects_answers_and_errors() {
        let client = ApiClient::new(&ControlPlaneConfig {
            url: control_plane().await,
            api_key: "svc".to_string(),
            timeout_secs: 5,
        })
        .unwrap();

        let resolution = lookup(Arc::new(client), "sb-1").await;
        assert_eq!(resolution.sandbox_id, "sb-1");
        assert_eq!(resolution.runner_url.as_deref(), Some("http://runner-1:3003"));
        assert_eq!(resolution.state.as_deref(), Some("stopped"));
        assert!(!resolution.public);
        assert!(resolution.toolbox_proxy_url.is_none());
        assert_eq!(resolution.errors.len(), 1);
        assert_eq!(resolution.errors[0].0, "toolbox proxy URL");
    }

    #[test]
    fn test_json_shape() {
        let resolution = Resolution {
            sandbox_id: "sb".to_string(),
            public: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&resolution).unwrap();
        assert_eq!(value["sandboxId"], "sb");
        assert_eq!(value["public"], true);
        assert!(value["runnerUrl"].is_null());
    }
}

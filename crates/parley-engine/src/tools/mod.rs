pub mod calculator;
pub mod stock;
pub mod web_search;

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::registry::{RegistryError, ToolRegistry};

/// Endpoints and credentials for the built-in tools.
#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub stock_base_url: String,
    pub alphavantage_api_key: Option<SecretString>,
    pub search_base_url: String,
    pub max_search_results: usize,
    pub http_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            stock_base_url: stock::ALPHA_VANTAGE_URL.to_string(),
            alphavantage_api_key: None,
            search_base_url: web_search::DUCKDUCKGO_URL.to_string(),
            max_search_results: web_search::DEFAULT_MAX_RESULTS,
            http_timeout: Duration::from_secs(15),
        }
    }
}

/// Shared client for the HTTP-backed tools. Every request is bounded by
/// `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, RegistryError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Registry holding `calculator`, `get_stock_price` and `web_search`.
pub fn create_default_registry(config: &ToolsConfig) -> Result<ToolRegistry, RegistryError> {
    let client = http_client(config.http_timeout)?;

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(calculator::CalculatorTool::new()))?;
    registry.register(Arc::new(stock::StockPriceTool::new(
        client.clone(),
        config.stock_base_url.clone(),
        config.alphavantage_api_key.clone(),
    )))?;
    registry.register(Arc::new(web_search::WebSearchTool::new(
        client,
        config.search_base_url.clone(),
        config.max_search_results,
    )))?;
    Ok(registry)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::extract::Query;
    use axum::http::{StatusCode, Uri};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::Value;

    use parley_core::ids::{ThreadId, ToolCallId};
    use parley_core::tools::ToolContext;

    #[derive(Clone, Debug, Default)]
    pub struct Recorded {
        pub path: String,
        pub query: HashMap<String, String>,
    }

    pub fn ctx() -> ToolContext {
        ToolContext {
            thread_id: ThreadId::new(),
            call_id: ToolCallId::new(),
        }
    }

    /// Serve `body` with `status` for every request on an ephemeral port.
    /// Returns the base URL and the last request seen.
    pub async fn serve_json(status: u16, body: Value) -> (String, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let seen = Arc::clone(&recorded);
        let app = Router::new().fallback(
            move |uri: Uri, Query(query): Query<HashMap<String, String>>| {
                let seen = Arc::clone(&seen);
                let body = body.clone();
                async move {
                    *seen.lock() = Recorded {
                        path: uri.path().to_string(),
                        query,
                    };
                    (StatusCode::from_u16(status).unwrap(), Json(body))
                }
            },
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/query"), recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use parley_core::tools::Tool;

    use super::test_support::ctx;

    #[test]
    fn default_registry_has_three_tools() {
        let registry = create_default_registry(&ToolsConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["calculator", "get_stock_price", "web_search"]);
    }

    #[test]
    fn definitions_carry_schemas() {
        let registry = create_default_registry(&ToolsConfig::default()).unwrap();
        let defs = registry.definitions();
        let calc = defs.iter().find(|d| d.name == "calculator").unwrap();
        assert_eq!(
            calc.parameters_schema["required"],
            json!(["first_num", "second_num", "operation"])
        );
    }

    #[tokio::test]
    async fn configured_http_timeout_applies_to_tools() {
        let app = axum::Router::new().fallback(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            axum::Json(json!({}))
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let registry = create_default_registry(&ToolsConfig {
            search_base_url: format!("http://{addr}/"),
            http_timeout: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap();
        let search = registry.get("web_search").unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            search.execute(json!({"query": "slow"}), &ctx()),
        )
        .await
        .expect("request should give up at the client timeout")
        .unwrap();
        assert!(result.is_error());
    }
}

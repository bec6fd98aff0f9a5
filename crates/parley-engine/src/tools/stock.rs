use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use parley_core::tools::{Tool, ToolContext, ToolError, ToolResult};

pub const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

#[derive(Deserialize)]
struct StockArgs {
    symbol: String,
}

/// Latest quote for a ticker symbol from Alpha Vantage `GLOBAL_QUOTE`.
/// The provider's response is handed back untouched.
pub struct StockPriceTool {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl StockPriceTool {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &str {
        "get_stock_price"
    }

    fn description(&self) -> &str {
        "Fetch the latest stock price for a ticker symbol (e.g. 'AAPL', 'TSLA')."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string", "description": "Ticker symbol"}
            },
            "required": ["symbol"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args: StockArgs = serde_json::from_value(args)?;
        let symbol = args.symbol.trim();
        if symbol.is_empty() {
            return Err(ToolError::InvalidArguments("symbol must not be empty".into()));
        }
        let Some(api_key) = &self.api_key else {
            return Ok(ToolResult::error("ALPHAVANTAGE_API_KEY is not configured"));
        };

        let response = match self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", api_key.expose_secret()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::error(format!("Stock price request failed: {e}"))),
        };

        let status = response.status();
        if !status.is_success() {
            debug!(%status, symbol, "quote request rejected");
            return Ok(ToolResult::error(format!("Stock price request failed: HTTP {status}")));
        }

        match response.json::<Value>().await {
            Ok(body) => Ok(ToolResult::ok(body)),
            Err(e) => Ok(ToolResult::error(format!("Failed to parse stock price response: {e}"))),
        }
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use parley_core::tools::{Tool, ToolContext, ToolError, ToolResult};

pub const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";
pub const DEFAULT_MAX_RESULTS: usize = 5;

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

/// One search hit as handed to the model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Web search backed by the DuckDuckGo Instant Answer API.
pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, max_results: usize) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            max_results: max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns an ordered list of results with title, link and snippet."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args: SearchArgs = serde_json::from_value(args)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }

        let response = match self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::error(format!("Search request failed: {e}"))),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolResult::error(format!("Search failed: HTTP {status}")));
        }

        // The API labels its JSON as javascript, so decode the text ourselves.
        let body: Value = match response.text().await.map(|t| serde_json::from_str(&t)) {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return Ok(ToolResult::error(format!("Failed to parse search response: {e}"))),
            Err(e) => return Ok(ToolResult::error(format!("Search request failed: {e}"))),
        };

        let hits = extract_results(&body, self.max_results);
        Ok(ToolResult::ok(serde_json::to_value(hits)?))
    }
}

/// Flatten an Instant Answer body into ranked hits: the abstract first, then
/// direct results, then related topics (including grouped ones).
pub fn extract_results(body: &Value, limit: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    let abstract_text = body["AbstractText"].as_str().unwrap_or_default();
    if !abstract_text.is_empty() {
        hits.push(SearchHit {
            title: body["Heading"].as_str().unwrap_or_default().to_string(),
            link: body["AbstractURL"].as_str().unwrap_or_default().to_string(),
            snippet: abstract_text.to_string(),
        });
    }

    let topics = body["Results"]
        .as_array()
        .into_iter()
        .chain(body["RelatedTopics"].as_array())
        .flatten();
    for topic in topics {
        match topic["Topics"].as_array() {
            Some(group) => hits.extend(group.iter().filter_map(topic_hit)),
            None => hits.extend(topic_hit(topic)),
        }
    }

    hits.truncate(limit);
    hits
}

fn topic_hit(topic: &Value) -> Option<SearchHit> {
    let text = topic["Text"].as_str().filter(|t| !t.is_empty())?;
    let link = topic["FirstURL"].as_str().unwrap_or_default();
    let title = text.split(" - ").next().unwrap_or(text);
    Some(SearchHit {
        title: title.to_string(),
        link: link.to_string(),
        snippet: text.to_string(),
    })
}

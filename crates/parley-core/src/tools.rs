use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{ThreadId, ToolCallId};

/// Context available to tools during execution.
pub struct ToolContext {
    pub thread_id: ThreadId,
    pub call_id: ToolCallId,
}

/// Outcome of a tool call as it travels back to the model.
///
/// Failures are data: a tool that cannot do its job returns
/// `ToolResult::Error` instead of an `Err`. On the wire the success payload is
/// the tool's own JSON and the error is `{"error": "<reason>"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResult {
    Error { error: String },
    Success(serde_json::Value),
}

impl ToolResult {
    pub fn ok(value: serde_json::Value) -> Self {
        Self::Success(value)
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error { error: reason.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Success(v) => v.clone(),
            Self::Error { error } => serde_json::json!({ "error": error }),
        }
    }

    /// Serialized form stored as a tool message's `content`.
    pub fn to_content(&self) -> String {
        self.to_value().to_string()
    }

    /// Parse a tool message's `content` back. Content that is not JSON is
    /// kept as a string payload.
    pub fn from_content(content: &str) -> Self {
        serde_json::from_str(content)
            .unwrap_or_else(|_| Self::Success(serde_json::Value::String(content.to_owned())))
    }
}

/// Tool definition advertised to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// Failures a tool could not express as a result payload. The dispatcher
/// turns every one of these into `ToolResult::Error`.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidArguments(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_result_wire_shape() {
        let r = ToolResult::error("Division by zero is not allowed");
        assert_eq!(r.to_value(), json!({"error": "Division by zero is not allowed"}));
        assert!(r.is_error());
    }

    #[test]
    fn content_roundtrip_distinguishes_errors() {
        let ok = ToolResult::ok(json!({"result": 20.0}));
        assert_eq!(ToolResult::from_content(&ok.to_content()), ok);

        let err = ToolResult::error("boom");
        assert_eq!(ToolResult::from_content(&err.to_content()), err);
    }

    #[test]
    fn non_json_content_is_kept_as_string() {
        assert_eq!(ToolResult::from_content("plain"), ToolResult::ok(json!("plain")));
    }

    #[test]
    fn tool_error_display() {
        let err = ToolError::InvalidArguments("missing field `symbol`".into());
        assert_eq!(err.to_string(), "invalid arguments: missing field `symbol`");
    }
}

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ToolCallId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A structured request from the model to run a named tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: ToolCallId,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            call_id: ToolCallId::new(),
            name: name.into(),
            arguments,
        }
    }
}

/// One conversational turn. `id` is the reducer identity: merging a message
/// whose id is already present replaces it in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    /// Tool name, set on tool-result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_with_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(text)
        }
    }

    /// Tool-result message. `content` is the serialized [`ToolResult`](crate::tools::ToolResult).
    pub fn tool(call_id: ToolCallId, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id),
            name: Some(name.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    /// Whether a chat transcript should show this message: user and assistant
    /// turns with some text. Tool traffic and call-only turns are hidden.
    pub fn is_displayable(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant) && !self.content.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_message_wire_shape() {
        let msg = Message::user("hello");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hello");
        assert!(v.get("tool_calls").is_none());
        assert!(v.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_message_links_call_id() {
        let call = ToolCall::new("calculator", json!({"first_num": 1, "second_num": 2, "operation": "add"}));
        let msg = Message::tool(call.call_id.clone(), "calculator", r#"{"result":3.0}"#);
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], call.call_id.as_str());
        assert_eq!(v["name"], "calculator");
    }

    #[test]
    fn tool_call_wire_contract() {
        let call = ToolCall {
            call_id: ToolCallId::from_raw("call_7"),
            name: "get_stock_price".into(),
            arguments: json!({"symbol": "AAPL"}),
        };
        let v = serde_json::to_value(&call).unwrap();
        assert_eq!(v, json!({"call_id": "call_7", "name": "get_stock_price", "arguments": {"symbol": "AAPL"}}));
    }

    #[test]
    fn call_only_assistant_is_not_displayable() {
        let msg = Message::assistant_with_calls("", vec![ToolCall::new("web_search", json!({"query": "rust"}))]);
        assert!(msg.has_tool_calls());
        assert!(!msg.is_displayable());
        assert!(Message::assistant("done").is_displayable());
        assert!(!Message::tool(ToolCallId::new(), "x", "{}").is_displayable());
    }

    #[test]
    fn deserializes_with_missing_optional_fields() {
        let msg: Message = serde_json::from_value(json!({"id": "msg_1", "role": "assistant"})).unwrap();
        assert_eq!(msg.content, "");
        assert!(msg.tool_calls.is_empty());
        assert_eq!(msg.role, Role::Assistant);
    }
}

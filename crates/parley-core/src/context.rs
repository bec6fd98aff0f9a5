use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Everything a provider needs for one call.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single user prompt with no tools, for one-shot calls.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            ..Self::default()
        }
    }
}

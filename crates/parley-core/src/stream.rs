use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::messages::{Message, ToolCall};

/// Events emitted while a model response streams. Ordering contract:
///
/// Start → (TextDelta | ToolCallEnd)* → Done
///
/// Error can appear at any point and ends the stream.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    ToolCallEnd { tool_call: ToolCall },
    Done { message: Message, stop_reason: StopReason },
    Error { error: GatewayError },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Safety,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

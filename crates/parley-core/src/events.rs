use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;
use crate::messages::Message;

/// What a caller observes while a turn runs. Tokens are a side channel; the
/// authoritative transcript changes are the `Message` events, each emitted
/// after the state holding it was checkpointed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Token {
        delta: String,
    },
    ToolStarted {
        call_id: ToolCallId,
        name: String,
    },
    ToolFinished {
        call_id: ToolCallId,
        name: String,
        is_error: bool,
    },
    Message {
        message: Message,
    },
    /// Last event of a successful turn.
    Completed {
        message: Message,
    },
    /// Last event of a turn that hit a storage failure, the tool round cap,
    /// or cancellation.
    Failed {
        error: String,
    },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::Message { .. } => "message",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_serialization() {
        let ev = TurnEvent::Token { delta: "he".into() };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "token");
        assert_eq!(v["delta"], "he");

        let ev = TurnEvent::ToolFinished {
            call_id: ToolCallId::from_raw("call_1"),
            name: "calculator".into(),
            is_error: true,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_finished");
        assert_eq!(v["is_error"], true);
    }

    #[test]
    fn event_type_matches_tag() {
        let events = vec![
            TurnEvent::Token { delta: String::new() },
            TurnEvent::ToolStarted { call_id: ToolCallId::new(), name: "x".into() },
            TurnEvent::Message { message: Message::user("hi") },
            TurnEvent::Completed { message: Message::assistant("bye") },
            TurnEvent::Failed { error: "disk".into() },
        ];
        for ev in &events {
            let v = serde_json::to_value(ev).unwrap();
            assert_eq!(v["type"], ev.event_type());
        }
    }

    #[test]
    fn terminal_events() {
        assert!(TurnEvent::Completed { message: Message::assistant("x") }.is_terminal());
        assert!(TurnEvent::Failed { error: "x".into() }.is_terminal());
        assert!(!TurnEvent::Token { delta: "x".into() }.is_terminal());
    }
}

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;
use crate::messages::{Message, Role, ToolCall};

/// The transcript of a thread. Insertion order is significant.
///
/// The only way to produce a new state is [`ConversationState::reduce`];
/// there is no API for removing or reordering messages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Merge `incoming` into the state. A message whose id already exists
    /// replaces the old one at its original position; anything else is
    /// appended in order. Pure: `self` is untouched.
    pub fn reduce<I>(&self, incoming: I) -> ConversationState
    where
        I: IntoIterator<Item = Message>,
    {
        let mut messages = self.messages.clone();
        for msg in incoming {
            match messages.iter_mut().find(|m| m.id == msg.id) {
                Some(slot) => *slot = msg,
                None => messages.push(msg),
            }
        }
        ConversationState { messages }
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Tool calls from the most recent assistant message that have no
    /// matching tool-result message after it, in call order.
    pub fn unresolved_tool_calls(&self) -> Vec<&ToolCall> {
        let Some(pos) = self.messages.iter().rposition(|m| m.role == Role::Assistant) else {
            return Vec::new();
        };
        let resolved: HashSet<&ToolCallId> = self.messages[pos + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_ref())
            .collect();
        self.messages[pos]
            .tool_calls
            .iter()
            .filter(|c| !resolved.contains(&c.call_id))
            .collect()
    }

    /// Messages a chat UI should render.
    pub fn transcript(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_displayable())
    }
}

impl From<Vec<Message>> for ConversationState {
    fn from(messages: Vec<Message>) -> Self {
        ConversationState::new().reduce(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ConversationState {
        ConversationState::new().reduce([Message::user("hi"), Message::assistant("hello")])
    }

    #[test]
    fn appends_in_order() {
        let s = sample();
        let next = s.reduce([Message::user("a"), Message::user("b")]);
        let texts: Vec<_> = next.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, ["hi", "hello", "a", "b"]);
    }

    #[test]
    fn reduce_is_pure() {
        let s = sample();
        let _ = s.reduce([Message::user("more")]);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn matching_id_replaces_in_place() {
        let s = sample();
        let mut amended = s.messages()[1].clone();
        amended.content = "hello there".into();
        let next = s.reduce([amended.clone(), Message::user("tail")]);
        assert_eq!(next.len(), 3);
        assert_eq!(next.messages()[1], amended);
        assert_eq!(next.messages()[0], s.messages()[0]);
    }

    #[test]
    fn duplicate_ids_within_batch_collapse() {
        let mut first = Message::assistant("par");
        let s = ConversationState::new().reduce([first.clone()]);
        first.content = "partial".into();
        let mut last = first.clone();
        last.content = "partial answer".into();
        let next = s.reduce([first, last.clone()]);
        assert_eq!(next.messages(), &[last]);
    }

    #[test]
    fn prior_messages_are_preserved_as_prefix() {
        let s = sample();
        let next = s.reduce([Message::assistant("x"), Message::user("y")]);
        assert_eq!(&next.messages()[..s.len()], s.messages());
    }

    #[test]
    fn unresolved_calls_tracks_tool_results() {
        let a = ToolCall::new("calculator", json!({}));
        let b = ToolCall::new("web_search", json!({}));
        let s = sample().reduce([Message::assistant_with_calls("", vec![a.clone(), b.clone()])]);
        assert_eq!(s.unresolved_tool_calls().len(), 2);

        let s = s.reduce([Message::tool(a.call_id.clone(), "calculator", "{}")]);
        let pending = s.unresolved_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].call_id, b.call_id);

        let s = s.reduce([Message::tool(b.call_id.clone(), "web_search", "[]")]);
        assert!(s.unresolved_tool_calls().is_empty());
    }

    #[test]
    fn no_assistant_means_nothing_unresolved() {
        let s = ConversationState::new().reduce([Message::user("hi")]);
        assert!(s.unresolved_tool_calls().is_empty());
        assert!(s.last_assistant().is_none());
    }

    #[test]
    fn transcript_hides_tool_traffic() {
        let call = ToolCall::new("calculator", json!({}));
        let s = sample().reduce([
            Message::assistant_with_calls("", vec![call.clone()]),
            Message::tool(call.call_id, "calculator", "{}"),
            Message::assistant("3"),
        ]);
        let shown: Vec<_> = s.transcript().map(|m| m.content.as_str()).collect();
        assert_eq!(shown, ["hi", "hello", "3"]);
    }

    #[test]
    fn serde_roundtrip() {
        let s = sample();
        let json = serde_json::to_string(&s).unwrap();
        let parsed: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, s);
    }
}

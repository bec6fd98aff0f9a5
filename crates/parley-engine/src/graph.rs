use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use parley_core::events::TurnEvent;
use parley_core::ids::{ThreadId, ToolCallId};
use parley_core::messages::{Message, ToolCall};
use parley_core::state::ConversationState;
use parley_core::tools::ToolResult;
use parley_store::{Checkpoint, CheckpointStore, PendingWrite, StepKind};

use crate::decide::DecisionStep;
use crate::dispatch::Dispatcher;
use crate::error::EngineError;
use crate::sink::EventSink;

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;

/// Router states. `End` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    Decide,
    Dispatch,
    End,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Decide => "decide",
            Self::Dispatch => "dispatch",
            Self::End => "end",
        })
    }
}

/// The conditional edge out of `Decide`: dispatch while the newest
/// assistant message has tool calls without results, otherwise stop.
pub fn route_after_decide(state: &ConversationState) -> Node {
    if state.unresolved_tool_calls().is_empty() {
        Node::End
    } else {
        Node::Dispatch
    }
}

/// Result of a completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub state: ConversationState,
    /// The final assistant message.
    pub reply: Message,
    pub tool_rounds: u32,
    pub degraded: bool,
}

/// DECIDE/DISPATCH state machine over one thread's checkpoint lineage.
/// Every node's output is checkpointed before the next node runs.
pub struct ChatGraph {
    store: Arc<dyn CheckpointStore>,
    decide: DecisionStep,
    dispatcher: Dispatcher,
    max_tool_rounds: Option<u32>,
}

impl ChatGraph {
    pub fn new(store: Arc<dyn CheckpointStore>, decide: DecisionStep, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            decide,
            dispatcher,
            max_tool_rounds: Some(DEFAULT_MAX_TOOL_ROUNDS),
        }
    }

    /// `None` removes the cap.
    pub fn with_max_tool_rounds(mut self, max: Option<u32>) -> Self {
        self.max_tool_rounds = max;
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Run one user turn to completion.
    #[instrument(skip(self, user_text, events, cancel), fields(thread_id = %thread_id))]
    pub async fn run_turn(
        &self,
        thread_id: &ThreadId,
        user_text: &str,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }

        let mut state = match self.store.latest_checkpoint(thread_id)? {
            Some(cp) if !cp.state.unresolved_tool_calls().is_empty() => {
                info!(step = cp.step, "finishing interrupted dispatch");
                self.dispatch_from(thread_id, &cp, events, cancel).await?
            }
            Some(cp) => cp.state,
            None => ConversationState::new(),
        };

        let user = Message::user(user_text);
        state = state.reduce([user.clone()]);
        let cp = self.store.append(thread_id, StepKind::Input, &state)?;
        debug!(step = cp.step, node = %cp.node, "user input checkpointed");
        events.emit(TurnEvent::Message { message: user });

        let mut rounds = 0u32;
        let mut degraded = false;
        let mut last = cp;
        let mut node = Node::Decide;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }
            node = match node {
                Node::Decide => {
                    let decision = self.decide.decide(&state, events, cancel).await?;
                    degraded = decision.is_degraded();
                    let message = decision.into_message();
                    state = state.reduce([message.clone()]);
                    last = self.store.append(thread_id, StepKind::Decide, &state)?;
                    debug!(step = last.step, calls = message.tool_calls.len(), degraded, "decide checkpointed");
                    events.emit(TurnEvent::Message { message });

                    match route_after_decide(&state) {
                        Node::Dispatch => match self.max_tool_rounds {
                            Some(max) if rounds >= max => {
                                self.stop_tool_loop(thread_id, state, max, events)?;
                                return Err(EngineError::ToolLoopExceeded(max));
                            }
                            _ => Node::Dispatch,
                        },
                        other => other,
                    }
                }
                Node::Dispatch => {
                    rounds += 1;
                    state = self.dispatch_from(thread_id, &last, events, cancel).await?;
                    Node::Decide
                }
                Node::End => break,
            };
        }

        let reply = state
            .last_assistant()
            .cloned()
            .ok_or_else(|| EngineError::Internal("turn ended without an assistant message".into()))?;
        info!(tool_rounds = rounds, degraded, messages = state.len(), "turn complete");
        events.emit(TurnEvent::Completed { message: reply.clone() });
        Ok(TurnOutcome {
            state,
            reply,
            tool_rounds: rounds,
            degraded,
        })
    }

    /// Resolve the unresolved calls of `checkpoint`'s trailing assistant
    /// message. Results already recorded as pending writes are reused; the
    /// rest run now and are recorded against the same step as they finish.
    async fn dispatch_from(
        &self,
        thread_id: &ThreadId,
        checkpoint: &Checkpoint,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<ConversationState, EngineError> {
        let state = &checkpoint.state;
        let unresolved: Vec<ToolCall> = state.unresolved_tool_calls().into_iter().cloned().collect();
        let positions: HashMap<&ToolCallId, usize> = state
            .last_assistant()
            .map(|m| m.tool_calls.iter().enumerate().map(|(i, c)| (&c.call_id, i)).collect())
            .unwrap_or_default();

        let mut results: HashMap<ToolCallId, Message> = checkpoint
            .pending_writes
            .iter()
            .map(|w| (w.call_id.clone(), w.message.clone()))
            .collect();
        let todo: Vec<ToolCall> = unresolved
            .iter()
            .filter(|c| !results.contains_key(&c.call_id))
            .cloned()
            .collect();
        if todo.len() < unresolved.len() {
            info!(
                step = checkpoint.step,
                reused = unresolved.len() - todo.len(),
                remaining = todo.len(),
                "reusing recorded tool results"
            );
        }

        let fresh = self
            .dispatcher
            .dispatch(thread_id, &todo, cancel, events, |i, message| {
                let call_id = &todo[i].call_id;
                let write = PendingWrite {
                    call_id: call_id.clone(),
                    idx: positions.get(call_id).copied().unwrap_or(i),
                    message: message.clone(),
                };
                self.store.put_write(thread_id, checkpoint.step, &write)
            })
            .await?;
        results.extend(todo.iter().map(|c| c.call_id.clone()).zip(fresh));

        let merged: Vec<Message> = unresolved
            .iter()
            .filter_map(|c| results.remove(&c.call_id))
            .collect();
        let next = state.reduce(merged.iter().cloned());
        let cp = self.store.append(thread_id, StepKind::Dispatch, &next)?;
        debug!(step = cp.step, results = merged.len(), "dispatch checkpointed");
        for message in merged {
            events.emit(TurnEvent::Message { message });
        }
        Ok(next)
    }

    /// Close out a turn that hit the tool-round cap: the pending calls are
    /// answered with an error payload without running, then a notice ends
    /// the turn. Both steps are checkpointed.
    fn stop_tool_loop(
        &self,
        thread_id: &ThreadId,
        state: ConversationState,
        max: u32,
        events: &EventSink,
    ) -> Result<(), EngineError> {
        warn!(max_tool_rounds = max, "tool round limit reached");
        let skipped: Vec<Message> = state
            .unresolved_tool_calls()
            .into_iter()
            .map(|c| {
                let result = ToolResult::error(format!("Not run: limit of {max} tool rounds reached"));
                Message::tool(c.call_id.clone(), &c.name, result.to_content())
            })
            .collect();
        let state = state.reduce(skipped.iter().cloned());
        self.store.append(thread_id, StepKind::Dispatch, &state)?;

        let notice = Message::assistant(format!(
            "Stopped after {max} tool rounds without reaching a final answer."
        ));
        let state = state.reduce([notice.clone()]);
        self.store.append(thread_id, StepKind::Decide, &state)?;

        for message in skipped.into_iter().chain([notice]) {
            events.emit(TurnEvent::Message { message });
        }
        Ok(())
    }
}

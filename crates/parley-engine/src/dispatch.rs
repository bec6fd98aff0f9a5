use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use parley_core::events::TurnEvent;
use parley_core::ids::ThreadId;
use parley_core::messages::{Message, ToolCall};
use parley_core::tools::{ToolContext, ToolResult};
use parley_store::StoreError;

use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::sink::EventSink;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a batch of tool calls and turns every outcome into a tool-result
/// message. Nothing a tool does escapes as an error.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    tool_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run `calls` concurrently. `record` sees each result as it completes,
    /// tagged with the call's position in `calls`; the returned messages are
    /// in call order.
    #[instrument(skip_all, fields(thread_id = %thread_id, calls = calls.len()))]
    pub async fn dispatch<F>(
        &self,
        thread_id: &ThreadId,
        calls: &[ToolCall],
        cancel: &CancellationToken,
        events: &EventSink,
        mut record: F,
    ) -> Result<Vec<Message>, EngineError>
    where
        F: FnMut(usize, &Message) -> Result<(), StoreError>,
    {
        let mut running: FuturesUnordered<_> = calls
            .iter()
            .enumerate()
            .map(|(idx, call)| async move {
                events.emit(TurnEvent::ToolStarted {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                });
                let result = self.run_call(thread_id, call).await;
                events.emit(TurnEvent::ToolFinished {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    is_error: result.is_error(),
                });
                (idx, Message::tool(call.call_id.clone(), &call.name, result.to_content()))
            })
            .collect();

        let mut slots: Vec<Option<Message>> = vec![None; calls.len()];
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Aborted),
                next = running.next() => next,
            };
            let Some((idx, message)) = next else { break };
            record(idx, &message)?;
            slots[idx] = Some(message);
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| EngineError::Internal("tool call produced no result".into())))
            .collect()
    }

    /// Execute one call with timeout and panic containment.
    async fn run_call(&self, thread_id: &ThreadId, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return ToolResult::error(format!("Unknown tool '{}'", call.name));
        };

        let ctx = ToolContext {
            thread_id: thread_id.clone(),
            call_id: call.call_id.clone(),
        };

        let outcome = tokio::time::timeout(
            self.tool_timeout,
            AssertUnwindSafe(tool.execute(call.arguments.clone(), &ctx)).catch_unwind(),
        )
        .await;

        match outcome {
            Ok(Ok(Ok(result))) => {
                debug!(tool = %call.name, is_error = result.is_error(), "tool finished");
                result
            }
            Ok(Ok(Err(e))) => {
                debug!(tool = %call.name, error = %e, "tool failed");
                ToolResult::error(e.to_string())
            }
            Ok(Err(panic)) => {
                error!(tool = %call.name, panic = %panic_message(&panic), "tool panicked during execution");
                ToolResult::error(format!("Tool '{}' crashed", call.name))
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = self.tool_timeout.as_secs_f64(), "tool timed out");
                ToolResult::error(format!(
                    "Tool '{}' timed out after {}s",
                    call.name,
                    self.tool_timeout.as_secs_f64()
                ))
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

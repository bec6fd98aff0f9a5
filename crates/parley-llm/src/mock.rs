use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use parley_core::context::LlmContext;
use parley_core::errors::GatewayError;
use parley_core::messages::{Message, ToolCall};
use parley_core::provider::{EventStream, LlmProvider, StreamOptions};
use parley_core::stream::{StopReason, StreamEvent};

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A plain text answer.
    pub fn stream_text(text: &str) -> Self {
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: text.to_string() },
            StreamEvent::Done {
                message: Message::assistant(text),
                stop_reason: StopReason::EndTurn,
            },
        ])
    }

    /// An answer requesting tool calls, optionally with some text.
    pub fn stream_tool_calls(text: &str, calls: Vec<ToolCall>) -> Self {
        let mut events = vec![StreamEvent::Start];
        if !text.is_empty() {
            events.push(StreamEvent::TextDelta { delta: text.to_string() });
        }
        events.extend(
            calls
                .iter()
                .cloned()
                .map(|tool_call| StreamEvent::ToolCallEnd { tool_call }),
        );
        events.push(StreamEvent::Done {
            message: Message::assistant_with_calls(text, calls),
            stop_reason: StopReason::ToolUse,
        });
        Self::Stream(events)
    }

    /// A stream that starts, emits some text, then fails.
    pub fn stream_error_after(text: &str, error: GatewayError) -> Self {
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: text.to_string() },
            StreamEvent::Error { error },
        ])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every context it was called with.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    seen: Mutex<Vec<LlmContext>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Contexts passed to `stream`, in call order.
    pub fn contexts(&self) -> Vec<LlmContext> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(context.clone());

        let Some(response) = self.responses.get(idx) else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };
        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: &MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => {
                return Ok(Box::pin(stream::iter(events.clone())));
            }
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use parley_core::context::LlmContext;
use parley_core::errors::GatewayError;
use parley_core::events::TurnEvent;
use parley_core::ids::{MessageId, ToolCallId};
use parley_core::messages::{Message, Role};
use parley_core::provider::{LlmProvider, StreamOptions};
use parley_core::state::ConversationState;
use parley_core::stream::StreamEvent;
use parley_core::tools::ToolDefinition;

use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::sink::EventSink;

pub const OVERLOADED_NOTICE: &str =
    "The model service is temporarily overloaded. Please try again in a few seconds.";

/// Outcome of one model call. Both arms carry exactly one assistant message
/// that goes into state; `Degraded` additionally records why the model
/// could not be used.
#[derive(Debug)]
pub enum Decision {
    Ok(Message),
    Degraded { message: Message, cause: GatewayError },
}

impl Decision {
    pub fn message(&self) -> &Message {
        match self {
            Self::Ok(message) | Self::Degraded { message, .. } => message,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Ok(message) | Self::Degraded { message, .. } => message,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    fn degraded(cause: GatewayError) -> Self {
        Self::Degraded {
            message: Message::assistant(degraded_notice(&cause)),
            cause,
        }
    }
}

/// User-visible text substituted for a failed model call.
pub fn degraded_notice(cause: &GatewayError) -> String {
    if cause.is_service_unavailable() {
        OVERLOADED_NOTICE.to_string()
    } else {
        format!("Unexpected error: {cause}")
    }
}

/// The model call, bound to a fixed set of tool definitions.
pub struct DecisionStep {
    provider: Arc<dyn LlmProvider>,
    tools: Vec<ToolDefinition>,
    system_prompt: Option<String>,
    options: StreamOptions,
}

impl DecisionStep {
    pub fn new(provider: Arc<dyn LlmProvider>, registry: &ToolRegistry) -> Self {
        Self {
            provider,
            tools: registry.definitions(),
            system_prompt: None,
            options: StreamOptions {
                temperature: Some(0.0),
                max_tokens: None,
            },
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Ask the model for the next assistant message. Token deltas go to
    /// `events` as they arrive. Only cancellation is an error; every model
    /// failure comes back as `Decision::Degraded`.
    #[instrument(skip_all, fields(model = %self.provider.model(), messages = state.len()))]
    pub async fn decide(
        &self,
        state: &ConversationState,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Decision, EngineError> {
        let context = LlmContext {
            system_prompt: self.system_prompt.clone(),
            messages: state.messages().to_vec(),
            tools: self.tools.clone(),
        };

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Aborted),
            result = self.provider.stream(&context, &self.options) => match result {
                Ok(stream) => stream,
                Err(cause) => {
                    warn!(kind = cause.error_kind(), error = %cause, "model call failed");
                    return Ok(Decision::degraded(cause));
                }
            },
        };

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Aborted),
                event = stream.next() => event,
            };
            match event {
                Some(StreamEvent::TextDelta { delta }) => events.emit(TurnEvent::Token { delta }),
                Some(StreamEvent::Done { message, stop_reason }) => {
                    debug!(?stop_reason, calls = message.tool_calls.len(), "model turn complete");
                    return Ok(Decision::Ok(normalize(message)));
                }
                Some(StreamEvent::Error { error }) => {
                    warn!(kind = error.error_kind(), error = %error, "model stream failed");
                    return Ok(Decision::degraded(error));
                }
                Some(StreamEvent::Start | StreamEvent::ToolCallEnd { .. }) => {}
                None => {
                    warn!("model stream ended without a final message");
                    return Ok(Decision::degraded(GatewayError::StreamInterrupted(
                        "stream ended without a final message".into(),
                    )));
                }
            }
        }
    }
}

/// Fresh identity for the assistant message, and call ids that are present
/// and unique within it.
fn normalize(mut message: Message) -> Message {
    message.id = MessageId::new();
    message.role = Role::Assistant;
    message.tool_call_id = None;
    message.name = None;
    let mut seen = HashSet::new();
    for call in &mut message.tool_calls {
        if call.call_id.as_str().is_empty() || !seen.insert(call.call_id.clone()) {
            call.call_id = ToolCallId::new();
            seen.insert(call.call_id.clone());
        }
    }
    message
}

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use parley_core::context::LlmContext;
use parley_core::errors::GatewayError;
use parley_core::ids::ThreadId;
use parley_core::provider::{LlmProvider, StreamOptions};
use parley_core::stream::StreamEvent;
use parley_store::TitleStore;

/// Shown for threads that have no title yet.
pub const UNTITLED: &str = "New Chat...";

const MAX_TITLE_TOKENS: u32 = 32;

/// Names a thread after its first exchange.
#[derive(Clone)]
pub struct TitleGenerator {
    provider: Arc<dyn LlmProvider>,
    titles: Arc<TitleStore>,
}

impl TitleGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, titles: Arc<TitleStore>) -> Self {
        Self { provider, titles }
    }

    /// Title `thread_id` unless it already has one. Failures are logged and
    /// leave the thread untitled.
    pub async fn ensure_title(&self, thread_id: &ThreadId, user_text: &str, reply: &str) {
        if self.titles.contains(thread_id) {
            return;
        }
        let title = match self.summarize(user_text, reply).await {
            Ok(Some(title)) => title,
            Ok(None) => {
                debug!(thread_id = %thread_id, "title model returned nothing usable");
                return;
            }
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "title generation failed");
                return;
            }
        };
        match self.titles.set(thread_id, &title) {
            Ok(()) => debug!(thread_id = %thread_id, title = %title, "thread titled"),
            Err(e) => warn!(thread_id = %thread_id, error = %e, "failed to save title"),
        }
    }

    async fn summarize(&self, user_text: &str, reply: &str) -> Result<Option<String>, GatewayError> {
        let options = StreamOptions {
            temperature: Some(0.0),
            max_tokens: Some(MAX_TITLE_TOKENS),
        };
        let mut stream = self
            .provider
            .stream(&LlmContext::prompt(title_prompt(user_text, reply)), &options)
            .await?;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Done { message, .. } => return Ok(clean_title(&message.content)),
                StreamEvent::Error { error } => return Err(error),
                _ => {}
            }
        }
        Err(GatewayError::StreamInterrupted("stream ended without a final message".into()))
    }
}

pub fn title_prompt(user_text: &str, reply: &str) -> String {
    format!("Summarize this chat topic in 5 words or fewer:\nUser: {user_text}\nAssistant: {reply}")
}

/// Strip whitespace and double quotes; `None` if nothing is left.
pub fn clean_title(raw: &str) -> Option<String> {
    let title = raw.trim().replace('"', "");
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

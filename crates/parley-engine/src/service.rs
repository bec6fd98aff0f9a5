//! Invocation interface over the chat graph.
//!
//! `ChatService` is what presentation layers talk to: it starts turns on
//! background tasks and streams their events, answers history and session
//! queries, and keeps display titles in step with thread lifecycles.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parley_core::events::{TurnEvent, TurnStream};
use parley_core::ids::ThreadId;
use parley_core::messages::Message;
use parley_store::TitleStore;

use crate::error::EngineError;
use crate::graph::ChatGraph;
use crate::sink;
use crate::titles::{TitleGenerator, UNTITLED};

/// A thread as listed in a session sidebar.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    pub thread_id: ThreadId,
    pub title: String,
}

/// Removes a thread from the active set when its turn ends, however it ends.
struct ActiveTurn {
    active: Arc<DashMap<ThreadId, CancellationToken>>,
    thread_id: ThreadId,
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        self.active.remove(&self.thread_id);
    }
}

pub struct ChatService {
    graph: Arc<ChatGraph>,
    titles: Arc<TitleStore>,
    titler: Option<TitleGenerator>,
    active: Arc<DashMap<ThreadId, CancellationToken>>,
}

impl ChatService {
    pub fn new(graph: ChatGraph, titles: Arc<TitleStore>) -> Self {
        Self {
            graph: Arc::new(graph),
            titles,
            titler: None,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Enable automatic titling after a thread's first turn.
    pub fn with_titler(mut self, titler: TitleGenerator) -> Self {
        self.titler = Some(titler);
        self
    }

    /// Start a turn. Events arrive on the returned stream, which ends after
    /// a `completed` or `failed` event. Dropping the stream does not stop
    /// the turn; use [`cancel`](Self::cancel) for that.
    pub fn send(&self, thread_id: &ThreadId, text: impl Into<String>) -> Result<TurnStream, EngineError> {
        let text = text.into();
        let cancel = CancellationToken::new();
        match self.active.entry(thread_id.clone()) {
            Entry::Occupied(_) => return Err(EngineError::ThreadBusy(thread_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let guard = ActiveTurn {
            active: Arc::clone(&self.active),
            thread_id: thread_id.clone(),
        };

        let (events, rx) = sink::channel();
        let graph = Arc::clone(&self.graph);
        let titler = self.titler.clone();
        let thread_id = thread_id.clone();

        tokio::spawn(async move {
            let result = graph.run_turn(&thread_id, &text, &events, &cancel).await;
            match result {
                Ok(outcome) => {
                    if let Some(titler) = titler.filter(|_| !outcome.degraded) {
                        titler.ensure_title(&thread_id, &text, &outcome.reply.content).await;
                    }
                }
                Err(e) => {
                    warn!(thread_id = %thread_id, kind = e.error_kind(), error = %e, "turn failed");
                    events.emit(TurnEvent::Failed { error: e.to_string() });
                }
            }
            // Titling counts as part of the turn so a delete cannot slip in
            // before the title is written.
            drop(guard);
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    /// Abort the in-flight turn on `thread_id`, if any.
    pub fn cancel(&self, thread_id: &ThreadId) -> bool {
        match self.active.get(thread_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self, thread_id: &ThreadId) -> bool {
        self.active.contains_key(thread_id)
    }

    /// Messages to render for a thread: user and assistant turns with text.
    pub fn load_history(&self, thread_id: &ThreadId) -> Result<Vec<Message>, EngineError> {
        let state = self.graph.store().load_latest(thread_id)?;
        Ok(state.transcript().cloned().collect())
    }

    /// Every thread with stored checkpoints, most recently active first.
    pub fn list_threads(&self) -> Result<Vec<ThreadId>, EngineError> {
        Ok(self.graph.store().list_threads()?)
    }

    /// Stored threads plus threads that only have a title, each with its
    /// display title.
    pub fn sessions(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let mut titles = self.titles.all();
        let mut seen = HashSet::new();
        let mut sessions = Vec::new();
        for thread_id in self.graph.store().list_threads()? {
            let title = titles.remove(&thread_id).unwrap_or_else(|| UNTITLED.to_string());
            seen.insert(thread_id.clone());
            sessions.push(SessionSummary { thread_id, title });
        }
        sessions.extend(
            titles
                .into_iter()
                .filter(|(id, _)| !seen.contains(id))
                .map(|(thread_id, title)| SessionSummary { thread_id, title }),
        );
        Ok(sessions)
    }

    pub fn new_thread(&self) -> ThreadId {
        ThreadId::new()
    }

    pub fn title(&self, thread_id: &ThreadId) -> String {
        self.titles.get(thread_id).unwrap_or_else(|| UNTITLED.to_string())
    }

    /// Set a display title. Blank titles are ignored.
    pub fn rename_thread(&self, thread_id: &ThreadId, title: &str) -> Result<bool, EngineError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }
        self.titles.set(thread_id, title)?;
        Ok(true)
    }

    /// Delete a thread's checkpoints and title. Returns whether anything
    /// existed.
    pub fn delete_thread(&self, thread_id: &ThreadId) -> Result<bool, EngineError> {
        if self.is_busy(thread_id) {
            return Err(EngineError::ThreadBusy(thread_id.to_string()));
        }
        let had_checkpoints = self.graph.store().delete_thread(thread_id)?;
        let had_title = self.titles.remove(thread_id)?;
        info!(thread_id = %thread_id, had_checkpoints, had_title, "thread deleted");
        Ok(had_checkpoints || had_title)
    }
}

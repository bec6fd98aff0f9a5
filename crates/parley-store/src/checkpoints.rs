use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use parley_core::ids::{ThreadId, ToolCallId};
use parley_core::messages::Message;
use parley_core::state::ConversationState;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Which graph step produced a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// The caller's message was merged in.
    Input,
    Decide,
    Dispatch,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Decide => "decide",
            Self::Dispatch => "dispatch",
        })
    }
}

impl FromStr for StepKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(Self::Input),
            "decide" => Ok(Self::Decide),
            "dispatch" => Ok(Self::Dispatch),
            other => Err(format!("unknown step kind: {other}")),
        }
    }
}

/// A tool result recorded against a checkpoint before the dispatch step
/// that produced it is itself checkpointed. `idx` is the call's position in
/// the assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub call_id: ToolCallId,
    pub idx: usize,
    pub message: Message,
}

/// Immutable snapshot of a thread after one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub step: u64,
    pub node: StepKind,
    pub state: ConversationState,
    pub pending_writes: Vec<PendingWrite>,
    pub created_at: DateTime<Utc>,
}

/// Durable per-thread checkpoint lineages.
///
/// Appends to one thread are serialized; different threads never wait on
/// each other beyond what the backing storage imposes. Every failure is
/// returned to the caller.
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint with its pending writes, or `None` for an unseen thread.
    fn latest_checkpoint(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StoreError>;

    /// Persist a new checkpoint at the next step number.
    fn append(
        &self,
        thread_id: &ThreadId,
        node: StepKind,
        state: &ConversationState,
    ) -> Result<Checkpoint, StoreError>;

    /// Record a completed tool result against checkpoint `step`.
    fn put_write(&self, thread_id: &ThreadId, step: u64, write: &PendingWrite) -> Result<(), StoreError>;

    /// Every thread with at least one checkpoint, most recently active first.
    fn list_threads(&self) -> Result<Vec<ThreadId>, StoreError>;

    /// Remove every checkpoint and pending write of a thread, all or nothing.
    /// Returns whether anything was removed.
    fn delete_thread(&self, thread_id: &ThreadId) -> Result<bool, StoreError>;

    /// All checkpoints of a thread in step order. Pending writes are only
    /// loaded for the latest one.
    fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, StoreError>;

    /// State to resume from: the latest checkpoint's, or empty.
    fn load_latest(&self, thread_id: &ThreadId) -> Result<ConversationState, StoreError> {
        Ok(self
            .latest_checkpoint(thread_id)?
            .map(|cp| cp.state)
            .unwrap_or_default())
    }
}

/// Stored timestamps carry microsecond precision.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Per-thread append locks.
#[derive(Default)]
pub(crate) struct ThreadLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ThreadLocks {
    pub(crate) fn get(&self, thread_id: &ThreadId) -> Arc<Mutex<()>> {
        self.locks
            .entry(thread_id.as_str().to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn forget(&self, thread_id: &ThreadId) {
        self.locks.remove(thread_id.as_str());
    }
}

/// SQLite-backed checkpoint store.
pub struct SqliteCheckpointStore {
    db: Database,
    locks: ThreadLocks,
}

impl SqliteCheckpointStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: ThreadLocks::default(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    fn latest_checkpoint(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT thread_id, step, node, state, created_at FROM checkpoints
                 WHERE thread_id = ?1 ORDER BY step DESC LIMIT 1",
            )?;
            let mut rows = stmt.query([thread_id.as_str()])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            let mut checkpoint = row_to_checkpoint(row)?;
            checkpoint.pending_writes = load_writes(conn, thread_id, checkpoint.step)?;
            Ok(Some(checkpoint))
        })
    }

    #[instrument(skip(self, state), fields(thread_id = %thread_id, node = %node, messages = state.len()))]
    fn append(
        &self,
        thread_id: &ThreadId,
        node: StepKind,
        state: &ConversationState,
    ) -> Result<Checkpoint, StoreError> {
        let lock = self.locks.get(thread_id);
        let _guard = lock.lock();

        let encoded = serde_json::to_string(state)?;
        let created_at = now();

        let step = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let last: Option<i64> = tx.query_row(
                "SELECT MAX(step) FROM checkpoints WHERE thread_id = ?1",
                [thread_id.as_str()],
                |row| row.get(0),
            )?;
            let step = last.map_or(0, |s| s + 1);
            tx.execute(
                "INSERT INTO checkpoints (thread_id, step, node, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    thread_id.as_str(),
                    step,
                    node.to_string(),
                    encoded,
                    timestamp(&created_at),
                ],
            )?;
            tx.commit()?;
            Ok(step as u64)
        })?;

        debug!(step, "checkpoint appended");

        Ok(Checkpoint {
            thread_id: thread_id.clone(),
            step,
            node,
            state: state.clone(),
            pending_writes: Vec::new(),
            created_at,
        })
    }

    #[instrument(skip(self, write), fields(thread_id = %thread_id, call_id = %write.call_id))]
    fn put_write(&self, thread_id: &ThreadId, step: u64, write: &PendingWrite) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&write.message)?;
        self.db.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT step FROM checkpoints WHERE thread_id = ?1 AND step = ?2",
                    rusqlite::params![thread_id.as_str(), step as i64],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("checkpoint {thread_id}@{step}")));
            }
            conn.execute(
                "INSERT OR REPLACE INTO writes (thread_id, step, call_id, idx, message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    thread_id.as_str(),
                    step as i64,
                    write.call_id.as_str(),
                    write.idx as i64,
                    encoded,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn list_threads(&self) -> Result<Vec<ThreadId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT thread_id, MAX(created_at) AS last_active FROM checkpoints
                 GROUP BY thread_id ORDER BY last_active DESC, thread_id ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut threads = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row_helpers::get(row, 0, "checkpoints", "thread_id")?;
                threads.push(ThreadId::from_raw(id));
            }
            Ok(threads)
        })
    }

    #[instrument(skip(self), fields(thread_id = %thread_id))]
    fn delete_thread(&self, thread_id: &ThreadId) -> Result<bool, StoreError> {
        let lock = self.locks.get(thread_id);
        let removed = {
            let _guard = lock.lock();
            self.db.with_conn(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let writes = tx.execute("DELETE FROM writes WHERE thread_id = ?1", [thread_id.as_str()])?;
                let checkpoints =
                    tx.execute("DELETE FROM checkpoints WHERE thread_id = ?1", [thread_id.as_str()])?;
                tx.commit()?;
                Ok((checkpoints, writes))
            })?
        };
        self.locks.forget(thread_id);

        let (checkpoints, writes) = removed;
        info!(checkpoints, writes, "thread deleted");
        Ok(checkpoints > 0)
    }

    #[instrument(skip(self), fields(thread_id = %thread_id))]
    fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT thread_id, step, node, state, created_at FROM checkpoints
                 WHERE thread_id = ?1 ORDER BY step ASC",
            )?;
            let mut rows = stmt.query([thread_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_checkpoint(row)?);
            }
            if let Some(last) = out.last_mut() {
                last.pending_writes = load_writes(conn, thread_id, last.step)?;
            }
            Ok(out)
        })
    }
}

fn load_writes(
    conn: &rusqlite::Connection,
    thread_id: &ThreadId,
    step: u64,
) -> Result<Vec<PendingWrite>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT call_id, idx, message FROM writes
         WHERE thread_id = ?1 AND step = ?2 ORDER BY idx ASC",
    )?;
    let mut rows = stmt.query(rusqlite::params![thread_id.as_str(), step as i64])?;
    let mut writes = Vec::new();
    while let Some(row) = rows.next()? {
        let call_id: String = row_helpers::get(row, 0, "writes", "call_id")?;
        let idx: i64 = row_helpers::get(row, 1, "writes", "idx")?;
        let raw: String = row_helpers::get(row, 2, "writes", "message")?;
        writes.push(PendingWrite {
            call_id: ToolCallId::from_raw(call_id),
            idx: usize::try_from(idx).map_err(|_| StoreError::CorruptRow {
                table: "writes",
                column: "idx",
                detail: format!("negative index {idx}"),
            })?,
            message: row_helpers::parse_json(&raw, "writes", "message")?,
        });
    }
    Ok(writes)
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> Result<Checkpoint, StoreError> {
    let thread_id: String = row_helpers::get(row, 0, "checkpoints", "thread_id")?;
    let step: i64 = row_helpers::get(row, 1, "checkpoints", "step")?;
    let node: String = row_helpers::get(row, 2, "checkpoints", "node")?;
    let state: String = row_helpers::get(row, 3, "checkpoints", "state")?;
    let created_at: String = row_helpers::get(row, 4, "checkpoints", "created_at")?;

    Ok(Checkpoint {
        thread_id: ThreadId::from_raw(thread_id),
        step: step as u64,
        node: row_helpers::parse_enum(&node, "checkpoints", "node")?,
        state: row_helpers::parse_json(&state, "checkpoints", "state")?,
        pending_writes: Vec::new(),
        created_at: row_helpers::parse_timestamp(&created_at, "checkpoints", "created_at")?,
    })
}

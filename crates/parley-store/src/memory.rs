use dashmap::DashMap;
use tracing::debug;

use parley_core::ids::ThreadId;
use parley_core::state::ConversationState;

use crate::checkpoints::{now, Checkpoint, CheckpointStore, PendingWrite, StepKind};
use crate::error::StoreError;

/// Non-durable checkpoint store for tests and throwaway sessions.
/// Each thread's lineage lives behind its own map shard entry, which also
/// serializes appends to that thread.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: DashMap<ThreadId, Vec<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn latest_checkpoint(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .threads
            .get(thread_id)
            .and_then(|lineage| lineage.last().cloned()))
    }

    fn append(
        &self,
        thread_id: &ThreadId,
        node: StepKind,
        state: &ConversationState,
    ) -> Result<Checkpoint, StoreError> {
        let mut lineage = self.threads.entry(thread_id.clone()).or_default();
        let step = lineage.last().map_or(0, |cp| cp.step + 1);
        let checkpoint = Checkpoint {
            thread_id: thread_id.clone(),
            step,
            node,
            state: state.clone(),
            pending_writes: Vec::new(),
            created_at: now(),
        };
        lineage.push(checkpoint.clone());
        debug!(thread_id = %thread_id, step, node = %node, "checkpoint appended");
        Ok(checkpoint)
    }

    fn put_write(&self, thread_id: &ThreadId, step: u64, write: &PendingWrite) -> Result<(), StoreError> {
        let mut lineage = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("checkpoint {thread_id}@{step}")))?;
        let checkpoint = lineage
            .iter_mut()
            .find(|cp| cp.step == step)
            .ok_or_else(|| StoreError::NotFound(format!("checkpoint {thread_id}@{step}")))?;
        checkpoint.pending_writes.retain(|w| w.call_id != write.call_id);
        checkpoint.pending_writes.push(write.clone());
        checkpoint.pending_writes.sort_by_key(|w| w.idx);
        Ok(())
    }

    fn list_threads(&self) -> Result<Vec<ThreadId>, StoreError> {
        let mut threads: Vec<_> = self
            .threads
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .last()
                    .map(|cp| (cp.created_at, entry.key().clone()))
            })
            .collect();
        threads.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(threads.into_iter().map(|(_, id)| id).collect())
    }

    fn delete_thread(&self, thread_id: &ThreadId) -> Result<bool, StoreError> {
        Ok(self
            .threads
            .remove(thread_id)
            .is_some_and(|(_, lineage)| !lineage.is_empty()))
    }

    fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, StoreError> {
        let Some(lineage) = self.threads.get(thread_id) else {
            return Ok(Vec::new());
        };
        let mut out = lineage.clone();
        let last = out.len().saturating_sub(1);
        for cp in &mut out[..last] {
            cp.pending_writes.clear();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ids::ToolCallId;
    use parley_core::messages::Message;

    fn convo(text: &str) -> ConversationState {
        ConversationState::new().reduce([Message::user(text)])
    }

    #[test]
    fn append_load_delete() {
        let store = MemoryCheckpointStore::new();
        let t = ThreadId::new();
        assert!(store.load_latest(&t).unwrap().is_empty());

        store.append(&t, StepKind::Input, &convo("a")).unwrap();
        let latest = convo("b");
        let cp = store.append(&t, StepKind::Decide, &latest).unwrap();
        assert_eq!(cp.step, 1);
        assert_eq!(store.load_latest(&t).unwrap(), latest);

        assert!(store.delete_thread(&t).unwrap());
        assert!(store.load_latest(&t).unwrap().is_empty());
        assert!(store.list_threads().unwrap().is_empty());
        assert!(!store.delete_thread(&t).unwrap());
    }

    #[test]
    fn writes_sorted_by_call_position() {
        let store = MemoryCheckpointStore::new();
        let t = ThreadId::new();
        let cp = store.append(&t, StepKind::Decide, &convo("q")).unwrap();
        for idx in [2, 0, 1] {
            let call_id = ToolCallId::from_raw(format!("call_{idx}"));
            store
                .put_write(
                    &t,
                    cp.step,
                    &PendingWrite {
                        call_id: call_id.clone(),
                        idx,
                        message: Message::tool(call_id, "calculator", "{}"),
                    },
                )
                .unwrap();
        }
        let latest = store.latest_checkpoint(&t).unwrap().unwrap();
        let order: Vec<_> = latest.pending_writes.iter().map(|w| w.idx).collect();
        assert_eq!(order, [0, 1, 2]);
    }

    #[test]
    fn put_write_unknown_step() {
        let store = MemoryCheckpointStore::new();
        let t = ThreadId::new();
        store.append(&t, StepKind::Input, &convo("a")).unwrap();
        let call_id = ToolCallId::new();
        let err = store
            .put_write(
                &t,
                9,
                &PendingWrite {
                    call_id: call_id.clone(),
                    idx: 0,
                    message: Message::tool(call_id, "x", "{}"),
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn list_threads_recent_first() {
        let store = MemoryCheckpointStore::new();
        let a = ThreadId::from_raw("a");
        let b = ThreadId::from_raw("b");
        store.append(&a, StepKind::Input, &convo("1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.append(&b, StepKind::Input, &convo("2")).unwrap();
        assert_eq!(store.list_threads().unwrap(), vec![b, a]);
    }
}

use parley_store::StoreError;

use crate::registry::RegistryError;

/// Failures that end a turn. Model and tool failures never appear here:
/// they are contained as degraded messages and error payloads.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("tool loop exceeded: no final answer after {0} tool rounds")]
    ToolLoopExceeded(u32),

    #[error("thread busy: {0} already has a turn in flight")]
    ThreadBusy(String),

    #[error("turn aborted")]
    Aborted,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Short classification string for logging and API responses.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::Registry(_) => "registry",
            Self::ToolLoopExceeded(_) => "tool_loop_exceeded",
            Self::ThreadBusy(_) => "thread_busy",
            Self::Aborted => "aborted",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert() {
        let err: EngineError = StoreError::NotFound("thread_x".into()).into();
        assert_eq!(err.error_kind(), "store");
        assert!(err.to_string().contains("thread_x"));
    }

    #[test]
    fn loop_exceeded_names_round_count() {
        let err = EngineError::ToolLoopExceeded(10);
        assert!(err.to_string().contains("10 tool rounds"));
        assert_eq!(err.error_kind(), "tool_loop_exceeded");
    }
}

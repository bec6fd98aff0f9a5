pub mod checkpoints;
pub mod database;
pub mod error;
pub mod memory;
pub mod row_helpers;
pub mod schema;
pub mod titles;

pub use checkpoints::{Checkpoint, CheckpointStore, PendingWrite, SqliteCheckpointStore, StepKind};
pub use database::{ConnectionConfig, Database};
pub use error::StoreError;
pub use memory::MemoryCheckpointStore;
pub use titles::TitleStore;

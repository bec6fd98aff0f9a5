/// SQL DDL for the checkpoint database.
/// Pragmas are applied per pooled connection, see `database::PragmaCustomizer`.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT NOT NULL,
    step INTEGER NOT NULL,
    node TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (thread_id, step)
);

CREATE TABLE IF NOT EXISTS writes (
    thread_id TEXT NOT NULL,
    step INTEGER NOT NULL,
    call_id TEXT NOT NULL,
    idx INTEGER NOT NULL,
    message TEXT NOT NULL,
    PRIMARY KEY (thread_id, step, call_id),
    FOREIGN KEY (thread_id, step) REFERENCES checkpoints(thread_id, step) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_created ON checkpoints(thread_id, created_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA synchronous = NORMAL;
"#;

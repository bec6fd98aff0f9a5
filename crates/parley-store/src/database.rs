use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema;

pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Pool settings.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub pool_size: u32,
    pub busy_timeout_ms: u32,
    pub cache_size_kib: i64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 5_000,
            cache_size_kib: 8192,
        }
    }
}

/// Runs on every new pooled connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
    cache_size_kib: i64,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA cache_size = -{};",
            self.busy_timeout_ms, self.cache_size_kib
        ))
    }
}

/// Pooled SQLite handle. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
    path: PathBuf,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
            }
        }

        let pool = build_pool(SqliteConnectionManager::file(path), config, config.pool_size)?;
        let db = Self {
            pool,
            path: path.to_owned(),
        };
        db.migrate()?;

        info!(path = %path.display(), pool_size = config.pool_size, "database opened");
        Ok(db)
    }

    /// Open an in-memory database (for testing). Every SQLite in-memory
    /// connection is its own database, so the pool holds exactly one.
    pub fn in_memory() -> Result<Self, StoreError> {
        let pool = build_pool(SqliteConnectionManager::memory(), &ConnectionConfig::default(), 1)?;
        let db = Self {
            pool,
            path: PathBuf::from(":memory:"),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(schema::CREATE_TABLES)
                .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

            let version: Option<u32> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
                .ok();

            match version {
                None => {
                    conn.execute(
                        "INSERT INTO schema_version (version) VALUES (?1)",
                        [schema::SCHEMA_VERSION],
                    )
                    .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
                }
                Some(v) if v > schema::SCHEMA_VERSION => {
                    return Err(StoreError::Database(format!(
                        "database schema version {v} is newer than supported {}",
                        schema::SCHEMA_VERSION
                    )));
                }
                Some(_) => {}
            }
            Ok(())
        })
    }

    /// Execute a closure with a pooled connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.pool.get()?;
        f(&mut conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn build_pool(
    manager: SqliteConnectionManager,
    config: &ConnectionConfig,
    max_size: u32,
) -> Result<ConnectionPool, StoreError> {
    Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
            cache_size_kib: config.cache_size_kib,
        }))
        .build(manager)
        .map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &Database) -> Vec<String> {
        db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn tables_created() {
        let db = Database::in_memory().unwrap();
        let tables = table_names(&db);
        assert!(tables.contains(&"checkpoints".to_string()));
        assert!(tables.contains(&"writes".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn schema_version_set() {
        let db = Database::in_memory().unwrap();
        let version: u32 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");
        let db = Database::open(&path, &ConnectionConfig::default()).unwrap();
        assert!(path.exists());
        drop(db);

        let db = Database::open(&path, &ConnectionConfig::default()).unwrap();
        let rows: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn file_database_uses_wal_and_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("chat.db"), &ConnectionConfig::default()).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            let fk: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
            assert_eq!(mode, "wal");
            assert_eq!(fk, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn rejects_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let db = Database::open(&path, &ConnectionConfig::default()).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE schema_version SET version = 99", [])?;
            Ok(())
        })
        .unwrap();
        drop(db);

        let err = Database::open(&path, &ConnectionConfig::default()).err().unwrap();
        assert!(err.to_string().contains("99"), "got: {err}");
    }
}

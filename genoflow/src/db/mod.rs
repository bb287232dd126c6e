//! Database layer for genoflow.
//!
//! Workflow state is persisted through the [`WorkflowStore`] port. The SQLite
//! implementation uses a JSON blob for the full state plus queryable columns
//! for the fields listings filter on.

mod memory;
mod schema;
mod sqlite;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

use genoflow_shared::errors::{GenoflowError, GenoflowResult};

use crate::workflow::{WorkflowId, WorkflowState, WorkflowStatus};

pub use memory::MemoryWorkflowStore;
pub use sqlite::SqliteWorkflowStore;

/// Helper macro to convert rusqlite errors to GenoflowError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| GenoflowError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// Persistence port for workflow state.
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace the full state.
    fn save(&self, state: &WorkflowState) -> GenoflowResult<()>;

    fn load(&self, id: &WorkflowId) -> GenoflowResult<Option<WorkflowState>>;

    /// Matching workflows, newest first.
    fn list(&self, filter: &WorkflowFilter) -> GenoflowResult<Vec<WorkflowState>>;

    /// Returns whether a record was removed.
    fn delete(&self, id: &WorkflowId) -> GenoflowResult<bool>;
}

/// Listing filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub user_id: Option<String>,
}

impl WorkflowFilter {
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn matches(&self, state: &WorkflowState) -> bool {
        if let Some(status) = self.status {
            if state.status != status {
                return false;
            }
        }
        if let Some(ref user_id) = self.user_id {
            if state.user_id() != Some(user_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. [`SqliteWorkflowStore`] wraps it.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file, creating parent directories.
    pub fn open(db_path: &Path) -> GenoflowResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // WAL for concurrent readers, FULL sync so a recorded stage survives a crash.
        db_err!(conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA busy_timeout=100000;"
        ))?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> GenoflowResult<Self> {
        Self::from_connection(db_err!(Connection::open_in_memory())?)
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Create the tables if missing and stamp or verify the schema version.
    /// There is a single schema so far; any other stamped version is refused.
    fn from_connection(conn: Connection) -> GenoflowResult<Self> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let stamped = db_err!(conn.execute(
            "INSERT OR IGNORE INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
            rusqlite::params![schema::SCHEMA_VERSION, Utc::now().to_rfc3339()],
        ))?;
        if stamped > 0 {
            tracing::info!(version = schema::SCHEMA_VERSION, "Created workflow database");
        }

        let version: i32 = db_err!(conn.query_row(
            "SELECT version FROM schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        ))?;
        if version != schema::SCHEMA_VERSION {
            return Err(GenoflowError::Database(format!(
                "workflow database has schema version {}, expected {}",
                version,
                schema::SCHEMA_VERSION
            )));
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_db_open_creates_parent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("genoflow.db");
        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_db_reopen_keeps_version() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("genoflow.db");
        drop(Database::open(&db_path).unwrap());
        let db = Database::open(&db_path).unwrap();
        let version: i32 = db
            .conn()
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_schema_version_rejected() {
        let temp_dir = TempDir::new().unwrap();
        for version in [0, 99] {
            let db_path = temp_dir.path().join(format!("v{}.db", version));
            {
                let db = Database::open(&db_path).unwrap();
                db.conn()
                    .execute("UPDATE schema_version SET version = ?1 WHERE id = 1", [version])
                    .unwrap();
            }
            assert!(matches!(
                Database::open(&db_path),
                Err(GenoflowError::Database(_))
            ));
        }
    }

    #[test]
    fn test_in_memory_is_stamped() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .conn()
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_filter_matches() {
        let mut state = WorkflowState::new("wf".into(), json!({"user_id": "alice"}), "genomics");
        assert!(WorkflowFilter::default().matches(&state));
        assert!(WorkflowFilter::default().with_user("alice").matches(&state));
        assert!(!WorkflowFilter::default().with_user("bob").matches(&state));

        state.status = WorkflowStatus::Completed;
        assert!(
            WorkflowFilter::default()
                .with_status(WorkflowStatus::Completed)
                .with_user("alice")
                .matches(&state)
        );
        assert!(
            !WorkflowFilter::default()
                .with_status(WorkflowStatus::Failed)
                .matches(&state)
        );
    }
}

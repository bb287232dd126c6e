//! SQLite-backed workflow store.

use rusqlite::{OptionalExtension, params};

use genoflow_shared::errors::{GenoflowError, GenoflowResult};

use super::{Database, WorkflowFilter, WorkflowStore, db_err};
use crate::workflow::{WorkflowId, WorkflowState};

/// Workflow persistence on top of [`Database`].
#[derive(Clone)]
pub struct SqliteWorkflowStore {
    db: Database,
}

impl SqliteWorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn decode(raw: &str) -> GenoflowResult<WorkflowState> {
        serde_json::from_str(raw).map_err(|e| {
            GenoflowError::Database(format!("corrupt workflow record: {}", e))
        })
    }
}

impl WorkflowStore for SqliteWorkflowStore {
    fn save(&self, state: &WorkflowState) -> GenoflowResult<()> {
        let json = serde_json::to_string(state)?;
        let conn = self.db.conn();
        db_err!(conn.execute(
            "INSERT INTO workflows (id, status, user_id, created_at, updated_at, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                user_id = excluded.user_id,
                updated_at = excluded.updated_at,
                state = excluded.state",
            params![
                state.workflow_id,
                state.status.as_str(),
                state.user_id(),
                state.created_at.to_rfc3339(),
                state.updated_at.to_rfc3339(),
                json,
            ],
        ))?;
        Ok(())
    }

    fn load(&self, id: &WorkflowId) -> GenoflowResult<Option<WorkflowState>> {
        let conn = self.db.conn();
        let raw: Option<String> = db_err!(
            conn.query_row(
                "SELECT state FROM workflows WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
        )?;
        raw.as_deref().map(Self::decode).transpose()
    }

    fn list(&self, filter: &WorkflowFilter) -> GenoflowResult<Vec<WorkflowState>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT state FROM workflows
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR user_id = ?2)
             ORDER BY created_at DESC"
        ))?;

        let rows = db_err!(stmt.query_map(
            params![filter.status.map(|s| s.as_str()), filter.user_id.as_deref()],
            |row| row.get::<_, String>(0),
        ))?;

        let mut states = Vec::new();
        for raw in rows {
            let raw = db_err!(raw)?;
            states.push(Self::decode(&raw)?);
        }
        Ok(states)
    }

    fn delete(&self, id: &WorkflowId) -> GenoflowResult<bool> {
        let conn = self.db.conn();
        let removed = db_err!(conn.execute("DELETE FROM workflows WHERE id = ?1", params![id]))?;
        Ok(removed > 0)
    }
}

//! SQL schema definitions.

pub(crate) const SCHEMA_VERSION: i32 = 1;

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// One row per workflow. `state` holds the JSON-serialized `WorkflowState`;
/// the other columns mirror fields used for filtering and ordering.
const WORKFLOWS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL,
    user_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    state TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);
CREATE INDEX IF NOT EXISTS idx_workflows_user_id ON workflows(user_id);
";

pub(crate) fn all_schemas() -> [&'static str; 2] {
    [SCHEMA_VERSION_TABLE, WORKFLOWS_TABLE]
}

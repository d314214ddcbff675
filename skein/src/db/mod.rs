//! SQLite persistence.
//!
//! One `Database` handle per process; every call opens a connection inside
//! `spawn_blocking`, so async callers never block a worker on sqlite I/O.
//! Schema is created at open with `CREATE TABLE IF NOT EXISTS`. Timestamps
//! are naive UTC stored as RFC 3339 text with microsecond precision so
//! same-second inserts still order correctly.

pub mod models;

mod agents;
mod chat;
mod costs;

pub use agents::NewAgent;
pub use chat::NewMessage;

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::error::AgentError;

const TS_WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const TS_READ_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub(crate) fn fmt_ts(t: NaiveDateTime) -> String {
    t.format(TS_WRITE_FORMAT).to_string()
}

pub(crate) fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_READ_FORMAT)
        .unwrap_or_else(|_| chrono::DateTime::<chrono::Utc>::UNIX_EPOCH.naive_utc())
}

/// Current naive UTC, truncated to microseconds so stored text
/// round-trips exactly.
pub(crate) fn now_utc() -> NaiveDateTime {
    use chrono::Timelike;
    let now = chrono::Utc::now().naive_utc();
    now.with_nanosecond(now.nanosecond() / 1000 * 1000)
        .unwrap_or(now)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Process-wide database handle. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Opens (creating if needed) the database and ensures the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        db.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(db)
    }

    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AgentError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AgentError::Storage(e.to_string()))?
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    picture TEXT,
    custom_instructions TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    title TEXT NOT NULL,
    model TEXT NOT NULL,
    is_planning INTEGER NOT NULL DEFAULT 0,
    is_agent INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    files_json TEXT,
    sources_json TEXT,
    generated_images_json TEXT,
    language TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, created_at, id);

CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    name TEXT NOT NULL,
    description TEXT,
    system_prompt TEXT NOT NULL,
    schedule TEXT,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    model TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    tool_permissions_json TEXT,
    budget_limit REAL,
    next_run_at TEXT,
    last_run_at TEXT,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    created_at TEXT NOT NULL,
    UNIQUE (user_id, name)
);

CREATE TABLE IF NOT EXISTS agent_executions (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL REFERENCES agents(id),
    trigger_type TEXT NOT NULL,
    triggered_by_agent_id TEXT,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_executions_agent_status
    ON agent_executions(agent_id, status);

CREATE TABLE IF NOT EXISTS approval_requests (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL REFERENCES agents(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    tool_name TEXT NOT NULL,
    tool_args_json TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    decided_at TEXT
);

CREATE TABLE IF NOT EXISTS message_costs (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    cost_usd REAL NOT NULL,
    image_cost_usd REAL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_costs_conversation
    ON message_costs(conversation_id, created_at);

CREATE TABLE IF NOT EXISTS blobs (
    key TEXT PRIMARY KEY,
    content BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    content TEXT NOT NULL,
    category TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_with_microseconds() {
        let now = now_utc();
        let parsed = parse_ts(&fmt_ts(now));
        assert_eq!(parsed, now);
    }

    #[test]
    fn parse_ts_tolerates_missing_fraction() {
        let parsed = parse_ts("2026-03-01T12:30:45");
        assert_eq!(fmt_ts(parsed), "2026-03-01T12:30:45.000000");
    }

    #[tokio::test]
    async fn open_creates_schema_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        let _first = Database::open(&path).await.unwrap();
        let _second = Database::open(&path).await.unwrap();
    }
}

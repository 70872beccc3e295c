use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::codec;
use crate::model::CanonicalState;
use crate::scope::Scope;

const LOCAL_NAMESPACE: &str = "rollbook.v2";
pub const SESSION_KEY: &str = "rollbook.session.v1";

/// On-device persistent key-value store. State entries hold the ENCODED wire
/// JSON, exactly what the remote path holds, so the two representations never
/// diverge structurally.
pub struct CacheDb {
    conn: Connection,
}

impl CacheDb {
    pub fn open(workspace: &Path) -> anyhow::Result<CacheDb> {
        std::fs::create_dir_all(workspace)?;
        let db_path = workspace.join("rollbook.sqlite3");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv(
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT
            )",
            [],
        )?;
        Ok(CacheDb { conn })
    }

    pub fn state_key(scope: &Scope) -> String {
        let group = if scope.group_id.is_empty() {
            "unknown"
        } else {
            scope.group_id.as_str()
        };
        let cohort = if scope.cohort_year.is_empty() {
            "none"
        } else {
            scope.cohort_year.as_str()
        };
        format!("{}/{}/{}", LOCAL_NAMESPACE, group, cohort)
    }

    pub fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |r| r.get(0))
            .optional()
            .context("kv read failed")
    }

    pub fn set_raw(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO kv(key, value, updated_at)
             VALUES(?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            (key, value),
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }

    /// Corrupt or unparseable rows are "no cached state", never an error.
    pub fn read_state(&self, scope: &Scope) -> Option<CanonicalState> {
        let raw = self.get_raw(&Self::state_key(scope)).ok()??;
        let wire: serde_json::Value = serde_json::from_str(&raw).ok()?;
        Some(codec::decode(&wire, scope))
    }

    pub fn write_state(&self, scope: &Scope, state: &CanonicalState) -> anyhow::Result<()> {
        let wire = codec::encode_value(state, scope);
        self.set_raw(&Self::state_key(scope), &wire.to_string())
    }
}

//! SQLite persistence for turns, patterns, locks and measurements.
//!
//! One [`SqliteStore`] implements every storage trait the engine consumes,
//! so a single database file holds the whole memory state.

mod locks;
mod patterns;
mod turns;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{MnemosError, MnemosResult};

pub use patterns::{AliasRecord, ObservationRecord};

/// SQLite-backed store shared by all conversations.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> MnemosResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())
            .map_err(|e| MnemosError::database_unavailable(path.as_ref(), e))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> MnemosResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MnemosResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MnemosError::database(e.to_string()))
    }

    fn init_schema(&self) -> MnemosResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                envelope_id TEXT,
                tool_call_id TEXT,
                tool_name TEXT,
                created_at TEXT NOT NULL,
                compacted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, id);
            CREATE INDEX IF NOT EXISTS idx_turns_pending ON turns(conversation_id) WHERE compacted_at IS NULL;

            CREATE TABLE IF NOT EXISTS compaction_state (
                conversation_id TEXT PRIMARY KEY,
                last_compacted_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS patterns (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                kind TEXT NOT NULL,
                confidence REAL NOT NULL,
                strength INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL DEFAULT 'active',
                canonical_hash TEXT NOT NULL,
                embedding BLOB,
                expires_at TEXT,
                source_type TEXT NOT NULL,
                source_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_hash ON patterns(canonical_hash, status);
            CREATE INDEX IF NOT EXISTS idx_patterns_status ON patterns(status);

            CREATE TABLE IF NOT EXISTS pattern_aliases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern_id TEXT NOT NULL REFERENCES patterns(id),
                alias TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(pattern_id, alias)
            );

            CREATE TABLE IF NOT EXISTS pattern_observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern_id TEXT NOT NULL REFERENCES patterns(id),
                evidence_turn_ids TEXT NOT NULL,
                evidence_roles TEXT NOT NULL,
                confidence REAL NOT NULL,
                signal TEXT NOT NULL,
                source_type TEXT NOT NULL,
                source_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_observations_pattern ON pattern_observations(pattern_id);

            CREATE TABLE IF NOT EXISTS pattern_entry_links (
                pattern_id TEXT NOT NULL REFERENCES patterns(id),
                entry_type TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (pattern_id, entry_type, entry_id)
            );

            CREATE TABLE IF NOT EXISTS retrieval_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                pattern_ids TEXT NOT NULL,
                scores TEXT NOT NULL,
                degraded INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS locks (
                key TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS measurements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                value REAL NOT NULL,
                unit TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_measurements_kind ON measurements(kind, recorded_at);
            ",
        )?;

        Ok(())
    }
}

/// Timestamps are stored in one fixed RFC 3339 shape so text comparison in
/// SQL orders them correctly.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(MnemosError::parse(message)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TurnStore;
    use crate::types::NewTurn;

    #[test]
    fn test_ts_round_trip_and_ordering() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(5);
        assert!(ts(earlier) < ts(later));
        assert_eq!(ts(parse_ts(&ts(earlier))), ts(earlier));
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mnemos.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.append(NewTurn::user("c1", "hello")).await.unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        let turns = reopened.recent("c1", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "hello");
    }
}

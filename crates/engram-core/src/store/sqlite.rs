//! SQLite row store with FTS5 keyword search
//!
//! The canonical snapshot text stays authoritative: it is stored whole in a
//! meta table and re-parsed on load. Item rows plus an FTS5 index exist to
//! serve ranked keyword search over text and tags.

use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::memory::MemoryState;
use crate::snapshot::parse_snapshot;
use crate::store::StoreBackend;

const SCHEMA_VERSION: i64 = 1;

/// Embedded row-store back-end
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`
    pub fn open(path: PathBuf) -> Result<Self> {
        let conn = Connection::open(&path)?;
        Self::configure_connection(&conn)?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version >= SCHEMA_VERSION {
            return Ok(());
        }
        conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS meta (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS items (
                 id         TEXT PRIMARY KEY,
                 kind       TEXT NOT NULL,
                 text       TEXT NOT NULL,
                 tags       TEXT NOT NULL,
                 scope      TEXT NOT NULL DEFAULT '',
                 importance REAL NOT NULL,
                 energy     REAL NOT NULL,
                 created_at INTEGER NOT NULL
             );
             CREATE VIRTUAL TABLE IF NOT EXISTS items_fts USING fts5(
                 id UNINDEXED,
                 text,
                 tags
             );
             PRAGMA user_version = 1;
             COMMIT;",
        )?;
        debug!(version = SCHEMA_VERSION, "sqlite schema ready");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Storage("connection lock poisoned".to_string()))
    }
}

/// Keep FTS5 query syntax out of user input: bare quoted tokens OR-ed
/// together
fn sanitize_fts5_query(query: &str) -> String {
    crate::text::tokenize(query)
        .into_iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl StoreBackend for SqliteStore {
    fn load(&self) -> Result<Option<MemoryState>> {
        let conn = self.lock()?;
        let text: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'snapshot'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(text) => Ok(Some(parse_snapshot(&text)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &MemoryState, snapshot_text: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('snapshot', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![snapshot_text],
        )?;
        // Rebuild the search rows; the row layout is derived, the snapshot
        // is the source of truth
        tx.execute("DELETE FROM items", [])?;
        tx.execute("DELETE FROM items_fts", [])?;
        {
            let mut insert_item = tx.prepare(
                "INSERT INTO items (id, kind, text, tags, scope, importance, energy, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            let mut insert_fts = tx.prepare(
                "INSERT INTO items_fts (rowid, id, text, tags) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (rowid, item) in state.items.values().enumerate() {
                let tags = item.tags.join(" ");
                insert_item.execute(params![
                    item.id,
                    item.kind.as_str(),
                    item.text,
                    tags,
                    item.scope,
                    item.importance,
                    item.energy,
                    item.created_at.timestamp_millis(),
                ])?;
                insert_fts.execute(params![rowid as i64 + 1, item.id, item.text, tags])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn supports_search(&self) -> bool {
        true
    }

    fn search(&self, query: &str, limit: usize, scope: &str) -> Result<Vec<(String, f64)>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, bm25(items_fts) AS rank
             FROM items_fts f
             JOIN items i ON i.id = f.id
             WHERE items_fts MATCH ?1
               AND (?2 = '' OR i.scope = ?2 OR i.scope = '')
             ORDER BY rank
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![sanitized, scope, limit as i64], |row| {
            let id: String = row.get(0)?;
            let rank: f64 = row.get(1)?;
            Ok((id, rank))
        })?;
        // bm25 returns lower-is-better; flip the sign so callers get
        // higher-is-better ranks
        let mut out = Vec::new();
        for row in rows {
            let (id, rank) = row?;
            out.push((id, -rank));
        }
        Ok(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::graph::remember;
    use crate::memory::RememberInput;
    use crate::snapshot::write_snapshot;
    use chrono::Utc;
    use tempfile::TempDir;

    fn store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("engram.db")).unwrap();
        (store, dir)
    }

    fn seeded_state() -> MemoryState {
        let mut state = MemoryState::new("w", Utc::now());
        for (text, tags, scope) in [
            ("spreading activation drives recall", vec!["memory"], ""),
            ("the deploy pipeline has a canary stage", vec!["deploy"], ""),
            ("scoped note about deploy retries", vec!["deploy"], "agent-1"),
        ] {
            remember(
                &mut state,
                RememberInput {
                    text: text.to_string(),
                    kind: None,
                    importance: None,
                    ttl: None,
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                    scope: if scope.is_empty() {
                        None
                    } else {
                        Some(scope.to_string())
                    },
                },
                &SystemClock,
            )
            .unwrap();
        }
        state
    }

    #[test]
    fn test_load_empty_yields_none() {
        let (store, _dir) = store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let (store, _dir) = store();
        let state = seeded_state();
        store.save(&state, &write_snapshot(&state)).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.items.len(), 3);
        assert_eq!(loaded.workspace_id, "w");
    }

    #[test]
    fn test_keyword_search_ranks_matches() {
        let (store, _dir) = store();
        let state = seeded_state();
        store.save(&state, &write_snapshot(&state)).unwrap();

        let hits = store.search("deploy pipeline", 10, "").unwrap();
        assert!(!hits.is_empty());
        let top = &state.items[&hits[0].0];
        assert!(top.text.contains("deploy"));
    }

    #[test]
    fn test_search_scope_filter() {
        let (store, _dir) = store();
        let state = seeded_state();
        store.save(&state, &write_snapshot(&state)).unwrap();

        let all = store.search("deploy", 10, "").unwrap();
        assert_eq!(all.len(), 2);
        // Scoped search sees its own scope plus globals
        let scoped = store.search("deploy", 10, "agent-1").unwrap();
        assert_eq!(scoped.len(), 2);
        let other = store.search("retries", 10, "agent-2").unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_search_sanitizes_operators() {
        let (store, _dir) = store();
        let state = seeded_state();
        store.save(&state, &write_snapshot(&state)).unwrap();
        // FTS5 syntax in the query must not error
        let hits = store.search("deploy AND (pipeline:*", 10, "");
        assert!(hits.is_ok());
    }

    #[test]
    fn test_resave_replaces_rows() {
        let (store, _dir) = store();
        let state = seeded_state();
        store.save(&state, &write_snapshot(&state)).unwrap();
        store.save(&state, &write_snapshot(&state)).unwrap();
        let hits = store.search("deploy", 10, "").unwrap();
        assert_eq!(hits.len(), 2);
    }
}

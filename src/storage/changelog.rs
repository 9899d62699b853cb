//! Bounded change history.
//!
//! A most-recent-N record of relayed changes kept under a single key, so a
//! late-joining page render can show what happened recently. This is a
//! snapshot aid, not a durability mechanism: the store trims on every write
//! and nothing is ever replayed to live subscribers.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

pub struct ChangeLog {
    conn: Arc<Mutex<Connection>>,
    key: String,
    capacity: usize,
}

impl ChangeLog {
    /// Open (or create) a changelog backed by a SQLite file.
    pub fn new(path: &Path, key: impl Into<String>, capacity: usize) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, key, capacity)
    }

    /// Changelog held entirely in memory, used when no path is configured.
    pub fn in_memory(key: impl Into<String>, capacity: usize) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, key, capacity)
    }

    fn with_connection(conn: Connection, key: impl Into<String>, capacity: usize) -> Result<Self> {
        let log = Self {
            conn: Arc::new(Mutex::new(conn)),
            key: key.into(),
            capacity: capacity.max(1),
        };
        log.initialize()?;
        Ok(log)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS changelog (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_changelog_key
             ON changelog(key, id)",
            [],
        )?;

        Ok(())
    }

    /// Append one payload and trim the oldest entries beyond capacity.
    pub fn append(&self, payload: &str) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO changelog (key, recorded_at, payload) VALUES (?1, ?2, ?3)",
            params![self.key, Utc::now().to_rfc3339(), payload],
        )?;

        conn.execute(
            "DELETE FROM changelog
             WHERE key = ?1
               AND id NOT IN (
                   SELECT id FROM changelog WHERE key = ?1 ORDER BY id DESC LIMIT ?2
               )",
            params![self.key, self.capacity as i64],
        )?;

        Ok(())
    }

    /// The full current window, newest first.
    pub fn recent(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT payload FROM changelog WHERE key = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![self.key, self.capacity as i64], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM changelog WHERE key = ?1",
            params![self.key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_log_reads_empty_window() {
        let log = ChangeLog::in_memory("poll:log", 5).unwrap();
        assert!(log.is_empty().unwrap());
        assert!(log.recent().unwrap().is_empty());
    }

    #[test]
    fn window_is_newest_first() {
        let log = ChangeLog::in_memory("poll:log", 5).unwrap();
        log.append("first").unwrap();
        log.append("second").unwrap();
        log.append("third").unwrap();

        assert_eq!(log.recent().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest_first() {
        let log = ChangeLog::in_memory("poll:log", 3).unwrap();
        for i in 1..=10 {
            log.append(&format!("change-{i}")).unwrap();
            assert!(log.len().unwrap() <= 3);
        }

        assert_eq!(
            log.recent().unwrap(),
            vec!["change-10", "change-9", "change-8"]
        );
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("changelog.db");

        {
            let log = ChangeLog::new(&path, "poll:log", 3).unwrap();
            log.append("survivor").unwrap();
        }

        let reopened = ChangeLog::new(&path, "poll:log", 3).unwrap();
        assert_eq!(reopened.recent().unwrap(), vec!["survivor"]);
    }
}

//! Card and scan-history persistence.

use std::path::Path;

use latch_core::ScanEntry;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

/// Longest card identifier accepted.
pub const MAX_CARD_LEN: usize = 64;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS valid_cards (
        card TEXT PRIMARY KEY NOT NULL
    );
    CREATE TABLE IF NOT EXISTS scan_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entered_key TEXT NOT NULL,
        success INTEGER NOT NULL,
        time TEXT NOT NULL
    );
";

/// Valid-card set plus bounded scan history.
///
/// Every method performs one short statement or transaction under a mutex,
/// so the store is safe to share across request handlers.
pub struct AccessStore {
    conn: Mutex<Connection>,
    history_limit: usize,
}

impl AccessStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, history_limit: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        info!(path = %path.display(), history_limit, "opened access store");
        Self::with_connection(conn, history_limit)
    }

    /// Open a private in-memory database.
    pub fn in_memory(history_limit: usize) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, history_limit)
    }

    fn with_connection(conn: Connection, history_limit: usize) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            history_limit: history_limit.max(1),
        })
    }

    /// Number of scan entries retained.
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Add `card` to the valid set. Returns `false` if it was already present.
    pub fn add_card(&self, card: &str) -> Result<bool> {
        let card = validate_card(card)?;
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO valid_cards (card) VALUES (?1)",
            params![card],
        )?;
        debug!(card, inserted, "add card");
        Ok(inserted == 1)
    }

    /// Remove `card` from the valid set. Returns `false` if it was absent.
    pub fn remove_card(&self, card: &str) -> Result<bool> {
        let card = validate_card(card)?;
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM valid_cards WHERE card = ?1", params![card])?;
        debug!(card, removed, "remove card");
        Ok(removed == 1)
    }

    fn contains(conn: &Connection, card: &str) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM valid_cards WHERE card = ?1",
                params![card],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All valid cards, sorted.
    pub fn valid_cards(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT card FROM valid_cards ORDER BY card")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Record a scan of `entered_key`, trimming history to the limit.
    ///
    /// The validity check, insert, and trim run in one transaction. Keys are
    /// bounded like cards so history entries stay small.
    pub fn record_scan(&self, entered_key: &str) -> Result<ScanEntry> {
        let entered_key = validate_card(entered_key)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let success = Self::contains(&tx, entered_key)?;
        let entry = ScanEntry::now(entered_key, success);
        let _ = tx.execute(
            "INSERT INTO scan_history (entered_key, success, time) VALUES (?1, ?2, ?3)",
            params![entry.entered_key, entry.success, entry.time],
        )?;
        let trimmed = tx.execute(
            "DELETE FROM scan_history WHERE id NOT IN (
                 SELECT id FROM scan_history ORDER BY id DESC LIMIT ?1
             )",
            params![self.history_limit as i64],
        )?;
        tx.commit()?;
        debug!(entered_key, success, trimmed, "recorded scan");
        Ok(entry)
    }

    /// Scan history, newest first.
    pub fn scan_history(&self) -> Result<Vec<ScanEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT entered_key, success, time FROM scan_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![self.history_limit as i64], |row| {
            Ok(ScanEntry {
                entered_key: row.get(0)?,
                success: row.get(1)?,
                time: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn validate_card(card: &str) -> Result<&str> {
    let trimmed = card.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_CARD_LEN {
        return Err(StoreError::InvalidCard(card.to_owned()));
    }
    Ok(trimmed)
}

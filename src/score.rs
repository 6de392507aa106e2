//! High-score persistence. Two interchangeable backends: an embedded
//! SQLite database (`SqliteScoreDatabase`) and a checksummed flat file
//! (`LocalFileStore`), mirroring `SQLConnection.h` and
//! `BTServer.h::BTSSaveLocalScores/BTSRetrieveScoreList` respectively.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::task;

use crate::codec;

pub const TABLE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighScoreEntry {
    pub name: String,
    pub score: u64,
}

impl HighScoreEntry {
    fn empty() -> Self {
        Self { name: "No Entry".to_string(), score: 0 }
    }
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("score backend io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("score database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("background task panicked")]
    Join(#[from] task::JoinError),
}

/// Pluggable high-score backend. Implementations run synchronously;
/// callers dispatch through `tokio::task::spawn_blocking` so the
/// dispatcher never blocks on file or database I/O.
pub trait ScoreDatabase: Send + Sync + 'static {
    fn retrieve_top10(&self) -> Result<[HighScoreEntry; TABLE_SIZE], ScoreError>;
    fn submit(&self, name: &str, score: u64) -> Result<(), ScoreError>;
}

/// Embedded-SQLite backend, schema `scores(id INTEGER PRIMARY KEY, player
/// TEXT, score INTEGER)`, mirroring `SQLConnection.h`'s `select player,
/// score from scores where id = ?` per-slot queries.
pub struct SqliteScoreDatabase {
    path: PathBuf,
}

impl SqliteScoreDatabase {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ScoreError> {
        let path = path.into();
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS scores (id INTEGER PRIMARY KEY, player TEXT NOT NULL, score INTEGER NOT NULL)",
            [],
        )?;
        Ok(Self { path })
    }

    fn connect(&self) -> Result<rusqlite::Connection, ScoreError> {
        Ok(rusqlite::Connection::open(&self.path)?)
    }
}

impl ScoreDatabase for SqliteScoreDatabase {
    fn retrieve_top10(&self) -> Result<[HighScoreEntry; TABLE_SIZE], ScoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT player, score FROM scores ORDER BY score DESC LIMIT ?1")?;
        let rows = stmt.query_map([TABLE_SIZE as i64], |row| {
            Ok(HighScoreEntry { name: row.get(0)?, score: row.get::<_, i64>(1)? as u64 })
        })?;

        let mut table = std::array::from_fn(|_| HighScoreEntry::empty());
        for (slot, row) in table.iter_mut().zip(rows) {
            *slot = row?;
        }
        Ok(table)
    }

    fn submit(&self, name: &str, score: u64) -> Result<(), ScoreError> {
        let conn = self.connect()?;
        let current = {
            let mut stmt = conn.prepare("SELECT id, score FROM scores ORDER BY score ASC")?;
            let rows: Result<Vec<(i64, i64)>, _> =
                stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?.collect();
            rows?
        };

        if current.len() < TABLE_SIZE {
            conn.execute("INSERT INTO scores (player, score) VALUES (?1, ?2)", rusqlite::params![name, score as i64])?;
            return Ok(());
        }

        let (lowest_id, lowest_score) = current[0];
        if (score as i64) > lowest_score {
            conn.execute("DELETE FROM scores WHERE id = ?1", [lowest_id])?;
            conn.execute("INSERT INTO scores (id, player, score) VALUES (?1, ?2, ?3)", rusqlite::params![lowest_id, name, score as i64])?;
        }
        Ok(())
    }
}

/// Checksummed local flat file: 10 entries × 3 lines (name, score,
/// checksum), matching `BTSSaveLocalScores`/`BTSRetrieveScoreList`.
pub struct LocalFileStore {
    path: PathBuf,
}

impl LocalFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A line that fails to parse or whose checksum doesn't match is
    /// treated as a corrupt entry and replaced with `("No Entry", 0)`
    /// rather than failing the whole table, mirroring
    /// `BTSRetrieveScoreList`'s per-entry handling.
    fn read_table(&self) -> Result<[HighScoreEntry; TABLE_SIZE], ScoreError> {
        if !Path::new(&self.path).exists() {
            return Ok(std::array::from_fn(|_| HighScoreEntry::empty()));
        }
        let text = std::fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = text.lines().collect();

        let mut table = std::array::from_fn(|_| HighScoreEntry::empty());
        for (i, slot) in table.iter_mut().enumerate() {
            let base = i * 3;
            let (Some(name), Some(score_text), Some(checksum_text)) =
                (lines.get(base), lines.get(base + 1), lines.get(base + 2))
            else {
                continue;
            };
            let name = *name;
            if name == "No Entry" {
                continue;
            }
            let Ok(score) = score_text.parse::<u64>() else { continue };
            let Ok(stored_checksum) = checksum_text.parse::<u64>() else { continue };
            if codec::checksum(name, score) != stored_checksum {
                continue;
            }
            *slot = HighScoreEntry { name: name.to_string(), score };
        }
        Ok(table)
    }

    fn write_table(&self, table: &[HighScoreEntry; TABLE_SIZE]) -> Result<(), ScoreError> {
        let mut out = String::new();
        for entry in table {
            out.push_str(&entry.name);
            out.push('\n');
            out.push_str(&entry.score.to_string());
            out.push('\n');
            out.push_str(&codec::checksum(&entry.name, entry.score).to_string());
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }
}

impl ScoreDatabase for LocalFileStore {
    fn retrieve_top10(&self) -> Result<[HighScoreEntry; TABLE_SIZE], ScoreError> {
        self.read_table()
    }

    fn submit(&self, name: &str, score: u64) -> Result<(), ScoreError> {
        let mut table = self.read_table()?;
        let lowest = table
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.score)
            .map(|(i, _)| i)
            .unwrap_or(TABLE_SIZE - 1);
        if score > table[lowest].score {
            table[lowest] = HighScoreEntry { name: name.to_string(), score };
            table.sort_by(|a, b| b.score.cmp(&a.score));
            self.write_table(&table)?;
        }
        Ok(())
    }
}

/// Owns whichever backend was selected at startup and runs its blocking
/// calls off the async runtime's worker threads.
pub struct ScoreStore {
    backend: std::sync::Arc<dyn ScoreDatabase>,
}

impl ScoreStore {
    pub fn new(backend: std::sync::Arc<dyn ScoreDatabase>) -> Self {
        Self { backend }
    }

    pub async fn retrieve_top10(&self) -> Result<[HighScoreEntry; TABLE_SIZE], ScoreError> {
        let backend = self.backend.clone();
        task::spawn_blocking(move || backend.retrieve_top10()).await?
    }

    pub async fn submit(&self, name: String, score: u64) -> Result<(), ScoreError> {
        let backend = self.backend.clone();
        task::spawn_blocking(move || backend.submit(&name, score)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_store_round_trips_an_entry() {
        let dir = std::env::temp_dir().join(format!("bluetetris-test-{}", std::process::id()));
        let store = LocalFileStore::new(&dir);
        store.submit("AL", 500).unwrap();
        let table = store.retrieve_top10().unwrap();
        assert!(table.iter().any(|e| e.name == "AL" && e.score == 500));
        std::fs::remove_file(&dir).ok();
    }

    #[test]
    fn local_store_drops_only_the_tampered_entry() {
        let dir = std::env::temp_dir().join(format!("bluetetris-test-tamper-{}", std::process::id()));
        let store = LocalFileStore::new(&dir);
        store.submit("AL", 500).unwrap();
        store.submit("BOB", 700).unwrap();
        let mut text = std::fs::read_to_string(&dir).unwrap();
        text = text.replacen("500", "999", 1);
        std::fs::write(&dir, text).unwrap();

        let table = store.retrieve_top10().unwrap();
        assert!(table.iter().any(|e| e.name == "BOB" && e.score == 700), "untampered entry survives");
        assert!(!table.iter().any(|e| e.name == "AL"), "tampered entry is dropped, not the whole table");
        assert!(table.iter().any(|e| e.name == "No Entry" && e.score == 0), "dropped entry becomes a sentinel");
        std::fs::remove_file(&dir).ok();
    }

    #[test]
    fn submit_replaces_only_the_lowest_entry() {
        let dir = std::env::temp_dir().join(format!("bluetetris-test-lowest-{}", std::process::id()));
        let store = LocalFileStore::new(&dir);
        for i in 0..10 {
            store.submit(&format!("P{i}"), (i as u64 + 1) * 100).unwrap();
        }
        store.submit("NEWBIE", 50).unwrap();
        let table = store.retrieve_top10().unwrap();
        assert!(!table.iter().any(|e| e.name == "NEWBIE"));

        store.submit("CHAMP", 10_000).unwrap();
        let table = store.retrieve_top10().unwrap();
        assert!(table.iter().any(|e| e.name == "CHAMP"));
        std::fs::remove_file(&dir).ok();
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use casetrail_core::{CaseMap, Snapshot, format_rfc3339, now_rfc3339, parse_rfc3339};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde_json::Value;
use thiserror::Error;

mod layout;

pub use layout::{HISTORY_KEY, LATEST_KEY, LatestRecord};

use layout::{decode_history, decode_latest, resolve_latest};

pub const HISTORY_DB_FILE_NAME: &str = "history.sqlite";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid storage export: {0}")]
    InvalidExport(String),
    #[error("stored history is unreadable; clear it before recording new snapshots")]
    CorruptHistory,
}

/// Append-only snapshot history. `append` and `clear` are the only mutations.
pub trait HistoryStore {
    /// Cases of the newest snapshot. Falls back to the legacy single-snapshot entry while the
    /// history is empty; that fallback never writes anything.
    fn latest_cases(&self) -> Result<CaseMap, StoreError>;
    fn history(&self) -> Result<Vec<Snapshot>, StoreError>;
    fn history_len(&self) -> Result<usize, StoreError>;
    fn last_fetch(&self) -> Result<Option<String>, StoreError>;

    fn append(&mut self, cases: &CaseMap) -> Result<Snapshot, StoreError>;
    fn clear(&mut self) -> Result<(), StoreError>;
}

/// Key/value storage in `.casetrail/history.sqlite`, one row per storage key.
pub struct SqliteHistoryStore {
    conn: Connection,
    casetrail_dir: PathBuf,
}

impl SqliteHistoryStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let casetrail_dir = workspace_root.as_ref().join(".casetrail");
        let sqlite_path = casetrail_dir.join(HISTORY_DB_FILE_NAME);

        fs::create_dir_all(&casetrail_dir)?;

        let conn = Connection::open(sqlite_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self {
            conn,
            casetrail_dir,
        })
    }

    pub fn casetrail_dir(&self) -> &Path {
        &self.casetrail_dir
    }

    /// Loads a key/value export of an older tracker's storage (an object holding
    /// `caseTrackerData` and/or `caseTrackerHistory`). Values may be JSON or JSON-encoded
    /// strings. Entries are stored verbatim; nothing is upgraded until the next `append`.
    pub fn import_storage_export(&mut self, export: &Value) -> Result<usize, StoreError> {
        let Value::Object(entries) = export else {
            return Err(StoreError::InvalidExport(
                "expected a JSON object of storage keys".to_owned(),
            ));
        };

        let tx = self.conn.transaction()?;
        let mut imported = 0;
        for key in [LATEST_KEY, HISTORY_KEY] {
            let Some(value) = entries.get(key) else {
                continue;
            };
            let raw = match value {
                Value::String(encoded) => encoded.clone(),
                other => serde_json::to_string(other)?,
            };
            put_entry(&tx, key, &raw)?;
            imported += 1;
        }
        tx.commit()?;

        if imported == 0 {
            tracing::warn!("storage export did not contain any known keys");
        }
        Ok(imported)
    }

    fn read_entry(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM storage WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn latest_cases(&self) -> Result<CaseMap, StoreError> {
        let history = self.history()?;
        if !history.is_empty() {
            return Ok(resolve_latest(&history, None));
        }

        let legacy = decode_latest(self.read_entry(LATEST_KEY)?.as_deref());
        Ok(resolve_latest(&history, legacy))
    }

    fn history(&self) -> Result<Vec<Snapshot>, StoreError> {
        Ok(decode_history(self.read_entry(HISTORY_KEY)?.as_deref()).snapshots)
    }

    fn history_len(&self) -> Result<usize, StoreError> {
        Ok(self.history()?.len())
    }

    fn last_fetch(&self) -> Result<Option<String>, StoreError> {
        Ok(decode_latest(self.read_entry(LATEST_KEY)?.as_deref())
            .and_then(|record| record.last_fetch))
    }

    fn append(&mut self, cases: &CaseMap) -> Result<Snapshot, StoreError> {
        let mut stored = decode_history(self.read_entry(HISTORY_KEY)?.as_deref());
        if stored.unreadable {
            return Err(StoreError::CorruptHistory);
        }
        let saved_at = next_saved_at(stored.snapshots.last());

        let snapshot = Snapshot {
            cases: cases.clone(),
            saved_at: saved_at.clone(),
        };
        // Entries that no longer decode are written back untouched.
        stored.entries.push(serde_json::to_value(&snapshot)?);

        let latest = LatestRecord {
            cases: cases.clone(),
            last_fetch: Some(saved_at),
        };

        let history_json = serde_json::to_string(&stored.entries)?;
        let latest_json = serde_json::to_string(&latest)?;

        let tx = self.conn.transaction()?;
        put_entry(&tx, HISTORY_KEY, &history_json)?;
        put_entry(&tx, LATEST_KEY, &latest_json)?;
        tx.commit()?;

        tracing::debug!(
            cases = cases.len(),
            history_len = stored.entries.len(),
            saved_at = %snapshot.saved_at,
            "appended snapshot"
        );
        Ok(snapshot)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM storage WHERE key IN (?1, ?2)",
            params![HISTORY_KEY, LATEST_KEY],
        )?;
        tx.commit()?;
        tracing::info!("cleared snapshot history");
        Ok(())
    }
}

/// `savedAt` never moves backwards, even if the wall clock does.
fn next_saved_at(previous: Option<&Snapshot>) -> String {
    let now = now_rfc3339();
    let Some(previous) = previous.and_then(|snapshot| parse_rfc3339(&snapshot.saved_at)) else {
        return now;
    };

    match parse_rfc3339(&now) {
        Some(current) if current < previous => format_rfc3339(previous),
        _ => now,
    }
}

fn put_entry(tx: &Transaction<'_>, key: &str, value: &str) -> Result<(), StoreError> {
    tx.execute(
        r#"
        INSERT INTO storage (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS storage (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    Ok(())
}

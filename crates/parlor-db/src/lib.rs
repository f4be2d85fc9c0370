pub mod chats;
pub mod delivery;
pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod users;

pub use error::{StoreError, StoreResult};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Handle to the chat store. Created once at startup and handed to the HTTP
/// layer; every manager operation is a method on this type.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, &path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", label);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Internal(anyhow::anyhow!("DB lock poisoned: {}", e)))
    }

    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside one transaction. Any error returned by `f` drops the
    /// transaction uncommitted, which rolls every statement back.
    pub fn with_tx<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Fixed-width UTC timestamp so that string order matches time order.
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_timestamp() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    let stamp = timestamp(&now);
    (now, stamp)
}

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by hand through the sqlite shell use datetime('now').
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub(crate) fn parse_optional_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(parse_timestamp)
}

/// Trims an optional text field, treating blank input as absent.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn user(db: &Database, name: &str) -> i64 {
        db.create_user(
            name,
            &format!("{}@example.com", name),
            &format!("555-{}", name),
            "$argon2id$stub",
        )
        .unwrap()
        .id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_chronologically() {
        let early = "2024-01-01T09:00:00.000001Z".parse::<DateTime<Utc>>().unwrap();
        let late = "2024-01-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(timestamp(&early) < timestamp(&late));
        assert_eq!(timestamp(&late), "2024-01-01T10:00:00.000000Z");
    }

    #[test]
    fn parse_timestamp_accepts_sqlite_format() {
        let parsed = parse_timestamp("2024-05-06 07:08:09");
        assert_eq!(timestamp(&parsed), "2024-05-06T07:08:09.000000Z");
        assert_eq!(parse_timestamp(&timestamp(&parsed)), parsed);
    }

    #[test]
    fn non_blank_filters_whitespace() {
        assert_eq!(non_blank(Some("  team ")), Some("team"));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}

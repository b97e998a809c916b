use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use tern_common::{Error, Result};
use tracing::debug;

use crate::ident;
use crate::introspect::Introspector;

pub const DEFAULT_LEDGER_TABLE: &str = "_schema_migrations";

/// A migration recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub version: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Applied-version record kept inside the target database, so it moves with
/// the schema it describes through backups and restores.
pub struct Ledger<'c> {
    conn: &'c Connection,
    table: String,
}

impl<'c> Ledger<'c> {
    pub fn new(conn: &'c Connection, table: &str) -> Result<Self> {
        // Validate once; every statement below interpolates the name.
        ident::quote(table)?;
        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it is missing.
    pub fn ensure(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    version INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    applied_at TEXT NOT NULL
                )",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to create ledger table: {e}")))?;
        Ok(())
    }

    pub fn exists(&self) -> Result<bool> {
        Introspector::new(self.conn).table_exists(&self.table)
    }

    /// All entries ordered by version. A missing table reads as empty, so
    /// read-only callers never have to create it.
    pub fn list(&self) -> Result<Vec<LedgerEntry>> {
        if !self.exists()? {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT version, name, applied_at FROM \"{}\" ORDER BY version ASC",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    version: row.get(0)?,
                    name: row.get(1)?,
                    applied_at: parse_datetime(row.get::<_, String>(2)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))
    }

    pub fn has(&self, version: u32) -> Result<bool> {
        if !self.exists()? {
            return Ok(false);
        }
        self.conn
            .query_row(
                &format!(
                    "SELECT EXISTS(SELECT 1 FROM \"{}\" WHERE version = ?1)",
                    self.table
                ),
                params![version],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check ledger: {e}")))
    }

    pub fn record(&self, version: u32, name: &str, applied_at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{}\" (version, name, applied_at) VALUES (?1, ?2, ?3)",
                    self.table
                ),
                params![
                    version,
                    name,
                    applied_at.to_rfc3339_opts(SecondsFormat::Micros, true)
                ],
            )
            .map_err(|e| Error::Database(format!("failed to record version {version}: {e}")))?;
        debug!("ledger: recorded version {version} ({name})");
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, version: u32) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                &format!("DELETE FROM \"{}\" WHERE version = ?1", self.table),
                params![version],
            )
            .map_err(|e| Error::Database(format!("failed to remove version {version}: {e}")))?;
        debug!("ledger: removed version {version}");
        Ok(removed > 0)
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // Rows written by hand with datetime('now') use "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or(DateTime::UNIX_EPOCH)
        })
}

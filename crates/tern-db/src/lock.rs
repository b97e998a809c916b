use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tern_common::{Error, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ident;
use crate::introspect::Introspector;

pub const DEFAULT_LOCK_TABLE: &str = "_schema_lock";

/// Who holds the lock and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// Unique id for one runner process.
pub fn new_holder_id() -> String {
    format!("pid-{}-{}", std::process::id(), Uuid::new_v4())
}

/// Cross-process mutual exclusion for apply/revert batches: a single row
/// with `id = 1` in a dedicated table. Inserting the row is the atomic
/// acquire; a second runner finds it present and fails immediately.
///
/// A runner that crashes leaves its row behind. It stays until an operator
/// calls `force_release`, or until it is older than the optional TTL.
pub struct AdvisoryLock<'c> {
    conn: &'c Connection,
    table: String,
    ttl: Option<Duration>,
}

impl<'c> AdvisoryLock<'c> {
    pub fn new(conn: &'c Connection, table: &str) -> Result<Self> {
        ident::quote(table)?;
        Ok(Self {
            conn,
            table: table.to_string(),
            ttl: None,
        })
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ensure(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    holder TEXT NOT NULL,
                    acquired_at TEXT NOT NULL
                )",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to create lock table: {e}")))?;
        Ok(())
    }

    /// Current holder, if any. Does not create the lock table.
    pub fn current(&self) -> Result<Option<LockHolder>> {
        if !Introspector::new(self.conn).table_exists(&self.table)? {
            return Ok(None);
        }
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT holder, acquired_at FROM \"{}\" WHERE id = 1",
                    self.table
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read lock: {e}")))?;

        Ok(row.map(|(holder, raw)| {
            let acquired_at = DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|e| {
                    warn!("lock held by {holder} has unreadable acquired_at '{raw}': {e}");
                    DateTime::UNIX_EPOCH
                });
            LockHolder {
                holder,
                acquired_at,
            }
        }))
    }

    /// Take the lock for `holder` or fail at once if someone else has it.
    /// There is no waiting: a concurrent run is treated as a mistake.
    pub fn acquire(&self, holder: &str) -> Result<LockGuard<'c>> {
        self.ensure()?;

        // A TTL reaching back past the earliest representable time never expires.
        let cutoff = self
            .ttl
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl).map(|at| (ttl, at)));
        if let Some((ttl, at)) = cutoff {
            let cutoff = timestamp(at);
            let cleared = self
                .conn
                .execute(
                    &format!(
                        "DELETE FROM \"{}\" WHERE id = 1 AND acquired_at < ?1",
                        self.table
                    ),
                    params![cutoff],
                )
                .map_err(|e| Error::Database(format!("failed to clear stale lock: {e}")))?;
            if cleared > 0 {
                warn!(
                    "replaced stale migration lock older than {}s",
                    ttl.num_seconds()
                );
            }
        }

        let inserted = self
            .conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO \"{}\" (id, holder, acquired_at) VALUES (1, ?1, ?2)",
                    self.table
                ),
                params![holder, timestamp(Utc::now())],
            )
            .map_err(|e| Error::Database(format!("failed to acquire lock: {e}")))?;

        if inserted == 0 {
            let detail = match self.current()? {
                Some(current) => format!(
                    "migration lock is held by {} since {}",
                    current.holder,
                    current.acquired_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
                None => "migration lock is held by another runner".to_string(),
            };
            return Err(Error::Lock(format!(
                "{detail}; if that runner is gone, clear it with `tern unlock`"
            )));
        }

        debug!("acquired migration lock as {holder}");
        Ok(LockGuard {
            conn: self.conn,
            table: self.table.clone(),
            holder: holder.to_string(),
            released: false,
        })
    }

    /// Remove the lock row whoever holds it. Returns whether a row existed.
    pub fn force_release(&self) -> Result<bool> {
        if !Introspector::new(self.conn).table_exists(&self.table)? {
            return Ok(false);
        }
        let removed = self
            .conn
            .execute(&format!("DELETE FROM \"{}\" WHERE id = 1", self.table), [])
            .map_err(|e| Error::Database(format!("failed to clear lock: {e}")))?;
        if removed > 0 {
            info!("migration lock force-released");
        }
        Ok(removed > 0)
    }
}

/// Held lock. Released by `release` or, failing that, on drop.
pub struct LockGuard<'c> {
    conn: &'c Connection,
    table: String,
    holder: String,
    released: bool,
}

impl LockGuard<'_> {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.delete_row()
    }

    fn delete_row(&self) -> Result<()> {
        let removed = self
            .conn
            .execute(
                &format!(
                    "DELETE FROM \"{}\" WHERE id = 1 AND holder = ?1",
                    self.table
                ),
                params![self.holder],
            )
            .map_err(|e| Error::Database(format!("failed to release lock: {e}")))?;
        if removed == 0 {
            warn!("migration lock for {} was already gone at release", self.holder);
        } else {
            debug!("released migration lock held by {}", self.holder);
        }
        Ok(())
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.delete_row() {
                warn!("failed to release migration lock on drop: {e}");
            }
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

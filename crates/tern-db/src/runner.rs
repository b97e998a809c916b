use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tern_common::{Error, Result};
use tracing::{debug, error, info, warn};

use crate::context::{ExecMode, MigrationContext};
use crate::ledger::{DEFAULT_LEDGER_TABLE, Ledger, LedgerEntry};
use crate::lock::{AdvisoryLock, DEFAULT_LOCK_TABLE, LockHolder, new_holder_id};
use crate::migration::Migration;
use crate::plan::{self, Direction, DownTarget, UpTarget};
use crate::planner::DryRunPlanner;
use crate::registry::Registry;

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub ledger_table: String,
    pub lock_table: String,
    pub lock_ttl: Option<Duration>,
    /// Written into the lock row so a blocked runner can say who is in the way.
    pub holder: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
            lock_ttl: None,
            holder: new_holder_id(),
        }
    }
}

/// Where a batch is in its lifecycle. Transitions are traced at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchState {
    Idle,
    LockAcquired,
    Planning,
    Executing,
    Verifying,
    Committed,
    Aborted,
    LockReleased,
}

/// Per-migration progress, delivered to the observer as each one finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    Started {
        direction: Direction,
        migration: String,
    },
    Completed {
        direction: Direction,
        migration: String,
        statements: usize,
        elapsed_ms: u64,
    },
    Failed {
        direction: Direction,
        migration: String,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedMigration {
    pub version: u32,
    pub name: String,
    pub statements: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub direction: Direction,
    pub completed: Vec<CompletedMigration>,
}

impl BatchReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            completed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn statements_executed(&self) -> usize {
        self.completed.iter().map(|m| m.statements).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: u32,
    pub name: String,
    pub description: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub migrations: Vec<MigrationStatus>,
    /// Ledger rows whose version this registry does not know.
    pub orphaned: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.migrations.iter().filter(|m| !m.is_applied())
    }

    pub fn applied(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.migrations.iter().filter(|m| m.is_applied())
    }
}

type Observer<'r> = Box<dyn Fn(&MigrationEvent) + 'r>;

/// Applies and reverts registry migrations against one database.
///
/// Batches run strictly one migration at a time under the advisory lock and
/// stop at the first failure. Migrations completed earlier in the same batch
/// stay applied; only the failing one is cleaned up.
pub struct MigrationRunner<'r> {
    registry: &'r Registry,
    options: RunnerOptions,
    observer: Option<Observer<'r>>,
}

impl<'r> MigrationRunner<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            options: RunnerOptions::default(),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl Fn(&MigrationEvent) + 'r) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Planner sharing this runner's registry and ledger table.
    pub fn planner(&self) -> DryRunPlanner<'r> {
        DryRunPlanner::new(self.registry, &self.options.ledger_table)
    }

    /// Apply pending migrations in ascending version order.
    pub fn up(&self, conn: &Connection, target: UpTarget) -> Result<BatchReport> {
        self.run_batch(conn, Direction::Up, |ledger, state| {
            self.apply_pending(conn, ledger, target, state)
        })
    }

    /// Revert applied migrations, highest version first.
    pub fn down(&self, conn: &Connection, target: DownTarget) -> Result<BatchReport> {
        self.run_batch(conn, Direction::Down, |ledger, state| {
            self.revert_applied(conn, ledger, target, state)
        })
    }

    /// Applied/pending state of every registered migration. Read-only: takes
    /// no lock and creates no tables.
    pub fn status(&self, conn: &Connection) -> Result<StatusReport> {
        let ledger = Ledger::new(conn, &self.options.ledger_table)?;
        let applied = ledger.list()?;

        let migrations = self
            .registry
            .iter()
            .map(|m| MigrationStatus {
                version: m.version(),
                name: m.name().to_string(),
                description: m.description().to_string(),
                applied_at: applied
                    .iter()
                    .find(|e| e.version == m.version())
                    .map(|e| e.applied_at),
            })
            .collect();
        let orphaned = plan::orphaned(self.registry, &applied)
            .into_iter()
            .cloned()
            .collect();

        Ok(StatusReport {
            migrations,
            orphaned,
        })
    }

    /// Who holds the advisory lock right now, if anyone.
    pub fn lock_holder(&self, conn: &Connection) -> Result<Option<LockHolder>> {
        AdvisoryLock::new(conn, &self.options.lock_table)?.current()
    }

    /// Clear a lock left behind by a crashed runner.
    pub fn force_unlock(&self, conn: &Connection) -> Result<bool> {
        AdvisoryLock::new(conn, &self.options.lock_table)?.force_release()
    }

    fn run_batch<F>(&self, conn: &Connection, direction: Direction, body: F) -> Result<BatchReport>
    where
        F: FnOnce(&Ledger<'_>, &mut BatchState) -> Result<BatchReport>,
    {
        let mut state = BatchState::Idle;

        let ledger = Ledger::new(conn, &self.options.ledger_table)?;
        ledger.ensure()?;

        let lock =
            AdvisoryLock::new(conn, &self.options.lock_table)?.with_ttl(self.options.lock_ttl);
        let guard = lock.acquire(&self.options.holder)?;
        transition(&mut state, BatchState::LockAcquired);
        info!("{direction:?} batch started");

        let outcome = body(&ledger, &mut state);
        match &outcome {
            Ok(report) => {
                transition(&mut state, BatchState::Committed);
                info!(
                    "{direction:?} batch finished: {} migrations, {} statements",
                    report.completed.len(),
                    report.statements_executed()
                );
            }
            Err(e) => {
                transition(&mut state, BatchState::Aborted);
                error!("{direction:?} batch aborted: {e}");
            }
        }

        let released = guard.release();
        transition(&mut state, BatchState::LockReleased);

        match (outcome, released) {
            (Err(e), Err(release_err)) => {
                warn!("lock release also failed: {release_err}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Ok(report), Ok(())) => Ok(report),
        }
    }

    fn apply_pending(
        &self,
        conn: &Connection,
        ledger: &Ledger<'_>,
        target: UpTarget,
        state: &mut BatchState,
    ) -> Result<BatchReport> {
        transition(state, BatchState::Planning);
        let applied = ledger.list()?;
        let pending = plan::pending(self.registry, &applied, target)?;
        if pending.is_empty() {
            info!("schema is up to date");
        }

        let mut report = BatchReport::new(Direction::Up);
        for migration in pending {
            let id = migration.identifier();
            self.emit(MigrationEvent::Started {
                direction: Direction::Up,
                migration: id.clone(),
            });

            match self.apply_one(conn, ledger, migration, state) {
                Ok(done) => {
                    self.emit(MigrationEvent::Completed {
                        direction: Direction::Up,
                        migration: id,
                        statements: done.statements,
                        elapsed_ms: done.elapsed_ms,
                    });
                    report.completed.push(done);
                }
                Err(e) => {
                    self.emit(MigrationEvent::Failed {
                        direction: Direction::Up,
                        migration: id,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    fn apply_one(
        &self,
        conn: &Connection,
        ledger: &Ledger<'_>,
        migration: &dyn Migration,
        state: &mut BatchState,
    ) -> Result<CompletedMigration> {
        let id = migration.identifier();
        let started = Instant::now();

        transition(state, BatchState::Executing);
        info!("applying {id}");
        let mut ctx = MigrationContext::new(conn, ExecMode::Execute);
        migration
            .apply(&mut ctx)
            .map_err(|e| execution_error(&id, e))?;
        let statements = ctx.statements().len();

        transition(state, BatchState::Verifying);
        let verification = migration.verify(conn).map_err(|e| Error::Execution {
            migration: id.clone(),
            message: format!("verification could not run: {e}"),
        })?;

        if !verification.passed {
            warn!("{id} failed verification: {}; reverting", verification.message);
            let mut cleanup = MigrationContext::new(conn, ExecMode::Execute);
            let revert_error = match migration.revert(&mut cleanup) {
                Ok(()) => None,
                Err(e) => {
                    error!("cleanup revert of {id} failed: {e}");
                    Some(e.to_string())
                }
            };
            return Err(Error::Verification {
                migration: id,
                message: verification.message,
                revert_error,
            });
        }
        debug!("{id} verified: {}", verification.message);

        ledger
            .record(migration.version(), migration.name(), Utc::now())
            .map_err(|e| execution_error(&id, e))?;
        info!("applied {id} ({statements} statements)");

        Ok(CompletedMigration {
            version: migration.version(),
            name: migration.name().to_string(),
            statements,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn revert_applied(
        &self,
        conn: &Connection,
        ledger: &Ledger<'_>,
        target: DownTarget,
        state: &mut BatchState,
    ) -> Result<BatchReport> {
        transition(state, BatchState::Planning);
        let applied = ledger.list()?;
        let targets = plan::revert_targets(self.registry, &applied, target)?;
        if targets.is_empty() {
            info!("nothing to revert");
        }

        let mut report = BatchReport::new(Direction::Down);
        for migration in targets {
            let id = migration.identifier();
            self.emit(MigrationEvent::Started {
                direction: Direction::Down,
                migration: id.clone(),
            });

            transition(state, BatchState::Executing);
            match revert_one(conn, ledger, migration) {
                Ok(done) => {
                    self.emit(MigrationEvent::Completed {
                        direction: Direction::Down,
                        migration: id,
                        statements: done.statements,
                        elapsed_ms: done.elapsed_ms,
                    });
                    report.completed.push(done);
                }
                Err(e) => {
                    self.emit(MigrationEvent::Failed {
                        direction: Direction::Down,
                        migration: id,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    fn emit(&self, event: MigrationEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

fn revert_one(
    conn: &Connection,
    ledger: &Ledger<'_>,
    migration: &dyn Migration,
) -> Result<CompletedMigration> {
    let id = migration.identifier();
    let started = Instant::now();

    info!("reverting {id}");
    let mut ctx = MigrationContext::new(conn, ExecMode::Execute);
    migration
        .revert(&mut ctx)
        .map_err(|e| execution_error(&id, e))?;
    let statements = ctx.statements().len();

    ledger
        .remove(migration.version())
        .map_err(|e| execution_error(&id, e))?;
    info!("reverted {id} ({statements} statements)");

    Ok(CompletedMigration {
        version: migration.version(),
        name: migration.name().to_string(),
        statements,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn execution_error(id: &str, e: Error) -> Error {
    match e {
        Error::Execution { .. } | Error::Verification { .. } => e,
        Error::Database(message) => Error::Execution {
            migration: id.to_string(),
            message,
        },
        other => Error::Execution {
            migration: id.to_string(),
            message: other.to_string(),
        },
    }
}

fn transition(state: &mut BatchState, next: BatchState) {
    debug!("batch state {state:?} -> {next:?}");
    *state = next;
}

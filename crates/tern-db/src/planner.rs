use rusqlite::Connection;
use serde::Serialize;
use tern_common::{Error, Result};
use tracing::debug;

use crate::context::{ExecMode, MigrationContext};
use crate::ledger::Ledger;
use crate::migration::Migration;
use crate::plan::{self, Direction, DownTarget, UpTarget};
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMigration {
    pub version: u32,
    pub name: String,
    pub description: String,
    pub statements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub direction: Direction,
    pub migrations: Vec<PlannedMigration>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn statement_count(&self) -> usize {
        self.migrations.iter().map(|m| m.statements.len()).sum()
    }
}

/// Previews a batch: the same pending/target selection as the runner, with
/// each migration run in describe mode so its statements are collected
/// instead of executed.
///
/// Takes no lock and never creates or writes the ledger. Statements are
/// rendered against the schema as it is now, so a later migration in the
/// plan does not see the effects of an earlier one.
pub struct DryRunPlanner<'r> {
    registry: &'r Registry,
    ledger_table: String,
}

impl<'r> DryRunPlanner<'r> {
    pub fn new(registry: &'r Registry, ledger_table: &str) -> Self {
        Self {
            registry,
            ledger_table: ledger_table.to_string(),
        }
    }

    pub fn plan_up(&self, conn: &Connection, target: UpTarget) -> Result<Plan> {
        let applied = Ledger::new(conn, &self.ledger_table)?.list()?;
        let pending = plan::pending(self.registry, &applied, target)?;
        self.describe(conn, Direction::Up, pending)
    }

    pub fn plan_down(&self, conn: &Connection, target: DownTarget) -> Result<Plan> {
        let applied = Ledger::new(conn, &self.ledger_table)?.list()?;
        let targets = plan::revert_targets(self.registry, &applied, target)?;
        self.describe(conn, Direction::Down, targets)
    }

    fn describe(
        &self,
        conn: &Connection,
        direction: Direction,
        migrations: Vec<&dyn Migration>,
    ) -> Result<Plan> {
        let mut planned = Vec::with_capacity(migrations.len());
        for migration in migrations {
            let id = migration.identifier();
            let mut ctx = MigrationContext::new(conn, ExecMode::Describe);
            let described = match direction {
                Direction::Up => migration.apply(&mut ctx),
                Direction::Down => migration.revert(&mut ctx),
            };
            described.map_err(|e| Error::Execution {
                migration: id.clone(),
                message: format!("could not describe: {e}"),
            })?;

            let statements = ctx.into_statements();
            debug!("planned {id}: {} statements", statements.len());
            planned.push(PlannedMigration {
                version: migration.version(),
                name: migration.name().to_string(),
                description: migration.description().to_string(),
                statements,
            });
        }
        Ok(Plan {
            direction,
            migrations: planned,
        })
    }
}

//! The contract every schema change implements.
//!
//! A migration is a pure definition: identity plus three operations. It is
//! never mutated after it is registered.
//!
//! * `apply` must be safe to re-invoke after a partial earlier attempt. Use
//!   the `MigrationContext` helpers, which check the schema before each
//!   statement.
//! * `revert` must be safe when `apply` never ran or stopped half way. The
//!   runner calls it as cleanup when `verify` fails, so this is a hard
//!   requirement and not a convenience.
//! * `verify` is read-only. Return `Err` when the check itself could not run
//!   and `Ok(Verification::failed(..))` when it ran and the schema is wrong.

use rusqlite::Connection;
use serde::Serialize;
use tern_common::Result;

use crate::context::MigrationContext;
use crate::ident;

pub trait Migration: Send + Sync {
    /// Positive, unique, and the only ordering key.
    fn version(&self) -> u32;

    /// Lower-snake-case slug, unique within a registry.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn apply(&self, ctx: &mut MigrationContext<'_>) -> Result<()>;

    fn revert(&self, ctx: &mut MigrationContext<'_>) -> Result<()>;

    fn verify(&self, conn: &Connection) -> Result<Verification>;

    /// `NNN_name`, the form shared with generated migration files.
    fn identifier(&self) -> String {
        ident::format_identifier(self.version(), self.name())
    }
}

/// Outcome of a post-apply check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub passed: bool,
    pub message: String,
}

impl Verification {
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }

    /// Fold a list of individual checks: passes only if all pass, and the
    /// message lists every failure.
    pub fn all(checks: impl IntoIterator<Item = Verification>) -> Self {
        let mut failures = Vec::new();
        let mut count = 0usize;
        for check in checks {
            count += 1;
            if !check.passed {
                failures.push(check.message);
            }
        }
        if failures.is_empty() {
            Self::passed(format!("{count} checks passed"))
        } else {
            Self::failed(failures.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_passes_when_every_check_passes() {
        let v = Verification::all([Verification::passed("a"), Verification::passed("b")]);
        assert!(v.passed);
        assert_eq!(v.message, "2 checks passed");
    }

    #[test]
    fn all_collects_failures() {
        let v = Verification::all([
            Verification::failed("column b missing"),
            Verification::passed("index ok"),
            Verification::failed("index idx_c missing"),
        ]);
        assert!(!v.passed);
        assert_eq!(v.message, "column b missing; index idx_c missing");
    }
}

use std::collections::HashSet;

use serde::Serialize;
use tern_common::{Error, Result};
use tracing::warn;

use crate::ledger::LedgerEntry;
use crate::migration::Migration;
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpTarget {
    /// Every pending migration.
    #[default]
    All,
    /// Pending migrations with a version at or below this one.
    To(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownTarget {
    /// The N most recently applied migrations, by version.
    Steps(usize),
    /// Every applied migration above this version. `To(0)` reverts all.
    To(u32),
}

impl Default for DownTarget {
    fn default() -> Self {
        DownTarget::Steps(1)
    }
}

/// Registry versions without a ledger entry, ascending.
pub fn pending<'r>(
    registry: &'r Registry,
    applied: &[LedgerEntry],
    target: UpTarget,
) -> Result<Vec<&'r dyn Migration>> {
    if let UpTarget::To(version) = target {
        if !registry.contains(version) {
            return Err(Error::Config(format!(
                "target version {version} is not a registered migration"
            )));
        }
    }

    let applied_versions: HashSet<u32> = applied.iter().map(|e| e.version).collect();
    let max_applied = applied_versions.iter().copied().max().unwrap_or(0);

    let selected: Vec<&dyn Migration> = registry
        .iter()
        .filter(|m| !applied_versions.contains(&m.version()))
        .filter(|m| match target {
            UpTarget::All => true,
            UpTarget::To(version) => m.version() <= version,
        })
        .collect();

    for migration in &selected {
        if migration.version() < max_applied {
            warn!(
                "{} is pending but version {max_applied} is already applied; applying out of order",
                migration.identifier()
            );
        }
    }

    Ok(selected)
}

/// Applied registry versions to revert, highest first.
pub fn revert_targets<'r>(
    registry: &'r Registry,
    applied: &[LedgerEntry],
    target: DownTarget,
) -> Result<Vec<&'r dyn Migration>> {
    match target {
        DownTarget::Steps(0) => {
            return Err(Error::Config("steps must be at least 1".into()));
        }
        DownTarget::To(version) if version != 0 && !registry.contains(version) => {
            return Err(Error::Config(format!(
                "target version {version} is not a registered migration"
            )));
        }
        _ => {}
    }

    for entry in orphaned(registry, applied) {
        warn!(
            "ledger has version {} ({}) which is not registered; it will not be reverted",
            entry.version, entry.name
        );
    }

    let applied_versions: HashSet<u32> = applied.iter().map(|e| e.version).collect();
    let candidates = registry
        .iter()
        .rev()
        .filter(|m| applied_versions.contains(&m.version()));

    let selected: Vec<&dyn Migration> = match target {
        DownTarget::Steps(steps) => candidates.take(steps).collect(),
        DownTarget::To(version) => candidates.take_while(|m| m.version() > version).collect(),
    };
    Ok(selected)
}

/// Ledger entries with no matching registry migration.
pub fn orphaned<'a>(registry: &Registry, applied: &'a [LedgerEntry]) -> Vec<&'a LedgerEntry> {
    applied
        .iter()
        .filter(|entry| !registry.contains(entry.version))
        .collect()
}

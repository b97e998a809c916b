use std::collections::HashSet;

use tern_common::{Error, Result};

use crate::ident;
use crate::migration::Migration;

/// The ordered set of migrations a process knows about.
///
/// Built once at startup from an explicit list. Construction rejects zero or
/// non-ascending versions, duplicate versions or names, and names that are not
/// lower snake case, before any database is touched.
pub struct Registry {
    migrations: Vec<Box<dyn Migration>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.migrations.iter().map(|m| m.identifier()))
            .finish()
    }
}

impl Registry {
    pub fn new(migrations: Vec<Box<dyn Migration>>) -> Result<Self> {
        let mut versions = HashSet::new();
        let mut names = HashSet::new();
        let mut previous: Option<u32> = None;

        for migration in &migrations {
            let version = migration.version();
            let name = migration.name();

            if version == 0 {
                return Err(Error::Config(format!(
                    "migration '{name}' has version 0; versions start at 1"
                )));
            }
            if !ident::is_migration_name(name) {
                return Err(Error::Config(format!(
                    "migration {version} has malformed name '{name}', expected lower_snake_case"
                )));
            }
            if !versions.insert(version) {
                return Err(Error::Config(format!(
                    "duplicate migration version {version} ('{name}')"
                )));
            }
            if !names.insert(name.to_string()) {
                return Err(Error::Config(format!(
                    "duplicate migration name '{name}' (version {version})"
                )));
            }
            if let Some(prev) = previous {
                if version < prev {
                    return Err(Error::Config(format!(
                        "migration {} is declared after version {prev}; \
                         declare migrations in ascending version order",
                        ident::format_identifier(version, name)
                    )));
                }
            }
            previous = Some(version);
        }

        Ok(Self { migrations })
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &dyn Migration> {
        self.migrations.iter().map(|m| m.as_ref())
    }

    pub fn get(&self, version: u32) -> Option<&dyn Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version())
            .ok()
            .map(|idx| self.migrations[idx].as_ref())
    }

    pub fn contains(&self, version: u32) -> bool {
        self.get(version).is_some()
    }

    pub fn latest_version(&self) -> Option<u32> {
        self.migrations.last().map(|m| m.version())
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Collects migrations in declaration order; `build` validates them.
#[derive(Default)]
pub struct RegistryBuilder {
    migrations: Vec<Box<dyn Migration>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn add(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    #[must_use]
    pub fn add_boxed(mut self, migration: Box<dyn Migration>) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn build(self) -> Result<Registry> {
        Registry::new(self.migrations)
    }
}

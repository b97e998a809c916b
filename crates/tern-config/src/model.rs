use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tern_common::{Error, Result, is_sql_identifier};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tern.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationsConfig {
    pub ledger_table: String,
    pub lock_table: String,
    /// A lock row older than this is treated as abandoned by a crashed
    /// runner and replaced. `None` means locks never expire.
    pub lock_ttl_secs: Option<u64>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            ledger_table: "_schema_migrations".to_string(),
            lock_table: "_schema_lock".to_string(),
            lock_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl AppConfig {
    /// Reject settings that would be interpolated into SQL unsafely or that
    /// make the ledger and the lock share a table.
    pub fn validate(&self) -> Result<()> {
        check_table_name("migrations.ledger_table", &self.migrations.ledger_table)?;
        check_table_name("migrations.lock_table", &self.migrations.lock_table)?;
        if self
            .migrations
            .ledger_table
            .eq_ignore_ascii_case(&self.migrations.lock_table)
        {
            return Err(Error::Config(format!(
                "ledger and lock must use different tables (both are '{}')",
                self.migrations.ledger_table
            )));
        }
        if self.migrations.lock_ttl_secs == Some(0) {
            return Err(Error::Config(
                "migrations.lock_ttl_secs must be greater than zero".into(),
            ));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(Error::Config("database.path cannot be empty".into()));
        }
        Ok(())
    }
}

fn check_table_name(key: &str, name: &str) -> Result<()> {
    if !is_sql_identifier(name) {
        return Err(Error::Config(format!(
            "{key} must be a plain SQL identifier, got '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.migrations.ledger_table, "_schema_migrations");
        assert_eq!(config.migrations.lock_table, "_schema_lock");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn rejects_table_names_that_are_not_identifiers() {
        let mut config = AppConfig::default();
        config.migrations.ledger_table = "ledger; DROP TABLE t".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("migrations.ledger_table"));

        let mut config = AppConfig::default();
        config.migrations.lock_table = "9lock".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shared_ledger_and_lock_table() {
        let mut config = AppConfig::default();
        config.migrations.lock_table = "_SCHEMA_MIGRATIONS".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_ttl() {
        let mut config = AppConfig::default();
        config.migrations.lock_ttl_secs = Some(0);
        assert!(config.validate().is_err());
    }
}

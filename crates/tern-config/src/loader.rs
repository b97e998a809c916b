use std::path::{Path, PathBuf};

use tern_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const ENV_DATABASE: &str = "TERN_DATABASE";
pub const ENV_LOG_LEVEL: &str = "TERN_LOG_LEVEL";

/// Reads `AppConfig` from YAML or TOML and layers environment overrides on top.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.tern`, falling back to the working directory when no home is set.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".tern"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.yml")
    }

    /// Parse a config file. The format is picked from the extension.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: AppConfig = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load an explicit config path, or the default path when it exists, or
    /// built-in defaults. Environment overrides are applied and the result is
    /// validated.
    pub fn resolve(explicit: Option<&Path>) -> Result<AppConfig> {
        let config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let default = Self::default_path();
                if default.is_file() {
                    Self::load(&default)?
                } else {
                    debug!("no config at {}, using defaults", default.display());
                    AppConfig::default()
                }
            }
        };

        let config = Self::apply_overrides(config, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `TERN_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(mut config: AppConfig, lookup: F) -> AppConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            debug!("{ENV_DATABASE} overrides database.path");
            config.database.path = PathBuf::from(path.trim());
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            config.logging.level = level.trim().to_string();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogFormat;
    use std::collections::HashMap;

    #[test]
    fn loads_yaml_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "database:\n  path: /var/lib/memory.db\nmigrations:\n  lock_ttl_secs: 600\nlogging:\n  format: json\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/memory.db"));
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.migrations.lock_ttl_secs, Some(600));
        assert_eq!(config.migrations.ledger_table, "_schema_migrations");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tern.toml");
        std::fs::write(
            &path,
            "[migrations]\nledger_table = \"schema_history\"\nlock_table = \"schema_lock\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.migrations.ledger_table, "schema_history");
        assert_eq!(config.migrations.lock_table, "schema_lock");
    }

    #[test]
    fn unknown_extension_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[database]").unwrap();

        let err = ConfigLoader::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("unsupported config extension: ini"));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "database: [unclosed").unwrap();

        let err = ConfigLoader::load(&path).unwrap_err();
        assert!(err.to_string().contains("YAML parse error"));
    }

    #[test]
    fn env_overrides_replace_database_and_level() {
        let vars: HashMap<&str, &str> = [
            (ENV_DATABASE, " /tmp/override.db "),
            (ENV_LOG_LEVEL, "debug"),
        ]
        .into_iter()
        .collect();

        let config = ConfigLoader::apply_overrides(AppConfig::default(), |key| {
            vars.get(key).map(|v| v.to_string())
        });
        assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config =
            ConfigLoader::apply_overrides(AppConfig::default(), |_| Some("   ".to_string()));
        assert_eq!(config, AppConfig::default());
    }
}

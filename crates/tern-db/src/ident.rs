use std::sync::LazyLock;

use regex::Regex;
use tern_common::{Error, Result, is_sql_identifier};

static MIGRATION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*(_[a-z0-9]+)*$").expect("valid name regex"));

static MIGRATION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{3,})_([a-z][a-z0-9_]*)$").expect("valid migration id regex")
});

/// Check that `name` is a plain SQL identifier and return it double-quoted.
pub fn quote(name: &str) -> Result<String> {
    if !is_sql_identifier(name) {
        return Err(Error::Config(format!("'{name}' is not a plain SQL identifier")));
    }
    Ok(format!("\"{name}\""))
}

/// Lower-snake-case slug: `add_user_preferences`.
pub fn is_migration_name(name: &str) -> bool {
    MIGRATION_NAME.is_match(name)
}

/// `007_add_user_preferences` for version 7.
pub fn format_identifier(version: u32, name: &str) -> String {
    format!("{version:03}_{name}")
}

/// Split `007_add_user_preferences` into `(7, "add_user_preferences")`.
pub fn parse_identifier(identifier: &str) -> Result<(u32, String)> {
    let malformed = || {
        Error::Config(format!(
            "malformed migration identifier '{identifier}', expected NNN_lower_snake_name"
        ))
    };

    let caps = MIGRATION_ID.captures(identifier).ok_or_else(malformed)?;
    let version: u32 = caps[1].parse().map_err(|_| malformed())?;
    let name = caps[2].to_string();
    if version == 0 || !is_migration_name(&name) {
        return Err(malformed());
    }
    if format_identifier(version, &name) != identifier {
        // Rejects over-padded prefixes like 0007_x, which would not round-trip.
        return Err(malformed());
    }
    Ok((version, name))
}

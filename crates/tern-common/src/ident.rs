use std::sync::LazyLock;

use regex::Regex;

static SQL_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Letters, digits and underscores, not starting with a digit. Anything that
/// passes can be interpolated into SQL inside double quotes.
pub fn is_sql_identifier(name: &str) -> bool {
    SQL_IDENT.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers_only() {
        assert!(is_sql_identifier("_schema_migrations"));
        assert!(is_sql_identifier("Memories2"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("9lock"));
        assert!(!is_sql_identifier("ledger; DROP TABLE t"));
        assert!(!is_sql_identifier("quoted\"name"));
    }
}

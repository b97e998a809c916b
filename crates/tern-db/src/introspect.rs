use rusqlite::{Connection, OptionalExtension, params};
use tern_common::{Error, Result};

use crate::ident;

/// Read-only questions about the live schema, answered from `sqlite_master`
/// and `pragma_table_info`.
#[derive(Clone, Copy)]
pub struct Introspector<'c> {
    conn: &'c Connection,
}

impl<'c> Introspector<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE)",
                params![table],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check table {table}: {e}")))
    }

    /// False when the table itself is missing.
    pub fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE)",
                params![table, column],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check column {table}.{column}: {e}")))
    }

    pub fn index_exists(&self, index: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1 COLLATE NOCASE)",
                params![index],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check index {index}: {e}")))
    }

    /// Declared type of a column, upper-cased (`TEXT`, `INTEGER`, `BLOB`, ...).
    pub fn column_type(&self, table: &str, column: &str) -> Result<Option<String>> {
        let declared: Option<String> = self
            .conn
            .query_row(
                "SELECT type FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
                params![table, column],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| {
                Error::Database(format!("failed to read type of {table}.{column}: {e}"))
            })?;
        Ok(declared.map(|t| t.to_ascii_uppercase()))
    }

    /// Table an index is defined on.
    pub fn index_table(&self, index: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT tbl_name FROM sqlite_master WHERE type = 'index' AND name = ?1 COLLATE NOCASE",
                params![index],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read index {index}: {e}")))
    }

    pub fn row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", ident::quote(table)?);
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to count rows in {table}: {e}")))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;

    fn fixture() -> Connection {
        let conn = connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, body text NOT NULL);
             CREATE INDEX idx_t_body ON t(body);
             INSERT INTO t (body) VALUES ('a'), ('b');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn answers_table_column_and_index_questions() {
        let conn = fixture();
        let schema = Introspector::new(&conn);

        assert!(schema.table_exists("t").unwrap());
        assert!(!schema.table_exists("missing").unwrap());
        assert!(schema.column_exists("t", "body").unwrap());
        assert!(!schema.column_exists("t", "nope").unwrap());
        assert!(!schema.column_exists("missing", "body").unwrap());
        assert!(schema.index_exists("idx_t_body").unwrap());
        assert!(!schema.index_exists("idx_missing").unwrap());
    }

    #[test]
    fn tables_and_indexes_do_not_shadow_each_other() {
        let conn = fixture();
        let schema = Introspector::new(&conn);
        assert!(!schema.index_exists("t").unwrap());
        assert!(!schema.table_exists("idx_t_body").unwrap());
    }

    #[test]
    fn reports_column_types_and_index_tables() {
        let conn = fixture();
        let schema = Introspector::new(&conn);

        assert_eq!(schema.column_type("t", "body").unwrap().as_deref(), Some("TEXT"));
        assert_eq!(schema.column_type("t", "nope").unwrap(), None);
        assert_eq!(schema.index_table("idx_t_body").unwrap().as_deref(), Some("t"));
        assert_eq!(schema.index_table("idx_missing").unwrap(), None);
    }

    #[test]
    fn names_match_regardless_of_case() {
        let conn = fixture();
        let schema = Introspector::new(&conn);

        assert!(schema.table_exists("T").unwrap());
        assert!(schema.column_exists("t", "BODY").unwrap());
        assert!(schema.column_exists("T", "Id").unwrap());
        assert!(schema.index_exists("IDX_T_Body").unwrap());
        assert_eq!(schema.column_type("T", "Body").unwrap().as_deref(), Some("TEXT"));
        assert_eq!(schema.index_table("Idx_T_Body").unwrap().as_deref(), Some("t"));
    }

    #[test]
    fn counts_rows() {
        let conn = fixture();
        let schema = Introspector::new(&conn);
        assert_eq!(schema.row_count("t").unwrap(), 2);
        assert!(schema.row_count("t; DELETE FROM t").is_err());
    }
}

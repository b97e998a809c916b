use rusqlite::Connection;
use tern_common::{Error, Result};
use tracing::{debug, info};

use crate::ident;
use crate::introspect::Introspector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Statements run against the database.
    Execute,
    /// Statements are only recorded; the database is never written.
    Describe,
}

/// Handle passed to `Migration::apply` and `Migration::revert`.
///
/// Every DDL helper checks the current schema first and turns an
/// already-satisfied change into a logged no-op, so a migration built from
/// them can be re-run after a crash part way through. In `Describe` mode the
/// same checks run (they are reads) and the statements that would execute
/// are collected instead.
pub struct MigrationContext<'c> {
    conn: &'c Connection,
    mode: ExecMode,
    statements: Vec<String>,
}

impl<'c> MigrationContext<'c> {
    pub fn new(conn: &'c Connection, mode: ExecMode) -> Self {
        Self {
            conn,
            mode,
            statements: Vec::new(),
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn schema(&self) -> Introspector<'c> {
        Introspector::new(self.conn)
    }

    /// Statements executed (or, in describe mode, that would be executed).
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }

    /// Run a raw statement. Callers are responsible for its idempotency.
    pub fn execute(&mut self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        if self.mode == ExecMode::Execute {
            debug!("executing: {sql}");
            self.conn
                .execute_batch(&sql)
                .map_err(|e| Error::Database(format!("{e} (statement: {sql})")))?;
        }
        self.statements.push(sql);
        Ok(())
    }

    /// `CREATE TABLE` unless the table is already there. `columns` is the
    /// body between the parentheses.
    pub fn create_table(&mut self, table: &str, columns: &str) -> Result<()> {
        if self.schema().table_exists(table)? {
            info!("table {table} already exists, skipping CREATE TABLE");
            return Ok(());
        }
        self.execute(format!("CREATE TABLE {} ({columns})", ident::quote(table)?))
    }

    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        if !self.schema().table_exists(table)? {
            info!("table {table} not present, skipping DROP TABLE");
            return Ok(());
        }
        self.execute(format!("DROP TABLE {}", ident::quote(table)?))
    }

    /// `ALTER TABLE .. ADD COLUMN` unless the column is already there.
    /// `definition` is the type and constraints, e.g. `TEXT NOT NULL DEFAULT ''`.
    pub fn add_column(&mut self, table: &str, column: &str, definition: &str) -> Result<()> {
        if self.schema().column_exists(table, column)? {
            info!("column {table}.{column} already exists, skipping ADD COLUMN");
            return Ok(());
        }
        self.execute(format!(
            "ALTER TABLE {} ADD COLUMN {} {definition}",
            ident::quote(table)?,
            ident::quote(column)?
        ))
    }

    pub fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        if !self.schema().column_exists(table, column)? {
            info!("column {table}.{column} not present, skipping DROP COLUMN");
            return Ok(());
        }
        self.execute(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            ident::quote(table)?,
            ident::quote(column)?
        ))
    }

    pub fn create_index(
        &mut self,
        index: &str,
        table: &str,
        columns: &[&str],
        unique: bool,
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::Config(format!("index {index} has no columns")));
        }
        if self.schema().index_exists(index)? {
            info!("index {index} already exists, skipping CREATE INDEX");
            return Ok(());
        }
        let quoted = columns
            .iter()
            .map(|c| ident::quote(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        self.execute(format!(
            "CREATE {}INDEX {} ON {} ({quoted})",
            if unique { "UNIQUE " } else { "" },
            ident::quote(index)?,
            ident::quote(table)?
        ))
    }

    pub fn drop_index(&mut self, index: &str) -> Result<()> {
        if !self.schema().index_exists(index)? {
            info!("index {index} not present, skipping DROP INDEX");
            return Ok(());
        }
        self.execute(format!("DROP INDEX {}", ident::quote(index)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;

    fn fixture() -> Connection {
        let conn = connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        conn
    }

    #[test]
    fn add_column_is_idempotent() {
        let conn = fixture();
        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);

        ctx.add_column("t", "b", "TEXT").unwrap();
        ctx.add_column("t", "b", "TEXT").unwrap();

        assert_eq!(ctx.statements(), ["ALTER TABLE \"t\" ADD COLUMN \"b\" TEXT"]);
        assert!(ctx.schema().column_exists("t", "b").unwrap());
    }

    #[test]
    fn existing_objects_under_another_case_are_skipped() {
        let conn = fixture();
        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);
        ctx.create_index("idx_t_id", "t", &["id"], false).unwrap();

        ctx.create_table("T", "id INTEGER PRIMARY KEY").unwrap();
        ctx.add_column("t", "ID", "INTEGER").unwrap();
        ctx.create_index("IDX_T_ID", "T", &["id"], false).unwrap();

        assert_eq!(ctx.statements().len(), 1);
    }

    #[test]
    fn drops_tolerate_missing_objects() {
        let conn = fixture();
        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);

        ctx.drop_column("t", "never_added").unwrap();
        ctx.drop_index("idx_never_created").unwrap();
        ctx.drop_table("never_created").unwrap();
        assert!(ctx.statements().is_empty());
    }

    #[test]
    fn index_round_trip() {
        let conn = fixture();
        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);
        ctx.add_column("t", "a", "TEXT").unwrap();

        ctx.create_index("idx_a", "t", &["a"], true).unwrap();
        assert!(ctx.schema().index_exists("idx_a").unwrap());
        ctx.create_index("idx_a", "t", &["a"], true).unwrap();

        ctx.drop_index("idx_a").unwrap();
        assert!(!ctx.schema().index_exists("idx_a").unwrap());
        assert_eq!(ctx.statements().len(), 3);
        assert_eq!(ctx.statements()[1], "CREATE UNIQUE INDEX \"idx_a\" ON \"t\" (\"a\")");
    }

    #[test]
    fn describe_mode_records_without_executing() {
        let conn = fixture();
        let mut ctx = MigrationContext::new(&conn, ExecMode::Describe);

        ctx.create_table("notes", "id INTEGER PRIMARY KEY, body TEXT").unwrap();
        ctx.add_column("t", "b", "TEXT").unwrap();
        ctx.execute("UPDATE t SET b = 'x'").unwrap();

        assert_eq!(ctx.statements().len(), 3);
        assert!(!ctx.schema().table_exists("notes").unwrap());
        assert!(!ctx.schema().column_exists("t", "b").unwrap());
    }

    #[test]
    fn execution_failure_carries_sql_error() {
        let conn = fixture();
        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);

        let err = ctx.execute("ALTER TABLE missing ADD COLUMN x TEXT").unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.to_string().contains("no such table"));
        assert!(ctx.statements().is_empty());
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let conn = fixture();
        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);
        assert!(ctx.add_column("t", "b TEXT; DROP TABLE t; --", "TEXT").is_err());
        assert!(ctx.create_index("idx", "t", &[], false).is_err());
    }
}

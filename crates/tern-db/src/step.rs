use rusqlite::Connection;
use tern_common::Result;

use crate::context::MigrationContext;
use crate::introspect::Introspector;
use crate::migration::{Migration, Verification};

/// One structured schema change. Names are passed as data so existence
/// checks and verification never have to read SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStep {
    CreateTable {
        table: &'static str,
        columns: &'static str,
    },
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
    CreateIndex {
        name: &'static str,
        table: &'static str,
        columns: &'static [&'static str],
        unique: bool,
    },
}

impl SchemaStep {
    fn apply(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        match *self {
            SchemaStep::CreateTable { table, columns } => ctx.create_table(table, columns),
            SchemaStep::AddColumn {
                table,
                column,
                definition,
            } => ctx.add_column(table, column, definition),
            SchemaStep::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => ctx.create_index(name, table, columns, unique),
        }
    }

    fn revert(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        match *self {
            SchemaStep::CreateTable { table, .. } => ctx.drop_table(table),
            SchemaStep::AddColumn { table, column, .. } => ctx.drop_column(table, column),
            SchemaStep::CreateIndex { name, .. } => ctx.drop_index(name),
        }
    }

    fn verify(&self, schema: &Introspector<'_>) -> Result<Verification> {
        let check = match *self {
            SchemaStep::CreateTable { table, .. } => {
                if schema.table_exists(table)? {
                    Verification::passed(format!("table {table} present"))
                } else {
                    Verification::failed(format!("table {table} missing"))
                }
            }
            SchemaStep::AddColumn {
                table,
                column,
                definition,
            } => {
                let expected = declared_type(definition);
                match schema.column_type(table, column)? {
                    None => Verification::failed(format!("column {table}.{column} missing")),
                    Some(actual) if actual != expected => Verification::failed(format!(
                        "column {table}.{column} has type {actual}, expected {expected}"
                    )),
                    Some(_) => Verification::passed(format!("column {table}.{column} present")),
                }
            }
            SchemaStep::CreateIndex { name, table, .. } => match schema.index_table(name)? {
                None => Verification::failed(format!("index {name} missing")),
                Some(on) if !on.eq_ignore_ascii_case(table) => Verification::failed(format!(
                    "index {name} is on {on}, expected {table}"
                )),
                Some(_) => Verification::passed(format!("index {name} present")),
            },
        };
        Ok(check)
    }
}

/// The type keyword at the front of a column definition, the way SQLite
/// stores it in `pragma_table_info` (`TEXT NOT NULL DEFAULT ''` -> `TEXT`,
/// `VARCHAR(64)` -> `VARCHAR(64)`).
fn declared_type(definition: &str) -> String {
    const CONSTRAINTS: [&str; 9] = [
        "NOT", "NULL", "DEFAULT", "PRIMARY", "UNIQUE", "CHECK", "REFERENCES", "COLLATE",
        "GENERATED",
    ];
    definition
        .split_whitespace()
        .take_while(|word| !CONSTRAINTS.contains(&word.to_ascii_uppercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

/// A migration made of `SchemaStep`s. Apply runs the steps in order, revert
/// undoes them in reverse order, and verify checks each step's end state.
pub struct StepMigration {
    pub version: u32,
    pub name: &'static str,
    pub description: &'static str,
    pub steps: &'static [SchemaStep],
}

impl Migration for StepMigration {
    fn version(&self) -> u32 {
        self.version
    }

    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn apply(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        for step in self.steps {
            step.apply(ctx)?;
        }
        Ok(())
    }

    fn revert(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        for step in self.steps.iter().rev() {
            step.revert(ctx)?;
        }
        Ok(())
    }

    fn verify(&self, conn: &Connection) -> Result<Verification> {
        let schema = Introspector::new(conn);
        let checks = self
            .steps
            .iter()
            .map(|step| step.verify(&schema))
            .collect::<Result<Vec<_>>>()?;
        Ok(Verification::all(checks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;
    use crate::context::ExecMode;

    const NOTES: StepMigration = StepMigration {
        version: 3,
        name: "create_notes",
        description: "notes table with a pinned flag",
        steps: &[
            SchemaStep::CreateTable {
                table: "notes",
                columns: "id INTEGER PRIMARY KEY, body TEXT NOT NULL",
            },
            SchemaStep::AddColumn {
                table: "notes",
                column: "pinned",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            SchemaStep::CreateIndex {
                name: "idx_notes_pinned",
                table: "notes",
                columns: &["pinned", "id"],
                unique: false,
            },
        ],
    };

    fn snapshot(conn: &Connection) -> (bool, bool, bool) {
        let schema = Introspector::new(conn);
        (
            schema.table_exists("notes").unwrap(),
            schema.column_exists("notes", "pinned").unwrap(),
            schema.index_exists("idx_notes_pinned").unwrap(),
        )
    }

    #[test]
    fn declared_type_strips_constraints() {
        assert_eq!(declared_type("TEXT NOT NULL DEFAULT ''"), "TEXT");
        assert_eq!(declared_type("integer default 0"), "INTEGER");
        assert_eq!(declared_type("VARCHAR(64) UNIQUE"), "VARCHAR(64)");
        assert_eq!(declared_type("DOUBLE PRECISION"), "DOUBLE PRECISION");
        assert_eq!(declared_type("REFERENCES users(id)"), "");
    }

    #[test]
    fn apply_verify_revert_cycle() {
        let conn = connection::open_in_memory().unwrap();
        assert_eq!(snapshot(&conn), (false, false, false));
        assert!(!NOTES.verify(&conn).unwrap().passed);

        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);
        NOTES.apply(&mut ctx).unwrap();
        assert_eq!(ctx.statements().len(), 3);
        assert_eq!(snapshot(&conn), (true, true, true));
        assert!(NOTES.verify(&conn).unwrap().passed);

        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);
        NOTES.revert(&mut ctx).unwrap();
        assert_eq!(snapshot(&conn), (false, false, false));
    }

    #[test]
    fn apply_resumes_after_partial_run() {
        let conn = connection::open_in_memory().unwrap();
        // Simulate a crash after the first statement.
        conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)")
            .unwrap();

        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);
        NOTES.apply(&mut ctx).unwrap();
        assert_eq!(ctx.statements().len(), 2);
        assert!(NOTES.verify(&conn).unwrap().passed);
    }

    #[test]
    fn revert_tolerates_partial_apply() {
        let conn = connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)")
            .unwrap();

        let mut ctx = MigrationContext::new(&conn, ExecMode::Execute);
        NOTES.revert(&mut ctx).unwrap();
        assert_eq!(ctx.statements(), ["DROP TABLE \"notes\""]);
        assert_eq!(snapshot(&conn), (false, false, false));
    }

    #[test]
    fn verify_catches_wrong_column_type() {
        let conn = connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL, pinned TEXT);
             CREATE INDEX idx_notes_pinned ON notes(pinned, id);",
        )
        .unwrap();

        let result = NOTES.verify(&conn).unwrap();
        assert!(!result.passed);
        assert!(result.message.contains("has type TEXT, expected INTEGER"));
    }

    #[test]
    fn identity_uses_padded_identifier() {
        assert_eq!(NOTES.identifier(), "003_create_notes");
        assert_eq!(NOTES.description(), "notes table with a pinned flag");
    }
}

//! Migrations for the memory service database.
//!
//! Order here is the order of application. New migrations go at the end with
//! the next version number; shipped ones are never edited.

use rusqlite::Connection;
use tern_common::{Error, Result};
use tern_db::{
    Introspector, Migration, MigrationContext, Registry, SchemaStep, StepMigration, Verification,
};

const CREATE_MEMORIES: StepMigration = StepMigration {
    version: 1,
    name: "create_memories",
    description: "Memories table with type and creation-time index",
    steps: &[
        SchemaStep::CreateTable {
            table: "memories",
            columns: "id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                memory_type TEXT NOT NULL DEFAULT 'MEMORY',
                importance INTEGER NOT NULL DEFAULT 2,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))",
        },
        SchemaStep::CreateIndex {
            name: "idx_memories_type_created",
            table: "memories",
            columns: &["memory_type", "created_at"],
            unique: false,
        },
    ],
};

const CREATE_ENTITIES: StepMigration = StepMigration {
    version: 2,
    name: "create_entities",
    description: "Named entities and their links to memories",
    steps: &[
        SchemaStep::CreateTable {
            table: "entities",
            columns: "id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                entity_type TEXT NOT NULL,
                observations TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))",
        },
        SchemaStep::CreateTable {
            table: "memory_entities",
            columns: "memory_id INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                PRIMARY KEY (memory_id, entity_id)",
        },
        SchemaStep::CreateIndex {
            name: "idx_memory_entities_entity",
            table: "memory_entities",
            columns: &["entity_id"],
            unique: false,
        },
    ],
};

const ADD_MEMORY_TAGS: StepMigration = StepMigration {
    version: 3,
    name: "add_memory_tags",
    description: "JSON tag list on memories",
    steps: &[SchemaStep::AddColumn {
        table: "memories",
        column: "tags",
        definition: "TEXT NOT NULL DEFAULT '[]'",
    }],
};

const ADD_MEMORY_EMBEDDINGS: StepMigration = StepMigration {
    version: 4,
    name: "add_memory_embeddings",
    description: "Embedding vector, model and dimensions on memories",
    steps: &[
        SchemaStep::AddColumn {
            table: "memories",
            column: "embedding",
            definition: "BLOB",
        },
        SchemaStep::AddColumn {
            table: "memories",
            column: "embedding_model",
            definition: "TEXT",
        },
        SchemaStep::AddColumn {
            table: "memories",
            column: "embedding_dimensions",
            definition: "INTEGER",
        },
        SchemaStep::CreateIndex {
            name: "idx_memories_embedding_model",
            table: "memories",
            columns: &["embedding_model"],
            unique: false,
        },
    ],
};

const DEFAULT_USER: &str = "default";

/// Per-user preferences, plus an owner on every memory. Existing memories
/// are backfilled to the default user, which also gets a preferences row.
struct AddUserPreferences;

impl Migration for AddUserPreferences {
    fn version(&self) -> u32 {
        5
    }

    fn name(&self) -> &str {
        "add_user_preferences"
    }

    fn description(&self) -> &str {
        "User preferences table and memories.user_id with backfill"
    }

    fn apply(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        ctx.create_table(
            "user_preferences",
            "user_id TEXT PRIMARY KEY,
                preferences TEXT NOT NULL DEFAULT '{}',
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))",
        )?;
        ctx.add_column("memories", "user_id", "TEXT")?;
        // Both statements only touch rows that still need it, so re-running is harmless.
        ctx.execute(format!(
            "UPDATE memories SET user_id = '{DEFAULT_USER}' WHERE user_id IS NULL"
        ))?;
        ctx.execute(format!(
            "INSERT OR IGNORE INTO user_preferences (user_id) VALUES ('{DEFAULT_USER}')"
        ))?;
        ctx.create_index("idx_memories_user", "memories", &["user_id"], false)
    }

    fn revert(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        ctx.drop_index("idx_memories_user")?;
        ctx.drop_column("memories", "user_id")?;
        ctx.drop_table("user_preferences")
    }

    fn verify(&self, conn: &Connection) -> Result<Verification> {
        let schema = Introspector::new(conn);

        let table = if schema.table_exists("user_preferences")? {
            Verification::passed("table user_preferences present")
        } else {
            // Nothing below can be checked without the table.
            return Ok(Verification::failed("table user_preferences missing"));
        };

        let column = match schema.column_type("memories", "user_id")? {
            Some(kind) if kind == "TEXT" => Verification::passed("column memories.user_id present"),
            Some(kind) => Verification::failed(format!(
                "column memories.user_id has type {kind}, expected TEXT"
            )),
            None => return Ok(Verification::failed("column memories.user_id missing")),
        };

        let index = match schema.index_table("idx_memories_user")? {
            Some(on) if on.eq_ignore_ascii_case("memories") => {
                Verification::passed("index idx_memories_user present")
            }
            _ => Verification::failed("index idx_memories_user missing"),
        };

        let unowned: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE user_id IS NULL",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to count unowned memories: {e}")))?;
        let backfill = if unowned == 0 {
            Verification::passed("every memory has an owner")
        } else {
            Verification::failed(format!("{unowned} memories have no user_id"))
        };

        let default_prefs: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM user_preferences WHERE user_id = ?1",
                [DEFAULT_USER],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to read user_preferences: {e}")))?;
        let seed = if default_prefs == 1 {
            Verification::passed("default user preferences present")
        } else {
            Verification::failed("default user preferences missing")
        };

        Ok(Verification::all([table, column, index, backfill, seed]))
    }
}

/// The memory service registry, oldest first.
pub fn registry() -> Result<Registry> {
    Registry::builder()
        .add(CREATE_MEMORIES)
        .add(CREATE_ENTITIES)
        .add(ADD_MEMORY_TAGS)
        .add(ADD_MEMORY_EMBEDDINGS)
        .add(AddUserPreferences)
        .build()
}

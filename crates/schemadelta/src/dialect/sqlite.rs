//! SQLite dialect for migrations.
//!
//! SQLite has limited ALTER TABLE support: column types, nullability,
//! defaults and foreign keys can only be changed by recreating the table.
//! Those changes are emitted as comments so the script stays executable
//! and the reviewer sees what still has to be done by hand.

use crate::operations::ChangeKind;
use crate::types::{ColumnType, TypeCategory};

use super::MigrationDialect;

/// SQLite migration dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn recreation_note(&self, what: &str, table: &str, detail: &str) -> String {
        format!(
            "-- {} not directly supported in SQLite. Table recreation required for: {} ({})",
            what, table, detail
        )
    }
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn generate_sql(&self, change: &ChangeKind) -> Vec<String> {
        match change {
            ChangeKind::AddTable { table } => vec![self.create_table_sql(table)],

            ChangeKind::DropTable { table } => {
                vec![format!("DROP TABLE {}", self.quote_identifier(&table.name))]
            }

            ChangeKind::RenameTable { from, to, .. } => vec![format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote_identifier(from),
                self.quote_identifier(to)
            )],

            ChangeKind::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote_identifier(table),
                self.column_definition(column)
            )],

            // SQLite 3.35.0+
            ChangeKind::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_identifier(table),
                self.quote_identifier(&column.name)
            )],

            // SQLite 3.25.0+
            ChangeKind::RenameColumn {
                table, from, to, ..
            } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote_identifier(table),
                self.quote_identifier(from),
                self.quote_identifier(to)
            )],

            ChangeKind::AlterColumnType { table, column, .. }
            | ChangeKind::AlterColumnNullability { table, column, .. }
            | ChangeKind::AlterDefault { table, column, .. } => vec![self.recreation_note(
                "ALTER COLUMN",
                table,
                &format!("{} {}", column, change.detail()),
            )],

            ChangeKind::AddForeignKey { table, foreign_key } => vec![self.recreation_note(
                "ADD CONSTRAINT",
                table,
                &foreign_key.name,
            )],

            ChangeKind::DropForeignKey { table, foreign_key } => vec![self.recreation_note(
                "DROP CONSTRAINT",
                table,
                &foreign_key.name,
            )],

            // Unique constraints added after creation are unique indexes;
            // inline ones are sqlite_autoindex_* and cannot be dropped.
            ChangeKind::AddUniqueConstraint { table, constraint } => vec![format!(
                "CREATE UNIQUE INDEX {} ON {} ({})",
                self.quote_identifier(&constraint.name),
                self.quote_identifier(table),
                self.quote_list(&constraint.columns)
            )],

            ChangeKind::DropUniqueConstraint { table, constraint } => vec![
                format!(
                    "DROP INDEX IF EXISTS {}",
                    self.quote_identifier(&constraint.name)
                ),
                self.recreation_note(
                    "DROP CONSTRAINT",
                    table,
                    &format!("{} when declared in CREATE TABLE", constraint.name),
                ),
            ],
        }
    }

    fn type_name(&self, column_type: &ColumnType) -> String {
        match column_type.category {
            TypeCategory::Integer | TypeCategory::Boolean => "INTEGER".to_string(),
            TypeCategory::Text | TypeCategory::Datetime => "TEXT".to_string(),
            TypeCategory::Decimal => match column_type.base.as_str() {
                "REAL" | "DOUBLE" | "FLOAT" => "REAL".to_string(),
                _ => "NUMERIC".to_string(),
            },
            TypeCategory::Binary => "BLOB".to_string(),
            TypeCategory::Other => match column_type.base.as_str() {
                "JSON" | "JSONB" | "UUID" | "UNIQUEIDENTIFIER" | "XML" => "TEXT".to_string(),
                _ => column_type.canonical(),
            },
        }
    }
}

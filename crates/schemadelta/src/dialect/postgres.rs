//! PostgreSQL dialect.

use crate::operations::ChangeKind;
use crate::schema::UniqueConstraint;
use crate::types::{ColumnType, TypeCategory};

use super::MigrationDialect;

/// PostgreSQL migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn alter_column(&self, table: &str, column: &str, action: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.quote_identifier(table),
            self.quote_identifier(column),
            action
        )
    }

    /// Type name usable in `ALTER COLUMN ... TYPE`, where the serial
    /// pseudo-types are not accepted.
    fn alter_type_name(&self, column_type: &ColumnType) -> String {
        match self.type_name(column_type).as_str() {
            "SMALLSERIAL" => "SMALLINT".to_string(),
            "SERIAL" => "INTEGER".to_string(),
            "BIGSERIAL" => "BIGINT".to_string(),
            other => other.to_string(),
        }
    }

    fn add_unique_sql(&self, table: &str, constraint: &UniqueConstraint) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            self.quote_identifier(table),
            self.quote_identifier(&constraint.name),
            self.quote_list(&constraint.columns)
        )
    }

    fn drop_constraint_sql(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        )
    }
}

fn with_length(name: &str, length: Option<u32>) -> String {
    match length {
        Some(n) => format!("{}({})", name, n),
        None => name.to_string(),
    }
}

impl MigrationDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
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

            ChangeKind::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_identifier(table),
                self.quote_identifier(&column.name)
            )],

            ChangeKind::RenameColumn {
                table, from, to, ..
            } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote_identifier(table),
                self.quote_identifier(from),
                self.quote_identifier(to)
            )],

            ChangeKind::AlterColumnType {
                table, column, to, ..
            } => {
                let type_name = self.alter_type_name(to);
                let action = format!(
                    "TYPE {} USING {}::{}",
                    type_name,
                    self.quote_identifier(column),
                    type_name
                );
                vec![self.alter_column(table, column, &action)]
            }

            ChangeKind::AlterColumnNullability {
                table, column, to, ..
            } => {
                let action = if *to { "DROP NOT NULL" } else { "SET NOT NULL" };
                vec![self.alter_column(table, column, action)]
            }

            ChangeKind::AlterDefault {
                table, column, to, ..
            } => {
                let action = match to {
                    Some(value) => format!("SET DEFAULT {}", value),
                    None => "DROP DEFAULT".to_string(),
                };
                vec![self.alter_column(table, column, &action)]
            }

            ChangeKind::AddForeignKey { table, foreign_key } => vec![format!(
                "ALTER TABLE {} ADD {}",
                self.quote_identifier(table),
                self.foreign_key_clause(foreign_key)
            )],

            ChangeKind::DropForeignKey { table, foreign_key } => {
                vec![self.drop_constraint_sql(table, &foreign_key.name)]
            }

            ChangeKind::AddUniqueConstraint { table, constraint } => {
                vec![self.add_unique_sql(table, constraint)]
            }

            ChangeKind::DropUniqueConstraint { table, constraint } => {
                vec![self.drop_constraint_sql(table, &constraint.name)]
            }
        }
    }

    fn type_name(&self, column_type: &ColumnType) -> String {
        let base = column_type.base.as_str();
        match column_type.category {
            TypeCategory::Integer => match base {
                "TINYINT" | "SMALLINT" => "SMALLINT".to_string(),
                "BIGINT" => "BIGINT".to_string(),
                "SERIAL" | "BIGSERIAL" | "SMALLSERIAL" => base.to_string(),
                _ => "INTEGER".to_string(),
            },
            TypeCategory::Text => match base {
                "CHAR" | "NCHAR" | "BPCHAR" => with_length("CHAR", column_type.length),
                "CITEXT" => "CITEXT".to_string(),
                _ if column_type.length.is_some() => with_length("VARCHAR", column_type.length),
                _ => "TEXT".to_string(),
            },
            TypeCategory::Decimal => match base {
                "REAL" => "REAL".to_string(),
                "DOUBLE" => "DOUBLE PRECISION".to_string(),
                "FLOAT" => match column_type.precision {
                    Some(p) if p <= 24 => "REAL".to_string(),
                    _ => "DOUBLE PRECISION".to_string(),
                },
                "MONEY" | "SMALLMONEY" => "NUMERIC(19,4)".to_string(),
                _ => match (column_type.precision, column_type.scale) {
                    (Some(p), Some(s)) => format!("NUMERIC({},{})", p, s),
                    (Some(p), None) => format!("NUMERIC({})", p),
                    _ => "NUMERIC".to_string(),
                },
            },
            TypeCategory::Datetime => match base {
                "DATE" => "DATE".to_string(),
                "TIME" => with_length("TIME", column_type.precision),
                "TIMETZ" => with_length("TIMETZ", column_type.precision),
                "TIMESTAMPTZ" | "DATETIMEOFFSET" => {
                    with_length("TIMESTAMPTZ", column_type.precision)
                }
                _ => with_length("TIMESTAMP", column_type.precision),
            },
            TypeCategory::Boolean => "BOOLEAN".to_string(),
            TypeCategory::Binary => "BYTEA".to_string(),
            TypeCategory::Other => match base {
                "UNIQUEIDENTIFIER" => "UUID".to_string(),
                "XML" => "XML".to_string(),
                _ => column_type.canonical(),
            },
        }
    }
}

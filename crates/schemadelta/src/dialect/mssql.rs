//! SQL Server (T-SQL) dialect.
//!
//! Renames go through `sp_rename`, `ALTER COLUMN` restates the full column
//! type and nullability, and defaults are named constraints
//! (`df_<table>_<column>`) that must be dropped before the column can be
//! altered or removed. A type change on a defaulted column drops the default
//! and restores it afterwards.

use crate::operations::ChangeKind;
use crate::schema::{ColumnSpec, TableSpec};
use crate::types::{ColumnType, TypeCategory};

use super::MigrationDialect;

/// SQL Server migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Creates a new SQL Server dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Name given to the default constraint of a column.
    fn default_name(table: &str, column: &str) -> String {
        let part = |s: &str| -> String {
            s.trim()
                .to_lowercase()
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { '_' })
                .collect()
        };
        format!("df_{}_{}", part(table), part(column))
    }

    fn literal(value: &str) -> String {
        format!("N'{}'", value.replace('\'', "''"))
    }

    fn column_sql(&self, table: &str, column: &ColumnSpec) -> String {
        let mut sql = format!(
            "{} {} {}",
            self.quote_identifier(&column.name),
            self.type_name(&column.column_type),
            if column.nullable { "NULL" } else { "NOT NULL" }
        );
        if let Some(default) = &column.default {
            sql.push_str(&format!(
                " CONSTRAINT {} DEFAULT {}",
                self.quote_identifier(&Self::default_name(table, &column.name)),
                default
            ));
        }
        sql
    }

    /// Drops whatever default constraint the column currently has,
    /// whatever it happens to be called.
    fn drop_default_sql(&self, table: &str, column: &str) -> String {
        format!(
            "DECLARE @df sysname = (SELECT dc.name FROM sys.default_constraints dc \
             JOIN sys.columns c ON c.object_id = dc.parent_object_id AND c.column_id = dc.parent_column_id \
             WHERE dc.parent_object_id = OBJECT_ID({}) AND c.name = {}); \
             IF @df IS NOT NULL EXEC(N'ALTER TABLE {} DROP CONSTRAINT [' + @df + N']')",
            Self::literal(&self.quote_identifier(table)),
            Self::literal(column),
            self.quote_identifier(table).replace('\'', "''")
        )
    }

    fn add_default_sql(&self, table: &str, column: &str, value: &str) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT {} FOR {}",
            self.quote_identifier(table),
            self.quote_identifier(&Self::default_name(table, column)),
            value,
            self.quote_identifier(column)
        )
    }

    fn alter_column_sql(
        &self,
        table: &str,
        column: &str,
        column_type: &ColumnType,
        nullable: bool,
    ) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {}",
            self.quote_identifier(table),
            self.quote_identifier(column),
            self.type_name(column_type),
            if nullable { "NULL" } else { "NOT NULL" }
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

fn sized(name: &str, length: Option<u32>) -> String {
    match length {
        Some(n) => format!("{}({})", name, n),
        None => format!("{}(MAX)", name),
    }
}

impl MigrationDialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn batch_separator(&self) -> Option<&'static str> {
        Some("GO")
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn create_table_sql(&self, table: &TableSpec) -> String {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_sql(&table.name, c))
            .collect();
        if !table.primary_key.is_empty() {
            lines.push(format!("PRIMARY KEY ({})", self.quote_list(&table.primary_key)));
        }
        for uc in &table.unique_constraints {
            lines.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                self.quote_identifier(&uc.name),
                self.quote_list(&uc.columns)
            ));
        }
        for fk in &table.foreign_keys {
            lines.push(self.foreign_key_clause(fk));
        }
        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(&table.name),
            lines.join(",\n  ")
        )
    }

    fn generate_sql(&self, change: &ChangeKind) -> Vec<String> {
        match change {
            ChangeKind::AddTable { table } => vec![self.create_table_sql(table)],

            ChangeKind::DropTable { table } => {
                vec![format!("DROP TABLE {}", self.quote_identifier(&table.name))]
            }

            ChangeKind::RenameTable { from, to, .. } => vec![format!(
                "EXEC sp_rename {}, {}",
                Self::literal(from),
                Self::literal(to)
            )],

            ChangeKind::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD {}",
                self.quote_identifier(table),
                self.column_sql(table, column)
            )],

            ChangeKind::DropColumn { table, column } => {
                let mut statements = Vec::new();
                if column.default.is_some() {
                    statements.push(self.drop_default_sql(table, &column.name));
                }
                statements.push(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    self.quote_identifier(table),
                    self.quote_identifier(&column.name)
                ));
                statements
            }

            ChangeKind::RenameColumn {
                table, from, to, ..
            } => vec![format!(
                "EXEC sp_rename {}, {}, N'COLUMN'",
                Self::literal(&format!("{}.{}", table, from)),
                Self::literal(to)
            )],

            ChangeKind::AlterColumnType {
                table,
                column,
                to,
                nullable,
                default,
                ..
            } => {
                let alter = self.alter_column_sql(table, column, to, *nullable);
                match default {
                    Some(value) => vec![
                        self.drop_default_sql(table, column),
                        alter,
                        self.add_default_sql(table, column, value),
                    ],
                    None => vec![alter],
                }
            }

            ChangeKind::AlterColumnNullability {
                table,
                column,
                column_type,
                to,
                ..
            } => vec![self.alter_column_sql(table, column, column_type, *to)],

            ChangeKind::AlterDefault {
                table,
                column,
                from,
                to,
            } => {
                let mut statements = Vec::new();
                if from.is_some() {
                    statements.push(self.drop_default_sql(table, column));
                }
                if let Some(value) = to {
                    statements.push(self.add_default_sql(table, column, value));
                }
                statements
            }

            ChangeKind::AddForeignKey { table, foreign_key } => vec![format!(
                "ALTER TABLE {} ADD {}",
                self.quote_identifier(table),
                self.foreign_key_clause(foreign_key)
            )],

            ChangeKind::DropForeignKey { table, foreign_key } => {
                vec![self.drop_constraint_sql(table, &foreign_key.name)]
            }

            ChangeKind::AddUniqueConstraint { table, constraint } => vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                self.quote_identifier(table),
                self.quote_identifier(&constraint.name),
                self.quote_list(&constraint.columns)
            )],

            ChangeKind::DropUniqueConstraint { table, constraint } => {
                vec![self.drop_constraint_sql(table, &constraint.name)]
            }
        }
    }

    fn type_name(&self, column_type: &ColumnType) -> String {
        let base = column_type.base.as_str();
        match column_type.category {
            TypeCategory::Integer => match base {
                "TINYINT" | "SMALLINT" | "BIGINT" => base.to_string(),
                "SMALLSERIAL" => "SMALLINT".to_string(),
                "BIGSERIAL" => "BIGINT".to_string(),
                _ => "INT".to_string(),
            },
            TypeCategory::Text => match base {
                "CHAR" | "BPCHAR" => sized("CHAR", column_type.length.or(Some(1))),
                "NCHAR" => sized("NCHAR", column_type.length.or(Some(1))),
                "NVARCHAR" | "NVARCHAR2" | "NTEXT" | "NCLOB" => {
                    sized("NVARCHAR", column_type.length)
                }
                _ => sized("VARCHAR", column_type.length),
            },
            TypeCategory::Decimal => match base {
                "REAL" => "REAL".to_string(),
                "DOUBLE" | "FLOAT" => "FLOAT".to_string(),
                "MONEY" | "SMALLMONEY" => base.to_string(),
                _ => match (column_type.precision, column_type.scale) {
                    (Some(p), Some(s)) => format!("DECIMAL({},{})", p, s),
                    (Some(p), None) => format!("DECIMAL({})", p),
                    _ => "DECIMAL(18,0)".to_string(),
                },
            },
            TypeCategory::Datetime => match base {
                "DATE" | "TIME" | "DATETIME" | "SMALLDATETIME" => base.to_string(),
                "TIMESTAMPTZ" | "DATETIMEOFFSET" | "TIMETZ" => "DATETIMEOFFSET".to_string(),
                _ => "DATETIME2".to_string(),
            },
            TypeCategory::Boolean => "BIT".to_string(),
            TypeCategory::Binary => match base {
                "BINARY" => sized("BINARY", column_type.length.or(Some(1))),
                _ => sized("VARBINARY", column_type.length),
            },
            TypeCategory::Other => match base {
                "UUID" => "UNIQUEIDENTIFIER".to_string(),
                "JSON" | "JSONB" => "NVARCHAR(MAX)".to_string(),
                _ => column_type.canonical(),
            },
        }
    }
}

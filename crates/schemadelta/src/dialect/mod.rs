//! Target SQL dialects.
//!
//! Each dialect knows how to render a planned change as statements for one
//! database system. Dialects perform no planning of their own.

mod mssql;
mod postgres;
mod sqlite;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use mssql::MssqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::error::PlanError;
use crate::operations::ChangeKind;
use crate::schema::{ColumnSpec, ForeignKeySpec, TableSpec};
use crate::types::ColumnType;

/// Trait for database-specific SQL generation.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Generates SQL statements for a change.
    fn generate_sql(&self, change: &ChangeKind) -> Vec<String>;

    /// Returns the SQL type name for the given column type.
    fn type_name(&self, column_type: &ColumnType) -> String;

    /// Statement emitted between batches, if the dialect uses one.
    fn batch_separator(&self) -> Option<&'static str> {
        None
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes and joins a column list.
    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnSpec) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(&column.column_type),
        ];
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", default));
        }
        parts.join(" ")
    }

    /// Generates a named foreign key clause.
    fn foreign_key_clause(&self, fk: &ForeignKeySpec) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&fk.name),
            self.quote_list(&fk.columns),
            self.quote_identifier(&fk.references_table),
            self.quote_list(&fk.references_columns)
        )
    }

    /// Generates SQL for creating a table with its keys inline.
    fn create_table_sql(&self, table: &TableSpec) -> String {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
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
}

/// The dialects the emitter can target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL.
    #[default]
    Postgres,
    /// Microsoft SQL Server (T-SQL).
    Mssql,
    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// Every supported dialect.
    pub const ALL: [Dialect; 3] = [Dialect::Postgres, Dialect::Mssql, Dialect::Sqlite];

    /// Returns the renderer for this dialect.
    #[must_use]
    pub fn renderer(self) -> Box<dyn MigrationDialect> {
        match self {
            Self::Postgres => Box::new(PostgresDialect::new()),
            Self::Mssql => Box::new(MssqlDialect::new()),
            Self::Sqlite => Box::new(SqliteDialect::new()),
        }
    }

    /// Returns the dialect name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mssql => "mssql",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mssql" | "sqlserver" | "tsql" => Ok(Self::Mssql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(PlanError::InvalidConfig(format!("unknown dialect '{}'", other))),
        }
    }
}

//! Schema representation types.
//!
//! A [`SchemaSnapshot`] is one complete schema at one point in time. It is
//! validated when constructed and never changes afterwards; every later
//! stage reads it through shared references.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::types::ColumnType;

/// Normalizes an identifier for comparison: trimmed and lower-cased.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub column_type: ColumnType,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Default value expression, as exported.
    pub default: Option<String>,
    /// 1-based position within the table.
    pub ordinal: u32,
}

impl ColumnSpec {
    /// Creates a nullable column without a default.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: &str) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::parse(data_type),
            nullable: true,
            default: None,
            ordinal: 0,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default value expression.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the ordinal position explicitly.
    #[must_use]
    pub fn at(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }
}

/// A foreign key: local column(s) referencing another table's column(s).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Constraint name.
    pub name: String,
    /// Column(s) in the referencing table.
    pub columns: Vec<String>,
    /// Referenced table name.
    pub references_table: String,
    /// Referenced column(s).
    pub references_columns: Vec<String>,
}

impl ForeignKeySpec {
    /// Creates a foreign key with a derived constraint name.
    #[must_use]
    pub fn new(
        table: &str,
        columns: Vec<String>,
        references_table: impl Into<String>,
        references_columns: Vec<String>,
    ) -> Self {
        let references_table = references_table.into();
        Self {
            name: foreign_key_name(table, &columns, &references_table),
            columns,
            references_table,
            references_columns,
        }
    }
}

/// A unique constraint over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Columns that form the unique constraint.
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    /// Creates a unique constraint with a derived name.
    #[must_use]
    pub fn new(table: &str, columns: Vec<String>) -> Self {
        Self {
            name: unique_constraint_name(table, &columns),
            columns,
        }
    }
}

/// Derives the constraint name used for a foreign key.
#[must_use]
pub fn foreign_key_name(table: &str, columns: &[String], references_table: &str) -> String {
    format!(
        "fk_{}_{}_{}",
        ident_part(table),
        columns.iter().map(|c| ident_part(c)).collect::<Vec<_>>().join("_"),
        ident_part(references_table)
    )
}

/// Derives the constraint name used for a unique constraint.
#[must_use]
pub fn unique_constraint_name(table: &str, columns: &[String]) -> String {
    format!(
        "uq_{}_{}",
        ident_part(table),
        columns.iter().map(|c| ident_part(c)).collect::<Vec<_>>().join("_")
    )
}

fn ident_part(name: &str) -> String {
    normalize_name(name)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Column definitions, ordered by ordinal position.
    pub columns: Vec<ColumnSpec>,
    /// Primary key column(s).
    pub primary_key: Vec<String>,
    /// Foreign key definitions.
    pub foreign_keys: Vec<ForeignKeySpec>,
    /// Unique constraint definitions.
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl TableSpec {
    /// Creates a new table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    /// Adds a column. Columns without an explicit ordinal are placed last.
    #[must_use]
    pub fn column(mut self, mut column: ColumnSpec) -> Self {
        if column.ordinal == 0 {
            column.ordinal = self.columns.iter().map(|c| c.ordinal).max().unwrap_or(0) + 1;
        }
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key<I, J, S>(mut self, columns: I, references_table: &str, references: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fk = ForeignKeySpec::new(
            &self.name,
            columns.into_iter().map(Into::into).collect(),
            references_table,
            references.into_iter().map(Into::into).collect(),
        );
        self.foreign_keys.push(fk);
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let uc = UniqueConstraint::new(&self.name, columns.into_iter().map(Into::into).collect());
        self.unique_constraints.push(uc);
        self
    }

    /// Gets a column by name (exact match).
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Gets a column by normalized name.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&ColumnSpec> {
        let wanted = normalize_name(name);
        self.columns.iter().find(|c| normalize_name(&c.name) == wanted)
    }

    /// Returns true when the column is part of the primary key.
    #[must_use]
    pub fn is_primary_key(&self, column: &str) -> bool {
        let wanted = normalize_name(column);
        self.primary_key.iter().any(|c| normalize_name(c) == wanted)
    }

    fn validate(&mut self, table_names: &HashSet<String>, all: &[TableSpec]) -> Result<()> {
        let mut names = HashSet::new();
        let mut ordinals = HashSet::new();
        for col in &self.columns {
            if col.name.trim().is_empty() {
                return Err(PlanError::malformed_table(&self.name, "column with empty name"));
            }
            if !names.insert(normalize_name(&col.name)) {
                return Err(PlanError::malformed_column(
                    &self.name,
                    &col.name,
                    "duplicate column name",
                ));
            }
            if !ordinals.insert(col.ordinal) {
                return Err(PlanError::malformed_column(
                    &self.name,
                    &col.name,
                    format!("duplicate ordinal position {}", col.ordinal),
                ));
            }
        }
        self.columns.sort_by_key(|c| c.ordinal);

        let mut pk_seen = HashSet::new();
        for pk in &self.primary_key {
            if !names.contains(&normalize_name(pk)) {
                return Err(PlanError::malformed_column(
                    &self.name,
                    pk,
                    "primary key references a nonexistent column",
                ));
            }
            if !pk_seen.insert(normalize_name(pk)) {
                return Err(PlanError::malformed_column(
                    &self.name,
                    pk,
                    "column listed twice in the primary key",
                ));
            }
        }

        for uc in &self.unique_constraints {
            if let Some(missing) = uc.columns.iter().find(|c| !names.contains(&normalize_name(c))) {
                return Err(PlanError::malformed_column(
                    &self.name,
                    missing,
                    format!("unique constraint '{}' references a nonexistent column", uc.name),
                ));
            }
        }

        for fk in &self.foreign_keys {
            if fk.columns.is_empty() || fk.columns.len() != fk.references_columns.len() {
                return Err(PlanError::malformed_table(
                    &self.name,
                    format!("foreign key '{}' has mismatched column lists", fk.name),
                ));
            }
            if let Some(missing) = fk.columns.iter().find(|c| !names.contains(&normalize_name(c))) {
                return Err(PlanError::malformed_column(
                    &self.name,
                    missing,
                    format!("foreign key '{}' uses a nonexistent column", fk.name),
                ));
            }
            let target_key = normalize_name(&fk.references_table);
            if !table_names.contains(&target_key) {
                return Err(PlanError::malformed_table(
                    &self.name,
                    format!(
                        "foreign key '{}' references missing table '{}'",
                        fk.name, fk.references_table
                    ),
                ));
            }
            // A self-reference is checked against this table's own columns.
            let target_has = |column: &str| -> bool {
                if normalize_name(&self.name) == target_key {
                    names.contains(&normalize_name(column))
                } else {
                    all.iter()
                        .find(|t| normalize_name(&t.name) == target_key)
                        .is_some_and(|t| t.find_column(column).is_some())
                }
            };
            if let Some(missing) = fk.references_columns.iter().find(|c| !target_has(c)) {
                return Err(PlanError::malformed_table(
                    &self.name,
                    format!(
                        "foreign key '{}' references missing column '{}.{}'",
                        fk.name, fk.references_table, missing
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// The complete schema at one point in time.
///
/// Deserialized snapshots go through the same validation as
/// [`SchemaSnapshot::from_tables`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotTables")]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableSpec>,
}

/// Serialized shape of a snapshot, before validation.
#[derive(Deserialize)]
struct SnapshotTables {
    tables: BTreeMap<String, TableSpec>,
}

impl TryFrom<SnapshotTables> for SchemaSnapshot {
    type Error = PlanError;

    fn try_from(raw: SnapshotTables) -> Result<Self> {
        Self::from_tables(raw.tables.into_values().collect())
    }
}

impl SchemaSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validates and assembles a snapshot from table definitions.
    ///
    /// Fails with [`PlanError::MalformedSchema`] on duplicate names, primary
    /// keys over missing columns, or constraints that reference entities the
    /// snapshot does not contain. No partial snapshot is ever returned.
    pub fn from_tables(tables: Vec<TableSpec>) -> Result<Self> {
        let mut table_names = HashSet::new();
        for table in &tables {
            if table.name.trim().is_empty() {
                return Err(PlanError::malformed_table(&table.name, "table with empty name"));
            }
            if !table_names.insert(normalize_name(&table.name)) {
                return Err(PlanError::malformed_table(&table.name, "duplicate table name"));
            }
        }

        let mut validated = Vec::with_capacity(tables.len());
        for mut table in tables.clone() {
            table.validate(&table_names, &tables)?;
            validated.push(table);
        }

        Ok(Self {
            tables: validated.into_iter().map(|t| (t.name.clone(), t)).collect(),
        })
    }

    /// Gets a table by exact name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.get(name)
    }

    /// Gets a table by normalized name.
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<&TableSpec> {
        let wanted = normalize_name(name);
        self.tables.values().find(|t| normalize_name(&t.name) == wanted)
    }

    /// Iterates tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }

    /// Returns table names in order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if the snapshot has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

//! Schema model builder.
//!
//! Turns flat, loosely typed export rows (one row per column) into a
//! validated [`SchemaSnapshot`]. This is the only place raw input is
//! inspected; everything downstream works on the typed model.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{PlanError, Result};
use crate::schema::{
    normalize_name, ColumnSpec, ForeignKeySpec, SchemaSnapshot, TableSpec, UniqueConstraint,
};
use crate::types::ColumnType;

/// A single cell as it arrives from a spreadsheet or CSV export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// A JSON boolean.
    Bool(bool),
    /// A whole number.
    Int(i64),
    /// A floating point number (spreadsheets export integers as `3.0`).
    Float(f64),
    /// Free text.
    Text(String),
}

impl RawValue {
    /// Returns the cell as trimmed text, or `None` for blank-like cells.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.trim().to_string(),
        };
        if is_blank(&text) {
            None
        } else {
            Some(text)
        }
    }

    /// Interprets the cell as a yes/no flag.
    ///
    /// Returns `Ok(None)` for blank cells and `Err` with the offending text
    /// when the value is not recognizable.
    pub fn as_flag(&self) -> std::result::Result<Option<bool>, String> {
        match self {
            Self::Bool(b) => Ok(Some(*b)),
            Self::Int(i) => Ok(Some(*i != 0)),
            Self::Float(f) => Ok(Some(*f != 0.0)),
            Self::Text(s) => {
                let lowered = s.trim().to_lowercase();
                match lowered.as_str() {
                    "" | "nan" | "none" => Ok(None),
                    "yes" | "y" | "true" | "t" | "1" | "null" | "nullable" | "pk" | "x" => {
                        Ok(Some(true))
                    }
                    "no" | "n" | "false" | "f" | "0" | "not null" | "not nullable" => {
                        Ok(Some(false))
                    }
                    _ => Err(s.clone()),
                }
            }
        }
    }

    /// Interprets the cell as a positive position.
    pub fn as_position(&self) -> std::result::Result<Option<u32>, String> {
        let Some(text) = self.as_text() else {
            return Ok(None);
        };
        text.parse::<u32>()
            .ok()
            .filter(|p| *p > 0)
            .map(Some)
            .ok_or(text)
    }
}

fn is_blank(text: &str) -> bool {
    matches!(text.to_lowercase().as_str(), "" | "nan" | "none")
}

/// One exported row describing one column.
///
/// Field aliases accept the header spellings commonly produced by
/// database catalog exports. [`parse_rows`] lower-cases headers first, so
/// the aliases match regardless of case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// Owning schema. Tables are identified by name alone; a table may not
    /// span two schemas.
    #[serde(default, alias = "table_schema", alias = "schema")]
    pub schema_name: Option<String>,
    /// Owning table.
    #[serde(alias = "table", alias = "tablename", alias = "table name")]
    pub table_name: String,
    /// Column name.
    #[serde(default, alias = "column", alias = "columnname", alias = "column name")]
    pub column_name: String,
    /// Declared type, e.g. `varchar(255)`.
    #[serde(default, alias = "datatype", alias = "data type", alias = "type")]
    pub data_type: String,
    /// Nullability flag.
    #[serde(
        default,
        alias = "nullable",
        alias = "is null",
        alias = "nullability",
        alias = "null"
    )]
    pub is_nullable: Option<RawValue>,
    /// Default value expression.
    #[serde(default, alias = "column_default", alias = "default")]
    pub default_value: Option<RawValue>,
    /// Primary key membership flag.
    #[serde(default, alias = "primary_key", alias = "pk")]
    pub is_primary_key: Option<RawValue>,
    /// Identity (auto-increment) flag. Identity columns are never NULL.
    #[serde(default, alias = "is_identity", alias = "auto_increment")]
    pub identity: Option<RawValue>,
    /// 1-based ordinal position.
    #[serde(default, alias = "ordinal", alias = "position", alias = "column_id")]
    pub ordinal_position: Option<RawValue>,
    /// Referenced column as `table.column`, `table(column)` or just `table`.
    #[serde(default, alias = "references", alias = "fk")]
    pub foreign_key_ref: Option<String>,
    /// Columns sharing a group name form one unique constraint.
    #[serde(default, alias = "unique")]
    pub unique_group: Option<String>,
    /// Character length, refines a bare type such as `varchar`.
    #[serde(
        default,
        alias = "length",
        alias = "lenth",
        alias = "char_length",
        alias = "character_maximum_length"
    )]
    pub max_length: Option<RawValue>,
    /// Numeric precision, refines a bare `decimal`.
    #[serde(default, alias = "numeric_precision")]
    pub precision: Option<RawValue>,
    /// Numeric scale, refines a bare `decimal`.
    #[serde(default, alias = "numeric_scale")]
    pub scale: Option<RawValue>,
}

impl RawRow {
    /// Creates a row with the required fields set.
    #[must_use]
    pub fn new(table: &str, column: &str, data_type: &str) -> Self {
        Self {
            table_name: table.to_string(),
            column_name: column.to_string(),
            data_type: data_type.to_string(),
            ..Self::default()
        }
    }

    /// Sets the nullability flag.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.is_nullable = Some(RawValue::Bool(nullable));
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = Some(RawValue::Bool(true));
        self
    }

    /// Marks the column as an identity column.
    #[must_use]
    pub fn identity(mut self) -> Self {
        self.identity = Some(RawValue::Bool(true));
        self
    }

    /// Sets the owning schema.
    #[must_use]
    pub fn schema(mut self, schema: &str) -> Self {
        self.schema_name = Some(schema.to_string());
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(RawValue::Text(value.to_string()));
        self
    }

    /// Sets the ordinal position.
    #[must_use]
    pub fn position(mut self, ordinal: u32) -> Self {
        self.ordinal_position = Some(RawValue::Int(i64::from(ordinal)));
        self
    }

    /// Sets the foreign key reference.
    #[must_use]
    pub fn references(mut self, target: &str) -> Self {
        self.foreign_key_ref = Some(target.to_string());
        self
    }

    /// Sets the unique group.
    #[must_use]
    pub fn unique_group(mut self, group: &str) -> Self {
        self.unique_group = Some(group.to_string());
        self
    }
}

/// Foreign key reference waiting for every table to be known.
struct PendingReference {
    table: String,
    column: String,
    target_table: String,
    target_column: Option<String>,
}

/// Builds a validated snapshot from export rows.
///
/// Fails with [`PlanError::MalformedSchema`] naming the offending table and
/// column when a row is inconsistent with the rest of the export.
pub fn build(rows: &[RawRow]) -> Result<SchemaSnapshot> {
    let mut tables: BTreeMap<String, TableSpec> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut primary_keys: BTreeMap<String, Vec<(u32, String)>> = BTreeMap::new();
    let mut unique_groups: BTreeMap<(String, String), Vec<(u32, String)>> = BTreeMap::new();
    let mut references: Vec<PendingReference> = Vec::new();
    let mut schemas: BTreeMap<String, String> = BTreeMap::new();

    for (index, row) in rows.iter().enumerate() {
        let table_name = row.table_name.trim();
        if table_name.is_empty() {
            return Err(PlanError::malformed_table(
                "",
                format!("row {} has no table name", index + 1),
            ));
        }
        let column_name = row.column_name.trim();
        if column_name.is_empty() {
            return Err(PlanError::malformed_table(
                table_name,
                format!("row {} has no column name", index + 1),
            ));
        }
        if row.data_type.trim().is_empty() {
            return Err(PlanError::malformed_column(
                table_name,
                column_name,
                "missing data type",
            ));
        }

        if let Some(schema) = row.schema_name.as_deref().map(str::trim).filter(|s| !is_blank(s)) {
            let seen = schemas
                .entry(table_name.to_string())
                .or_insert_with(|| schema.to_string());
            if normalize_name(seen) != normalize_name(schema) {
                return Err(PlanError::malformed_table(
                    table_name,
                    format!("table appears in schemas '{}' and '{}'", seen, schema),
                ));
            }
        }

        let table = tables.entry(table_name.to_string()).or_insert_with(|| {
            order.push(table_name.to_string());
            TableSpec::new(table_name)
        });

        let flag = |value: &Option<RawValue>, what: &str| -> Result<Option<bool>> {
            match value {
                Some(v) => v.as_flag().map_err(|text| {
                    PlanError::malformed_column(
                        table_name,
                        column_name,
                        format!("unrecognized {} flag '{}'", what, text),
                    )
                }),
                None => Ok(None),
            }
        };

        let is_pk = flag(&row.is_primary_key, "primary key")?.unwrap_or(false);
        let is_identity = flag(&row.identity, "identity")?.unwrap_or(false);
        let nullable =
            !is_pk && !is_identity && flag(&row.is_nullable, "nullable")?.unwrap_or(true);

        let ordinal = match &row.ordinal_position {
            Some(value) => value.as_position().map_err(|text| {
                PlanError::malformed_column(
                    table_name,
                    column_name,
                    format!("invalid ordinal position '{}'", text),
                )
            })?,
            None => None,
        };
        let ordinal = ordinal
            .unwrap_or_else(|| table.columns.iter().map(|c| c.ordinal).max().unwrap_or(0) + 1);

        let text = |value: &Option<RawValue>| value.as_ref().and_then(RawValue::as_text);
        let column_type = ColumnType::parse_with(
            &row.data_type,
            text(&row.max_length).as_deref(),
            text(&row.precision).as_deref(),
            text(&row.scale).as_deref(),
        );

        table.columns.push(ColumnSpec {
            name: column_name.to_string(),
            column_type,
            nullable,
            default: text(&row.default_value).and_then(|d| normalize_default(&d)),
            ordinal,
        });

        if is_pk {
            primary_keys
                .entry(table_name.to_string())
                .or_default()
                .push((ordinal, column_name.to_string()));
        }

        if let Some(group) = row.unique_group.as_deref().map(str::trim).filter(|g| !is_blank(g)) {
            unique_groups
                .entry((table_name.to_string(), group.to_string()))
                .or_default()
                .push((ordinal, column_name.to_string()));
        }

        if let Some(target) = row
            .foreign_key_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !is_blank(r))
        {
            let (target_table, target_column) = parse_reference(target).ok_or_else(|| {
                PlanError::malformed_column(
                    table_name,
                    column_name,
                    format!("unparseable foreign key reference '{}'", target),
                )
            })?;
            references.push(PendingReference {
                table: table_name.to_string(),
                column: column_name.to_string(),
                target_table,
                target_column,
            });
        }
    }

    for (table_name, mut columns) in primary_keys {
        columns.sort();
        if let Some(table) = tables.get_mut(&table_name) {
            table.primary_key = columns.into_iter().map(|(_, c)| c).collect();
        }
    }

    for ((table_name, _group), mut columns) in unique_groups {
        columns.sort();
        if let Some(table) = tables.get_mut(&table_name) {
            let columns: Vec<String> = columns.into_iter().map(|(_, c)| c).collect();
            table
                .unique_constraints
                .push(UniqueConstraint::new(&table_name, columns));
        }
    }

    for reference in references {
        let target_column = match reference.target_column {
            Some(column) => column,
            None => implied_target_column(&tables, &reference)?,
        };
        let fk = ForeignKeySpec::new(
            &reference.table,
            vec![reference.column.clone()],
            reference.target_table.clone(),
            vec![target_column],
        );
        if let Some(table) = tables.get_mut(&reference.table) {
            table.foreign_keys.push(fk);
        }
    }

    let column_count: usize = tables.values().map(|t| t.columns.len()).sum();
    debug!(tables = tables.len(), columns = column_count, "built schema model");

    let ordered = order
        .into_iter()
        .filter_map(|name| tables.remove(&name))
        .collect();
    SchemaSnapshot::from_tables(ordered)
}

/// Reads rows from a JSON array file.
pub fn load_rows(path: impl AsRef<Path>) -> Result<Vec<RawRow>> {
    let content = std::fs::read_to_string(path)?;
    parse_rows(&content)
}

/// Parses rows from a JSON array, matching headers case-insensitively.
pub fn parse_rows(content: &str) -> Result<Vec<RawRow>> {
    let value: Value = serde_json::from_str(content)?;
    Ok(serde_json::from_value(normalize_headers(value))?)
}

/// Trims and lower-cases the keys of every object in a row array.
fn normalize_headers(value: Value) -> Value {
    match value {
        Value::Array(rows) => Value::Array(rows.into_iter().map(normalize_headers).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, cell)| (key.trim().to_lowercase(), cell))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// Splits `table.column`, `table(column)` or a bare `table`.
fn parse_reference(target: &str) -> Option<(String, Option<String>)> {
    if let Some(open) = target.find('(') {
        let table = target[..open].trim();
        let column = target[open + 1..].trim_end_matches(')').trim();
        if table.is_empty() || column.is_empty() {
            return None;
        }
        return Some((table.to_string(), Some(column.to_string())));
    }
    match target.rsplit_once('.') {
        Some((table, column)) => {
            let (table, column) = (table.trim(), column.trim());
            if table.is_empty() || column.is_empty() {
                None
            } else {
                Some((table.to_string(), Some(column.to_string())))
            }
        }
        None => Some((target.to_string(), None)),
    }
}

/// A bare table reference points at that table's single-column primary key.
fn implied_target_column(
    tables: &BTreeMap<String, TableSpec>,
    reference: &PendingReference,
) -> Result<String> {
    let wanted = normalize_name(&reference.target_table);
    let target = tables
        .values()
        .find(|t| normalize_name(&t.name) == wanted)
        .ok_or_else(|| {
            PlanError::malformed_column(
                &reference.table,
                &reference.column,
                format!("foreign key references missing table '{}'", reference.target_table),
            )
        })?;
    match target.primary_key.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(PlanError::malformed_column(
            &reference.table,
            &reference.column,
            format!(
                "reference to '{}' needs an explicit column: it has no single-column primary key",
                reference.target_table
            ),
        )),
    }
}

/// Strips redundant wrapping parentheses, as in T-SQL's `((0))`.
fn normalize_default(value: &str) -> Option<String> {
    let mut current = value.trim();
    while current.starts_with('(') && current.ends_with(')') && wraps_whole(current) {
        current = current[1..current.len() - 1].trim();
    }
    if is_blank(current) {
        None
    } else {
        Some(current.to_string())
    }
}

/// True when the opening parenthesis at index 0 closes at the last index.
fn wraps_whole(value: &str) -> bool {
    let mut depth = 0usize;
    for (i, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i != value.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

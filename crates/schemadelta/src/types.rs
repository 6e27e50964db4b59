//! Declared column types and their normalized categories.
//!
//! Exports from different databases spell the same type many ways
//! (`VARCHAR(255)`, `character varying(255)`, `NVARCHAR(MAX)`). A
//! [`ColumnType`] keeps the raw spelling for reporting and derives a
//! canonical base name plus a [`TypeCategory`] used for comparison.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operations::RiskClass;

/// Coarse type category used for matching and risk assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    /// Whole numbers.
    Integer,
    /// Character data.
    Text,
    /// Fixed-point and floating-point numbers.
    Decimal,
    /// Dates, times and timestamps.
    Datetime,
    /// True/false.
    Boolean,
    /// Raw bytes.
    Binary,
    /// Anything else (JSON, UUID, XML, ...).
    Other,
}

impl TypeCategory {
    /// Returns the category name as used in reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Decimal => "decimal",
            Self::Datetime => "datetime",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared column type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    /// The type exactly as it appeared in the export.
    pub raw: String,
    /// Canonical upper-case base name with aliases folded (`INTEGER` -> `INT`).
    pub base: String,
    /// Normalized category.
    pub category: TypeCategory,
    /// Character or byte length. `None` means unbounded or unspecified.
    pub length: Option<u32>,
    /// Numeric precision, or fractional-second precision for temporal types.
    pub precision: Option<u32>,
    /// Numeric scale.
    pub scale: Option<u32>,
}

impl ColumnType {
    /// Parses a declared type string such as `decimal(10, 2)`.
    ///
    /// Parsing never fails: unknown names land in [`TypeCategory::Other`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (head, params) = match trimmed.find('(') {
            Some(open) => {
                let close = trimmed.rfind(')').unwrap_or(trimmed.len());
                let inner = if close > open {
                    &trimmed[open + 1..close]
                } else {
                    &trimmed[open + 1..]
                };
                (&trimmed[..open], split_params(inner))
            }
            None => (trimmed, Vec::new()),
        };

        let base = canonical_base(head);
        let category = categorize(&base, params.len());

        let mut ty = Self {
            raw: trimmed.to_string(),
            base,
            category,
            length: None,
            precision: None,
            scale: None,
        };

        match category {
            TypeCategory::Text | TypeCategory::Binary => {
                ty.length = params.first().copied().flatten();
            }
            TypeCategory::Decimal | TypeCategory::Datetime => {
                ty.precision = params.first().copied().flatten();
                ty.scale = params.get(1).copied().flatten();
            }
            TypeCategory::Integer | TypeCategory::Boolean => {
                // Display widths such as INT(11) carry no storage meaning.
            }
            TypeCategory::Other => {
                ty.length = params.first().copied().flatten();
            }
        }

        ty
    }

    /// Parses a bare type name refined by separately exported length,
    /// precision and scale values.
    ///
    /// Refinements only apply when the type string carries no parameters
    /// of its own.
    #[must_use]
    pub fn parse_with(
        raw: &str,
        max_length: Option<&str>,
        precision: Option<&str>,
        scale: Option<&str>,
    ) -> Self {
        if raw.contains('(') {
            return Self::parse(raw);
        }
        let mut ty = Self::parse(raw);
        match ty.category {
            TypeCategory::Text | TypeCategory::Binary | TypeCategory::Other => {
                if let Some(len) = max_length.and_then(parse_param) {
                    ty.length = Some(len);
                }
                if max_length.is_some_and(|l| l.trim().eq_ignore_ascii_case("max")) {
                    ty.length = None;
                }
            }
            TypeCategory::Decimal | TypeCategory::Datetime => {
                if let Some(p) = precision.and_then(parse_param) {
                    ty.precision = Some(p);
                }
                if let Some(s) = scale.and_then(parse_param) {
                    ty.scale = Some(s);
                }
            }
            TypeCategory::Integer | TypeCategory::Boolean => {}
        }
        ty
    }

    /// Returns the canonical declaration, e.g. `VARCHAR(255)` or `DECIMAL(10,2)`.
    #[must_use]
    pub fn canonical(&self) -> String {
        match (self.length, self.precision, self.scale) {
            (Some(len), _, _) => format!("{}({})", self.base, len),
            (None, Some(p), Some(s)) => format!("{}({},{})", self.base, p, s),
            (None, Some(p), None) => format!("{}({})", self.base, p),
            _ if self.is_max_length() => format!("{}(MAX)", self.base),
            _ => self.base.clone(),
        }
    }

    /// Returns true when both types declare the same thing, ignoring spelling.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.base == other.base
            && self.length == other.length
            && self.precision == other.precision
            && self.scale == other.scale
    }

    /// Classifies converting existing values of `self` into `to`.
    ///
    /// Returns [`RiskClass::Safe`] when every value of `self` is representable
    /// in `to`, [`RiskClass::DataLossRisk`] otherwise.
    #[must_use]
    pub fn conversion_risk(&self, to: &Self) -> RiskClass {
        if self.is_equivalent(to) || self.widens_into(to) {
            RiskClass::Safe
        } else {
            RiskClass::DataLossRisk
        }
    }

    fn is_max_length(&self) -> bool {
        self.raw.to_ascii_uppercase().replace(' ', "").contains("(MAX)")
    }

    fn widens_into(&self, to: &Self) -> bool {
        use TypeCategory::{Binary, Boolean, Datetime, Decimal, Integer, Other, Text};

        match (self.category, to.category) {
            (Integer, Integer) => integer_rank(&to.base) >= integer_rank(&self.base),
            (Integer, Decimal) => decimal_holds_digits(to, integer_digits(&self.base)),
            (Boolean, Integer | Decimal | Boolean) => true,
            (Decimal, Decimal) => decimal_widens(self, to),
            (Datetime, Datetime) => datetime_widens(self, to),
            (Text, Text) | (Binary, Binary) => length_fits(self.length, to.length),
            (Text, Binary) => to.length.is_none() || length_fits(self.length, to.length),
            (Binary, Text) => false,
            (_, Text) => match (self.text_width(), to.length) {
                (_, None) => true,
                (Some(needed), Some(available)) => available >= needed,
                (None, Some(_)) => false,
            },
            (Other, Other) => self.base == to.base && length_fits(self.length, to.length),
            _ => false,
        }
    }

    /// Characters needed to render any value of this type as text.
    fn text_width(&self) -> Option<u32> {
        match self.category {
            TypeCategory::Integer => Some(integer_digits(&self.base) + 1),
            TypeCategory::Boolean => Some(5),
            TypeCategory::Decimal => match self.precision {
                Some(p) if !is_float(&self.base) => Some(p + 2),
                _ => Some(40),
            },
            TypeCategory::Datetime => Some(40),
            TypeCategory::Text | TypeCategory::Binary | TypeCategory::Other => self.length,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_params(inner: &str) -> Vec<Option<u32>> {
    inner.split(',').map(parse_param).collect()
}

fn parse_param(value: &str) -> Option<u32> {
    let value = value.trim();
    value
        .parse::<u32>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u32))
}

/// Folds whitespace and upper-cases, then maps spelling aliases onto one name.
fn canonical_base(head: &str) -> String {
    let folded = head.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = folded.to_ascii_uppercase();
    let upper = upper
        .trim_end_matches(" UNSIGNED")
        .trim_end_matches(" SIGNED")
        .to_string();

    let alias = match upper.as_str() {
        "INTEGER" | "INT4" => "INT",
        "INT8" => "BIGINT",
        "INT2" => "SMALLINT",
        "SERIAL4" => "SERIAL",
        "SERIAL8" => "BIGSERIAL",
        "BOOL" => "BOOLEAN",
        "CHARACTER VARYING" | "CHAR VARYING" => "VARCHAR",
        "CHARACTER" => "CHAR",
        "NATIONAL CHARACTER VARYING" => "NVARCHAR",
        "NATIONAL CHARACTER" => "NCHAR",
        "DOUBLE PRECISION" | "FLOAT8" => "DOUBLE",
        "FLOAT4" => "REAL",
        "NUMERIC" | "DEC" => "DECIMAL",
        "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP",
        "TIMESTAMP WITH TIME ZONE" => "TIMESTAMPTZ",
        "TIME WITHOUT TIME ZONE" => "TIME",
        "TIME WITH TIME ZONE" => "TIMETZ",
        "BINARY VARYING" => "VARBINARY",
        other => other,
    };
    alias.to_string()
}

fn categorize(base: &str, param_count: usize) -> TypeCategory {
    match base {
        "INT" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "SERIAL" | "BIGSERIAL"
        | "SMALLSERIAL" => TypeCategory::Integer,
        "VARCHAR" | "NVARCHAR" | "CHAR" | "NCHAR" | "TEXT" | "NTEXT" | "VARCHAR2"
        | "NVARCHAR2" | "CLOB" | "NCLOB" | "STRING" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT"
        | "CITEXT" | "BPCHAR" => TypeCategory::Text,
        "DECIMAL" | "NUMBER" | "FLOAT" | "REAL" | "DOUBLE" | "MONEY" | "SMALLMONEY" => {
            TypeCategory::Decimal
        }
        "DATE" | "TIME" | "TIMETZ" | "DATETIME" | "DATETIME2" | "SMALLDATETIME"
        | "DATETIMEOFFSET" | "TIMESTAMP" | "TIMESTAMPTZ" => TypeCategory::Datetime,
        "BOOLEAN" => TypeCategory::Boolean,
        // BIT(n) is a bit string in PostgreSQL; bare BIT is the T-SQL boolean.
        "BIT" if param_count == 0 => TypeCategory::Boolean,
        "BINARY" | "VARBINARY" | "BLOB" | "BYTEA" | "IMAGE" | "TINYBLOB" | "MEDIUMBLOB"
        | "LONGBLOB" | "RAW" | "LONG RAW" => TypeCategory::Binary,
        _ => TypeCategory::Other,
    }
}

fn integer_rank(base: &str) -> u8 {
    match base {
        "TINYINT" => 1,
        "SMALLINT" | "SMALLSERIAL" => 2,
        "MEDIUMINT" => 3,
        "BIGINT" | "BIGSERIAL" => 5,
        _ => 4,
    }
}

/// Decimal digits needed to hold the largest value of an integer type.
fn integer_digits(base: &str) -> u32 {
    match integer_rank(base) {
        1 => 3,
        2 => 5,
        3 => 8,
        5 => 19,
        _ => 10,
    }
}

fn is_float(base: &str) -> bool {
    matches!(base, "FLOAT" | "REAL" | "DOUBLE")
}

/// Exact mantissa digits of a floating type.
fn float_digits(base: &str) -> u32 {
    if base == "REAL" {
        7
    } else {
        15
    }
}

fn decimal_holds_digits(to: &ColumnType, digits: u32) -> bool {
    if is_float(&to.base) {
        return float_digits(&to.base) >= digits;
    }
    match to.base.as_str() {
        "MONEY" => digits <= 15,
        "SMALLMONEY" => digits <= 6,
        _ => match to.precision {
            Some(p) => p.saturating_sub(to.scale.unwrap_or(0)) >= digits,
            None => true,
        },
    }
}

fn decimal_widens(from: &ColumnType, to: &ColumnType) -> bool {
    match (is_float(&from.base), is_float(&to.base)) {
        (true, true) => float_digits(&to.base) >= float_digits(&from.base),
        (true, false) | (false, true) => false,
        (false, false) => {
            if from.base != to.base && (from.base == "MONEY" || to.base == "MONEY") {
                return false;
            }
            match (from.precision, to.precision) {
                (_, None) => to.scale.is_none(),
                (None, Some(_)) => false,
                (Some(fp), Some(tp)) => {
                    let fs = from.scale.unwrap_or(0);
                    let ts = to.scale.unwrap_or(0);
                    ts >= fs && tp.saturating_sub(ts) >= fp.saturating_sub(fs)
                }
            }
        }
    }
}

/// Temporal types ordered by how much of a point in time they keep.
fn datetime_widens(from: &ColumnType, to: &ColumnType) -> bool {
    fn kind(base: &str) -> u8 {
        match base {
            "DATE" => 1,
            "TIME" | "TIMETZ" => 2,
            "SMALLDATETIME" => 3,
            "TIMESTAMPTZ" | "DATETIMEOFFSET" => 5,
            _ => 4,
        }
    }

    let fractional_ok = match (from.precision, to.precision) {
        (Some(f), Some(t)) => t >= f,
        _ => true,
    };
    let (from_kind, to_kind) = (kind(&from.base), kind(&to.base));
    let kind_ok = match (from_kind, to_kind) {
        (a, b) if a == b => true,
        // TIME keeps no date, so it only fits into another time type.
        (2, _) | (_, 2) => false,
        (1, b) => b >= 3,
        (a, b) => b >= a,
    };
    kind_ok && fractional_ok
}

fn length_fits(from: Option<u32>, to: Option<u32>) -> bool {
    match (from, to) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(f), Some(t)) => t >= f,
    }
}

//! Change operations.
//!
//! This module defines every atomic schema change a plan can contain, the
//! risk class attached to it, and how it is described and reversed.
//!
//! Table and column names inside a change always use the "after" naming:
//! renames execute before anything else touches the renamed entity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matcher::MatchBasis;
use crate::schema::{ColumnSpec, ForeignKeySpec, TableSpec, UniqueConstraint};
use crate::types::ColumnType;

/// How dangerous a change is for existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskClass {
    /// Cannot destroy or constrain existing data.
    Safe,
    /// Existing data may be destroyed or truncated.
    DataLossRisk,
    /// May fail or misbehave depending on data the engine cannot see.
    RequiresManualReview,
}

impl RiskClass {
    /// Returns the risk name as used in reports and script comments.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::DataLossRisk => "data-loss-risk",
            Self::RequiresManualReview => "requires-manual-review",
        }
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The change itself, independent of its risk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    /// Create a table, including its primary key, unique constraints and
    /// foreign keys.
    AddTable {
        /// Full table definition.
        table: TableSpec,
    },

    /// Drop a table.
    DropTable {
        /// The definition being dropped.
        table: TableSpec,
    },

    /// Rename a table.
    RenameTable {
        /// Old table name.
        from: String,
        /// New table name.
        to: String,
        /// Why the tables were paired.
        basis: MatchBasis,
    },

    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSpec,
    },

    /// Drop a column from an existing table.
    DropColumn {
        /// Table name.
        table: String,
        /// The definition being dropped.
        column: ColumnSpec,
    },

    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Old column name.
        from: String,
        /// New column name.
        to: String,
        /// Why the columns were paired.
        basis: MatchBasis,
    },

    /// Change a column's declared type.
    AlterColumnType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Previous type.
        from: ColumnType,
        /// New type.
        to: ColumnType,
        /// Nullability the column keeps while its type changes. Dialects
        /// that restate it must not tighten or relax the column here;
        /// [`ChangeKind::AlterColumnNullability`] owns that transition.
        nullable: bool,
        /// Default the column keeps while its type changes. Dialects that
        /// cannot alter a defaulted column drop and restore it around the
        /// alteration; [`ChangeKind::AlterDefault`] owns any change to it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },

    /// Change whether a column accepts NULL.
    AlterColumnNullability {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Type the column has after the change.
        column_type: ColumnType,
        /// Previous nullability.
        from: bool,
        /// New nullability.
        to: bool,
    },

    /// Change or remove a column default.
    AlterDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Previous default.
        from: Option<String>,
        /// New default.
        to: Option<String>,
    },

    /// Add a foreign key to an existing table.
    AddForeignKey {
        /// Referencing table.
        table: String,
        /// Constraint definition.
        foreign_key: ForeignKeySpec,
    },

    /// Drop a foreign key.
    DropForeignKey {
        /// Referencing table.
        table: String,
        /// The constraint being dropped.
        foreign_key: ForeignKeySpec,
    },

    /// Add a unique constraint to an existing table.
    AddUniqueConstraint {
        /// Table name.
        table: String,
        /// Constraint definition.
        constraint: UniqueConstraint,
    },

    /// Drop a unique constraint.
    DropUniqueConstraint {
        /// Table name.
        table: String,
        /// The constraint being dropped.
        constraint: UniqueConstraint,
    },
}

impl ChangeKind {
    /// Returns the variant name, e.g. `AddColumn`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddTable { .. } => "AddTable",
            Self::DropTable { .. } => "DropTable",
            Self::RenameTable { .. } => "RenameTable",
            Self::AddColumn { .. } => "AddColumn",
            Self::DropColumn { .. } => "DropColumn",
            Self::RenameColumn { .. } => "RenameColumn",
            Self::AlterColumnType { .. } => "AlterColumnType",
            Self::AlterColumnNullability { .. } => "AlterColumnNullability",
            Self::AlterDefault { .. } => "AlterDefault",
            Self::AddForeignKey { .. } => "AddForeignKey",
            Self::DropForeignKey { .. } => "DropForeignKey",
            Self::AddUniqueConstraint { .. } => "AddUniqueConstraint",
            Self::DropUniqueConstraint { .. } => "DropUniqueConstraint",
        }
    }

    /// Returns the table this change applies to.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::AddTable { table } | Self::DropTable { table } => &table.name,
            Self::RenameTable { to, .. } => to,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AlterColumnType { table, .. }
            | Self::AlterColumnNullability { table, .. }
            | Self::AlterDefault { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. }
            | Self::AddUniqueConstraint { table, .. }
            | Self::DropUniqueConstraint { table, .. } => table,
        }
    }

    /// Returns the column this change applies to, for column-level changes.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::AddColumn { column, .. } | Self::DropColumn { column, .. } => Some(&column.name),
            Self::RenameColumn { to, .. } => Some(to),
            Self::AlterColumnType { column, .. }
            | Self::AlterColumnNullability { column, .. }
            | Self::AlterDefault { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Returns the constraint name, for constraint-level changes.
    #[must_use]
    pub fn constraint(&self) -> Option<&str> {
        match self {
            Self::AddForeignKey { foreign_key, .. } | Self::DropForeignKey { foreign_key, .. } => {
                Some(&foreign_key.name)
            }
            Self::AddUniqueConstraint { constraint, .. }
            | Self::DropUniqueConstraint { constraint, .. } => Some(&constraint.name),
            _ => None,
        }
    }

    /// Tie-break rank among changes with no ordering constraint between
    /// them: creations, alterations, constraint additions, constraint drops,
    /// deletions.
    #[must_use]
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::AddTable { .. } | Self::AddColumn { .. } => 0,
            Self::RenameTable { .. }
            | Self::RenameColumn { .. }
            | Self::AlterColumnType { .. }
            | Self::AlterColumnNullability { .. }
            | Self::AlterDefault { .. } => 1,
            Self::AddForeignKey { .. } | Self::AddUniqueConstraint { .. } => 2,
            Self::DropForeignKey { .. } | Self::DropUniqueConstraint { .. } => 3,
            Self::DropColumn { .. } | Self::DropTable { .. } => 4,
        }
    }

    /// Returns a short detail string for reports (types, values, targets).
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::AddTable { table } => format!("{} columns", table.columns.len()),
            Self::DropTable { table } => format!("{} columns", table.columns.len()),
            Self::RenameTable { from, to, .. } => format!("{} -> {}", from, to),
            Self::AddColumn { column, .. } | Self::DropColumn { column, .. } => {
                let mut detail = column.column_type.canonical();
                if !column.nullable {
                    detail.push_str(" NOT NULL");
                }
                if let Some(default) = &column.default {
                    detail.push_str(&format!(" DEFAULT {}", default));
                }
                detail
            }
            Self::RenameColumn { from, to, .. } => format!("{} -> {}", from, to),
            Self::AlterColumnType { from, to, .. } => {
                format!("{} -> {}", from.canonical(), to.canonical())
            }
            Self::AlterColumnNullability { from, to, .. } => {
                format!("{} -> {}", null_word(*from), null_word(*to))
            }
            Self::AlterDefault { from, to, .. } => format!(
                "{} -> {}",
                from.as_deref().unwrap_or("none"),
                to.as_deref().unwrap_or("none")
            ),
            Self::AddForeignKey { foreign_key, .. } | Self::DropForeignKey { foreign_key, .. } => {
                format!(
                    "({}) -> {}({})",
                    foreign_key.columns.join(", "),
                    foreign_key.references_table,
                    foreign_key.references_columns.join(", ")
                )
            }
            Self::AddUniqueConstraint { constraint, .. }
            | Self::DropUniqueConstraint { constraint, .. } => {
                format!("({})", constraint.columns.join(", "))
            }
        }
    }
}

fn null_word(nullable: bool) -> &'static str {
    if nullable {
        "NULL"
    } else {
        "NOT NULL"
    }
}

/// A single planned change with its risk classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOp {
    /// What changes.
    #[serde(flatten)]
    pub kind: ChangeKind,
    /// Assessed risk.
    pub risk: RiskClass,
}

impl ChangeOp {
    /// Creates a change with an explicit risk.
    #[must_use]
    pub fn new(kind: ChangeKind, risk: RiskClass) -> Self {
        Self { kind, risk }
    }

    /// Creates a change with the risk its kind carries on its own.
    ///
    /// Context-dependent cases (such as a foreign key over freshly added
    /// columns) are refined by the diff computer.
    #[must_use]
    pub fn assessed(kind: ChangeKind) -> Self {
        let risk = match &kind {
            ChangeKind::AddTable { .. } => RiskClass::Safe,
            ChangeKind::DropTable { .. } | ChangeKind::DropColumn { .. } => RiskClass::DataLossRisk,
            ChangeKind::RenameTable { basis, .. } | ChangeKind::RenameColumn { basis, .. } => {
                rename_risk(*basis)
            }
            ChangeKind::AddColumn { column, .. } => {
                if !column.nullable && column.default.is_none() {
                    RiskClass::RequiresManualReview
                } else {
                    RiskClass::Safe
                }
            }
            ChangeKind::AlterColumnType { from, to, .. } => from.conversion_risk(to),
            ChangeKind::AlterColumnNullability { from, to, .. } => {
                if *from && !*to {
                    RiskClass::RequiresManualReview
                } else {
                    RiskClass::Safe
                }
            }
            ChangeKind::AlterDefault { .. } => RiskClass::Safe,
            ChangeKind::AddForeignKey { .. } | ChangeKind::AddUniqueConstraint { .. } => {
                RiskClass::RequiresManualReview
            }
            ChangeKind::DropForeignKey { .. } | ChangeKind::DropUniqueConstraint { .. } => {
                RiskClass::Safe
            }
        };
        Self { kind, risk }
    }

    /// Returns true if this change can be undone without losing data.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        match &self.kind {
            ChangeKind::DropTable { .. } | ChangeKind::DropColumn { .. } => false,
            ChangeKind::AlterColumnType { from, to, .. } => {
                from.conversion_risk(to) == RiskClass::Safe
            }
            _ => true,
        }
    }

    /// Returns the change that undoes this one.
    ///
    /// Returns `None` if the change is not reversible.
    #[must_use]
    pub fn reverse(&self) -> Option<Self> {
        if !self.is_reversible() {
            return None;
        }
        let kind = match &self.kind {
            ChangeKind::AddTable { table } => ChangeKind::DropTable {
                table: table.clone(),
            },
            ChangeKind::RenameTable { from, to, basis } => ChangeKind::RenameTable {
                from: to.clone(),
                to: from.clone(),
                basis: *basis,
            },
            ChangeKind::AddColumn { table, column } => ChangeKind::DropColumn {
                table: table.clone(),
                column: column.clone(),
            },
            ChangeKind::RenameColumn {
                table,
                from,
                to,
                basis,
            } => ChangeKind::RenameColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
                basis: *basis,
            },
            ChangeKind::AlterColumnType {
                table,
                column,
                from,
                to,
                nullable,
                default,
            } => ChangeKind::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                from: to.clone(),
                to: from.clone(),
                nullable: *nullable,
                default: default.clone(),
            },
            ChangeKind::AlterColumnNullability {
                table,
                column,
                column_type,
                from,
                to,
            } => ChangeKind::AlterColumnNullability {
                table: table.clone(),
                column: column.clone(),
                column_type: column_type.clone(),
                from: *to,
                to: *from,
            },
            ChangeKind::AlterDefault {
                table,
                column,
                from,
                to,
            } => ChangeKind::AlterDefault {
                table: table.clone(),
                column: column.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            ChangeKind::AddForeignKey { table, foreign_key } => ChangeKind::DropForeignKey {
                table: table.clone(),
                foreign_key: foreign_key.clone(),
            },
            ChangeKind::DropForeignKey { table, foreign_key } => ChangeKind::AddForeignKey {
                table: table.clone(),
                foreign_key: foreign_key.clone(),
            },
            ChangeKind::AddUniqueConstraint { table, constraint } => {
                ChangeKind::DropUniqueConstraint {
                    table: table.clone(),
                    constraint: constraint.clone(),
                }
            }
            ChangeKind::DropUniqueConstraint { table, constraint } => {
                ChangeKind::AddUniqueConstraint {
                    table: table.clone(),
                    constraint: constraint.clone(),
                }
            }
            ChangeKind::DropTable { .. } | ChangeKind::DropColumn { .. } => return None,
        };
        Some(Self::assessed(kind))
    }

    /// Returns a human-readable description of this change.
    #[must_use]
    pub fn description(&self) -> String {
        match &self.kind {
            ChangeKind::AddTable { table } => format!("Create table '{}'", table.name),
            ChangeKind::DropTable { table } => format!("Drop table '{}'", table.name),
            ChangeKind::RenameTable { from, to, .. } => {
                format!("Rename table '{}' to '{}'", from, to)
            }
            ChangeKind::AddColumn { table, column } => {
                format!("Add column '{}' to table '{}'", column.name, table)
            }
            ChangeKind::DropColumn { table, column } => {
                format!("Drop column '{}' from table '{}'", column.name, table)
            }
            ChangeKind::RenameColumn {
                table, from, to, ..
            } => format!("Rename column '{}' to '{}' in table '{}'", from, to, table),
            ChangeKind::AlterColumnType {
                table,
                column,
                from,
                to,
                ..
            } => format!(
                "Change type of column '{}.{}' from {} to {}",
                table,
                column,
                from.canonical(),
                to.canonical()
            ),
            ChangeKind::AlterColumnNullability {
                table, column, to, ..
            } => {
                if *to {
                    format!("Make column '{}.{}' nullable", table, column)
                } else {
                    format!("Make column '{}.{}' NOT NULL", table, column)
                }
            }
            ChangeKind::AlterDefault {
                table, column, to, ..
            } => match to {
                Some(value) => format!("Set default of column '{}.{}' to {}", table, column, value),
                None => format!("Drop default of column '{}.{}'", table, column),
            },
            ChangeKind::AddForeignKey { table, foreign_key } => format!(
                "Add foreign key '{}' to table '{}'",
                foreign_key.name, table
            ),
            ChangeKind::DropForeignKey { table, foreign_key } => format!(
                "Drop foreign key '{}' from table '{}'",
                foreign_key.name, table
            ),
            ChangeKind::AddUniqueConstraint { table, constraint } => format!(
                "Add unique constraint '{}' to table '{}'",
                constraint.name, table
            ),
            ChangeKind::DropUniqueConstraint { table, constraint } => format!(
                "Drop unique constraint '{}' from table '{}'",
                constraint.name, table
            ),
        }
    }
}

/// Risk of a rename given how the entities were paired.
fn rename_risk(basis: MatchBasis) -> RiskClass {
    match basis {
        MatchBasis::ExactName | MatchBasis::NormalizedName => RiskClass::Safe,
        MatchBasis::RenameHeuristic | MatchBasis::Unmatched => RiskClass::RequiresManualReview,
    }
}

//! Error types for the planning engine.

/// Errors that can occur while building snapshots or planning a migration.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Input rows do not describe a structurally valid schema.
    #[error("Malformed schema at {}: {reason}", location(.table, .column.as_deref()))]
    MalformedSchema {
        /// Offending table.
        table: String,
        /// Offending column, when the problem is column-scoped.
        column: Option<String>,
        /// What is wrong.
        reason: String,
    },

    /// The changes cannot be put in any valid execution order.
    #[error(
        "Cyclic dependency between changes: {}{}",
        .changes.join(" <-> "),
        constraints_suffix(.constraints)
    )]
    CyclicDependency {
        /// Descriptions of the changes caught in the cycle.
        changes: Vec<String>,
        /// Foreign key constraints that create the cycle.
        constraints: Vec<String>,
    },

    /// Matching options are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An enrichment collaborator failed.
    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    /// IO error (reading row or config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PlanError {
    /// Creates a table-scoped `MalformedSchema` error.
    pub(crate) fn malformed_table(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSchema {
            table: table.into(),
            column: None,
            reason: reason.into(),
        }
    }

    /// Creates a column-scoped `MalformedSchema` error.
    pub(crate) fn malformed_column(
        table: impl Into<String>,
        column: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedSchema {
            table: table.into(),
            column: Some(column.into()),
            reason: reason.into(),
        }
    }
}

fn location(table: &str, column: Option<&str>) -> String {
    match column {
        Some(column) => format!("'{}.{}'", table, column),
        None => format!("'{}'", table),
    }
}

fn constraints_suffix(constraints: &[String]) -> String {
    if constraints.is_empty() {
        String::new()
    } else {
        format!(" (constraints: {})", constraints.join(", "))
    }
}

/// Result type for planning operations.
pub type Result<T> = std::result::Result<T, PlanError>;

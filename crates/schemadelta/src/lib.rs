//! Schema diff and dependency-ordered migration planning.
//!
//! `schemadelta` compares two versions of a relational schema, captured as
//! flat catalog exports, and produces an ordered migration plan where every
//! change carries a risk class:
//! - Renames are detected instead of being reported as drop + add pairs
//! - Changes are ordered so constraints never point at missing objects
//! - SQL generation is dialect-aware (PostgreSQL, SQL Server, SQLite)
//!
//! # Architecture
//!
//! - **Builder** - Validates raw export rows into a [`SchemaSnapshot`]
//! - **Matcher** - Pairs tables and columns across snapshots, including renames
//! - **Diff** - Turns matched pairs into risk-tagged change operations
//! - **Resolver** - Orders changes topologically into a [`MigrationPlan`]
//! - **Emitter** - Renders a plan as a SQL script for a dialect
//!
//! # Example
//!
//! ```rust
//! use schemadelta::prelude::*;
//!
//! let before = build(&[
//!     RawRow::new("customers", "id", "bigint").nullable(false).primary_key().position(1),
//!     RawRow::new("customers", "full_name", "varchar(255)").position(2),
//! ])?;
//! let after = build(&[
//!     RawRow::new("customers", "id", "bigint").nullable(false).primary_key().position(1),
//!     RawRow::new("customers", "legal_name", "varchar(255)").position(2),
//! ])?;
//!
//! let plan = compare(&before, &after, &MatchOptions::default())?;
//! assert_eq!(plan.total(), 1);
//!
//! let script = render(&plan, &PostgresDialect::new());
//! assert!(script.contains("RENAME COLUMN \"full_name\" TO \"legal_name\""));
//! # Ok::<(), schemadelta::error::PlanError>(())
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Render a migration script
//! schemadelta compare --before old.json --after new.json --dialect mssql
//!
//! # Machine-readable plan
//! schemadelta compare --before old.json --after new.json --format json
//!
//! # Show the normalized model of an export
//! schemadelta inspect old.json
//! ```

pub mod builder;
pub mod config;
pub mod dialect;
pub mod diff;
pub mod emitter;
pub mod enrich;
pub mod error;
pub mod matcher;
pub mod operations;
pub mod plan;
pub mod resolver;
pub mod schema;
pub mod types;

use tracing::info;

use crate::config::MatchOptions;
use crate::error::Result;
use crate::plan::MigrationPlan;
use crate::schema::SchemaSnapshot;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::{build, load_rows, parse_rows, RawRow, RawValue};
    pub use crate::compare;
    pub use crate::config::MatchOptions;
    pub use crate::dialect::{
        Dialect, MigrationDialect, MssqlDialect, PostgresDialect, SqliteDialect,
    };
    pub use crate::diff::{diff, PlanWarning, SchemaDiff};
    pub use crate::emitter::render;
    pub use crate::enrich::{enrich_with, PlainSummary, PlanEnricher};
    pub use crate::error::{PlanError, Result};
    pub use crate::matcher::{match_schemas, EntityMatch, MatchBasis, SchemaMatches};
    pub use crate::operations::{ChangeKind, ChangeOp, RiskClass};
    pub use crate::plan::{ChangeRecord, MigrationPlan, RiskSummary};
    pub use crate::resolver::order;
    pub use crate::schema::{
        ColumnSpec, ForeignKeySpec, SchemaSnapshot, TableSpec, UniqueConstraint,
    };
    pub use crate::types::{ColumnType, TypeCategory};
}

/// Compares two snapshots and returns the ordered migration plan that turns
/// `before` into `after`.
///
/// Fails with [`error::PlanError::InvalidConfig`] for out-of-range options and
/// with [`error::PlanError::CyclicDependency`] when the changes cannot be
/// sequenced.
pub fn compare(
    before: &SchemaSnapshot,
    after: &SchemaSnapshot,
    options: &MatchOptions,
) -> Result<MigrationPlan> {
    options.validate()?;
    let matches = matcher::match_schemas(before, after, options);
    let changes = diff::diff(&matches, before, after);
    let plan = resolver::order(changes)?;
    info!(
        changes = plan.total(),
        safe = plan.summary().safe,
        data_loss_risk = plan.summary().data_loss_risk,
        requires_manual_review = plan.summary().requires_manual_review,
        "compared schemas"
    );
    Ok(plan)
}

//! Diff computer.
//!
//! Turns the matcher's pairing decisions into a flat, unordered list of
//! [`ChangeOp`]s. Ordering is the resolver's job; this stage only decides
//! *what* changes and how risky each change is.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::matcher::{EntityMatch, MatchBasis, SchemaMatches, TableMatch};
use crate::operations::{ChangeKind, ChangeOp, RiskClass};
use crate::schema::{normalize_name, ForeignKeySpec, SchemaSnapshot, TableSpec, UniqueConstraint};

/// Differences reported alongside the plan that produce no DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
    /// The primary key of a surviving table changed. Most databases need the
    /// key dropped and recreated by hand.
    PrimaryKeyChanged {
        /// Table name.
        table: String,
        /// Key columns before.
        old_columns: Vec<String>,
        /// Key columns after.
        new_columns: Vec<String>,
    },
    /// The relative ordering of surviving columns changed. Most databases
    /// cannot reorder columns without recreating the table.
    ColumnOrderChanged {
        /// Table name.
        table: String,
        /// Column names in the old order.
        old_order: Vec<String>,
        /// Column names in the new order.
        new_order: Vec<String>,
    },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryKeyChanged {
                table,
                old_columns,
                new_columns,
            } => write!(
                f,
                "primary key of '{}' changed from ({}) to ({})",
                table,
                old_columns.join(", "),
                new_columns.join(", ")
            ),
            Self::ColumnOrderChanged { table, .. } => {
                write!(f, "column order of '{}' changed", table)
            }
        }
    }
}

/// The unordered result of diffing two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Atomic changes, in discovery order.
    pub changes: Vec<ChangeOp>,
    /// Differences that are reported but not executed.
    pub warnings: Vec<PlanWarning>,
}

impl SchemaDiff {
    /// Returns `true` if nothing differs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.warnings.is_empty()
    }
}

impl From<Vec<ChangeOp>> for SchemaDiff {
    fn from(changes: Vec<ChangeOp>) -> Self {
        Self {
            changes,
            warnings: Vec::new(),
        }
    }
}

/// Before-side names mapped onto after-side names for paired entities.
///
/// Keys are normalized before-names; unmapped names pass through unchanged.
#[derive(Default)]
struct Renames {
    tables: HashMap<String, String>,
    columns: HashMap<(String, String), String>,
}

impl Renames {
    fn from_matches(matches: &SchemaMatches) -> Self {
        let mut renames = Self::default();
        for m in &matches.tables {
            let Some((before, after)) = m.table.pair() else {
                continue;
            };
            renames
                .tables
                .insert(normalize_name(before), after.to_string());
            for (b, a) in m.columns.iter().filter_map(EntityMatch::pair) {
                renames
                    .columns
                    .insert((normalize_name(before), normalize_name(b)), a.to_string());
            }
        }
        renames
    }

    fn table(&self, before: &str) -> String {
        self.tables
            .get(&normalize_name(before))
            .cloned()
            .unwrap_or_else(|| before.to_string())
    }

    fn column(&self, before_table: &str, before: &str) -> String {
        self.columns
            .get(&(normalize_name(before_table), normalize_name(before)))
            .cloned()
            .unwrap_or_else(|| before.to_string())
    }

    fn columns(&self, before_table: &str, columns: &[String]) -> Vec<String> {
        columns.iter().map(|c| self.column(before_table, c)).collect()
    }

    fn foreign_key(&self, before_table: &str, fk: &ForeignKeySpec) -> ForeignKeySpec {
        ForeignKeySpec {
            name: fk.name.clone(),
            columns: self.columns(before_table, &fk.columns),
            references_table: self.table(&fk.references_table),
            references_columns: self.columns(&fk.references_table, &fk.references_columns),
        }
    }

    fn unique(&self, before_table: &str, uc: &UniqueConstraint) -> UniqueConstraint {
        UniqueConstraint {
            name: uc.name.clone(),
            columns: self.columns(before_table, &uc.columns),
        }
    }
}

fn normalized(names: &[String]) -> Vec<String> {
    names.iter().map(|n| normalize_name(n)).collect()
}

/// Content identity of a foreign key, ignoring its constraint name.
fn fk_key(fk: &ForeignKeySpec) -> (Vec<String>, String, Vec<String>) {
    (
        normalized(&fk.columns),
        normalize_name(&fk.references_table),
        normalized(&fk.references_columns),
    )
}

/// Content identity of a unique constraint, ignoring its name and column order.
fn unique_key(uc: &UniqueConstraint) -> BTreeSet<String> {
    uc.columns.iter().map(|c| normalize_name(c)).collect()
}

/// Computes the changes that turn `before` into `after` given the pairing
/// decisions in `matches`.
#[must_use]
pub fn diff(
    matches: &SchemaMatches,
    before: &SchemaSnapshot,
    after: &SchemaSnapshot,
) -> SchemaDiff {
    let renames = Renames::from_matches(matches);
    let dropped: BTreeSet<String> = matches
        .tables
        .iter()
        .filter(|m| m.table.after.is_none())
        .filter_map(|m| m.table.before.as_deref().map(normalize_name))
        .collect();

    let mut result = SchemaDiff::default();
    for m in &matches.tables {
        match (&m.table.before, &m.table.after) {
            (Some(b), Some(a)) => {
                if let (Some(old), Some(new)) = (before.table(b), after.table(a)) {
                    diff_table(m, old, new, &renames, &mut result);
                }
            }
            (Some(b), None) => {
                if let Some(old) = before.table(b) {
                    drop_table(old, &dropped, &mut result.changes);
                }
            }
            (None, Some(a)) => {
                if let Some(new) = after.table(a) {
                    result
                        .changes
                        .push(ChangeOp::assessed(ChangeKind::AddTable { table: new.clone() }));
                }
            }
            (None, None) => {}
        }
    }

    debug!(
        changes = result.changes.len(),
        warnings = result.warnings.len(),
        "computed schema diff"
    );
    result
}

/// Drops a table, first dropping its foreign keys into other dropped tables
/// so the drops can run in any order.
fn drop_table(table: &TableSpec, dropped: &BTreeSet<String>, changes: &mut Vec<ChangeOp>) {
    for fk in &table.foreign_keys {
        let target = normalize_name(&fk.references_table);
        if target != normalize_name(&table.name) && dropped.contains(&target) {
            changes.push(ChangeOp::assessed(ChangeKind::DropForeignKey {
                table: table.name.clone(),
                foreign_key: fk.clone(),
            }));
        }
    }
    changes.push(ChangeOp::assessed(ChangeKind::DropTable {
        table: table.clone(),
    }));
}

fn diff_table(
    m: &TableMatch,
    old: &TableSpec,
    new: &TableSpec,
    renames: &Renames,
    result: &mut SchemaDiff,
) {
    let table = new.name.clone();
    let changes = &mut result.changes;

    if old.name != new.name {
        changes.push(ChangeOp::assessed(ChangeKind::RenameTable {
            from: old.name.clone(),
            to: new.name.clone(),
            basis: m.table.basis,
        }));
    }

    let mut added = Vec::new();
    for cm in &m.columns {
        match (&cm.before, &cm.after) {
            (Some(b), Some(a)) => {
                let (Some(oc), Some(nc)) = (old.get_column(b), new.get_column(a)) else {
                    continue;
                };
                if oc.name != nc.name {
                    changes.push(ChangeOp::assessed(ChangeKind::RenameColumn {
                        table: table.clone(),
                        from: oc.name.clone(),
                        to: nc.name.clone(),
                        basis: cm.basis,
                    }));
                }
                if !oc.column_type.is_equivalent(&nc.column_type) {
                    changes.push(ChangeOp::assessed(ChangeKind::AlterColumnType {
                        table: table.clone(),
                        column: nc.name.clone(),
                        from: oc.column_type.clone(),
                        to: nc.column_type.clone(),
                        nullable: oc.nullable,
                        default: oc.default.clone(),
                    }));
                }
                if oc.nullable != nc.nullable {
                    changes.push(ChangeOp::assessed(ChangeKind::AlterColumnNullability {
                        table: table.clone(),
                        column: nc.name.clone(),
                        column_type: nc.column_type.clone(),
                        from: oc.nullable,
                        to: nc.nullable,
                    }));
                }
                if oc.default != nc.default {
                    changes.push(ChangeOp::assessed(ChangeKind::AlterDefault {
                        table: table.clone(),
                        column: nc.name.clone(),
                        from: oc.default.clone(),
                        to: nc.default.clone(),
                    }));
                }
            }
            (Some(b), None) => {
                if let Some(oc) = old.get_column(b) {
                    changes.push(ChangeOp::assessed(ChangeKind::DropColumn {
                        table: table.clone(),
                        column: oc.clone(),
                    }));
                }
            }
            (None, Some(a)) => {
                if let Some(nc) = new.get_column(a) {
                    added.push(nc);
                    changes.push(ChangeOp::assessed(ChangeKind::AddColumn {
                        table: table.clone(),
                        column: nc.clone(),
                    }));
                }
            }
            (None, None) => {}
        }
    }

    // Foreign keys, as set differences over translated content.
    let old_fks: Vec<ForeignKeySpec> = old
        .foreign_keys
        .iter()
        .map(|fk| renames.foreign_key(&old.name, fk))
        .collect();
    let new_keys: BTreeSet<_> = new.foreign_keys.iter().map(fk_key).collect();
    let old_keys: BTreeSet<_> = old_fks.iter().map(fk_key).collect();

    for fk in old_fks.iter().filter(|fk| !new_keys.contains(&fk_key(fk))) {
        changes.push(ChangeOp::assessed(ChangeKind::DropForeignKey {
            table: table.clone(),
            foreign_key: fk.clone(),
        }));
    }
    for fk in new.foreign_keys.iter().filter(|fk| !old_keys.contains(&fk_key(fk))) {
        // Freshly added columns without a default hold only NULLs, which
        // cannot violate the reference.
        let unconstrained = fk.columns.iter().all(|c| {
            added
                .iter()
                .any(|a| normalize_name(&a.name) == normalize_name(c) && a.default.is_none())
        });
        let risk = if unconstrained {
            RiskClass::Safe
        } else {
            RiskClass::RequiresManualReview
        };
        changes.push(ChangeOp::new(
            ChangeKind::AddForeignKey {
                table: table.clone(),
                foreign_key: fk.clone(),
            },
            risk,
        ));
    }

    // Unique constraints.
    let old_ucs: Vec<UniqueConstraint> = old
        .unique_constraints
        .iter()
        .map(|uc| renames.unique(&old.name, uc))
        .collect();
    let new_keys: BTreeSet<_> = new.unique_constraints.iter().map(unique_key).collect();
    let old_keys: BTreeSet<_> = old_ucs.iter().map(unique_key).collect();

    for uc in old_ucs.iter().filter(|uc| !new_keys.contains(&unique_key(uc))) {
        changes.push(ChangeOp::assessed(ChangeKind::DropUniqueConstraint {
            table: table.clone(),
            constraint: uc.clone(),
        }));
    }
    for uc in new
        .unique_constraints
        .iter()
        .filter(|uc| !old_keys.contains(&unique_key(uc)))
    {
        changes.push(ChangeOp::assessed(ChangeKind::AddUniqueConstraint {
            table: table.clone(),
            constraint: uc.clone(),
        }));
    }

    // Warnings.
    let old_pk = renames.columns(&old.name, &old.primary_key);
    if normalized(&old_pk) != normalized(&new.primary_key) {
        result.warnings.push(PlanWarning::PrimaryKeyChanged {
            table: table.clone(),
            old_columns: old_pk,
            new_columns: new.primary_key.clone(),
        });
    }

    let survivors: Vec<(u32, u32, String)> = m
        .columns
        .iter()
        .filter(|cm| cm.basis != MatchBasis::Unmatched)
        .filter_map(|cm| {
            let (b, a) = cm.pair()?;
            Some((old.get_column(b)?.ordinal, new.get_column(a)?.ordinal, a.to_string()))
        })
        .collect();
    let mut old_order = survivors.clone();
    old_order.sort_by_key(|s| s.0);
    let mut new_order = survivors;
    new_order.sort_by_key(|s| s.1);
    let old_order: Vec<String> = old_order.into_iter().map(|s| s.2).collect();
    let new_order: Vec<String> = new_order.into_iter().map(|s| s.2).collect();
    if old_order != new_order {
        result.warnings.push(PlanWarning::ColumnOrderChanged {
            table,
            old_order,
            new_order,
        });
    }
}

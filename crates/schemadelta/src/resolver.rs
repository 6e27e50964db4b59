//! Dependency resolver.
//!
//! Builds a precedence graph over the diffed changes (an edge `a -> b`
//! means `a` must execute before `b`) and orders it topologically. Among
//! changes that are free to run, the one with the smallest
//! `(rank, table, item, description)` key goes first, so identical input
//! always yields an identical plan.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::diff::SchemaDiff;
use crate::error::{PlanError, Result};
use crate::operations::{ChangeKind, ChangeOp};
use crate::plan::MigrationPlan;
use crate::schema::{normalize_name, ForeignKeySpec};

fn same(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

fn has(columns: &[String], column: &str) -> bool {
    columns.iter().any(|c| same(c, column))
}

/// Returns true when `fk`, declared on `table`, uses `column` of `target` on
/// either end.
fn fk_uses(fk: &ForeignKeySpec, table: &str, target: &str, column: &str) -> bool {
    (same(table, target) && has(&fk.columns, column))
        || (same(&fk.references_table, target) && has(&fk.references_columns, column))
}

/// Returns true when `fk` references exactly `columns` of `table`, i.e. it
/// relies on the unique constraint or key over those columns.
fn fk_targets(fk: &ForeignKeySpec, table: &str, columns: &[String]) -> bool {
    same(&fk.references_table, table)
        && fk.references_columns.len() == columns.len()
        && fk.references_columns.iter().all(|c| has(columns, c))
}

/// Returns true when `change` alters `table.column` in place.
fn alters_column(change: &ChangeKind, table: &str, column: &str) -> bool {
    match change {
        ChangeKind::AlterColumnNullability { table: t, column: c, .. }
        | ChangeKind::AlterDefault { table: t, column: c, .. } => same(t, table) && same(c, column),
        _ => false,
    }
}

/// Returns true when `change` operates on or points at `target`.
fn touches_table(change: &ChangeKind, target: &str) -> bool {
    if same(change.table(), target) {
        return true;
    }
    match change {
        ChangeKind::AddTable { table } => table
            .foreign_keys
            .iter()
            .any(|fk| same(&fk.references_table, target)),
        ChangeKind::AddForeignKey { foreign_key, .. }
        | ChangeKind::DropForeignKey { foreign_key, .. } => {
            same(&foreign_key.references_table, target)
        }
        _ => false,
    }
}

/// Returns true when `change` operates on or points at `table.column`.
fn touches_column(change: &ChangeKind, table: &str, column: &str) -> bool {
    match change {
        ChangeKind::AlterColumnType { table: t, column: c, .. }
        | ChangeKind::AlterColumnNullability { table: t, column: c, .. }
        | ChangeKind::AlterDefault { table: t, column: c, .. } => same(t, table) && same(c, column),
        ChangeKind::AddForeignKey { table: t, foreign_key }
        | ChangeKind::DropForeignKey { table: t, foreign_key } => {
            fk_uses(foreign_key, t, table, column)
        }
        ChangeKind::AddUniqueConstraint { table: t, constraint }
        | ChangeKind::DropUniqueConstraint { table: t, constraint } => {
            same(t, table) && has(&constraint.columns, column)
        }
        ChangeKind::AddTable { table: t } => t
            .foreign_keys
            .iter()
            .any(|fk| fk_uses(fk, &t.name, table, column)),
        _ => false,
    }
}

/// Returns true when change `a` must run before change `b`.
fn must_precede(a: &ChangeKind, b: &ChangeKind) -> bool {
    match a {
        // Referenced tables exist before anything points at them.
        ChangeKind::AddTable { table } => match b {
            ChangeKind::AddForeignKey { foreign_key, .. } => {
                same(&foreign_key.references_table, &table.name)
            }
            ChangeKind::AddTable { table: other } => {
                !same(&other.name, &table.name)
                    && other
                        .foreign_keys
                        .iter()
                        .any(|fk| same(&fk.references_table, &table.name))
            }
            _ => false,
        },

        // Renamed entities are addressed by their new name everywhere else.
        ChangeKind::RenameTable { to, .. } => {
            !matches!(b, ChangeKind::RenameTable { .. }) && touches_table(b, to)
        }
        ChangeKind::RenameColumn { table, to, .. } => {
            !matches!(b, ChangeKind::RenameColumn { .. }) && touches_column(b, table, to)
        }

        ChangeKind::AddColumn { table, column } => match b {
            ChangeKind::AddForeignKey { .. }
            | ChangeKind::AddUniqueConstraint { .. }
            | ChangeKind::AddTable { .. } => touches_column(b, table, &column.name),
            _ => false,
        },

        // The type change keeps the column's nullability and default as they
        // were; the changes that own those transitions follow it.
        ChangeKind::AlterColumnType { table, column, .. } => match b {
            ChangeKind::AddForeignKey { .. } | ChangeKind::AddTable { .. } => {
                touches_column(b, table, column)
            }
            _ => alters_column(b, table, column),
        },

        // A foreign key needs a unique key over the columns it references.
        ChangeKind::AddUniqueConstraint { table, constraint } => match b {
            ChangeKind::AddForeignKey { foreign_key, .. } => {
                fk_targets(foreign_key, table, &constraint.columns)
            }
            ChangeKind::AddTable { table: other } => other
                .foreign_keys
                .iter()
                .any(|fk| fk_targets(fk, table, &constraint.columns)),
            _ => false,
        },

        ChangeKind::DropForeignKey { table, foreign_key } => match b {
            ChangeKind::DropColumn { table: t, .. } => {
                same(t, table) || same(t, &foreign_key.references_table)
            }
            ChangeKind::DropTable { table: t } => {
                same(&t.name, table) || same(&t.name, &foreign_key.references_table)
            }
            ChangeKind::AlterColumnType { table: t, column, .. } => {
                fk_uses(foreign_key, table, t, column)
            }
            ChangeKind::AddForeignKey { foreign_key: other, .. } => {
                same(&other.name, &foreign_key.name)
            }
            ChangeKind::DropUniqueConstraint { table: t, constraint } => {
                fk_targets(foreign_key, t, &constraint.columns)
            }
            _ => false,
        },

        // A dropped table's own foreign keys go with it, and must be gone
        // before the surviving keys and columns they reference.
        ChangeKind::DropTable { table } => match b {
            ChangeKind::DropUniqueConstraint { table: t, constraint } => table
                .foreign_keys
                .iter()
                .any(|fk| fk_targets(fk, t, &constraint.columns)),
            ChangeKind::DropColumn { table: t, column } => {
                !same(t, &table.name)
                    && table.foreign_keys.iter().any(|fk| {
                        same(&fk.references_table, t) && has(&fk.references_columns, &column.name)
                    })
            }
            _ => false,
        },

        ChangeKind::DropUniqueConstraint { table, constraint } => match b {
            ChangeKind::DropColumn { table: t, column } => {
                same(t, table) && has(&constraint.columns, &column.name)
            }
            ChangeKind::DropTable { table: t } => same(&t.name, table),
            ChangeKind::AddUniqueConstraint { constraint: other, .. } => {
                same(&other.name, &constraint.name)
            }
            _ => false,
        },

        ChangeKind::DropColumn { table, .. } => {
            matches!(b, ChangeKind::DropTable { table: t } if same(&t.name, table))
        }

        _ => false,
    }
}

/// Deterministic tie-break key for changes that are free to run.
type Priority = (u8, String, String, String, usize);

fn priority(index: usize, change: &ChangeOp) -> Priority {
    let item = change
        .kind
        .column()
        .or(change.kind.constraint())
        .map(normalize_name)
        .unwrap_or_default();
    (
        change.kind.rank(),
        normalize_name(change.kind.table()),
        item,
        change.description(),
        index,
    )
}

/// Orders diffed changes into an executable plan.
///
/// Fails with [`PlanError::CyclicDependency`] when no order satisfies every
/// precedence constraint, naming the changes and foreign keys involved.
pub fn order(diff: SchemaDiff) -> Result<MigrationPlan> {
    let SchemaDiff { changes, warnings } = diff;
    let n = changes.len();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (i, a) in changes.iter().enumerate() {
        for (j, b) in changes.iter().enumerate() {
            if i != j && must_precede(&a.kind, &b.kind) {
                successors[i].push(j);
                in_degree[j] += 1;
            }
        }
    }
    let edges: usize = successors.iter().map(Vec::len).sum();
    debug!(changes = n, edges, "built dependency graph");

    let keys: Vec<Priority> = changes
        .iter()
        .enumerate()
        .map(|(i, c)| priority(i, c))
        .collect();
    let mut ready: BTreeSet<&Priority> = keys.iter().filter(|k| in_degree[k.4] == 0).collect();

    let mut sequence = Vec::with_capacity(n);
    while let Some(key) = ready.pop_first() {
        let i = key.4;
        sequence.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.insert(&keys[j]);
            }
        }
    }

    if sequence.len() < n {
        return Err(cycle_error(&changes, &successors, &sequence, &keys));
    }

    let mut slots: Vec<Option<ChangeOp>> = changes.into_iter().map(Some).collect();
    let ordered: Vec<ChangeOp> = sequence.iter().filter_map(|&i| slots[i].take()).collect();
    Ok(MigrationPlan::new(ordered, warnings))
}

/// Builds the error for the changes left over after the sort.
///
/// Leftovers that only wait on the cycle (without being part of it) are
/// peeled off first, so the report names just the interlocked changes.
fn cycle_error(
    changes: &[ChangeOp],
    successors: &[Vec<usize>],
    sequence: &[usize],
    keys: &[Priority],
) -> PlanError {
    let done: HashSet<usize> = sequence.iter().copied().collect();
    let mut stuck: BTreeSet<usize> = (0..changes.len()).filter(|i| !done.contains(i)).collect();

    loop {
        let sinks: Vec<usize> = stuck
            .iter()
            .copied()
            .filter(|&i| !successors[i].iter().any(|j| stuck.contains(j)))
            .collect();
        if sinks.is_empty() {
            break;
        }
        for i in sinks {
            stuck.remove(&i);
        }
    }

    let mut members: Vec<usize> = stuck.iter().copied().collect();
    members.sort_by(|a, b| keys[*a].cmp(&keys[*b]));

    let stuck_tables: Vec<&str> = members
        .iter()
        .filter_map(|&i| match &changes[i].kind {
            ChangeKind::AddTable { table } => Some(table.name.as_str()),
            _ => None,
        })
        .collect();

    let mut constraints = BTreeSet::new();
    for &i in &members {
        match &changes[i].kind {
            ChangeKind::AddTable { table } => {
                for fk in &table.foreign_keys {
                    if !same(&fk.references_table, &table.name)
                        && stuck_tables.iter().any(|t| same(t, &fk.references_table))
                    {
                        constraints.insert(fk.name.clone());
                    }
                }
            }
            ChangeKind::AddForeignKey { foreign_key, .. }
            | ChangeKind::DropForeignKey { foreign_key, .. } => {
                constraints.insert(foreign_key.name.clone());
            }
            _ => {}
        }
    }

    let changes: Vec<String> = members.iter().map(|&i| changes[i].description()).collect();
    let constraints: Vec<String> = constraints.into_iter().collect();
    warn!(changes = ?changes, constraints = ?constraints, "cyclic dependency between changes");
    PlanError::CyclicDependency {
        changes,
        constraints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchBasis;
    use crate::operations::RiskClass;
    use crate::schema::{ColumnSpec, TableSpec, UniqueConstraint};
    use crate::types::ColumnType;

    fn position(plan: &MigrationPlan, description: &str) -> usize {
        plan.changes()
            .iter()
            .position(|c| c.description() == description)
            .unwrap_or_else(|| panic!("missing change: {}", description))
    }

    fn fk(table: &str, column: &str, target: &str) -> ForeignKeySpec {
        ForeignKeySpec::new(table, vec![column.into()], target, vec!["id".into()])
    }

    #[test]
    fn test_empty() {
        let plan = order(SchemaDiff::default()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.total(), 0);
    }

    #[test]
    fn test_add_column_before_foreign_key() {
        let changes = vec![
            ChangeOp::assessed(ChangeKind::AddForeignKey {
                table: "orders".into(),
                foreign_key: fk("orders", "buyer_id", "users"),
            }),
            ChangeOp::assessed(ChangeKind::AddColumn {
                table: "orders".into(),
                column: ColumnSpec::new("buyer_id", "BIGINT"),
            }),
        ];
        let plan = order(changes.into()).unwrap();
        assert!(
            position(&plan, "Add column 'buyer_id' to table 'orders'")
                < position(&plan, "Add foreign key 'fk_orders_buyer_id_users' to table 'orders'")
        );
    }

    #[test]
    fn test_new_table_before_foreign_key_into_it() {
        let teams = TableSpec::new("teams").column(ColumnSpec::new("id", "INT").not_null());
        let changes = vec![
            ChangeOp::assessed(ChangeKind::AddForeignKey {
                table: "users".into(),
                foreign_key: fk("users", "team_id", "teams"),
            }),
            ChangeOp::assessed(ChangeKind::AddTable { table: teams }),
        ];
        let plan = order(changes.into()).unwrap();
        assert_eq!(plan.changes()[0].kind.name(), "AddTable");
    }

    #[test]
    fn test_drop_foreign_key_before_drops() {
        let orders = TableSpec::new("orders").column(ColumnSpec::new("user_id", "INT"));
        let users = TableSpec::new("users").column(ColumnSpec::new("id", "INT"));
        let changes = vec![
            ChangeOp::assessed(ChangeKind::DropTable { table: users }),
            ChangeOp::assessed(ChangeKind::DropTable { table: orders }),
            ChangeOp::assessed(ChangeKind::DropForeignKey {
                table: "orders".into(),
                foreign_key: fk("orders", "user_id", "users"),
            }),
        ];
        let plan = order(changes.into()).unwrap();
        let kinds: Vec<_> = plan.changes().iter().map(|c| c.kind.name()).collect();
        assert_eq!(kinds, vec!["DropForeignKey", "DropTable", "DropTable"]);
        assert_eq!(plan.summary().data_loss_risk, 2);
    }

    #[test]
    fn test_drop_unique_before_drop_column() {
        let changes = vec![
            ChangeOp::assessed(ChangeKind::DropColumn {
                table: "users".into(),
                column: ColumnSpec::new("email", "TEXT"),
            }),
            ChangeOp::assessed(ChangeKind::DropUniqueConstraint {
                table: "users".into(),
                constraint: UniqueConstraint::new("users", vec!["email".into()]),
            }),
        ];
        let plan = order(changes.into()).unwrap();
        assert_eq!(plan.changes()[0].kind.name(), "DropUniqueConstraint");
    }

    #[test]
    fn test_unique_constraint_before_references_to_it() {
        let code_fk = |table: &str| {
            ForeignKeySpec::new(table, vec!["user_code".into()], "a_users", vec!["code".into()])
        };
        let z_new = TableSpec::new("z_new")
            .column(ColumnSpec::new("user_code", "TEXT"))
            .foreign_key(["user_code"], "a_users", ["code"]);
        let changes = vec![
            ChangeOp::assessed(ChangeKind::AddTable { table: z_new }),
            ChangeOp::assessed(ChangeKind::AddForeignKey {
                table: "orders".into(),
                foreign_key: code_fk("orders"),
            }),
            ChangeOp::assessed(ChangeKind::AddUniqueConstraint {
                table: "a_users".into(),
                constraint: UniqueConstraint::new("a_users", vec!["code".into()]),
            }),
        ];
        let plan = order(changes.into()).unwrap();
        let kinds: Vec<_> = plan.changes().iter().map(|c| c.kind.name()).collect();
        assert_eq!(kinds, vec!["AddUniqueConstraint", "AddTable", "AddForeignKey"]);
    }

    #[test]
    fn test_foreign_key_drop_before_unique_drop() {
        let changes = vec![
            ChangeOp::assessed(ChangeKind::DropUniqueConstraint {
                table: "a_users".into(),
                constraint: UniqueConstraint::new("a_users", vec!["code".into()]),
            }),
            ChangeOp::assessed(ChangeKind::DropForeignKey {
                table: "orders".into(),
                foreign_key: ForeignKeySpec::new(
                    "orders",
                    vec!["user_code".into()],
                    "a_users",
                    vec!["code".into()],
                ),
            }),
        ];
        let plan = order(changes.into()).unwrap();
        assert_eq!(plan.changes()[0].kind.name(), "DropForeignKey");
    }

    #[test]
    fn test_type_change_before_nullability_and_default() {
        let changes = vec![
            ChangeOp::assessed(ChangeKind::AlterDefault {
                table: "users".into(),
                column: "age".into(),
                from: None,
                to: Some("0".into()),
            }),
            ChangeOp::assessed(ChangeKind::AlterColumnNullability {
                table: "users".into(),
                column: "age".into(),
                column_type: ColumnType::parse("BIGINT"),
                from: true,
                to: false,
            }),
            ChangeOp::assessed(ChangeKind::AlterColumnType {
                table: "users".into(),
                column: "age".into(),
                from: ColumnType::parse("INT"),
                to: ColumnType::parse("BIGINT"),
                nullable: true,
                default: None,
            }),
        ];
        let plan = order(changes.into()).unwrap();
        assert_eq!(plan.changes()[0].kind.name(), "AlterColumnType");
    }

    #[test]
    fn test_rename_runs_before_dependent_alter() {
        let changes = vec![
            ChangeOp::assessed(ChangeKind::AlterDefault {
                table: "accounts".into(),
                column: "status".into(),
                from: None,
                to: Some("'new'".into()),
            }),
            ChangeOp::assessed(ChangeKind::RenameTable {
                from: "users".into(),
                to: "accounts".into(),
                basis: MatchBasis::RenameHeuristic,
            }),
        ];
        let plan = order(changes.into()).unwrap();
        assert_eq!(plan.changes()[0].kind.name(), "RenameTable");
    }

    #[test]
    fn test_tie_break_by_rank_then_name() {
        let changes = vec![
            ChangeOp::assessed(ChangeKind::DropColumn {
                table: "a".into(),
                column: ColumnSpec::new("x", "INT"),
            }),
            ChangeOp::assessed(ChangeKind::AddColumn {
                table: "b".into(),
                column: ColumnSpec::new("y", "INT"),
            }),
            ChangeOp::assessed(ChangeKind::AddColumn {
                table: "a".into(),
                column: ColumnSpec::new("z", "INT"),
            }),
        ];
        let plan = order(changes.into()).unwrap();
        let tables: Vec<_> = plan
            .changes()
            .iter()
            .map(|c| (c.kind.name(), c.kind.table()))
            .collect();
        assert_eq!(
            tables,
            vec![("AddColumn", "a"), ("AddColumn", "b"), ("DropColumn", "a")]
        );
    }

    #[test]
    fn test_mutual_new_tables_cycle() {
        let a = TableSpec::new("a")
            .column(ColumnSpec::new("id", "INT").not_null())
            .column(ColumnSpec::new("b_id", "INT"))
            .foreign_key(["b_id"], "b", ["id"]);
        let b = TableSpec::new("b")
            .column(ColumnSpec::new("id", "INT").not_null())
            .column(ColumnSpec::new("a_id", "INT"))
            .foreign_key(["a_id"], "a", ["id"]);
        let unrelated = ChangeOp::assessed(ChangeKind::AddColumn {
            table: "c".into(),
            column: ColumnSpec::new("note", "TEXT"),
        });
        let changes = vec![
            ChangeOp::assessed(ChangeKind::AddTable { table: a }),
            ChangeOp::assessed(ChangeKind::AddTable { table: b }),
            unrelated,
        ];

        match order(changes.into()) {
            Err(PlanError::CyclicDependency {
                changes,
                constraints,
            }) => {
                assert_eq!(changes, vec!["Create table 'a'", "Create table 'b'"]);
                assert_eq!(constraints, vec!["fk_a_b_id_b", "fk_b_a_id_a"]);
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        let tree = TableSpec::new("nodes")
            .column(ColumnSpec::new("id", "INT").not_null())
            .column(ColumnSpec::new("parent_id", "INT"))
            .foreign_key(["parent_id"], "nodes", ["id"]);
        let plan = order(vec![ChangeOp::assessed(ChangeKind::AddTable { table: tree })].into())
            .unwrap();
        assert_eq!(plan.total(), 1);
        assert_eq!(plan.changes()[0].risk, RiskClass::Safe);
    }
}

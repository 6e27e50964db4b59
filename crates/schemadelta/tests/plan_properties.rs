//! End-to-end properties of the comparison pipeline.
//!
//! Snapshots are built from export rows the same way the CLI builds them,
//! compared, and the resulting plans checked for ordering, risk tags and
//! rename detection.

use schemadelta::prelude::*;

fn snapshot(rows: Vec<RawRow>) -> SchemaSnapshot {
    build(&rows).unwrap()
}

fn plan(before: &SchemaSnapshot, after: &SchemaSnapshot) -> MigrationPlan {
    compare(before, after, &MatchOptions::default()).unwrap()
}

fn kinds(plan: &MigrationPlan) -> Vec<&'static str> {
    plan.changes().iter().map(|c| c.kind.name()).collect()
}

fn position(plan: &MigrationPlan, predicate: impl Fn(&ChangeKind) -> bool) -> usize {
    plan.changes()
        .iter()
        .position(|c| predicate(&c.kind))
        .unwrap()
}

// =============================================================================
// Fixtures
// =============================================================================

fn shop_v1() -> SchemaSnapshot {
    snapshot(vec![
        RawRow::new("users", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("users", "email", "varchar(255)").position(2),
        RawRow::new("users", "legacy_code", "int").position(3),
        RawRow::new("orders", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("orders", "status", "varchar(20)").position(2),
        RawRow::new("audit_log", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("audit_log", "payload", "text").position(2),
    ])
}

fn shop_v2() -> SchemaSnapshot {
    snapshot(vec![
        RawRow::new("users", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("users", "email", "varchar(255)").nullable(false).position(2),
        RawRow::new("users", "bio", "text").position(3),
        RawRow::new("orders", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("orders", "status", "varchar(20)").position(2),
        RawRow::new("orders", "user_id", "bigint")
            .position(3)
            .references("users.id"),
        RawRow::new("invoices", "number", "varchar(32)").nullable(false).primary_key().position(1),
        RawRow::new("invoices", "amount_due", "decimal(12,2)").position(2),
    ])
}

// =============================================================================
// Determinism and no-op diffs
// =============================================================================

#[test]
fn test_repeated_comparisons_are_identical() {
    let first = plan(&shop_v1(), &shop_v2());
    let second = plan(&shop_v1(), &shop_v2());
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    for dialect in Dialect::ALL {
        let renderer = dialect.renderer();
        assert_eq!(
            render(&first, renderer.as_ref()),
            render(&second, renderer.as_ref())
        );
    }
}

#[test]
fn test_snapshot_against_itself_is_empty() {
    for schema in [shop_v1(), shop_v2()] {
        let result = plan(&schema, &schema);
        assert!(result.is_empty());
        assert!(result.warnings().is_empty());
    }
}

#[test]
fn test_empty_snapshots() {
    let result = plan(&SchemaSnapshot::empty(), &SchemaSnapshot::empty());
    assert!(result.is_empty());
}

// =============================================================================
// Coverage
// =============================================================================

#[test]
fn test_every_added_or_dropped_entity_has_one_change() {
    let result = plan(&shop_v1(), &shop_v2());

    let count = |pred: &dyn Fn(&ChangeKind) -> bool| {
        result.changes().iter().filter(|c| pred(&c.kind)).count()
    };
    assert_eq!(
        count(&|k| matches!(k, ChangeKind::AddTable { table } if table.name == "invoices")),
        1
    );
    assert_eq!(
        count(&|k| matches!(k, ChangeKind::DropTable { table } if table.name == "audit_log")),
        1
    );
    assert_eq!(
        count(&|k| matches!(k, ChangeKind::AddColumn { column, .. } if column.name == "bio")),
        1
    );
    assert_eq!(
        count(&|k| matches!(k, ChangeKind::AddColumn { column, .. } if column.name == "user_id")),
        1
    );
    assert_eq!(
        count(&|k| {
            matches!(k, ChangeKind::DropColumn { column, .. } if column.name == "legacy_code")
        }),
        1
    );
}

#[test]
fn test_unchanged_entities_have_no_changes() {
    let result = plan(&shop_v1(), &shop_v2());
    assert!(result
        .changes()
        .iter()
        .all(|c| c.kind.column() != Some("status") && c.kind.column() != Some("id")));
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_added_column_precedes_its_foreign_key() {
    let result = plan(&shop_v1(), &shop_v2());
    let add_column = position(&result, |k| {
        matches!(k, ChangeKind::AddColumn { column, .. } if column.name == "user_id")
    });
    let add_fk = position(&result, |k| matches!(k, ChangeKind::AddForeignKey { .. }));
    assert!(add_column < add_fk);
}

#[test]
fn test_foreign_key_drop_precedes_column_and_table_drops() {
    let before = shop_v2();
    let after = snapshot(vec![
        RawRow::new("orders", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("orders", "status", "varchar(20)").position(2),
        RawRow::new("invoices", "number", "varchar(32)").nullable(false).primary_key().position(1),
        RawRow::new("invoices", "amount_due", "decimal(12,2)").position(2),
    ]);
    let result = plan(&before, &after);

    let drop_fk = position(&result, |k| matches!(k, ChangeKind::DropForeignKey { .. }));
    let drop_column = position(&result, |k| {
        matches!(k, ChangeKind::DropColumn { column, .. } if column.name == "user_id")
    });
    let drop_table = position(&result, |k| {
        matches!(k, ChangeKind::DropTable { table } if table.name == "users")
    });
    assert!(drop_fk < drop_column);
    assert!(drop_fk < drop_table);
}

#[test]
fn test_new_table_precedes_tables_referencing_it() {
    let before = SchemaSnapshot::empty();
    let after = snapshot(vec![
        RawRow::new("books", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("books", "author_id", "int").position(2).references("authors.id"),
        RawRow::new("authors", "id", "int").nullable(false).primary_key().position(1),
    ]);
    let result = plan(&before, &after);
    let authors = position(&result, |k| {
        matches!(k, ChangeKind::AddTable { table } if table.name == "authors")
    });
    let books = position(&result, |k| {
        matches!(k, ChangeKind::AddTable { table } if table.name == "books")
    });
    assert!(authors < books);
}

/// `a_users.code` is referenced by `orders.user_code`, with or without the
/// unique constraint that makes it a valid reference target.
fn coded_users(unique: bool, referenced: bool) -> Vec<RawRow> {
    let mut code = RawRow::new("a_users", "code", "varchar(20)").nullable(false).position(2);
    if unique {
        code = code.unique_group("code");
    }
    let mut user_code = RawRow::new("orders", "user_code", "varchar(20)").position(2);
    if referenced {
        user_code = user_code.references("a_users.code");
    }
    vec![
        RawRow::new("a_users", "id", "bigint").nullable(false).primary_key().position(1),
        code,
        RawRow::new("orders", "id", "bigint").nullable(false).primary_key().position(1),
        user_code,
    ]
}

fn is_unique_add(k: &ChangeKind) -> bool {
    match k {
        ChangeKind::AddUniqueConstraint { constraint, .. } => constraint.name == "uq_a_users_code",
        _ => false,
    }
}

fn is_unique_drop(k: &ChangeKind) -> bool {
    match k {
        ChangeKind::DropUniqueConstraint { constraint, .. } => constraint.name == "uq_a_users_code",
        _ => false,
    }
}

#[test]
fn test_unique_constraint_precedes_foreign_keys_onto_it() {
    let before = snapshot(coded_users(false, false));
    let mut rows = coded_users(true, true);
    rows.push(RawRow::new("z_new", "id", "int").nullable(false).primary_key().position(1));
    rows.push(
        RawRow::new("z_new", "user_code", "varchar(20)")
            .position(2)
            .references("a_users.code"),
    );
    let after = snapshot(rows);
    let result = plan(&before, &after);

    let unique = position(&result, is_unique_add);
    let create = position(&result, |k| {
        matches!(k, ChangeKind::AddTable { table } if table.name == "z_new")
    });
    let add_fk = position(&result, |k| {
        matches!(k, ChangeKind::AddForeignKey { foreign_key, .. }
            if foreign_key.name == "fk_orders_user_code_a_users")
    });
    assert!(unique < create, "{:?}", kinds(&result));
    assert!(unique < add_fk, "{:?}", kinds(&result));
}

#[test]
fn test_foreign_key_drop_precedes_unique_drop() {
    let before = snapshot(coded_users(true, true));
    let after = snapshot(coded_users(false, false));
    let result = plan(&before, &after);
    assert_eq!(kinds(&result), vec!["DropForeignKey", "DropUniqueConstraint"]);
    assert_eq!(result.changes()[1].kind.table(), "a_users");
}

#[test]
fn test_dropped_table_precedes_drops_of_what_it_references() {
    let before = snapshot(coded_users(true, true));
    let after = snapshot(vec![
        RawRow::new("a_users", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("a_users", "code", "varchar(20)").nullable(false).position(2),
    ]);
    let result = plan(&before, &after);
    let drop_orders = position(&result, |k| {
        matches!(k, ChangeKind::DropTable { table } if table.name == "orders")
    });
    assert!(drop_orders < position(&result, is_unique_drop));

    let after = snapshot(vec![
        RawRow::new("a_users", "id", "bigint").nullable(false).primary_key().position(1),
    ]);
    let result = plan(&before, &after);
    let drop_orders = position(&result, |k| {
        matches!(k, ChangeKind::DropTable { table } if table.name == "orders")
    });
    let drop_code = position(&result, |k| {
        matches!(k, ChangeKind::DropColumn { column, .. } if column.name == "code")
    });
    assert!(drop_orders < drop_code);
    assert!(position(&result, is_unique_drop) < drop_code);
}

#[test]
fn test_kind_priority_breaks_ties() {
    let result = plan(&shop_v1(), &shop_v2());
    let order = kinds(&result);
    let first_drop = order.iter().position(|k| k.starts_with("Drop")).unwrap();
    let last_add_table = order.iter().rposition(|k| *k == "AddTable").unwrap();
    assert!(last_add_table < first_drop);
    assert!(order[first_drop..].iter().all(|k| k.starts_with("Drop")));
}

// =============================================================================
// Rename detection
// =============================================================================

#[test]
fn test_customers_rename_is_a_single_change() {
    let before = snapshot(vec![
        RawRow::new("customers", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("customers", "full_name", "varchar(255)").position(2),
    ]);
    let after = snapshot(vec![
        RawRow::new("customers", "id", "bigint").nullable(false).primary_key().position(1),
        RawRow::new("customers", "legal_name", "varchar(255)").position(2),
    ]);
    let result = plan(&before, &after);
    assert_eq!(result.total(), 1);
    match &result.changes()[0].kind {
        ChangeKind::RenameColumn {
            table, from, to, ..
        } => {
            assert_eq!(table, "customers");
            assert_eq!(from, "full_name");
            assert_eq!(to, "legal_name");
        }
        other => panic!("expected a column rename, got {:?}", other),
    }
}

#[test]
fn test_case_only_rename_is_safe() {
    let before = snapshot(vec![RawRow::new("Customers", "ID", "int").position(1)]);
    let after = snapshot(vec![RawRow::new("customers", "id", "int").position(1)]);
    let result = plan(&before, &after);
    assert_eq!(kinds(&result), vec!["RenameTable", "RenameColumn"]);
    assert!(result.changes().iter().all(|c| c.risk == RiskClass::Safe));
}

#[test]
fn test_renamed_table_keeps_its_columns() {
    let before = snapshot(vec![
        RawRow::new("client", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("client", "name", "varchar(100)").position(2),
        RawRow::new("client", "email", "varchar(100)").position(3),
    ]);
    let after = snapshot(vec![
        RawRow::new("clients", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("clients", "name", "varchar(100)").position(2),
        RawRow::new("clients", "email", "varchar(100)").position(3),
    ]);
    let result = plan(&before, &after);
    assert_eq!(kinds(&result), vec!["RenameTable"]);
    assert_eq!(result.changes()[0].risk, RiskClass::RequiresManualReview);
}

// =============================================================================
// Risk classification
// =============================================================================

#[test]
fn test_risk_examples() {
    let result = plan(&shop_v1(), &shop_v2());
    let risk_of = |pred: &dyn Fn(&ChangeKind) -> bool| {
        result
            .changes()
            .iter()
            .find(|c| pred(&c.kind))
            .map(|c| c.risk)
            .unwrap()
    };

    assert_eq!(
        risk_of(&|k| {
            matches!(k, ChangeKind::AlterColumnNullability { column, .. } if column == "email")
        }),
        RiskClass::RequiresManualReview
    );
    assert_eq!(
        risk_of(&|k| matches!(k, ChangeKind::AddColumn { column, .. } if column.name == "bio")),
        RiskClass::Safe
    );
    assert_eq!(
        risk_of(&|k| {
            matches!(k, ChangeKind::DropColumn { column, .. } if column.name == "legacy_code")
        }),
        RiskClass::DataLossRisk
    );
    assert_eq!(
        risk_of(&|k| matches!(k, ChangeKind::AddForeignKey { .. })),
        RiskClass::Safe
    );
}

#[test]
fn test_type_changes_are_classified() {
    let before = snapshot(vec![
        RawRow::new("metrics", "hits", "int").position(1),
        RawRow::new("metrics", "label", "varchar(50)").position(2),
    ]);
    let after = snapshot(vec![
        RawRow::new("metrics", "hits", "varchar(20)").position(1),
        RawRow::new("metrics", "label", "int").position(2),
    ]);
    let result = plan(&before, &after);
    let risks: Vec<(Option<&str>, RiskClass)> = result
        .changes()
        .iter()
        .map(|c| (c.kind.column(), c.risk))
        .collect();
    assert!(risks.contains(&(Some("hits"), RiskClass::Safe)));
    assert!(risks.contains(&(Some("label"), RiskClass::DataLossRisk)));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_mutual_foreign_keys_between_new_tables_fail() {
    let after = snapshot(vec![
        RawRow::new("a", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("a", "b_id", "int").position(2).references("b.id"),
        RawRow::new("b", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("b", "a_id", "int").position(2).references("a.id"),
    ]);
    let err = compare(&SchemaSnapshot::empty(), &after, &MatchOptions::default()).unwrap_err();
    match err {
        PlanError::CyclicDependency {
            changes,
            constraints,
        } => {
            assert_eq!(changes, vec!["Create table 'a'", "Create table 'b'"]);
            assert_eq!(constraints, vec!["fk_a_b_id_b", "fk_b_a_id_a"]);
        }
        other => panic!("expected a cycle, got {}", other),
    }
}

#[test]
fn test_duplicate_column_is_malformed() {
    let err = build(&[
        RawRow::new("users", "id", "int"),
        RawRow::new("users", "ID", "int"),
    ])
    .unwrap_err();
    assert!(matches!(
        err,
        PlanError::MalformedSchema { ref table, .. } if table == "users"
    ));
}

#[test]
fn test_dangling_reference_is_malformed() {
    let err = build(&[RawRow::new("orders", "user_id", "int").references("users.id")]).unwrap_err();
    assert!(matches!(
        err,
        PlanError::MalformedSchema { ref table, ref reason, .. }
            if table == "orders" && reason.contains("missing table 'users'")
    ));
}

// =============================================================================
// Rollback
// =============================================================================

#[test]
fn test_additive_plan_rolls_back() {
    let before = snapshot(vec![RawRow::new("users", "id", "int").position(1)]);
    let after = snapshot(vec![
        RawRow::new("users", "id", "int").position(1),
        RawRow::new("users", "bio", "text").position(2),
    ]);
    let result = plan(&before, &after);
    assert!(result.is_reversible());
    let rollback = result.rollback().unwrap();
    assert_eq!(kinds(&rollback), vec!["DropColumn"]);
}

fn mssql(plan: &MigrationPlan) -> String {
    render(plan, Dialect::Mssql.renderer().as_ref())
}

fn statements(script: &str) -> Vec<&str> {
    script
        .lines()
        .filter(|l| !l.starts_with("--") && !l.is_empty() && *l != "GO")
        .collect()
}

#[test]
fn test_mssql_type_and_nullability_change_round_trips() {
    let before = snapshot(vec![
        RawRow::new("users", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("users", "age", "int").position(2),
    ]);
    let after = snapshot(vec![
        RawRow::new("users", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("users", "age", "bigint").nullable(false).position(2),
    ]);
    let result = plan(&before, &after);
    assert_eq!(kinds(&result), vec!["AlterColumnType", "AlterColumnNullability"]);
    assert_eq!(
        statements(&mssql(&result)),
        vec![
            "ALTER TABLE [users] ALTER COLUMN [age] BIGINT NULL;",
            "ALTER TABLE [users] ALTER COLUMN [age] BIGINT NOT NULL;",
        ]
    );

    let rollback = result.rollback().unwrap();
    assert_eq!(
        statements(&mssql(&rollback)),
        vec![
            "ALTER TABLE [users] ALTER COLUMN [age] BIGINT NULL;",
            "ALTER TABLE [users] ALTER COLUMN [age] INT NULL;",
        ]
    );
}

#[test]
fn test_mssql_type_change_keeps_column_default() {
    let before = snapshot(vec![
        RawRow::new("users", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("users", "tier", "smallint").nullable(false).default_value("((0))").position(2),
    ]);
    let after = snapshot(vec![
        RawRow::new("users", "id", "int").nullable(false).primary_key().position(1),
        RawRow::new("users", "tier", "int").nullable(false).default_value("1").position(2),
    ]);
    let result = plan(&before, &after);
    assert_eq!(kinds(&result), vec!["AlterColumnType", "AlterDefault"]);

    let script = mssql(&result);
    let lines = statements(&script);
    assert_eq!(lines.len(), 5, "{}", script);
    assert!(lines[0].starts_with("DECLARE @df sysname"));
    assert_eq!(lines[1], "ALTER TABLE [users] ALTER COLUMN [tier] INT NOT NULL;");
    assert_eq!(
        lines[2],
        "ALTER TABLE [users] ADD CONSTRAINT [df_users_tier] DEFAULT 0 FOR [tier];"
    );
    assert!(lines[3].starts_with("DECLARE @df sysname"));
    assert_eq!(
        lines[4],
        "ALTER TABLE [users] ADD CONSTRAINT [df_users_tier] DEFAULT 1 FOR [tier];"
    );
}

#[test]
fn test_destructive_plan_has_no_rollback() {
    let result = plan(&shop_v1(), &shop_v2());
    assert!(!result.is_reversible());
    assert!(result.rollback().is_none());
}

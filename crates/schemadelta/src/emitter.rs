//! Migration script emitter.
//!
//! Pure templating: every change becomes a risk comment followed by the
//! dialect's statements. No planning happens here.

use std::fmt::Write;

use crate::dialect::MigrationDialect;
use crate::plan::MigrationPlan;

/// Text rendered for a plan without changes.
pub const EMPTY_PLAN: &str = "-- No schema changes required";

/// Renders a plan as an executable script for `dialect`.
#[must_use]
pub fn render(plan: &MigrationPlan, dialect: &dyn MigrationDialect) -> String {
    let mut out = String::new();
    for warning in plan.warnings() {
        let _ = writeln!(out, "-- WARNING: {}", warning);
    }
    if plan.is_empty() {
        out.push_str(EMPTY_PLAN);
        out.push('\n');
        return out;
    }

    let summary = plan.summary();
    let _ = writeln!(
        out,
        "-- Migration plan for {}: {} change(s)",
        dialect.name(),
        plan.total()
    );
    let _ = writeln!(
        out,
        "-- safe: {}, data-loss-risk: {}, requires-manual-review: {}",
        summary.safe, summary.data_loss_risk, summary.requires_manual_review
    );

    for change in plan.changes() {
        out.push('\n');
        let _ = writeln!(
            out,
            "-- [{}] {} ({})",
            change.risk,
            change.description(),
            if change.is_reversible() {
                "reversible"
            } else {
                "irreversible"
            }
        );
        for statement in dialect.generate_sql(&change.kind) {
            out.push_str(&statement);
            if !statement.starts_with("--") {
                out.push(';');
            }
            out.push('\n');
        }
        if let Some(separator) = dialect.batch_separator() {
            out.push_str(separator);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Dialect, PostgresDialect};
    use crate::diff::{PlanWarning, SchemaDiff};
    use crate::operations::{ChangeKind, ChangeOp};
    use crate::resolver::order;
    use crate::schema::ColumnSpec;

    fn plan() -> MigrationPlan {
        let changes = vec![
            ChangeOp::assessed(ChangeKind::DropColumn {
                table: "users".into(),
                column: ColumnSpec::new("legacy", "TEXT"),
            }),
            ChangeOp::assessed(ChangeKind::AddColumn {
                table: "users".into(),
                column: ColumnSpec::new("bio", "TEXT"),
            }),
        ];
        order(changes.into()).unwrap()
    }

    #[test]
    fn test_empty_plan() {
        let script = render(&MigrationPlan::default(), &PostgresDialect::new());
        assert_eq!(script, "-- No schema changes required\n");
    }

    #[test]
    fn test_every_statement_has_risk_comment() {
        let script = render(&plan(), &PostgresDialect::new());
        let lines: Vec<&str> = script.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if line.starts_with("ALTER TABLE") {
                assert!(lines[i - 1].starts_with("-- ["), "no risk comment before {}", line);
            }
        }
        assert!(script.contains("-- [safe] Add column 'bio' to table 'users' (reversible)"));
        assert!(script
            .contains("-- [data-loss-risk] Drop column 'legacy' from table 'users' (irreversible)"));
        assert!(script.contains("ALTER TABLE \"users\" ADD COLUMN \"bio\" TEXT;"));
        assert!(script.contains("-- safe: 1, data-loss-risk: 1, requires-manual-review: 0"));
    }

    #[test]
    fn test_mssql_batches() {
        let script = render(&plan(), Dialect::Mssql.renderer().as_ref());
        assert_eq!(script.matches("\nGO\n").count(), 2);
        assert!(script.contains("ALTER TABLE [users] ADD [bio] VARCHAR(MAX) NULL;"));
    }

    #[test]
    fn test_warnings_rendered_for_empty_plan() {
        let diff = SchemaDiff {
            changes: Vec::new(),
            warnings: vec![PlanWarning::ColumnOrderChanged {
                table: "t".into(),
                old_order: vec!["a".into(), "b".into()],
                new_order: vec!["b".into(), "a".into()],
            }],
        };
        let script = render(&order(diff).unwrap(), &PostgresDialect::new());
        assert!(script.starts_with("-- WARNING: column order of 't' changed\n"));
        assert!(script.ends_with("-- No schema changes required\n"));
    }
}

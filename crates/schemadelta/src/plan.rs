//! Migration plans.

use serde::{Deserialize, Serialize};

use crate::diff::PlanWarning;
use crate::operations::{ChangeOp, RiskClass};

/// Counts of changes by risk class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSummary {
    /// Changes tagged `safe`.
    pub safe: usize,
    /// Changes tagged `data-loss-risk`.
    pub data_loss_risk: usize,
    /// Changes tagged `requires-manual-review`.
    pub requires_manual_review: usize,
}

impl RiskSummary {
    /// Tallies the risk classes of a change list.
    #[must_use]
    pub fn from_changes(changes: &[ChangeOp]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.risk {
                RiskClass::Safe => summary.safe += 1,
                RiskClass::DataLossRisk => summary.data_loss_risk += 1,
                RiskClass::RequiresManualReview => summary.requires_manual_review += 1,
            }
        }
        summary
    }

    /// Returns the count for one risk class.
    #[must_use]
    pub fn count(&self, risk: RiskClass) -> usize {
        match risk {
            RiskClass::Safe => self.safe,
            RiskClass::DataLossRisk => self.data_loss_risk,
            RiskClass::RequiresManualReview => self.requires_manual_review,
        }
    }
}

/// A flat, UI-friendly view of one planned change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// 1-based position in the plan.
    pub step: usize,
    /// Change kind, e.g. `AddColumn`.
    pub kind: String,
    /// Affected table.
    pub table: String,
    /// Affected column, for column-level changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Affected constraint, for constraint-level changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Human-readable description.
    pub description: String,
    /// Short detail (types, values, targets).
    pub detail: String,
    /// Assessed risk.
    pub risk: RiskClass,
    /// Whether the change can be rolled back.
    pub reversible: bool,
}

/// An ordered, risk-annotated sequence of changes.
///
/// Built once by the resolver and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    changes: Vec<ChangeOp>,
    total: usize,
    summary: RiskSummary,
    warnings: Vec<PlanWarning>,
}

impl MigrationPlan {
    /// Creates a plan from changes that are already in execution order.
    pub(crate) fn new(changes: Vec<ChangeOp>, warnings: Vec<PlanWarning>) -> Self {
        Self {
            total: changes.len(),
            summary: RiskSummary::from_changes(&changes),
            changes,
            warnings,
        }
    }

    /// Changes in execution order.
    #[must_use]
    pub fn changes(&self) -> &[ChangeOp] {
        &self.changes
    }

    /// Number of changes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Counts by risk class.
    #[must_use]
    pub fn summary(&self) -> &RiskSummary {
        &self.summary
    }

    /// Differences that were reported but produce no DDL.
    #[must_use]
    pub fn warnings(&self) -> &[PlanWarning] {
        &self.warnings
    }

    /// Returns `true` if the plan has no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns `true` if every change can be rolled back.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.changes.iter().all(ChangeOp::is_reversible)
    }

    /// Returns a flat record per change, in plan order.
    #[must_use]
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.changes
            .iter()
            .enumerate()
            .map(|(i, change)| ChangeRecord {
                step: i + 1,
                kind: change.kind.name().to_string(),
                table: change.kind.table().to_string(),
                column: change.kind.column().map(String::from),
                constraint: change.kind.constraint().map(String::from),
                description: change.description(),
                detail: change.kind.detail(),
                risk: change.risk,
                reversible: change.is_reversible(),
            })
            .collect()
    }

    /// Returns the plan that undoes this one.
    ///
    /// Returns `None` if any change is not reversible.
    #[must_use]
    pub fn rollback(&self) -> Option<Self> {
        let mut reversed = Vec::with_capacity(self.changes.len());
        for change in self.changes.iter().rev() {
            reversed.push(change.reverse()?);
        }
        Some(Self::new(reversed, Vec::new()))
    }
}

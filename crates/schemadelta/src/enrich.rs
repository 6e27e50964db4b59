//! Enrichment hook.
//!
//! An enricher consumes a finished [`MigrationPlan`] and returns text, such
//! as a natural-language explanation or a rewritten script. The engine never
//! depends on one being present.

use std::fmt::Write;

use crate::error::Result;
use crate::operations::RiskClass;
use crate::plan::MigrationPlan;

/// A collaborator that turns a plan into text.
pub trait PlanEnricher {
    /// Produces text for the plan.
    fn enrich(&self, plan: &MigrationPlan) -> Result<String>;
}

impl<F> PlanEnricher for F
where
    F: Fn(&MigrationPlan) -> Result<String>,
{
    fn enrich(&self, plan: &MigrationPlan) -> Result<String> {
        self(plan)
    }
}

/// Runs an optional enricher. Returns `None` when no enricher is configured.
pub fn enrich_with(
    plan: &MigrationPlan,
    enricher: Option<&dyn PlanEnricher>,
) -> Result<Option<String>> {
    enricher.map(|e| e.enrich(plan)).transpose()
}

/// Built-in enricher that explains a plan in plain English, grouped by risk.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSummary;

impl PlanEnricher for PlainSummary {
    fn enrich(&self, plan: &MigrationPlan) -> Result<String> {
        let mut out = String::new();
        if plan.is_empty() {
            out.push_str("The schemas are equivalent; no changes are required.\n");
        } else {
            let _ = writeln!(
                out,
                "The migration applies {} change(s){}.",
                plan.total(),
                if plan.is_reversible() {
                    " and can be rolled back"
                } else {
                    "; some of them cannot be rolled back"
                }
            );
        }

        for (risk, heading) in [
            (RiskClass::DataLossRisk, "May destroy data"),
            (RiskClass::RequiresManualReview, "Needs manual review"),
            (RiskClass::Safe, "Safe"),
        ] {
            let steps: Vec<_> = plan
                .records()
                .into_iter()
                .filter(|r| r.risk == risk)
                .collect();
            if steps.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{} ({}):", heading, steps.len());
            for step in steps {
                let _ = writeln!(out, "  {}. {} [{}]", step.step, step.description, step.detail);
            }
        }

        if !plan.warnings().is_empty() {
            out.push_str("\nNot handled by the script:\n");
            for warning in plan.warnings() {
                let _ = writeln!(out, "  - {}", warning);
            }
        }
        Ok(out)
    }
}

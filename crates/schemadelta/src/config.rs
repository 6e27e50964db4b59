//! Matching configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};

/// Options that tune entity matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Whether to run the rename-heuristic pass.
    pub detect_renames: bool,
    /// Score a column pair must exceed to count as a rename (0.0 to 1.0).
    pub column_rename_threshold: f64,
    /// Score a table pair must exceed to count as a rename (0.0 to 1.0).
    pub table_rename_threshold: f64,
    /// Ordinal slack allowed when comparing column positions.
    pub position_tolerance: u32,
    /// Shared columns required before table structure counts at all.
    pub min_shared_columns: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            detect_renames: true,
            column_rename_threshold: 0.6,
            table_rename_threshold: 0.6,
            position_tolerance: 1,
            min_shared_columns: 2,
        }
    }
}

impl MatchOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse options from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: MatchOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Enables or disables rename detection.
    #[must_use]
    pub fn with_rename_detection(mut self, enabled: bool) -> Self {
        self.detect_renames = enabled;
        self
    }

    /// Sets both rename thresholds.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.column_rename_threshold = threshold;
        self.table_rename_threshold = threshold;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("column_rename_threshold", self.column_rename_threshold),
            ("table_rename_threshold", self.table_rename_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PlanError::InvalidConfig(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.min_shared_columns == 0 {
            return Err(PlanError::InvalidConfig(
                "min_shared_columns must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

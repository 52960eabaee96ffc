//! History drift analyst
//!
//! Catches incremental escalation that single-turn checks miss.
//! Stateless: only the supplied window is inspected.

use crate::models::{Severity, Turn};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Turns inspected from the end of the history
pub const DRIFT_WINDOW: usize = 10;

/// Below this many turns the ratio is too noisy to act on
pub const MIN_WINDOW: usize = 4;

/// Whole-word forms; "marginal" and "borrower" do not count
const LEVERAGE_TERMS: &[&str] = &[
    "leverage",
    "leveraged",
    "leveraging",
    "margin",
    "margins",
    "borrow",
    "borrows",
    "borrowed",
    "borrowing",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriftViolation {
    pub drift_type: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default)]
pub struct DriftAnalyst;

impl DriftAnalyst {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, history: &[Turn]) -> Vec<DriftViolation> {
        let window = &history[history.len().saturating_sub(DRIFT_WINDOW)..];

        let risky = window
            .iter()
            .filter(|turn| mentions_leverage(&turn.content))
            .count();

        debug!(window = window.len(), risky, "Drift window scanned");

        if window.len() >= MIN_WINDOW && risky * 2 >= window.len() {
            vec![DriftViolation {
                drift_type: "CumulativeRiskCreep".to_string(),
                description: format!(
                    "{} of the last {} turns push toward leverage, margin or borrowing",
                    risky,
                    window.len()
                ),
                severity: Severity::High,
            }]
        } else {
            Vec::new()
        }
    }
}

fn mentions_leverage(content: &str) -> bool {
    let lower = content.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| LEVERAGE_TERMS.contains(&word))
}

//! Symbolic auditor
//!
//! Evaluates knowledge-graph steps against the constraint store.

use crate::audit::knowledge::{ActionStep, Constraint, ConstraintStore};
use crate::audit::AuditStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// SLA bound for execution latency
pub const MAX_LATENCY_MS: f64 = 500.0;

/// Largest allowed position, in percent of portfolio
pub const MAX_POSITION_PCT: f64 = 10.0;

const FORBIDDEN_DISPLAY_CLASSES: &[&str] = &["restricted", "pii"];

/// What to do with a constraint whose `logic_ref` has no handler
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnknownConstraintPolicy {
    /// Treat as satisfied
    Permissive,
    /// Report a violation
    FailClosed,
}

impl Default for UnknownConstraintPolicy {
    fn default() -> Self {
        UnknownConstraintPolicy::FailClosed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintViolation {
    pub constraint_id: String,
    pub step_index: usize,
    pub action: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolicReport {
    pub status: AuditStatus,
    pub violations: Vec<ConstraintViolation>,
}

pub struct SymbolicAuditor {
    store: ConstraintStore,
    unknown_policy: UnknownConstraintPolicy,
}

impl SymbolicAuditor {
    pub fn new(store: ConstraintStore, unknown_policy: UnknownConstraintPolicy) -> Self {
        Self {
            store,
            unknown_policy,
        }
    }

    pub fn unknown_policy(&self) -> UnknownConstraintPolicy {
        self.unknown_policy
    }

    pub fn evaluate(&self, steps: &[ActionStep]) -> SymbolicReport {
        let mut violations = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            for constraint in self.store.for_action(&step.action) {
                let outcome = match evaluate_logic(constraint, step) {
                    Some(outcome) => outcome,
                    None => self.unhandled(constraint),
                };

                if let Err(description) = outcome {
                    violations.push(ConstraintViolation {
                        constraint_id: constraint.id.clone(),
                        step_index: index,
                        action: step.action.clone(),
                        description,
                    });
                }
            }
        }

        let status = if violations.is_empty() {
            AuditStatus::Approved
        } else {
            AuditStatus::Rejected
        };

        debug!(
            steps = steps.len(),
            violations = violations.len(),
            "Symbolic audit completed"
        );

        SymbolicReport { status, violations }
    }

    fn unhandled(&self, constraint: &Constraint) -> Result<(), String> {
        match self.unknown_policy {
            UnknownConstraintPolicy::Permissive => {
                warn!(
                    constraint_id = %constraint.id,
                    logic_ref = %constraint.logic_ref,
                    "No handler for constraint; treating as satisfied"
                );
                Ok(())
            }
            UnknownConstraintPolicy::FailClosed => Err(format!(
                "{}: no evaluation logic for '{}', refusing to pass unverified constraint",
                constraint.description, constraint.logic_ref
            )),
        }
    }
}

impl Default for SymbolicAuditor {
    fn default() -> Self {
        Self::new(ConstraintStore::seeded(), UnknownConstraintPolicy::default())
    }
}

/// `None` when the constraint's logic has no handler
fn evaluate_logic(constraint: &Constraint, step: &ActionStep) -> Option<Result<(), String>> {
    let outcome = match constraint.logic_ref.as_str() {
        "require_approval_token" => match step.param_str("approval_token") {
            Some(_) => Ok(()),
            None => Err(format!(
                "{}: '{}' has no approval_token",
                constraint.description, step.action
            )),
        },
        "max_latency_ms" => match step.param_f64("latency_ms") {
            Some(latency) if latency > MAX_LATENCY_MS => Err(format!(
                "{}: latency {} ms exceeds {} ms",
                constraint.description, latency, MAX_LATENCY_MS
            )),
            _ => Ok(()),
        },
        "classification_guard" => {
            let class = step.param_str("classification").map(str::to_lowercase);
            match (step.action.as_str(), class) {
                ("display_output", Some(class))
                    if FORBIDDEN_DISPLAY_CLASSES.contains(&class.as_str()) =>
                {
                    Err(format!(
                        "{}: '{}' data cannot be displayed",
                        constraint.description, class
                    ))
                }
                ("write_db", None) => Err(format!(
                    "{}: write has no data classification",
                    constraint.description
                )),
                _ => Ok(()),
            }
        }
        "max_position_pct" => match step.param_f64("percentage") {
            Some(pct) if pct > MAX_POSITION_PCT => Err(format!(
                "{}: position of {}% exceeds {}% cap",
                constraint.description, pct, MAX_POSITION_PCT
            )),
            _ => Ok(()),
        },
        _ => return None,
    };

    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn step(action: &str, params: Value) -> ActionStep {
        let params: Map<String, Value> = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ActionStep {
            action: action.to_string(),
            params,
        }
    }

    #[test]
    fn test_compliant_trade_passes() {
        let auditor = SymbolicAuditor::default();
        let report = auditor.evaluate(&[step(
            "execute_trade",
            json!({"approval_token": "APR-1", "percentage": 5, "latency_ms": 120}),
        )]);
        assert_eq!(report.status, AuditStatus::Approved);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_each_seeded_constraint_fires() {
        let auditor = SymbolicAuditor::default();
        let report = auditor.evaluate(&[
            step("execute_trade", json!({"percentage": 25, "latency_ms": 900})),
            step("display_output", json!({"classification": "PII"})),
            step("write_db", json!({})),
        ]);

        let ids: Vec<_> = report
            .violations
            .iter()
            .map(|v| (v.step_index, v.constraint_id.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![
                (0, "token_required"),
                (0, "latency_bound"),
                (0, "percentage_cap"),
                (1, "data_classification"),
                (2, "data_classification"),
            ]
        );
        assert_eq!(report.status, AuditStatus::Rejected);
    }

    #[test]
    fn test_unscoped_action_has_no_constraints() {
        let auditor = SymbolicAuditor::default();
        let report = auditor.evaluate(&[step("fetch_data", json!({}))]);
        assert_eq!(report.status, AuditStatus::Approved);
    }

    #[test]
    fn test_unknown_logic_fails_closed_by_default() {
        let store = ConstraintStore::with_constraints(vec![Constraint::new(
            "wash_sale",
            "No wash sales",
            "wash_sale_window",
            &["execute_trade"],
        )]);

        let strict = SymbolicAuditor::new(store.clone(), UnknownConstraintPolicy::FailClosed);
        let report = strict.evaluate(&[step("execute_trade", json!({}))]);
        assert_eq!(report.status, AuditStatus::Rejected);
        assert_eq!(report.violations[0].constraint_id, "wash_sale");

        let permissive = SymbolicAuditor::new(store, UnknownConstraintPolicy::Permissive);
        let report = permissive.evaluate(&[step("execute_trade", json!({}))]);
        assert_eq!(report.status, AuditStatus::Approved);
    }
}

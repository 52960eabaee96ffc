//! Plan auditor
//!
//! Deep-path governance: chains the policy gate, STPA rules, symbolic
//! constraints and history drift into one verdict. The first failing
//! layer rejects; its feedback lists every finding of that layer.
//!
//! Layers:
//! PARSE → POLICY → STPA → SYMBOLIC → DRIFT → APPROVED

use crate::config::GovernanceConfig;
use crate::models::{Plan, Turn};
use crate::policy::{envelope, PolicyDecision, PolicyGate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub mod drift;
pub mod knowledge;
pub mod log;
pub mod stpa;
pub mod symbolic;

use drift::DriftAnalyst;
use knowledge::{parse_plan_text, ConstraintStore, KnowledgeGraph};
use stpa::{create_default_stpa_checker, StpaChecker};
use symbolic::SymbolicAuditor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Approved,
    Rejected,
    Error,
}

/// Layer that produced a non-approved verdict
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditLayer {
    Parse,
    Policy,
    Stpa,
    Symbolic,
    Drift,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditVerdict {
    pub status: AuditStatus,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_layer: Option<AuditLayer>,
}

impl AuditVerdict {
    fn approved(feedback: String) -> Self {
        Self {
            status: AuditStatus::Approved,
            feedback,
            failed_layer: None,
        }
    }

    fn rejected(layer: AuditLayer, feedback: String) -> Self {
        Self {
            status: AuditStatus::Rejected,
            feedback,
            failed_layer: Some(layer),
        }
    }

    fn error(layer: AuditLayer, feedback: String) -> Self {
        Self {
            status: AuditStatus::Error,
            feedback,
            failed_layer: Some(layer),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == AuditStatus::Approved
    }
}

/// Plan as produced by the upstream planner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditInput {
    Structured(Plan),
    Text(String),
}

impl From<Plan> for AuditInput {
    fn from(plan: Plan) -> Self {
        AuditInput::Structured(plan)
    }
}

impl From<&str> for AuditInput {
    fn from(text: &str) -> Self {
        AuditInput::Text(text.to_string())
    }
}

impl fmt::Display for AuditLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditLayer::Parse => "parse",
            AuditLayer::Policy => "policy",
            AuditLayer::Stpa => "stpa",
            AuditLayer::Symbolic => "symbolic",
            AuditLayer::Drift => "drift",
        };
        write!(f, "{}", s)
    }
}

/// Composes the independent safety layers
pub struct PlanAuditor {
    gate: Arc<dyn PolicyGate>,
    stpa: StpaChecker,
    symbolic: SymbolicAuditor,
    drift: DriftAnalyst,
}

impl PlanAuditor {
    pub fn new(
        gate: Arc<dyn PolicyGate>,
        stpa: StpaChecker,
        symbolic: SymbolicAuditor,
        drift: DriftAnalyst,
    ) -> Self {
        Self {
            gate,
            stpa,
            symbolic,
            drift,
        }
    }

    /// Auditor with the standard rule set and seeded constraints
    pub fn with_gate(gate: Arc<dyn PolicyGate>) -> Self {
        Self::new(
            gate,
            create_default_stpa_checker(),
            SymbolicAuditor::default(),
            DriftAnalyst::new(),
        )
    }

    /// Standard rule set with the configured unknown-constraint policy
    pub fn from_config(gate: Arc<dyn PolicyGate>, config: &GovernanceConfig) -> Self {
        Self::new(
            gate,
            create_default_stpa_checker(),
            SymbolicAuditor::new(ConstraintStore::seeded(), config.unknown_constraints),
            DriftAnalyst::new(),
        )
    }

    pub async fn audit(&self, input: &AuditInput, history: Option<&[Turn]>) -> AuditVerdict {
        let verdict = self.run_layers(input, history).await;

        match verdict.status {
            AuditStatus::Approved => info!("Plan audit approved"),
            _ => warn!(
                status = ?verdict.status,
                layer = ?verdict.failed_layer,
                feedback = %verdict.feedback,
                "Plan audit did not approve"
            ),
        }

        verdict
    }

    async fn run_layers(&self, input: &AuditInput, history: Option<&[Turn]>) -> AuditVerdict {
        // -------------------------------------------------
        // 0️⃣ PARSE
        // -------------------------------------------------
        let parsed = match input {
            AuditInput::Text(text) => {
                parse_plan_text(text).map(|graph| (text.clone(), graph))
            }
            AuditInput::Structured(plan) => plan
                .validate()
                .map(|_| (plan.to_plan_text(), KnowledgeGraph::from(plan))),
        };

        let (plan_text, graph) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                return AuditVerdict::rejected(
                    AuditLayer::Parse,
                    format!("Plan format error: {}. Resubmit a well-formed plan.", e),
                )
            }
        };

        // -------------------------------------------------
        // 1️⃣ POLICY GATE (fail closed)
        // -------------------------------------------------
        let outcome = match self
            .gate
            .evaluate(envelope::verify_plan_input(&plan_text, &graph.steps_json()))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                return AuditVerdict::error(
                    AuditLayer::Policy,
                    format!("Policy gate could not be consulted, failing closed: {}", e),
                )
            }
        };

        match outcome.decision() {
            PolicyDecision::Deny => {
                return AuditVerdict::rejected(
                    AuditLayer::Policy,
                    format!("Policy gate denied the plan: {}", outcome.explanation()),
                )
            }
            PolicyDecision::ManualReview => {
                return AuditVerdict::rejected(
                    AuditLayer::Policy,
                    format!(
                        "Plan requires human review before it can proceed: {}",
                        outcome.explanation()
                    ),
                )
            }
            PolicyDecision::Allow | PolicyDecision::Uncertain => {}
        }

        // -------------------------------------------------
        // 2️⃣ STPA RULES
        // -------------------------------------------------
        let violations = self.stpa.check(&plan_text);
        if !violations.is_empty() {
            let lines: Vec<String> = violations
                .iter()
                .map(|v| format!("- {} [{}]: {}", v.rule_id, v.severity, v.description))
                .collect();
            return AuditVerdict::rejected(
                AuditLayer::Stpa,
                format!("STPA safety check failed:\n{}", lines.join("\n")),
            );
        }

        // -------------------------------------------------
        // 3️⃣ SYMBOLIC CONSTRAINTS
        // -------------------------------------------------
        let report = self.symbolic.evaluate(&graph.steps);
        if !report.violations.is_empty() {
            let lines: Vec<String> = report
                .violations
                .iter()
                .map(|v| {
                    format!(
                        "- {} (step {}, {}): {}",
                        v.constraint_id,
                        v.step_index + 1,
                        v.action,
                        v.description
                    )
                })
                .collect();
            return AuditVerdict::rejected(
                AuditLayer::Symbolic,
                format!("Symbolic constraint check failed:\n{}", lines.join("\n")),
            );
        }

        // -------------------------------------------------
        // 4️⃣ HISTORY DRIFT
        // -------------------------------------------------
        let mut passed = vec!["policy gate", "STPA rules", "symbolic constraints"];

        if let Some(history) = history {
            let drift = self.drift.analyze(history);
            if !drift.is_empty() {
                let lines: Vec<String> = drift
                    .iter()
                    .map(|v| format!("- {} [{}]: {}", v.drift_type, v.severity, v.description))
                    .collect();
                return AuditVerdict::rejected(
                    AuditLayer::Drift,
                    format!("History drift check failed:\n{}", lines.join("\n")),
                );
            }
            passed.push("history drift");
        }

        // -------------------------------------------------
        // 5️⃣ APPROVED
        // -------------------------------------------------
        let mut feedback = format!("Plan approved. Checks passed: {}.", passed.join(", "));
        if history.is_none() {
            feedback.push_str(" History drift not checked (no history supplied).");
        }
        if outcome.decision() == PolicyDecision::Uncertain {
            feedback.push_str(
                " Policy gate was UNCERTAIN; the structured layers decided.",
            );
        }

        AuditVerdict::approved(feedback)
    }
}

//! Safety interceptor
//!
//! Hot-path governance: a single policy check per proposed plan.
//! The layered audit stays on the deep path because of its latency.
//!
//! Both fail-open choices (missing plan, unreachable authority) are
//! explicit configuration and are logged whenever they apply.

use crate::models::{Plan, SessionContext};
use crate::policy::{envelope, PolicyDecision, PolicyGate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyStatus {
    Approved,
    Skipped,
    Escalated,
    Blocked,
    Uncertain,
}

impl SafetyStatus {
    /// Whether the action may continue toward execution
    pub fn may_proceed(&self) -> bool {
        matches!(self, SafetyStatus::Approved | SafetyStatus::Skipped)
    }
}

/// Handling of turns that carry no plan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingPlanPolicy {
    /// Non-action turns need no gating
    #[default]
    Skip,
    Block,
}

/// Handling of decision-authority failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateFailurePolicy {
    FailOpen,
    #[default]
    FailClosed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InterceptorConfig {
    pub missing_plan: MissingPlanPolicy,
    pub gate_failure: GateFailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyReport {
    pub status: SafetyStatus,
    pub feedback: String,
}

impl SafetyReport {
    fn new(status: SafetyStatus, feedback: impl Into<String>) -> Self {
        Self {
            status,
            feedback: feedback.into(),
        }
    }
}

pub struct SafetyInterceptor {
    gate: Arc<dyn PolicyGate>,
    config: InterceptorConfig,
}

impl SafetyInterceptor {
    pub fn new(gate: Arc<dyn PolicyGate>, config: InterceptorConfig) -> Self {
        Self { gate, config }
    }

    pub fn config(&self) -> InterceptorConfig {
        self.config
    }

    pub async fn check(&self, plan: Option<&Plan>, session: &SessionContext) -> SafetyReport {
        let Some(plan) = plan else {
            return match self.config.missing_plan {
                MissingPlanPolicy::Skip => {
                    debug!(session_id = %session.session_id, "No plan present; skipping policy check");
                    SafetyReport::new(SafetyStatus::Skipped, "No plan present; nothing to gate")
                }
                MissingPlanPolicy::Block => {
                    warn!(
                        session_id = %session.session_id,
                        policy = "missing_plan=block",
                        "No plan present; blocking"
                    );
                    SafetyReport::new(
                        SafetyStatus::Blocked,
                        "No structured plan supplied; action turns must carry a plan",
                    )
                }
            };
        };

        if let Err(e) = plan.validate() {
            return SafetyReport::new(SafetyStatus::Blocked, format!("Plan rejected: {}", e));
        }

        let input = envelope::trade_input(plan, session);

        let outcome = match self.gate.evaluate(input).await {
            Ok(outcome) => outcome,
            Err(e) => return self.on_gate_failure(session, &e.to_string()),
        };

        let report = match outcome.decision() {
            PolicyDecision::Allow => {
                SafetyReport::new(SafetyStatus::Approved, "Policy gate allowed the action")
            }
            PolicyDecision::ManualReview => SafetyReport::new(
                SafetyStatus::Escalated,
                format!("Escalated for human review: {}", outcome.explanation()),
            ),
            PolicyDecision::Uncertain => SafetyReport::new(
                SafetyStatus::Uncertain,
                format!("Policy gate was uncertain: {}", outcome.explanation()),
            ),
            PolicyDecision::Deny => SafetyReport::new(
                SafetyStatus::Blocked,
                format!("Blocked by policy: {}", outcome.explanation()),
            ),
        };

        info!(
            session_id = %session.session_id,
            action = %plan.action,
            status = %report.status,
            "Safety check completed"
        );

        report
    }

    fn on_gate_failure(&self, session: &SessionContext, error: &str) -> SafetyReport {
        match self.config.gate_failure {
            GateFailurePolicy::FailClosed => {
                warn!(
                    session_id = %session.session_id,
                    policy = "gate_failure=fail_closed",
                    error,
                    "Policy gate unavailable; blocking"
                );
                SafetyReport::new(
                    SafetyStatus::Blocked,
                    format!("Policy gate unavailable, failing closed: {}", error),
                )
            }
            GateFailurePolicy::FailOpen => {
                warn!(
                    session_id = %session.session_id,
                    policy = "gate_failure=fail_open",
                    error,
                    "Policy gate unavailable; skipping check"
                );
                SafetyReport::new(
                    SafetyStatus::Skipped,
                    format!("Policy gate unavailable, failing open: {}", error),
                )
            }
        }
    }
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyStatus::Approved => "APPROVED",
            SafetyStatus::Skipped => "SKIPPED",
            SafetyStatus::Escalated => "ESCALATED",
            SafetyStatus::Blocked => "BLOCKED",
            SafetyStatus::Uncertain => "UNCERTAIN",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, RiskTolerance};
    use crate::policy::StaticPolicyGate;
    use uuid::Uuid;

    fn session() -> SessionContext {
        let mut session = SessionContext::new("sess-1", Uuid::new_v4());
        session.risk_tolerance = RiskTolerance::High;
        session
    }

    fn plan() -> Plan {
        Plan::new(ActionType::ExecuteTrade, "buy with stop loss")
            .with_symbol("AAPL")
            .with_amount(5.0)
    }

    async fn status_for(gate: StaticPolicyGate) -> SafetyStatus {
        let interceptor = SafetyInterceptor::new(Arc::new(gate), InterceptorConfig::default());
        interceptor.check(Some(&plan()), &session()).await.status
    }

    #[tokio::test]
    async fn test_decision_mapping() {
        assert_eq!(status_for(StaticPolicyGate::allow()).await, SafetyStatus::Approved);
        assert_eq!(status_for(StaticPolicyGate::review("size")).await, SafetyStatus::Escalated);
        assert_eq!(status_for(StaticPolicyGate::uncertain()).await, SafetyStatus::Uncertain);
        assert_eq!(status_for(StaticPolicyGate::deny("no")).await, SafetyStatus::Blocked);
    }

    #[tokio::test]
    async fn test_missing_plan_policy() {
        let gate = Arc::new(StaticPolicyGate::deny("unused"));

        let skip = SafetyInterceptor::new(gate.clone(), InterceptorConfig::default());
        assert_eq!(skip.check(None, &session()).await.status, SafetyStatus::Skipped);

        let block = SafetyInterceptor::new(
            gate.clone(),
            InterceptorConfig {
                missing_plan: MissingPlanPolicy::Block,
                ..Default::default()
            },
        );
        assert_eq!(block.check(None, &session()).await.status, SafetyStatus::Blocked);

        // The authority is never consulted without a plan
        assert!(gate.seen_inputs().await.is_empty());
    }

    #[tokio::test]
    async fn test_gate_failure_policy() {
        let gate = Arc::new(StaticPolicyGate::unavailable("timeout"));

        let closed = SafetyInterceptor::new(gate.clone(), InterceptorConfig::default());
        let report = closed.check(Some(&plan()), &session()).await;
        assert_eq!(report.status, SafetyStatus::Blocked);
        assert!(report.feedback.contains("failing closed"));

        let open = SafetyInterceptor::new(
            gate,
            InterceptorConfig {
                gate_failure: GateFailurePolicy::FailOpen,
                ..Default::default()
            },
        );
        assert_eq!(
            open.check(Some(&plan()), &session()).await.status,
            SafetyStatus::Skipped
        );
    }

    #[tokio::test]
    async fn test_policy_input_includes_session_risk() {
        let gate = Arc::new(StaticPolicyGate::allow());
        let interceptor = SafetyInterceptor::new(gate.clone(), InterceptorConfig::default());
        interceptor.check(Some(&plan()), &session()).await;

        let seen = gate.seen_inputs().await;
        assert_eq!(seen[0]["risk_tolerance"], "high");
        assert_eq!(seen[0]["symbol"], "AAPL");
        assert_eq!(seen[0]["session_id"], "sess-1");
    }

    #[tokio::test]
    async fn test_invalid_plan_blocked_without_gate_call() {
        let gate = Arc::new(StaticPolicyGate::allow());
        let interceptor = SafetyInterceptor::new(gate.clone(), InterceptorConfig::default());
        let bad = plan().with_confidence(7.0);

        let report = interceptor.check(Some(&bad), &session()).await;
        assert_eq!(report.status, SafetyStatus::Blocked);
        assert!(gate.seen_inputs().await.is_empty());
    }
}

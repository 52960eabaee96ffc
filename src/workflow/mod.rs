//! Session workflow gate
//!
//! Intent state machine per session:
//! IDLE → MARKET_ANALYSIS → TRADING_STRATEGY → RISK_ASSESSMENT → GOVERNED_TRADING
//!
//! Refinement loops are allowed; skipping ahead is not.

use crate::error::GovernanceError;
use crate::state::SessionStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    #[default]
    Idle,
    MarketAnalysisDone,
    TradingStrategyDone,
    RiskAssessmentDone,
    SessionComplete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    MarketAnalysis,
    TradingStrategy,
    RiskAssessment,
    GovernedTrading,
}

impl WorkflowState {
    /// Pure transition table
    pub fn next(self, intent: Intent) -> std::result::Result<WorkflowState, String> {
        use Intent::*;
        use WorkflowState::*;

        match (intent, self) {
            (MarketAnalysis, _) => Ok(MarketAnalysisDone),

            (TradingStrategy, MarketAnalysisDone | TradingStrategyDone | RiskAssessmentDone) => {
                Ok(TradingStrategyDone)
            }
            (TradingStrategy, _) => Err("complete a market analysis first".to_string()),

            (RiskAssessment, TradingStrategyDone | RiskAssessmentDone) => Ok(RiskAssessmentDone),
            (RiskAssessment, _) => Err("define a trading strategy first".to_string()),

            (GovernedTrading, RiskAssessmentDone) => Ok(SessionComplete),
            (GovernedTrading, _) => Err("complete a risk assessment first".to_string()),
        }
    }
}

/// Gate over an injected session store
pub struct WorkflowGate {
    store: Arc<dyn SessionStore>,
}

impl WorkflowGate {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn current_state(&self, session_id: &str) -> Result<WorkflowState> {
        self.store.load_state(session_id).await
    }

    /// Apply an intent to a session, persisting the new state on success
    pub async fn transition(&self, session_id: &str, intent: Intent) -> Result<WorkflowState> {
        let current = self.store.load_state(session_id).await?;

        match current.next(intent) {
            Ok(next) => {
                self.store.persist_state(session_id, next).await?;
                info!(session_id, %intent, from = %current, to = %next, "Workflow transition");
                Ok(next)
            }
            Err(requirement) => {
                warn!(session_id, %intent, state = %current, "Workflow transition blocked");
                Err(GovernanceError::WorkflowBlocked(format!(
                    "{} is not allowed from {}: {}",
                    intent, current, requirement
                )))
            }
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Idle => "IDLE",
            WorkflowState::MarketAnalysisDone => "MARKET_ANALYSIS_DONE",
            WorkflowState::TradingStrategyDone => "TRADING_STRATEGY_DONE",
            WorkflowState::RiskAssessmentDone => "RISK_ASSESSMENT_DONE",
            WorkflowState::SessionComplete => "SESSION_COMPLETE",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::MarketAnalysis => "MARKET_ANALYSIS",
            Intent::TradingStrategy => "TRADING_STRATEGY",
            Intent::RiskAssessment => "RISK_ASSESSMENT",
            Intent::GovernedTrading => "GOVERNED_TRADING",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemorySessionStore;
    use tokio_test::{assert_err, assert_ok};

    fn gate() -> WorkflowGate {
        WorkflowGate::new(Arc::new(InMemorySessionStore::new()))
    }

    #[tokio::test]
    async fn test_full_sequence_on_fresh_session() {
        let gate = gate();
        let steps = [
            (Intent::MarketAnalysis, WorkflowState::MarketAnalysisDone),
            (Intent::TradingStrategy, WorkflowState::TradingStrategyDone),
            (Intent::RiskAssessment, WorkflowState::RiskAssessmentDone),
            (Intent::GovernedTrading, WorkflowState::SessionComplete),
        ];

        for (intent, expected) in steps {
            let state = assert_ok!(gate.transition("s-1", intent).await);
            assert_eq!(state, expected);
        }
    }

    #[tokio::test]
    async fn test_trading_on_fresh_session_blocked() {
        let gate = gate();
        let err = assert_err!(gate.transition("fresh", Intent::GovernedTrading).await);
        assert!(matches!(err, GovernanceError::WorkflowBlocked(_)));
        assert!(err.to_string().contains("risk assessment"));
        assert_eq!(gate.current_state("fresh").await.unwrap(), WorkflowState::Idle);
    }

    #[tokio::test]
    async fn test_refinement_loops() {
        let gate = gate();
        gate.transition("s", Intent::MarketAnalysis).await.unwrap();
        gate.transition("s", Intent::TradingStrategy).await.unwrap();
        gate.transition("s", Intent::TradingStrategy).await.unwrap();
        gate.transition("s", Intent::RiskAssessment).await.unwrap();
        gate.transition("s", Intent::RiskAssessment).await.unwrap();

        // Loop back from risk assessment to refine the strategy
        let state = gate.transition("s", Intent::TradingStrategy).await.unwrap();
        assert_eq!(state, WorkflowState::TradingStrategyDone);

        assert_err!(gate.transition("s", Intent::GovernedTrading).await);
    }

    #[test]
    fn test_transition_table() {
        use Intent::*;
        use WorkflowState::*;

        assert!(Idle.next(TradingStrategy).is_err());
        assert!(Idle.next(RiskAssessment).is_err());
        assert!(MarketAnalysisDone.next(RiskAssessment).is_err());
        assert_eq!(SessionComplete.next(MarketAnalysis), Ok(MarketAnalysisDone));
        assert!(SessionComplete.next(GovernedTrading).is_err());
        assert!(SessionComplete.next(TradingStrategy).is_err());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let gate = Arc::new(gate());

        let mut handles = Vec::new();
        for i in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let session = format!("session-{}", i);
                for intent in [
                    Intent::MarketAnalysis,
                    Intent::TradingStrategy,
                    Intent::RiskAssessment,
                    Intent::GovernedTrading,
                ] {
                    gate.transition(&session, intent).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..8 {
            let state = gate.current_state(&format!("session-{}", i)).await.unwrap();
            assert_eq!(state, WorkflowState::SessionComplete);
        }
        assert_eq!(gate.current_state("never-seen").await.unwrap(), WorkflowState::Idle);
    }
}

//! Core data models for the governance control plane

use crate::error::GovernanceError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

impl Default for RiskTolerance {
    fn default() -> Self {
        RiskTolerance::Medium
    }
}

/// Kind of action a plan proposes.
/// Action names outside the known set deserialize to `Unknown`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ExecuteTrade,
    WriteDb,
    DisplayOutput,
    FetchData,
    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ExecuteTrade => "execute_trade",
            ActionType::WriteDb => "write_db",
            ActionType::DisplayOutput => "display_output",
            ActionType::FetchData => "fetch_data",
            ActionType::Unknown => "unknown",
        }
    }

    /// Actions with irreversible side effects
    pub fn is_write(&self) -> bool {
        matches!(self, ActionType::ExecuteTrade | ActionType::WriteDb)
    }
}

//
// ================= Plan =================
//

/// A proposed, not-yet-executed action awaiting governance sign-off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub action: ActionType,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub approval_token: Option<String>,
}

impl Plan {
    pub fn new(action: ActionType, description: impl Into<String>) -> Self {
        Self {
            action,
            amount: None,
            symbol: None,
            description: description.into(),
            confidence: None,
            approval_token: None,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_approval_token(mut self, token: impl Into<String>) -> Self {
        self.approval_token = Some(token.into());
        self
    }

    /// Reject structurally malformed plans before any check runs
    pub fn validate(&self) -> Result<()> {
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(GovernanceError::InvalidPlan(format!(
                    "confidence must be within [0, 1], got {}",
                    confidence
                )));
            }
        }

        if let Some(amount) = self.amount {
            if !amount.is_finite() || amount < 0.0 {
                return Err(GovernanceError::InvalidPlan(format!(
                    "amount must be a non-negative finite number, got {}",
                    amount
                )));
            }
        }

        Ok(())
    }

    /// Flatten the plan into text for the pattern-based checks
    pub fn to_plan_text(&self) -> String {
        let mut text = self.action.as_str().to_string();
        if let Some(amount) = self.amount {
            text.push_str(&format!(" {}", amount));
        }
        if let Some(symbol) = &self.symbol {
            text.push_str(&format!(" {}", symbol));
        }
        if !self.description.is_empty() {
            text.push_str(": ");
            text.push_str(&self.description);
        }
        text
    }
}

//
// ================= Session =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: Uuid,
    #[serde(default)]
    pub risk_tolerance: RiskTolerance,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            risk_tolerance: RiskTolerance::default(),
        }
    }
}

//
// ================= History =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    #[serde(alias = "assistant")]
    Agent,
    System,
}

/// One prior conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: MessageRole,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            content: content.into(),
        }
    }
}

//
// ================= Severity =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Critical,
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTolerance::Low => "low",
            RiskTolerance::Medium => "medium",
            RiskTolerance::High => "high",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_action_deserializes() {
        let plan: Plan = serde_json::from_str(
            r#"{"action": "rebalance_portfolio", "description": "x"}"#,
        )
        .unwrap();
        assert_eq!(plan.action, ActionType::Unknown);
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let plan = Plan::new(ActionType::ExecuteTrade, "buy").with_confidence(1.5);
        assert!(plan.validate().is_err());

        let plan = Plan::new(ActionType::ExecuteTrade, "buy").with_confidence(0.7);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_assistant_role_alias() {
        let turn: Turn =
            serde_json::from_str(r#"{"role": "assistant", "content": "hi"}"#).unwrap();
        assert_eq!(turn.role, MessageRole::Agent);
    }
}

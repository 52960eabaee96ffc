//! Structured inputs sent to the decision authority

use crate::models::{Plan, SessionContext};
use serde_json::{json, Map, Value};

/// Hot-path input: plan fields plus caller identity and risk attitude
pub fn trade_input(plan: &Plan, session: &SessionContext) -> Map<String, Value> {
    let mut input = Map::new();
    input.insert("action".to_string(), json!(plan.action.as_str()));
    input.insert("amount".to_string(), json!(plan.amount));
    input.insert("symbol".to_string(), json!(plan.symbol));
    input.insert("description".to_string(), json!(plan.description));
    input.insert("confidence".to_string(), json!(plan.confidence));
    input.insert("approval_token".to_string(), json!(plan.approval_token));
    input.insert("user_id".to_string(), json!(session.user_id.to_string()));
    input.insert("session_id".to_string(), json!(session.session_id));
    input.insert(
        "risk_tolerance".to_string(),
        json!(session.risk_tolerance.to_string()),
    );
    input
}

/// Deep-path input wrapping the whole plan for verification
pub fn verify_plan_input(plan_text: &str, steps: &Value) -> Map<String, Value> {
    let mut input = Map::new();
    input.insert("action".to_string(), json!("verify_plan"));
    input.insert("plan_text".to_string(), json!(plan_text));
    input.insert("steps".to_string(), steps.clone());
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, RiskTolerance};
    use uuid::Uuid;

    #[test]
    fn test_trade_input_carries_risk_attitude() {
        let plan = Plan::new(ActionType::ExecuteTrade, "buy AAPL")
            .with_amount(10.0)
            .with_symbol("AAPL");
        let mut session = SessionContext::new("s-1", Uuid::new_v4());
        session.risk_tolerance = RiskTolerance::Low;

        let input = trade_input(&plan, &session);
        assert_eq!(input["action"], json!("execute_trade"));
        assert_eq!(input["risk_tolerance"], json!("low"));
        assert_eq!(input["approval_token"], Value::Null);
    }
}

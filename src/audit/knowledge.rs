//! Knowledge-graph constraint store and plan extraction
//!
//! Constraints are seeded once and never mutated.
//! Plans are translated (best effort) into action steps the
//! symbolic auditor can evaluate.

use crate::audit::stpa::extract_percentages;
use crate::error::GovernanceError;
use crate::models::{ActionType, Plan};
use crate::Result;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraint {
    pub id: String,
    pub description: String,
    /// Name of the evaluation handler
    pub logic_ref: String,
    /// Action names this constraint applies to
    pub scope: BTreeSet<String>,
}

impl Constraint {
    pub fn new(id: &str, description: &str, logic_ref: &str, scope: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            logic_ref: logic_ref.to_string(),
            scope: scope.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn applies_to(&self, action: &str) -> bool {
        self.scope.contains(action)
    }
}

lazy_static! {
    static ref SEEDED_CONSTRAINTS: Arc<Vec<Constraint>> = Arc::new(vec![
        Constraint::new(
            "token_required",
            "Trades require a human-issued approval token",
            "require_approval_token",
            &["execute_trade"],
        ),
        Constraint::new(
            "latency_bound",
            "Execution latency must stay within the SLA bound",
            "max_latency_ms",
            &["execute_trade", "write_db"],
        ),
        Constraint::new(
            "data_classification",
            "Restricted data must not be displayed and writes must be classified",
            "classification_guard",
            &["write_db", "display_output"],
        ),
        Constraint::new(
            "percentage_cap",
            "No single position may exceed the portfolio percentage cap",
            "max_position_pct",
            &["execute_trade"],
        ),
    ]);
}

/// Read-only table of constraints, shared across requests
#[derive(Debug, Clone)]
pub struct ConstraintStore {
    constraints: Arc<Vec<Constraint>>,
}

impl ConstraintStore {
    pub fn seeded() -> Self {
        Self {
            constraints: Arc::clone(&SEEDED_CONSTRAINTS),
        }
    }

    pub fn with_constraints(constraints: Vec<Constraint>) -> Self {
        Self {
            constraints: Arc::new(constraints),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id == id)
    }

    pub fn for_action<'a>(&'a self, action: &'a str) -> impl Iterator<Item = &'a Constraint> {
        self.constraints.iter().filter(move |c| c.applies_to(action))
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

impl Default for ConstraintStore {
    fn default() -> Self {
        Self::seeded()
    }
}

//
// ================= Knowledge Graph =================
//

/// One action node with its parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStep {
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ActionStep {
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
            _ => None,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeGraph {
    /// Instruments referenced anywhere in the plan
    pub entities: Vec<String>,
    pub steps: Vec<ActionStep>,
}

impl KnowledgeGraph {
    pub fn steps_json(&self) -> Value {
        serde_json::to_value(&self.steps).unwrap_or(Value::Null)
    }
}

impl From<&Plan> for KnowledgeGraph {
    fn from(plan: &Plan) -> Self {
        let mut params = Map::new();
        if let Some(amount) = plan.amount {
            params.insert("amount".to_string(), json!(amount));
        }
        if let Some(symbol) = &plan.symbol {
            params.insert("symbol".to_string(), json!(symbol));
        }
        if let Some(confidence) = plan.confidence {
            params.insert("confidence".to_string(), json!(confidence));
        }
        if let Some(token) = &plan.approval_token {
            params.insert("approval_token".to_string(), json!(token));
        }

        // The free-text description may still carry percentage/latency hints
        let hints = extract_params(&plan.description);
        for (key, value) in hints {
            params.entry(key).or_insert(value);
        }

        Self {
            entities: plan.symbol.iter().cloned().collect(),
            steps: vec![ActionStep {
                action: plan.action.as_str().to_string(),
                params,
            }],
        }
    }
}

/// Translate a plan given as text into the graph form.
///
/// Text that looks like JSON must parse as JSON; anything else goes
/// through the keyword extractor, which must find at least one action.
pub fn parse_plan_text(text: &str) -> Result<KnowledgeGraph> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: Value = serde_json::from_str(trimmed).map_err(|e| {
            GovernanceError::InvalidPlan(format!("malformed structured plan: {}", e))
        })?;
        return parse_structured(value);
    }

    let graph = extract_heuristic(text);
    if graph.steps.is_empty() {
        return Err(GovernanceError::InvalidPlan(
            "no recognisable action in plan text (expected a trade, write, display or fetch step)"
                .to_string(),
        ));
    }

    Ok(graph)
}

fn parse_structured(value: Value) -> Result<KnowledgeGraph> {
    let raw_steps = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("steps") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(GovernanceError::InvalidPlan(
                    "'steps' must be an array".to_string(),
                ))
            }
            None => {
                // A single plan object
                let plan: Plan = serde_json::from_value(Value::Object(obj)).map_err(|e| {
                    GovernanceError::InvalidPlan(format!("malformed structured plan: {}", e))
                })?;
                plan.validate()?;
                return Ok(KnowledgeGraph::from(&plan));
            }
        },
        _ => {
            return Err(GovernanceError::InvalidPlan(
                "structured plan must be an object or an array of steps".to_string(),
            ))
        }
    };

    let mut graph = KnowledgeGraph::default();

    for (index, raw) in raw_steps.into_iter().enumerate() {
        let Value::Object(mut obj) = raw else {
            return Err(GovernanceError::InvalidPlan(format!(
                "step {} is not an object",
                index + 1
            )));
        };

        let action = match obj.remove("action") {
            Some(Value::String(action)) => action,
            _ => {
                return Err(GovernanceError::InvalidPlan(format!(
                    "step {} has no 'action'",
                    index + 1
                )))
            }
        };

        let params = match obj.remove("params").or_else(|| obj.remove("parameters")) {
            Some(Value::Object(params)) => params,
            Some(_) => {
                return Err(GovernanceError::InvalidPlan(format!(
                    "step {} params must be an object",
                    index + 1
                )))
            }
            None => obj,
        };

        if let Some(symbol) = params.get("symbol").and_then(Value::as_str) {
            push_entity(&mut graph.entities, symbol);
        }

        graph.steps.push(ActionStep { action, params });
    }

    Ok(graph)
}

//
// ================= Heuristic Extraction =================
//

const TRADE_KEYWORDS: &[&str] = &["buy", "sell", "short", "purchase", "trade"];
const WRITE_KEYWORDS: &[&str] = &["write", "store", "save", "insert", "persist", "record"];
const DISPLAY_KEYWORDS: &[&str] = &["display", "show", "print", "present"];
const FETCH_KEYWORDS: &[&str] = &["fetch", "retrieve", "analyze", "analyse", "lookup", "get"];

const CLASSIFICATIONS: &[&str] = &["restricted", "pii", "confidential", "internal", "public"];

/// Common all-caps words that are not tickers
const NON_TICKERS: &[&str] = &["I", "A", "USD", "ETF", "API", "DB", "PII", "CEO", "AND", "OR"];

fn words(clause: &str) -> Vec<String> {
    clause
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn classify_clause(clause: &str) -> Option<ActionType> {
    let words = words(clause);
    let has = |keys: &[&str]| words.iter().any(|w| keys.contains(&w.as_str()));

    if has(TRADE_KEYWORDS) {
        Some(ActionType::ExecuteTrade)
    } else if has(WRITE_KEYWORDS) {
        Some(ActionType::WriteDb)
    } else if has(DISPLAY_KEYWORDS) {
        Some(ActionType::DisplayOutput)
    } else if has(FETCH_KEYWORDS) {
        Some(ActionType::FetchData)
    } else {
        None
    }
}

fn push_entity(entities: &mut Vec<String>, symbol: &str) {
    if !entities.iter().any(|e| e == symbol) {
        entities.push(symbol.to_string());
    }
}

fn extract_symbol(clause: &str) -> Option<String> {
    clause.split_whitespace().find_map(|raw| {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '$');
        let token = token.strip_prefix('$').unwrap_or(token);
        let is_ticker = (1..=5).contains(&token.len())
            && token.chars().all(|c| c.is_ascii_uppercase())
            && !NON_TICKERS.contains(&token);
        is_ticker.then(|| token.to_string())
    })
}

fn extract_token(clause: &str) -> Option<String> {
    let tokens: Vec<&str> = clause.split_whitespace().collect();

    for (i, raw) in tokens.iter().enumerate() {
        let lower = raw.to_lowercase();
        for key in ["approval_token=", "token=", "approval_token:", "token:"] {
            if let Some(rest) = lower.strip_prefix(key) {
                if !rest.is_empty() {
                    return Some(raw[key.len()..].trim_end_matches(['.', ',']).to_string());
                }
                return tokens
                    .get(i + 1)
                    .map(|t| t.trim_end_matches(['.', ',']).to_string());
            }
        }
        if lower == "token" || lower == "approval_token" {
            let next = tokens.get(i + 1)?;
            let next = next.trim_start_matches([':', '=']);
            if !next.is_empty() {
                return Some(next.trim_end_matches(['.', ',']).to_string());
            }
            return tokens
                .get(i + 2)
                .map(|t| t.trim_end_matches(['.', ',']).to_string());
        }
    }

    None
}

/// Parameter hints found in free text
fn extract_params(clause: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let lower = clause.to_lowercase();

    if let Some(pct) = extract_percentages(&lower).into_iter().next() {
        params.insert("percentage".to_string(), json!(pct));
    }

    for raw in lower.split_whitespace() {
        let token = raw.trim_matches(|c: char| c == ',' || c == '.' || c == '(' || c == ')');
        if let Some(ms) = token.strip_suffix("ms") {
            if let Ok(value) = ms.parse::<f64>() {
                params.insert("latency_ms".to_string(), json!(value));
            }
        }
    }

    if let Some(amount) = lower.split_whitespace().find_map(|raw| {
        let token = raw.trim_matches(|c: char| c == ',' || c == '$');
        token.parse::<f64>().ok()
    }) {
        params.insert("amount".to_string(), json!(amount));
    }

    if let Some(class) = words(&lower)
        .into_iter()
        .find(|w| CLASSIFICATIONS.contains(&w.as_str()))
    {
        params.insert("classification".to_string(), json!(class));
    }

    if let Some(token) = extract_token(clause) {
        params.insert("approval_token".to_string(), json!(token));
    }

    params
}

fn split_clauses(text: &str) -> Vec<String> {
    text.split(['\n', ';'])
        .flat_map(|line| line.split(". "))
        .flat_map(|s| s.split(" then "))
        .map(|s| s.trim().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn extract_heuristic(text: &str) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::default();

    for clause in split_clauses(text) {
        let symbol = extract_symbol(&clause);
        if let Some(symbol) = &symbol {
            push_entity(&mut graph.entities, symbol);
        }

        let Some(action) = classify_clause(&clause) else {
            continue;
        };

        let mut params = extract_params(&clause);
        if let Some(symbol) = symbol {
            params.insert("symbol".to_string(), json!(symbol));
        }

        graph.steps.push(ActionStep {
            action: action.as_str().to_string(),
            params,
        });
    }

    debug!(
        steps = graph.steps.len(),
        entities = graph.entities.len(),
        "Extracted knowledge graph from plan text"
    );

    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_store() {
        let store = ConstraintStore::seeded();
        assert_eq!(store.len(), 4);
        for id in ["token_required", "latency_bound", "data_classification", "percentage_cap"] {
            assert!(store.get(id).is_some(), "missing {}", id);
        }
        let trade: Vec<_> = store.for_action("execute_trade").map(|c| c.id.as_str()).collect();
        assert_eq!(trade, vec!["token_required", "latency_bound", "percentage_cap"]);
    }

    #[test]
    fn test_heuristic_extraction() {
        let graph = parse_plan_text(
            "Fetch quotes for AAPL. Buy 15% of AAPL with a stop loss, token: APR-77",
        )
        .unwrap();

        assert_eq!(graph.entities, vec!["AAPL".to_string()]);
        assert_eq!(graph.steps.len(), 2);
        assert_eq!(graph.steps[0].action, "fetch_data");

        let trade = &graph.steps[1];
        assert_eq!(trade.action, "execute_trade");
        assert_eq!(trade.param_f64("percentage"), Some(15.0));
        assert_eq!(trade.param_str("symbol"), Some("AAPL"));
        assert_eq!(trade.param_str("approval_token"), Some("APR-77"));
    }

    #[test]
    fn test_structured_steps() {
        let graph = parse_plan_text(
            r#"{"steps": [{"action": "write_db", "params": {"classification": "internal"}},
                          {"action": "execute_trade", "symbol": "MSFT", "percentage": 5}]}"#,
        )
        .unwrap();

        assert_eq!(graph.steps.len(), 2);
        assert_eq!(graph.steps[1].param_f64("percentage"), Some(5.0));
        assert_eq!(graph.entities, vec!["MSFT".to_string()]);
    }

    #[test]
    fn test_single_plan_object() {
        let graph = parse_plan_text(
            r#"{"action": "execute_trade", "amount": 10, "symbol": "TSLA", "approval_token": "t-1"}"#,
        )
        .unwrap();
        assert_eq!(graph.steps[0].action, "execute_trade");
        assert_eq!(graph.steps[0].param_str("approval_token"), Some("t-1"));
    }

    #[test]
    fn test_malformed_json_is_invalid_plan() {
        let err = parse_plan_text(r#"{"action": "execute_trade", "amount": }"#).unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidPlan(_)));

        let err = parse_plan_text(r#"[{"params": {}}]"#).unwrap_err();
        assert!(err.to_string().contains("no 'action'"));
    }

    #[test]
    fn test_text_without_action_is_invalid_plan() {
        let err = parse_plan_text("Go long NVDA with 40% of the account today").unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidPlan(_)));
        assert!(err.to_string().contains("no recognisable action"));

        assert!(parse_plan_text("   ").is_err());
    }
}

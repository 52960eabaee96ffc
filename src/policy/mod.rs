//! Policy gate
//!
//! Single boundary to the external decision authority.
//! The authority's rule language is opaque here; only its verdict matters.

use crate::error::GovernanceError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub mod envelope;

/// Verdict returned by the decision authority
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    Allow,
    Deny,
    ManualReview,
    Uncertain,
}

impl PolicyDecision {
    /// Parse the authority's decision string. Unrecognised values are UNCERTAIN.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ALLOW" | "ALLOWED" => PolicyDecision::Allow,
            "DENY" | "DENIED" => PolicyDecision::Deny,
            "MANUAL_REVIEW" | "REVIEW" => PolicyDecision::ManualReview,
            _ => PolicyDecision::Uncertain,
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyDecision::Allow => "ALLOW",
            PolicyDecision::Deny => "DENY",
            PolicyDecision::ManualReview => "MANUAL_REVIEW",
            PolicyDecision::Uncertain => "UNCERTAIN",
        };
        write!(f, "{}", s)
    }
}

/// Decision plus the authority's explanation.
/// An ALLOW outcome never carries a reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyOutcome {
    decision: PolicyDecision,
    reason: Option<String>,
}

impl PolicyOutcome {
    pub fn new(decision: PolicyDecision, reason: Option<String>) -> Self {
        let reason = match decision {
            PolicyDecision::Allow => {
                if let Some(dropped) = reason {
                    warn!(reason = %dropped, "Dropping reason attached to ALLOW decision");
                }
                None
            }
            _ => reason.filter(|r| !r.trim().is_empty()),
        };

        Self { decision, reason }
    }

    pub fn allow() -> Self {
        Self::new(PolicyDecision::Allow, None)
    }

    pub fn decision(&self) -> PolicyDecision {
        self.decision
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Reason text for feedback, falling back to the decision name
    pub fn explanation(&self) -> String {
        match &self.reason {
            Some(reason) => reason.clone(),
            None => format!("decision authority returned {}", self.decision),
        }
    }
}

/// Trait for the external decision authority
#[async_trait]
pub trait PolicyGate: Send + Sync {
    /// Evaluate a structured input. Transport failures are errors, never ALLOW.
    async fn evaluate(&self, input: Map<String, Value>) -> Result<PolicyOutcome>;
}

/// Fill `action` when absent so the authority can still apply its defaults
fn normalize_input(mut input: Map<String, Value>) -> Map<String, Value> {
    if !input.contains_key("action") {
        warn!("Policy input missing 'action'; sending as unknown");
        input.insert("action".to_string(), Value::String("unknown".to_string()));
    }
    input
}

/// Map a decision-authority response body into an outcome.
///
/// Accepted shapes:
/// - `{"result": "ALLOW"}`
/// - `{"result": {"decision": "DENY", "reason": "..."}}`
/// - `{"result": {"allow": true}}`
///
/// An undefined result (`{}`) is UNCERTAIN.
pub fn parse_decision_body(body: &Value) -> Result<PolicyOutcome> {
    let Some(result) = body.get("result") else {
        return Ok(PolicyOutcome::new(
            PolicyDecision::Uncertain,
            Some("decision authority returned no result".to_string()),
        ));
    };

    match result {
        Value::String(raw) => Ok(PolicyOutcome::new(PolicyDecision::parse(raw), None)),
        Value::Object(obj) => {
            let reason = obj
                .get("reason")
                .or_else(|| obj.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string);

            if let Some(raw) = obj.get("decision").and_then(Value::as_str) {
                return Ok(PolicyOutcome::new(PolicyDecision::parse(raw), reason));
            }

            match obj.get("allow").and_then(Value::as_bool) {
                Some(true) => Ok(PolicyOutcome::allow()),
                Some(false) => Ok(PolicyOutcome::new(PolicyDecision::Deny, reason)),
                None => Ok(PolicyOutcome::new(
                    PolicyDecision::Uncertain,
                    Some("decision authority result had no decision".to_string()),
                )),
            }
        }
        Value::Bool(true) => Ok(PolicyOutcome::allow()),
        Value::Bool(false) => Ok(PolicyOutcome::new(PolicyDecision::Deny, None)),
        other => Err(GovernanceError::PolicyUnavailable(format!(
            "Unrecognised decision payload: {}",
            other
        ))),
    }
}

/// HTTP-backed decision authority (OPA-style data API)
pub struct HttpPolicyGate {
    client: Client,
    url: String,
}

impl HttpPolicyGate {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PolicyGate for HttpPolicyGate {
    async fn evaluate(&self, input: Map<String, Value>) -> Result<PolicyOutcome> {
        let input = normalize_input(input);

        debug!(url = %self.url, action = ?input.get("action"), "Querying decision authority");

        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "input": input }))
            .send()
            .await
            .map_err(|e| {
                error!("Decision authority request failed: {}", e);
                GovernanceError::PolicyUnavailable(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Decision authority returned error status");
            return Err(GovernanceError::PolicyUnavailable(format!(
                "decision authority returned {}: {}",
                status, body
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            GovernanceError::PolicyUnavailable(format!("invalid decision payload: {}", e))
        })?;

        let outcome = parse_decision_body(&body)?;
        debug!(decision = %outcome.decision(), "Decision authority responded");
        Ok(outcome)
    }
}

/// Fixed-outcome gate for offline runs & testing.
/// Records every input it evaluates.
pub struct StaticPolicyGate {
    outcome: std::result::Result<PolicyOutcome, String>,
    seen: Mutex<Vec<Map<String, Value>>>,
}

impl StaticPolicyGate {
    pub fn new(outcome: PolicyOutcome) -> Self {
        Self {
            outcome: Ok(outcome),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn allow() -> Self {
        Self::new(PolicyOutcome::allow())
    }

    pub fn deny(reason: &str) -> Self {
        Self::new(PolicyOutcome::new(
            PolicyDecision::Deny,
            Some(reason.to_string()),
        ))
    }

    pub fn review(reason: &str) -> Self {
        Self::new(PolicyOutcome::new(
            PolicyDecision::ManualReview,
            Some(reason.to_string()),
        ))
    }

    pub fn uncertain() -> Self {
        Self::new(PolicyOutcome::new(PolicyDecision::Uncertain, None))
    }

    /// Gate that always fails as if the authority were unreachable
    pub fn unavailable(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub async fn seen_inputs(&self) -> Vec<Map<String, Value>> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl PolicyGate for StaticPolicyGate {
    async fn evaluate(&self, input: Map<String, Value>) -> Result<PolicyOutcome> {
        self.seen.lock().await.push(normalize_input(input));

        match &self.outcome {
            Ok(outcome) => Ok(outcome.clone()),
            Err(message) => Err(GovernanceError::PolicyUnavailable(message.clone())),
        }
    }
}

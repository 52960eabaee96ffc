//! STPA rule checker
//!
//! Fixed, ordered scanners for known unsafe control actions.
//! Each rule runs independently; order only affects listing order.

use crate::models::Severity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyViolation {
    pub rule_id: String,
    pub description: String,
    pub severity: Severity,
}

/// Trait for a single unsafe-control-action pattern
pub trait StpaRule: Send + Sync {
    fn rule_id(&self) -> &'static str;

    fn severity(&self) -> Severity;

    /// `text` is already lowercased
    fn detect(&self, text: &str) -> Option<String>;
}

const TRADE_VERBS: &[&str] = &["buy", "sell", "short"];

/// Action name carried by flattened structured plans
const TRADE_ACTION: &str = "execute_trade";

const RISK_CONTROLS: &[&str] = &[
    "stop loss",
    "stop-loss",
    "stoploss",
    "stop losses",
    "trailing stop",
    "limit",
    "limits",
    "limit order",
    "hedge",
    "hedged",
    "hedging",
    "risk control",
    "max loss",
];

const HAZARDOUS_PHRASES: &[&str] = &[
    "all in",
    "all-in",
    "max leverage",
    "maximum leverage",
    "short volatility",
    "short vol",
    "yolo",
    "bet everything",
];

const BYPASS_PHRASES: &[&str] = &[
    "ignore risk",
    "ignore the risk",
    "skip verification",
    "skip the check",
    "bypass",
    "disable stop",
    "override limit",
    "no matter what",
];

const CONCENTRATION_PHRASES: &[&str] = &[
    "100%",
    "entire portfolio",
    "whole portfolio",
    "all my money",
    "single stock",
];

/// Largest single-asset percentage considered diversified
const MAX_SINGLE_ASSET_PCT: f64 = 50.0;

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

/// Substring match that must not start or end inside a word
fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn first_match<'a>(text: &str, phrases: &[&'a str]) -> Option<&'a str> {
    phrases.iter().copied().find(|p| contains_phrase(text, p))
}

/// Percentages written as `NN%` or `NN percent`
pub(crate) fn extract_percentages(text: &str) -> Vec<f64> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut found = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let trimmed = token.trim_matches(|c: char| c == ',' || c == '.' || c == '(' || c == ')');
        if let Some(number) = trimmed.strip_suffix('%') {
            if let Ok(value) = number.parse::<f64>() {
                found.push(value);
            }
        } else if tokens.get(i + 1).map(|t| t.starts_with("percent")) == Some(true) {
            if let Ok(value) = trimmed.parse::<f64>() {
                found.push(value);
            }
        }
    }

    found
}

/// UCA-1: trading without any risk control
pub struct UnboundedRiskRule;

impl StpaRule for UnboundedRiskRule {
    fn rule_id(&self) -> &'static str {
        "UCA-1"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn detect(&self, text: &str) -> Option<String> {
        let verb = TRADE_VERBS
            .iter()
            .copied()
            .find(|v| contains_word(text, v))
            .or_else(|| text.contains(TRADE_ACTION).then_some(TRADE_ACTION))?;

        if first_match(text, RISK_CONTROLS).is_some() {
            return None;
        }

        Some(format!(
            "Unbounded risk exposure: '{}' order without a stop loss or other risk control",
            verb
        ))
    }
}

/// UCA-2: gambler's-ruin style actions
pub struct HazardousActionRule;

impl StpaRule for HazardousActionRule {
    fn rule_id(&self) -> &'static str {
        "UCA-2"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn detect(&self, text: &str) -> Option<String> {
        first_match(text, HAZARDOUS_PHRASES)
            .map(|p| format!("Hazardous action: '{}' risks gambler's ruin", p))
    }
}

/// UCA-3: instructions to skip the governance feedback loop
pub struct FeedbackBypassRule;

impl StpaRule for FeedbackBypassRule {
    fn rule_id(&self) -> &'static str {
        "UCA-3"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn detect(&self, text: &str) -> Option<String> {
        first_match(text, BYPASS_PHRASES)
            .map(|p| format!("Feedback bypass: '{}' attempts to disable safety controls", p))
    }
}

/// UCA-4: single-asset over-concentration
pub struct ConcentrationRule;

impl StpaRule for ConcentrationRule {
    fn rule_id(&self) -> &'static str {
        "UCA-4"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn detect(&self, text: &str) -> Option<String> {
        if let Some(phrase) = first_match(text, CONCENTRATION_PHRASES) {
            return Some(format!(
                "Over-concentration: '{}' places the portfolio in a single asset",
                phrase
            ));
        }

        extract_percentages(text)
            .into_iter()
            .find(|pct| *pct > MAX_SINGLE_ASSET_PCT)
            .map(|pct| {
                format!(
                    "Over-concentration: {}% allocation exceeds {}% single-asset limit",
                    pct, MAX_SINGLE_ASSET_PCT
                )
            })
    }
}

/// Runs every rule against a plan's text
pub struct StpaChecker {
    rules: Vec<Box<dyn StpaRule>>,
}

impl StpaChecker {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn StpaRule>) {
        self.rules.push(rule);
    }

    pub fn check(&self, plan_text: &str) -> Vec<SafetyViolation> {
        let text = plan_text.to_lowercase();

        self.rules
            .iter()
            .filter_map(|rule| {
                rule.detect(&text).map(|description| SafetyViolation {
                    rule_id: rule.rule_id().to_string(),
                    description,
                    severity: rule.severity(),
                })
            })
            .collect()
    }
}

impl Default for StpaChecker {
    fn default() -> Self {
        create_default_stpa_checker()
    }
}

pub fn create_default_stpa_checker() -> StpaChecker {
    let mut checker = StpaChecker::new();
    checker.add_rule(Box::new(UnboundedRiskRule));
    checker.add_rule(Box::new(HazardousActionRule));
    checker.add_rule(Box::new(FeedbackBypassRule));
    checker.add_rule(Box::new(ConcentrationRule));
    checker
}

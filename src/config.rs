//! Runtime configuration
//!
//! Read from the process environment (after `.env` is loaded by the
//! binaries). Every setting has a default except the Gemini key.

use crate::audit::symbolic::UnknownConstraintPolicy;
use crate::error::GovernanceError;
use crate::safety::{GateFailurePolicy, InterceptorConfig, MissingPlanPolicy};
use crate::telemetry::DEFAULT_CHAT_SAMPLE_RATE;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub policy_url: String,
    pub policy_timeout: Duration,
    pub gemini_api_key: Option<String>,
    pub fast_model: String,
    pub reliable_model: String,
    pub ttft_threshold: Duration,
    pub telemetry_sample_rate: f64,
    /// Archive to the filesystem when set, otherwise keep batches in memory
    pub telemetry_archive_dir: Option<PathBuf>,
    pub financial_api_base_url: String,
    pub interceptor: InterceptorConfig,
    pub unknown_constraints: UnknownConstraintPolicy,
    pub port: u16,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            policy_url: "http://localhost:8181/v1/data/trading/decision".to_string(),
            policy_timeout: Duration::from_millis(2000),
            gemini_api_key: None,
            fast_model: "gemini-2.0-flash-lite".to_string(),
            reliable_model: "gemini-2.0-flash".to_string(),
            ttft_threshold: Duration::from_millis(800),
            telemetry_sample_rate: DEFAULT_CHAT_SAMPLE_RATE,
            telemetry_archive_dir: None,
            financial_api_base_url: "http://localhost:9000".to_string(),
            interceptor: InterceptorConfig::default(),
            unknown_constraints: UnknownConstraintPolicy::default(),
            port: 8080,
        }
    }
}

impl GovernanceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("POLICY_URL") {
            config.policy_url = url;
        }
        if let Some(ms) = get("POLICY_TIMEOUT_MS") {
            config.policy_timeout = Duration::from_millis(parse_value("POLICY_TIMEOUT_MS", &ms)?);
        }
        config.gemini_api_key = get("GEMINI_API_KEY");
        if let Some(model) = get("FAST_MODEL") {
            config.fast_model = model;
        }
        if let Some(model) = get("RELIABLE_MODEL") {
            config.reliable_model = model;
        }
        if let Some(ms) = get("TTFT_THRESHOLD_MS") {
            config.ttft_threshold = Duration::from_millis(parse_value("TTFT_THRESHOLD_MS", &ms)?);
        }
        if let Some(rate) = get("TELEMETRY_SAMPLE_RATE") {
            let rate: f64 = parse_value("TELEMETRY_SAMPLE_RATE", &rate)?;
            if !(0.0..=1.0).contains(&rate) {
                return Err(GovernanceError::ConfigError(format!(
                    "TELEMETRY_SAMPLE_RATE must be within [0, 1], got {}",
                    rate
                )));
            }
            config.telemetry_sample_rate = rate;
        }
        config.telemetry_archive_dir = get("TELEMETRY_ARCHIVE_DIR").map(PathBuf::from);
        if let Some(url) = get("FINANCIAL_API_BASE_URL") {
            config.financial_api_base_url = url;
        }

        if let Some(flag) = get("SAFETY_FAIL_OPEN") {
            if parse_flag("SAFETY_FAIL_OPEN", &flag)? {
                config.interceptor.gate_failure = GateFailurePolicy::FailOpen;
            }
        }
        if let Some(flag) = get("SAFETY_BLOCK_MISSING_PLAN") {
            if parse_flag("SAFETY_BLOCK_MISSING_PLAN", &flag)? {
                config.interceptor.missing_plan = MissingPlanPolicy::Block;
            }
        }
        if let Some(flag) = get("UNKNOWN_CONSTRAINTS_PERMISSIVE") {
            if parse_flag("UNKNOWN_CONSTRAINTS_PERMISSIVE", &flag)? {
                config.unknown_constraints = UnknownConstraintPolicy::Permissive;
            }
        }

        if let Some(port) = get("PORT").or_else(|| get("API_PORT")) {
            config.port = parse_value("PORT", &port)?;
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| GovernanceError::ConfigError(format!("{} = {:?}: {}", key, raw, e)))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(GovernanceError::ConfigError(format!(
            "{} expects a boolean, got {:?}",
            key, other
        ))),
    }
}

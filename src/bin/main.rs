//! Offline plan audit
//!
//! Usage: `plan-audit <plan text...>` or pipe the plan on stdin.
//! Prints the verdict as JSON; exits non-zero unless APPROVED.

use governed_trading_core::{
    audit::{AuditInput, PlanAuditor},
    config::GovernanceConfig,
    policy::HttpPolicyGate,
};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    dotenv::dotenv().ok();

    let config = GovernanceConfig::from_env()?;

    let mut plan_text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if plan_text.trim().is_empty() {
        tokio::io::stdin().read_to_string(&mut plan_text).await?;
    }

    let gate = HttpPolicyGate::new(config.policy_url.clone(), config.policy_timeout)?;
    let auditor = PlanAuditor::from_config(Arc::new(gate), &config);

    info!(policy_url = %config.policy_url, "Auditing plan");

    let verdict = auditor
        .audit(&AuditInput::Text(plan_text.trim().to_string()), None)
        .await;

    println!("{}", serde_json::to_string_pretty(&verdict)?);

    if !verdict.is_approved() {
        std::process::exit(1);
    }

    Ok(())
}

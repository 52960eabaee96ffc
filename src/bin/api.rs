use governed_trading_core::{
    api::{start_server, ApiState},
    config::GovernanceConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = GovernanceConfig::from_env()?;

    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set; /api/generate will fail until it is configured");
    }

    info!(
        port = config.port,
        policy_url = %config.policy_url,
        gate_failure = ?config.interceptor.gate_failure,
        missing_plan = ?config.interceptor.missing_plan,
        "Governance API starting"
    );

    let state = ApiState::from_config(&config)?;

    start_server(state, config.port).await?;

    Ok(())
}

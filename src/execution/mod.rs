//! Optimistic execution coordinator
//!
//! Races read-only preparation against the safety verdict.
//! The verdict is always observed first; preparation output is only
//! merged when the action may proceed. Otherwise preparation is
//! cancelled and awaited before returning.

use crate::error::GovernanceError;
use crate::models::{Plan, SessionContext};
use crate::safety::{SafetyInterceptor, SafetyReport};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Read-only work needed if the action is later approved.
/// Implementations must not write anything: they may be cancelled at
/// any suspension point.
#[async_trait]
pub trait Preparation: Send + Sync {
    async fn prepare(&self, plan: &Plan, session: &SessionContext) -> Result<Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum PreparationOutcome {
    Completed(Value),
    Cancelled,
    Failed(String),
}

/// Where the agent goes next
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Execute,
    Replan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimisticOutcome {
    pub safety: SafetyReport,
    pub preparation: PreparationOutcome,
    pub route: Route,
}

/// Aborts the preparation task if the coordinator itself is dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct OptimisticCoordinator {
    interceptor: Arc<SafetyInterceptor>,
    preparation: Arc<dyn Preparation>,
}

impl OptimisticCoordinator {
    pub fn new(interceptor: Arc<SafetyInterceptor>, preparation: Arc<dyn Preparation>) -> Self {
        Self {
            interceptor,
            preparation,
        }
    }

    pub async fn execute(&self, plan: &Plan, session: &SessionContext) -> OptimisticOutcome {
        let preparation = Arc::clone(&self.preparation);
        let prep_plan = plan.clone();
        let prep_session = session.clone();

        let handle = tokio::spawn(async move {
            preparation.prepare(&prep_plan, &prep_session).await
        });
        let _guard = AbortOnDrop(handle.abort_handle());

        // Gatekeeper first, always
        let safety = self.interceptor.check(Some(plan), session).await;

        let preparation = if safety.status.may_proceed() {
            match handle.await {
                Ok(Ok(data)) => PreparationOutcome::Completed(data),
                Ok(Err(e)) => {
                    warn!(session_id = %session.session_id, error = %e, "Preparation failed");
                    PreparationOutcome::Failed(e.to_string())
                }
                Err(e) if e.is_cancelled() => PreparationOutcome::Cancelled,
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "Preparation task panicked");
                    PreparationOutcome::Failed(format!("preparation task aborted: {}", e))
                }
            }
        } else {
            handle.abort();
            match handle.await {
                Err(e) if e.is_cancelled() => {
                    debug!(session_id = %session.session_id, "Preparation cancelled after denial")
                }
                Ok(_) => debug!(
                    session_id = %session.session_id,
                    "Preparation finished before cancellation; result discarded"
                ),
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "Preparation task panicked")
                }
            }
            PreparationOutcome::Cancelled
        };

        let route = if safety.status.may_proceed() {
            Route::Execute
        } else {
            Route::Replan
        };

        info!(
            session_id = %session.session_id,
            status = %safety.status,
            ?route,
            "Optimistic execution resolved"
        );

        OptimisticOutcome {
            safety,
            preparation,
            route,
        }
    }
}

/// Fetches market and account state from the financial API (GET only)
pub struct HttpMarketPreparation {
    client: Client,
    base_url: String,
}

impl HttpMarketPreparation {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                GovernanceError::PreparationFailed(format!("request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GovernanceError::PreparationFailed(format!(
                "financial API returned {} for {}",
                status, path
            )));
        }

        response.json::<Value>().await.map_err(|e| {
            GovernanceError::PreparationFailed(format!("invalid JSON from {}: {}", path, e))
        })
    }
}

#[async_trait]
impl Preparation for HttpMarketPreparation {
    async fn prepare(&self, plan: &Plan, session: &SessionContext) -> Result<Value> {
        let market_query = [("symbol", plan.symbol.clone().unwrap_or_default())];
        let account_query = [("user_id", session.user_id.to_string())];

        let (market, account) = tokio::try_join!(
            self.get_json("/api/v1/market/snapshot", &market_query),
            self.get_json("/api/v1/account/summary", &account_query),
        )?;

        Ok(json!({
            "market": market,
            "account": account,
        }))
    }
}

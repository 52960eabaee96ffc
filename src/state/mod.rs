//! Session state persistence layer
//!
//! Holds the per-session workflow state.
//! Currently uses in-memory; can be replaced with an external keyed store.

use crate::workflow::WorkflowState;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for session-keyed workflow state
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Current state; sessions never seen before are IDLE
    async fn load_state(&self, session_id: &str) -> Result<WorkflowState>;
    async fn persist_state(&self, session_id: &str, state: WorkflowState) -> Result<()>;
}

/// In-memory session store for development & single-node deployments
pub struct InMemorySessionStore {
    states: Arc<RwLock<HashMap<String, WorkflowState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.states.read().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_state(&self, session_id: &str) -> Result<WorkflowState> {
        let states = self.states.read().await;
        Ok(states.get(session_id).copied().unwrap_or_default())
    }

    async fn persist_state(&self, session_id: &str, state: WorkflowState) -> Result<()> {
        let mut states = self.states.write().await;
        states.insert(session_id.to_string(), state);
        Ok(())
    }
}

//! Verdict log
//!
//! Every deep-path verdict is recorded with a fingerprint of its input,
//! so rejected plans can be harvested into new rules and repeat audits
//! can be compared.

use crate::audit::{AuditInput, AuditStatus, AuditVerdict};
use crate::models::Turn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub fingerprint: String,
    pub input: AuditInput,
    pub verdict: AuditVerdict,
    pub created_at: DateTime<Utc>,
}

/// In-memory verdict storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, AuditRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store a verdict, returning its audit ID
    pub async fn record(
        &self,
        input: &AuditInput,
        history: Option<&[Turn]>,
        verdict: &AuditVerdict,
    ) -> Uuid {
        let record = AuditRecord {
            audit_id: Uuid::new_v4(),
            fingerprint: compute_fingerprint(input, history),
            input: input.clone(),
            verdict: verdict.clone(),
            created_at: Utc::now(),
        };

        let audit_id = record.audit_id;
        self.records.write().await.insert(audit_id, record);
        audit_id
    }

    pub async fn get(&self, audit_id: Uuid) -> Option<AuditRecord> {
        self.records.read().await.get(&audit_id).cloned()
    }

    /// Rejected records, oldest first
    pub async fn list_rejections(&self) -> Vec<AuditRecord> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|r| r.verdict.status == AuditStatus::Rejected)
            .cloned()
            .collect();

        items.sort_by_key(|r| r.created_at);
        items
    }

    /// All verdicts recorded for the same input
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Vec<AuditRecord> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|r| r.fingerprint == fingerprint)
            .cloned()
            .collect();

        items.sort_by_key(|r| r.created_at);
        items
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA256 over the audited input and history.
/// Streams JSON straight into the hasher.
pub fn compute_fingerprint(input: &AuditInput, history: Option<&[Turn]>) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), &(input, history)).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

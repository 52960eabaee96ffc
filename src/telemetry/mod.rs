//! Tiered telemetry sampler
//!
//! Every completed unit of work passes through `on_unit_complete`.
//! Governance interventions and write/tool units are always archived in
//! full; plain chat units are archived at a low fixed rate. The hot copy
//! never carries heavy free-text attributes.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

pub mod sinks;

pub use sinks::{FileArchive, InMemoryArchive, InMemoryHotExporter, LogExporter};

/// Free-text attributes kept out of hot storage
pub const HEAVY_ATTRIBUTE_KEYS: &[&str] = &[
    "gen_ai.prompt",
    "gen_ai.completion",
    "llm.input_messages",
    "llm.output_messages",
    "agent.reasoning",
    "input.value",
    "output.value",
];

pub const OUTCOME_ATTRIBUTE: &str = "governance.outcome";
pub const UNIT_KIND_ATTRIBUTE: &str = "unit.kind";
pub const TOOL_NAME_ATTRIBUTE: &str = "tool.name";

pub const DEFAULT_CHAT_SAMPLE_RATE: f64 = 0.01;

// ===== Records =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanRecord {
    pub name: String,
    pub trace_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attributes: BTreeMap<String, Value>,
}

impl SpanRecord {
    pub fn new(name: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            trace_id: Uuid::new_v4(),
            start,
            end: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Governance blocked or altered the action
    pub fn is_intervention(&self) -> bool {
        matches!(
            self.attribute_str(OUTCOME_ATTRIBUTE)
                .map(str::to_ascii_uppercase)
                .as_deref(),
            Some("BLOCKED") | Some("ALTERED")
        )
    }

    pub fn is_write_or_tool(&self) -> bool {
        matches!(self.attribute_str(UNIT_KIND_ATTRIBUTE), Some("write") | Some("tool"))
            || self.attributes.contains_key(TOOL_NAME_ATTRIBUTE)
            || self.name.starts_with("tool.")
    }
}

/// Copy of the record without heavy attributes
pub fn strip_heavy(record: &SpanRecord) -> SpanRecord {
    let mut stripped = record.clone();
    stripped
        .attributes
        .retain(|key, _| !HEAVY_ATTRIBUTE_KEYS.contains(&key.as_str()));
    stripped
}

/// Archive object key for a batch
pub fn archive_path(date: NaiveDate, batch_id: Uuid) -> String {
    format!("traces/{}/{}.json", date.format("%Y/%m/%d"), batch_id)
}

// ===== Sinks =====

/// Low-cost storage receiving every (stripped) record
#[async_trait]
pub trait HotExporter: Send + Sync {
    async fn export(&self, record: SpanRecord) -> Result<()>;
}

/// Full-detail storage for sampled records
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn put(&self, key: &str, records: &[SpanRecord]) -> Result<()>;
}

// ===== Sampler =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SamplingReason {
    Intervention,
    WriteOrTool,
    ChatSampled,
    ChatDropped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SamplingDecision {
    pub archived: bool,
    pub reason: SamplingReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_key: Option<String>,
}

pub struct TieredSampler {
    hot: Arc<dyn HotExporter>,
    archive: Arc<dyn ArchiveStore>,
    chat_sample_rate: f64,
    rng: Mutex<StdRng>,
}

impl TieredSampler {
    pub fn new(
        hot: Arc<dyn HotExporter>,
        archive: Arc<dyn ArchiveStore>,
        chat_sample_rate: f64,
    ) -> Self {
        Self::with_rng(hot, archive, chat_sample_rate, StdRng::from_rng(&mut rand::rng()))
    }

    pub fn with_seed(
        hot: Arc<dyn HotExporter>,
        archive: Arc<dyn ArchiveStore>,
        chat_sample_rate: f64,
        seed: u64,
    ) -> Self {
        Self::with_rng(hot, archive, chat_sample_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        hot: Arc<dyn HotExporter>,
        archive: Arc<dyn ArchiveStore>,
        chat_sample_rate: f64,
        rng: StdRng,
    ) -> Self {
        Self {
            hot,
            archive,
            chat_sample_rate: if chat_sample_rate.is_nan() {
                0.0
            } else {
                chat_sample_rate.clamp(0.0, 1.0)
            },
            rng: Mutex::new(rng),
        }
    }

    pub fn chat_sample_rate(&self) -> f64 {
        self.chat_sample_rate
    }

    pub async fn on_unit_complete(&self, record: SpanRecord) -> Result<SamplingDecision> {
        // 1️⃣ Decide
        let reason = if record.is_intervention() {
            SamplingReason::Intervention
        } else if record.is_write_or_tool() {
            SamplingReason::WriteOrTool
        } else if self.roll() {
            SamplingReason::ChatSampled
        } else {
            SamplingReason::ChatDropped
        };

        // 2️⃣ Archive full detail
        let archived = if reason == SamplingReason::ChatDropped {
            Ok(None)
        } else {
            let key = archive_path(record.end.date_naive(), Uuid::new_v4());
            self.archive
                .put(&key, std::slice::from_ref(&record))
                .await
                .map(|_| Some(key))
        };

        // 3️⃣ Hot copy is always stripped, and exported even when the archive failed
        self.hot.export(strip_heavy(&record)).await?;

        let archive_key = archived.map_err(|e| {
            warn!(span = %record.name, reason = ?reason, error = %e, "Telemetry archive write failed");
            e
        })?;

        debug!(
            span = %record.name,
            archived = archive_key.is_some(),
            reason = ?reason,
            "Telemetry unit sampled"
        );

        Ok(SamplingDecision {
            archived: archive_key.is_some(),
            reason,
            archive_key,
        })
    }

    fn roll(&self) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random_bool(self.chat_sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GovernanceError;

    fn sampler(rate: f64) -> (TieredSampler, Arc<InMemoryHotExporter>, Arc<InMemoryArchive>) {
        let hot = Arc::new(InMemoryHotExporter::new());
        let archive = Arc::new(InMemoryArchive::new());
        let sampler = TieredSampler::with_seed(hot.clone(), archive.clone(), rate, 42);
        (sampler, hot, archive)
    }

    struct BrokenArchive;

    #[async_trait]
    impl ArchiveStore for BrokenArchive {
        async fn put(&self, _key: &str, _records: &[SpanRecord]) -> Result<()> {
            Err(GovernanceError::TelemetryError("bucket unavailable".to_string()))
        }
    }

    fn chat_span() -> SpanRecord {
        SpanRecord::new("chat.turn", Utc::now())
            .with_attribute("gen_ai.prompt", "what is RSI?")
            .with_attribute("gen_ai.completion", "a momentum oscillator")
            .with_attribute("session.id", "sess-1")
    }

    #[tokio::test]
    async fn test_blocked_always_archived() {
        let (sampler, _hot, archive) = sampler(0.0);

        for _ in 0..20 {
            let record = chat_span().with_attribute(OUTCOME_ATTRIBUTE, "BLOCKED");
            let decision = sampler.on_unit_complete(record).await.unwrap();
            assert!(decision.archived);
            assert_eq!(decision.reason, SamplingReason::Intervention);
        }
        assert_eq!(archive.len().await, 20);
    }

    #[tokio::test]
    async fn test_write_and_tool_units_always_archived() {
        let (sampler, _hot, _archive) = sampler(0.0);

        let kinds = [
            SpanRecord::new("db.insert", Utc::now()).with_attribute(UNIT_KIND_ATTRIBUTE, "write"),
            SpanRecord::new("call", Utc::now()).with_attribute(TOOL_NAME_ATTRIBUTE, "get_quote"),
            SpanRecord::new("tool.market_snapshot", Utc::now()),
        ];
        for record in kinds {
            let decision = sampler.on_unit_complete(record).await.unwrap();
            assert_eq!(decision.reason, SamplingReason::WriteOrTool);
            assert!(decision.archived);
        }
    }

    #[tokio::test]
    async fn test_chat_archive_rate_near_configured_rate() {
        let (sampler, _hot, _archive) = sampler(0.1);

        let trials = 5_000;
        let mut archived = 0;
        for _ in 0..trials {
            if sampler.on_unit_complete(chat_span()).await.unwrap().archived {
                archived += 1;
            }
        }

        let rate = archived as f64 / trials as f64;
        assert!((0.07..=0.13).contains(&rate), "observed rate {}", rate);
    }

    #[tokio::test]
    async fn test_hot_copy_never_contains_heavy_keys() {
        let (sampler, hot, archive) = sampler(1.0);

        let mut record = chat_span();
        for key in HEAVY_ATTRIBUTE_KEYS {
            record = record.with_attribute(key, "large free text");
        }
        sampler.on_unit_complete(record).await.unwrap();
        sampler
            .on_unit_complete(chat_span().with_attribute(OUTCOME_ATTRIBUTE, "ALTERED"))
            .await
            .unwrap();

        for exported in hot.records().await {
            for key in HEAVY_ATTRIBUTE_KEYS {
                assert!(!exported.attributes.contains_key(*key));
            }
            assert!(exported.attributes.contains_key("session.id"));
        }

        // Full detail survives in the archive
        let batches = archive.batches().await;
        assert!(batches
            .values()
            .flatten()
            .any(|r| r.attributes.contains_key("gen_ai.prompt")));
    }

    #[tokio::test]
    async fn test_archive_failure_still_exports_hot_copy() {
        let hot = Arc::new(InMemoryHotExporter::new());
        let sampler = TieredSampler::with_seed(hot.clone(), Arc::new(BrokenArchive), 0.0, 7);

        let record = chat_span().with_attribute(OUTCOME_ATTRIBUTE, "BLOCKED");
        let result = sampler.on_unit_complete(record).await;

        assert!(matches!(result, Err(GovernanceError::TelemetryError(_))));
        let exported = hot.records().await;
        assert_eq!(exported.len(), 1);
        assert!(!exported[0].attributes.contains_key("gen_ai.prompt"));
    }

    #[tokio::test]
    async fn test_nan_rate_treated_as_zero() {
        let (sampler, hot, archive) = sampler(f64::NAN);
        assert_eq!(sampler.chat_sample_rate(), 0.0);

        for _ in 0..10 {
            let decision = sampler.on_unit_complete(chat_span()).await.unwrap();
            assert_eq!(decision.reason, SamplingReason::ChatDropped);
        }
        assert_eq!(archive.len().await, 0);
        assert_eq!(hot.records().await.len(), 10);
    }

    #[test]
    fn test_archive_path_layout() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let id = Uuid::nil();
        assert_eq!(
            archive_path(date, id),
            "traces/2024/03/07/00000000-0000-0000-0000-000000000000.json"
        );
    }
}

//! Hybrid inference router
//!
//! Races a fast streaming model against its time-to-first-token budget.
//! Any timeout or error on the fast path falls back, once, to the
//! reliable model. A fallback failure is final.

use crate::error::GovernanceError;
use crate::Result;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

pub mod gemini;
pub mod sse;

pub use gemini::GeminiModel;

/// Incremental text chunks from a streaming model
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming-capable (fast) endpoint
#[async_trait]
pub trait StreamingModel: Send + Sync {
    async fn stream(&self, prompt: &str, system_instruction: Option<&str>) -> Result<TextStream>;
}

/// Non-streaming (reliable) endpoint
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str, system_instruction: Option<&str>) -> Result<String>;
}

/// Headroom applied to the configured TTFT threshold
const TTFT_GRACE: f64 = 1.1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InferencePath {
    Fast,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub path: InferencePath,
    /// Why the fast path was abandoned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

pub struct HybridRouter {
    fast: Arc<dyn StreamingModel>,
    reliable: Arc<dyn CompletionModel>,
    ttft_threshold: Duration,
}

impl HybridRouter {
    pub fn new(
        fast: Arc<dyn StreamingModel>,
        reliable: Arc<dyn CompletionModel>,
        ttft_threshold: Duration,
    ) -> Self {
        Self {
            fast,
            reliable,
            ttft_threshold,
        }
    }

    /// Hard deadline for opening the fast stream and receiving its first chunk
    pub fn first_chunk_budget(&self) -> Duration {
        self.ttft_threshold.mul_f64(TTFT_GRACE)
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<Generation> {
        let started = Instant::now();

        let reason = match self.try_fast(prompt, system_instruction).await {
            Ok(text) => {
                info!(
                    path = "fast",
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fast path success"
                );
                return Ok(Generation {
                    text,
                    path: InferencePath::Fast,
                    fallback_reason: None,
                });
            }
            Err(reason) => reason,
        };

        warn!(reason = %reason, "Fast path abandoned; using reliable model");

        let text = self
            .reliable
            .complete(prompt, system_instruction)
            .await
            .map_err(|e| {
                error!(error = %e, "Reliable model failed");
                GovernanceError::InferenceFailed(format!("reliable fallback failed: {}", e))
            })?;

        info!(
            path = "fallback",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fallback path success"
        );

        Ok(Generation {
            text,
            path: InferencePath::Fallback,
            fallback_reason: Some(reason),
        })
    }

    /// `Err` carries the reason to fall back
    async fn try_fast(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> std::result::Result<String, String> {
        let budget = self.first_chunk_budget();

        let opened = timeout(budget, async {
            let mut stream = self.fast.stream(prompt, system_instruction).await?;
            let first = stream.next().await;
            Ok::<_, GovernanceError>((stream, first))
        })
        .await;

        let (mut stream, first) = match opened {
            Err(_) => {
                return Err(format!(
                    "first chunk not received within {} ms",
                    budget.as_millis()
                ))
            }
            Ok(Err(e)) => return Err(format!("fast path connection failed: {}", e)),
            Ok(Ok(opened)) => opened,
        };

        let mut text = match first {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(format!("fast stream error: {}", e)),
            None => return Err("fast stream ended before any chunk".to_string()),
        };

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => text.push_str(&chunk),
                Err(e) => return Err(format!("fast stream error mid-response: {}", e)),
            }
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    const THRESHOLD: Duration = Duration::from_millis(100);

    enum FastBehavior {
        Chunks { first_delay: Duration, chunks: Vec<&'static str> },
        RefuseConnection,
        BreakAfterFirst,
    }

    struct ScriptedFast(FastBehavior);

    #[async_trait]
    impl StreamingModel for ScriptedFast {
        async fn stream(&self, _prompt: &str, _system: Option<&str>) -> Result<TextStream> {
            match &self.0 {
                FastBehavior::RefuseConnection => Err(GovernanceError::InferenceFailed(
                    "HTTP 503 from fast endpoint".to_string(),
                )),
                FastBehavior::Chunks { first_delay, chunks } => {
                    let first_delay = *first_delay;
                    let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
                    Ok(Box::pin(async_stream::stream! {
                        sleep(first_delay).await;
                        for chunk in chunks {
                            yield Ok::<String, GovernanceError>(chunk);
                        }
                    }))
                }
                FastBehavior::BreakAfterFirst => Ok(Box::pin(async_stream::stream! {
                    yield Ok("partial ".to_string());
                    yield Err(GovernanceError::InferenceFailed("connection reset".to_string()));
                })),
            }
        }
    }

    struct CountingReliable {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingReliable {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl CompletionModel for CountingReliable {
        async fn complete(&self, _prompt: &str, _system: Option<&str>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(GovernanceError::InferenceFailed("quota exhausted".to_string()))
            } else {
                Ok("reliable answer".to_string())
            }
        }
    }

    fn router(fast: FastBehavior, reliable: Arc<CountingReliable>) -> HybridRouter {
        HybridRouter::new(Arc::new(ScriptedFast(fast)), reliable, THRESHOLD)
    }

    #[tokio::test]
    async fn test_fast_path_success() {
        let reliable = CountingReliable::new(false);
        let router = router(
            FastBehavior::Chunks {
                first_delay: Duration::from_millis(10),
                chunks: vec!["RSI ", "measures ", "momentum"],
            },
            reliable.clone(),
        );

        let generation = router.generate("what is RSI?", None).await.unwrap();
        assert_eq!(generation.path, InferencePath::Fast);
        assert_eq!(generation.text, "RSI measures momentum");
        assert_eq!(reliable.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_late_first_chunk_falls_back() {
        let reliable = CountingReliable::new(false);
        let router = router(
            FastBehavior::Chunks {
                first_delay: THRESHOLD * 2,
                chunks: vec!["too late"],
            },
            reliable.clone(),
        );

        let generation = router.generate("prompt", Some("be brief")).await.unwrap();
        assert_eq!(generation.path, InferencePath::Fallback);
        assert_eq!(generation.text, "reliable answer");
        assert!(generation.fallback_reason.unwrap().contains("first chunk"));
        assert_eq!(reliable.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_falls_back() {
        let reliable = CountingReliable::new(false);
        let router = router(FastBehavior::RefuseConnection, reliable.clone());

        let generation = router.generate("prompt", None).await.unwrap();
        assert_eq!(generation.path, InferencePath::Fallback);
        assert_eq!(reliable.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_error_discards_partial_text() {
        let reliable = CountingReliable::new(false);
        let router = router(FastBehavior::BreakAfterFirst, reliable.clone());

        let generation = router.generate("prompt", None).await.unwrap();
        assert_eq!(generation.text, "reliable answer");
        assert!(!generation.text.contains("partial"));
    }

    #[tokio::test]
    async fn test_fallback_failure_is_fatal_and_single_attempt() {
        let reliable = CountingReliable::new(true);
        let router = router(FastBehavior::RefuseConnection, reliable.clone());

        let err = router.generate("prompt", None).await.unwrap_err();
        assert!(matches!(err, GovernanceError::InferenceFailed(_)));
        assert!(err.to_string().contains("quota exhausted"));
        assert_eq!(reliable.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_stream_falls_back() {
        let reliable = CountingReliable::new(false);
        let router = router(
            FastBehavior::Chunks {
                first_delay: Duration::ZERO,
                chunks: vec![],
            },
            reliable.clone(),
        );

        let generation = router.generate("prompt", None).await.unwrap();
        assert_eq!(generation.path, InferencePath::Fallback);
    }
}

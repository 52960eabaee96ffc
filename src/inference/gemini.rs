//! Gemini API client
//!
//! One client type serves both inference tiers: a streaming (SSE) call
//! for the fast path and a plain `generateContent` call for the
//! reliable fallback. Uses a long-lived reqwest::Client for connection pooling.

use crate::error::GovernanceError;
use crate::inference::sse::{parse_data_lines, SseBuffer};
use crate::inference::{CompletionModel, StreamingModel, TextStream};
use crate::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client bound to one model (connection-pooled)
pub struct GeminiModel {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiModel {
    pub fn new(api_key: String, model: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn build_request(prompt: &str, system_instruction: Option<&str>) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: system_instruction.map(|text| SystemInstruction {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }),
        }
    }

    async fn post(&self, method: &str, query: &str, request: &GeminiRequest) -> Result<Response> {
        if self.api_key.is_empty() {
            return Err(GovernanceError::InferenceFailed(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/{}:{}?{}key={}",
            self.base_url, self.model, method, query, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, "Gemini API request failed: {}", e);
                GovernanceError::InferenceFailed(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(model = %self.model, %status, "Gemini API error response: {}", error_text);
            return Err(GovernanceError::InferenceFailed(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionModel for GeminiModel {
    async fn complete(&self, prompt: &str, system_instruction: Option<&str>) -> Result<String> {
        let request = Self::build_request(prompt, system_instruction);

        debug!(model = %self.model, "Calling Gemini generateContent");
        let response = self.post("generateContent", "", &request).await?;

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            GovernanceError::InferenceFailed(format!("Gemini parse error: {}", e))
        })?;

        gemini_response.text().ok_or_else(|| {
            GovernanceError::InferenceFailed("Empty response from Gemini".to_string())
        })
    }
}

#[async_trait]
impl StreamingModel for GeminiModel {
    async fn stream(&self, prompt: &str, system_instruction: Option<&str>) -> Result<TextStream> {
        let request = Self::build_request(prompt, system_instruction);

        debug!(model = %self.model, "Calling Gemini streamGenerateContent");
        let response = self
            .post("streamGenerateContent", "alt=sse&", &request)
            .await?;
        let mut byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut sse_buffer = SseBuffer::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err::<String, GovernanceError>(e.into());
                        return;
                    }
                };
                sse_buffer.push_chunk(&chunk);

                while let Some(event_block) = sse_buffer.next_event_block() {
                    match decode_event(&event_block) {
                        Ok(texts) => {
                            for text in texts {
                                yield Ok(text);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if let Some(rest) = sse_buffer.finish() {
                match decode_event(&rest) {
                    Ok(texts) => {
                        for text in texts {
                            yield Ok(text);
                        }
                    }
                    Err(e) => yield Err(e),
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Text pieces carried by one SSE event block
fn decode_event(event_block: &str) -> Result<Vec<String>> {
    let mut texts = Vec::new();

    for data in parse_data_lines(event_block) {
        let response: GeminiResponse = serde_json::from_str(data)?;

        if let Some(err) = response.error {
            return Err(GovernanceError::InferenceFailed(format!(
                "Gemini stream error: {}",
                err.message
            )));
        }

        if let Some(text) = response.text().filter(|t| !t.is_empty()) {
            texts.push(text);
        }
    }

    Ok(texts)
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

impl GeminiResponse {
    fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        Some(
            candidate
                .content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_serialization() {
        let request = GeminiModel::build_request("What is RSI?", Some("Be concise"));
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("What is RSI?"));
        assert!(json.contains("Be concise"));

        let request = GeminiModel::build_request("What is RSI?", None);
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("system_instruction"));
    }

    async fn model(server: &MockServer) -> GeminiModel {
        GeminiModel::new("test-key".to_string(), "gemini-test")
            .unwrap()
            .with_base_url(&format!("{}/v1beta/models", server.uri()))
    }

    #[tokio::test]
    async fn test_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "Momentum "}, {"text": "oscillator"}]}}]
            })))
            .mount(&server)
            .await;

        let text = model(&server).await.complete("What is RSI?", None).await.unwrap();
        assert_eq!(text, "Momentum oscillator");
    }

    #[tokio::test]
    async fn test_stream_collects_chunks() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"Hel\"}]}}]}\r\n\r\n",
            "data: {\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"lo\"}]}}]}\r\n\r\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let mut stream = model(&server).await.stream("hi", None).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_http_error_surfaces_before_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let result = model(&server).await.stream("hi", None).await;
        assert!(matches!(result, Err(GovernanceError::InferenceFailed(_))));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let model = GeminiModel::new(String::new(), "gemini-test").unwrap();
        let err = model.complete("hi", None).await.unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }
}

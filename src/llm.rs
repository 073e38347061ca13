//! Text-generation boundary
//!
//! The generator is opaque: one prompt in, free text out. [`OllamaClient`]
//! talks to an Ollama-compatible `/api/generate` endpoint; anything else that
//! implements [`TextGenerator`] can stand in for it.

use crate::config::AppConfig;
use crate::error::{AnalyticsError, Result};
use crate::plan::PlanCandidate;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5:7b";
pub const DEFAULT_TIMEOUT_SECS: u64 = 12;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short name used in logs and advisory notices
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| AnalyticsError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.ollama_url.clone(),
            config.ollama_model.clone(),
            config.generation_timeout,
        )
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        info!("Calling text generator {} at {}", self.model, url);

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::GenerationUnavailable(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        let body: GenerateResponse = response.json().await?;
        debug!("Raw generator response: {}", body.response);
        Ok(body.response)
    }
}

/// Find the plan object in free text.
///
/// Prefers a brace-delimited span without nested braces that mentions
/// `"dimension"`, `"metric"` and `"chart_type"` in that order, then falls
/// back to the span between the first `{` and the last `}`.
pub fn extract_plan_object(text: &str) -> Option<Value> {
    let text = text.trim();

    if let Ok(re) =
        regex::Regex::new(r#"\{[^{}]*"dimension"[^{}]*"metric"[^{}]*"chart_type"[^{}]*\}"#)
    {
        if let Some(m) = re.find(text) {
            if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
                return Some(value);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok()
}

/// Parse generator output into a candidate.
///
/// Fails with [`AnalyticsError::PlanParseFailure`] when the text holds no
/// JSON object. An object of the wrong shape still parses, into a candidate
/// with missing fields.
pub fn parse_plan_response(text: &str) -> Result<PlanCandidate> {
    extract_plan_object(text)
        .map(|value| PlanCandidate::from_json(&value))
        .ok_or_else(|| {
            AnalyticsError::PlanParseFailure(format!(
                "no plan object in generator output ({} chars)",
                text.len()
            ))
        })
}

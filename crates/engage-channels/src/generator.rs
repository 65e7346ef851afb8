use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use engage_core::{EngageError, Result, Segment};

use crate::adapter::{AnalysisAspect, ComposeRequest, ResponseGenerator};

/// Response generator backed by an HTTP text-generation service.
///
/// Endpoints (all `POST`, JSON in and out, `{"text": string | null}` back):
/// `/compose`, `/analyze`, `/summarize`.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngageError::Generator(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<Option<String>> {
        let mut req = self
            .client
            .post(format!("{}/{}", self.base_url, endpoint))
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EngageError::Generator(format!("{} request failed: {}", endpoint, e)))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);
            return Err(EngageError::RateLimited { retry_after_secs });
        }
        if status.as_u16() == 204 {
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EngageError::Generator(format!("{} HTTP {}: {}", endpoint, status, text)));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngageError::Generator(format!("{} parse error: {}", endpoint, e)))?;
        let text = data["text"]
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);
        debug!(endpoint, produced = text.is_some(), "generator responded");
        Ok(text)
    }
}

#[async_trait]
impl ResponseGenerator for HttpGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn compose(&self, request: &ComposeRequest) -> Result<Option<String>> {
        self.post("compose", serde_json::to_value(request)?).await
    }

    async fn analyze(&self, segment: &Segment, aspect: AnalysisAspect) -> Result<Option<String>> {
        let body = serde_json::json!({
            "aspect": aspect,
            "segment": segment,
        });
        self.post("analyze", body).await
    }

    async fn summarize(&self, space: &str, entries: &[String]) -> Result<Option<String>> {
        let body = serde_json::json!({
            "space": space,
            "entries": entries,
        });
        self.post("summarize", body).await
    }
}

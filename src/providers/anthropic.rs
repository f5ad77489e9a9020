//! Anthropic provider (messages API with base64 image blocks).

use crate::book::{ProfileBook, ResolvedBook};
use crate::config::ScanConfig;
use crate::error::StageError;
use crate::providers::{
    extraction_prompt, parse_response, scoring_prompt, IntelligenceProvider, MatchVerdict,
    ProviderKind, RawTitle,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MODEL: &str = "claude-3-5-haiku-latest";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
}

impl AnthropicProvider {
    pub fn from_env(config: &ScanConfig) -> Self {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        Self::new(api_key, config)
    }

    pub fn new(api_key: Option<String>, config: &ScanConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.provider_timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key,
            model: MODEL.to_string(),
            timeout_secs: config.provider_timeout_secs,
        }
    }

    async fn message(&self, content: Value) -> Result<String, StageError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| StageError::Provider {
            provider: "anthropic".into(),
            detail: "no API key configured".into(),
        })?;
        let body = json!({
            "model": self.model,
            "max_tokens": 2048,
            "messages": [{"role": "user", "content": content}]
        });

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StageError::Provider {
                provider: "anthropic".into(),
                detail: format!("HTTP {status}: {detail}"),
            });
        }

        let parsed: MessageResponse = response.json().await.map_err(|e| StageError::Provider {
            provider: "anthropic".into(),
            detail: format!("malformed response body: {e}"),
        })?;
        parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| StageError::Provider {
                provider: "anthropic".into(),
                detail: "response contained no text blocks".into(),
            })
    }
}

fn request_error(e: &reqwest::Error, secs: u64) -> StageError {
    if e.is_timeout() {
        StageError::Timeout {
            what: "anthropic request".into(),
            secs,
        }
    } else {
        StageError::Provider {
            provider: "anthropic".into(),
            detail: e.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[async_trait]
impl IntelligenceProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn extract_titles(
        &self,
        image_png_b64: &str,
        ocr_text: &str,
    ) -> Result<Vec<RawTitle>, StageError> {
        let content = json!([
            {"type": "image", "source": {
                "type": "base64",
                "media_type": "image/png",
                "data": image_png_b64
            }},
            {"type": "text", "text": extraction_prompt(ocr_text)}
        ]);
        let text = self.message(content).await?;
        debug!("anthropic extraction response: {} bytes", text.len());
        parse_response(ProviderKind::Anthropic, &text)
    }

    async fn score_match(
        &self,
        candidate: &ResolvedBook,
        excerpt: &[ProfileBook],
        profile_total: usize,
    ) -> Result<MatchVerdict, StageError> {
        let prompt = scoring_prompt(candidate, excerpt, profile_total);
        let text = self.message(json!([{"type": "text", "text": prompt}])).await?;
        parse_response(ProviderKind::Anthropic, &text)
    }
}

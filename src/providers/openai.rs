//! OpenAI provider (chat completions API with vision content parts).

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

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-4o-mini";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
}

impl OpenAiProvider {
    pub fn from_env(config: &ScanConfig) -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
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

    async fn complete(&self, content: Value) -> Result<String, StageError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| StageError::Provider {
            provider: "openai".into(),
            detail: "no API key configured".into(),
        })?;
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "temperature": 0.1,
            "max_tokens": 2048
        });

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StageError::Provider {
                provider: "openai".into(),
                detail: format!("HTTP {status}: {detail}"),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| StageError::Provider {
            provider: "openai".into(),
            detail: format!("malformed response body: {e}"),
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| StageError::Provider {
                provider: "openai".into(),
                detail: "response contained no choices".into(),
            })
    }
}

fn request_error(e: &reqwest::Error, secs: u64) -> StageError {
    if e.is_timeout() {
        StageError::Timeout {
            what: "openai request".into(),
            secs,
        }
    } else {
        StageError::Provider {
            provider: "openai".into(),
            detail: e.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl IntelligenceProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
            {"type": "text", "text": extraction_prompt(ocr_text)},
            {"type": "image_url", "image_url": {
                "url": format!("data:image/png;base64,{image_png_b64}"),
                "detail": "high"
            }}
        ]);
        let text = self.complete(content).await?;
        debug!("openai extraction response: {} bytes", text.len());
        parse_response(ProviderKind::OpenAi, &text)
    }

    async fn score_match(
        &self,
        candidate: &ResolvedBook,
        excerpt: &[ProfileBook],
        profile_total: usize,
    ) -> Result<MatchVerdict, StageError> {
        let prompt = scoring_prompt(candidate, excerpt, profile_total);
        let text = self.complete(json!(prompt)).await?;
        parse_response(ProviderKind::OpenAi, &text)
    }
}

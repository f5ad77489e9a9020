//! Google Gemini provider (`generateContent` REST API).

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

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MODEL: &str = "gemini-2.0-flash";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
}

impl GeminiProvider {
    pub fn from_env(config: &ScanConfig) -> Self {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());
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

    async fn generate(&self, parts: Vec<Value>) -> Result<String, StageError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| StageError::Provider {
            provider: "gemini".into(),
            detail: "no API key configured".into(),
        })?;
        let url = format!("{BASE_URL}/{}:generateContent?key={api_key}", self.model);
        let body = json!({
            "contents": [{"parts": parts}],
            "generationConfig": {"temperature": 0.1, "maxOutputTokens": 2048}
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StageError::Provider {
                provider: "gemini".into(),
                detail: format!("HTTP {status}: {detail}"),
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| StageError::Provider {
            provider: "gemini".into(),
            detail: format!("malformed response body: {e}"),
        })?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| StageError::Provider {
                provider: "gemini".into(),
                detail: "response contained no candidates".into(),
            })
    }
}

fn request_error(e: &reqwest::Error, secs: u64) -> StageError {
    if e.is_timeout() {
        StageError::Timeout {
            what: "gemini request".into(),
            secs,
        }
    } else {
        StageError::Provider {
            provider: "gemini".into(),
            detail: e.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl IntelligenceProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn extract_titles(
        &self,
        image_png_b64: &str,
        ocr_text: &str,
    ) -> Result<Vec<RawTitle>, StageError> {
        let parts = vec![
            json!({"text": extraction_prompt(ocr_text)}),
            json!({"inline_data": {"mime_type": "image/png", "data": image_png_b64}}),
        ];
        let text = self.generate(parts).await?;
        debug!("gemini extraction response: {} bytes", text.len());
        parse_response(ProviderKind::Gemini, &text)
    }

    async fn score_match(
        &self,
        candidate: &ResolvedBook,
        excerpt: &[ProfileBook],
        profile_total: usize,
    ) -> Result<MatchVerdict, StageError> {
        let prompt = scoring_prompt(candidate, excerpt, profile_total);
        let text = self.generate(vec![json!({"text": prompt})]).await?;
        parse_response(ProviderKind::Gemini, &text)
    }
}

//! The intelligence-provider capability layer.
//!
//! Every vision/LLM backend sits behind one trait, [`IntelligenceProvider`],
//! with exactly the two capabilities the pipeline needs: reading titles off
//! an image and scoring a candidate against a taste profile. Which backend
//! answers a given call is decided by [`ProviderChain`]:
//!
//! 1. The configured primary provider, if it is available.
//! 2. The remaining available providers, cheapest first
//!    (gemini → openai → anthropic).
//! 3. Nothing — the caller falls back to its deterministic rule path.
//!
//! Selection is a pure function over configuration + availability
//! ([`chain_order`]); no call site branches on provider names.
//!
//! Models rarely honour "JSON only" perfectly, so all providers share one
//! response path: strip code fences, attempt a parse, repair common damage
//! (trailing commas, truncation), and parse again. Anything still broken is
//! a [`StageError::Provider`] and the chain moves on.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::book::{ProfileBook, ResolvedBook};
use crate::config::ScanConfig;
use crate::error::StageError;
use crate::prompts;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The concrete providers the chain knows about, in ascending cost order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// All kinds, cheapest first. The fallback order of the chain.
    pub const COST_ORDER: [ProviderKind; 3] =
        [ProviderKind::Gemini, ProviderKind::OpenAi, ProviderKind::Anthropic];
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => Err(format!(
                "unknown provider '{other}' (expected gemini, openai, or anthropic)"
            )),
        }
    }
}

/// One title as a provider reported it, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTitle {
    pub title: String,
    /// Missing in truncated/repaired responses; defaults to 0.
    #[serde(default)]
    pub confidence: f64,
}

/// A provider's verdict on one candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchVerdict {
    pub score: f64,
    pub explanation: String,
}

/// A vision/LLM backend with the two capabilities the pipeline uses.
#[async_trait]
pub trait IntelligenceProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether the provider is configured (has credentials) right now.
    fn is_available(&self) -> bool;

    /// Read book titles off a shelf photo (base64 PNG), optionally with OCR
    /// text from the same image as context.
    async fn extract_titles(
        &self,
        image_png_b64: &str,
        ocr_text: &str,
    ) -> Result<Vec<RawTitle>, StageError>;

    /// Score one candidate against a profile excerpt.
    async fn score_match(
        &self,
        candidate: &ResolvedBook,
        excerpt: &[ProfileBook],
        profile_total: usize,
    ) -> Result<MatchVerdict, StageError>;
}

/// Compute the call order: requested primary first (when available), then
/// the remaining available providers cheapest-first.
///
/// Pure function — all the "which provider answers" policy lives here.
pub fn chain_order(
    primary: Option<ProviderKind>,
    available: &[ProviderKind],
) -> Vec<ProviderKind> {
    let mut order = Vec::with_capacity(available.len());
    if let Some(kind) = primary {
        if available.contains(&kind) {
            order.push(kind);
        }
    }
    for kind in ProviderKind::COST_ORDER {
        if available.contains(&kind) && !order.contains(&kind) {
            order.push(kind);
        }
    }
    order
}

/// The priority-ordered provider chain.
///
/// Both capabilities walk the same order; a failure at one provider logs and
/// moves on, and only when every provider has failed does the error surface
/// to the caller (which then takes its rule-based path).
pub struct ProviderChain {
    providers: Vec<Arc<dyn IntelligenceProvider>>,
}

impl ProviderChain {
    /// Build the chain from explicitly constructed providers.
    ///
    /// Unavailable providers are dropped; the remainder is ordered by
    /// [`chain_order`] with the config's primary preference.
    pub fn new(
        providers: Vec<Arc<dyn IntelligenceProvider>>,
        primary: Option<ProviderKind>,
    ) -> Self {
        let available: Vec<ProviderKind> = providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.kind())
            .collect();
        let order = chain_order(primary, &available);
        let mut ordered: Vec<Arc<dyn IntelligenceProvider>> = Vec::with_capacity(order.len());
        for kind in order {
            if let Some(provider) = providers.iter().find(|p| p.kind() == kind) {
                ordered.push(Arc::clone(provider));
            }
        }
        info!(
            "Provider chain: [{}]",
            ordered
                .iter()
                .map(|p| p.kind().to_string())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Self { providers: ordered }
    }

    /// Build the chain from environment credentials
    /// (`GEMINI_API_KEY`/`GOOGLE_API_KEY`, `OPENAI_API_KEY`,
    /// `ANTHROPIC_API_KEY`).
    pub fn from_env(config: &ScanConfig) -> Self {
        let providers: Vec<Arc<dyn IntelligenceProvider>> = vec![
            Arc::new(gemini::GeminiProvider::from_env(config)),
            Arc::new(openai::OpenAiProvider::from_env(config)),
            Arc::new(anthropic::AnthropicProvider::from_env(config)),
        ];
        Self::new(providers, config.primary_provider)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    /// Walk the chain for title extraction.
    pub async fn extract_titles(
        &self,
        image_png_b64: &str,
        ocr_text: &str,
    ) -> Result<Vec<RawTitle>, StageError> {
        let mut last_err = chain_exhausted();
        for provider in &self.providers {
            match provider.extract_titles(image_png_b64, ocr_text).await {
                Ok(titles) => {
                    debug!("{} extracted {} titles", provider.kind(), titles.len());
                    return Ok(titles);
                }
                Err(e) => {
                    warn!("{} title extraction failed: {e}", provider.kind());
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Walk the chain for match scoring.
    pub async fn score_match(
        &self,
        candidate: &ResolvedBook,
        excerpt: &[ProfileBook],
        profile_total: usize,
    ) -> Result<MatchVerdict, StageError> {
        let mut last_err = chain_exhausted();
        for provider in &self.providers {
            match provider.score_match(candidate, excerpt, profile_total).await {
                Ok(verdict) => return Ok(verdict),
                Err(e) => {
                    warn!("{} match scoring failed: {e}", provider.kind());
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

fn chain_exhausted() -> StageError {
    StageError::Provider {
        provider: "none".into(),
        detail: "no providers in chain".into(),
    }
}

// ── Shared response parsing ──────────────────────────────────────────────

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
static RE_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?```\s*$").unwrap());

/// Strip a wrapping code fence, if the model added one despite instructions.
pub fn strip_code_fence(text: &str) -> &str {
    match RE_CODE_FENCE.captures(text.trim()) {
        Some(caps) => caps.get(1).map_or(text, |m| m.as_str()),
        None => text.trim(),
    }
}

/// Repair common JSON damage in LLM responses: trailing commas and
/// truncation (unterminated strings, unclosed arrays/objects).
pub fn repair_json(json_str: &str) -> String {
    let mut repaired = RE_TRAILING_COMMA.replace_all(json_str, "$1").to_string();

    let stripped = repaired.trim_end().to_string();
    if !stripped.is_empty() && !stripped.ends_with(']') && !stripped.ends_with('}') {
        let mut fixed = stripped;
        if fixed.matches('"').count() % 2 != 0 {
            fixed.push('"');
        }
        let open_braces = fixed.matches('{').count().saturating_sub(fixed.matches('}').count());
        let open_brackets = fixed.matches('[').count().saturating_sub(fixed.matches(']').count());
        for _ in 0..open_braces {
            fixed.push('}');
        }
        for _ in 0..open_brackets {
            fixed.push(']');
        }
        repaired = fixed;
    }
    repaired
}

/// Parse provider response text as `T`, repairing once on failure.
pub fn parse_response<T: serde::de::DeserializeOwned>(
    provider: ProviderKind,
    text: &str,
) -> Result<T, StageError> {
    let body = strip_code_fence(text);
    serde_json::from_str(body)
        .or_else(|_| serde_json::from_str(&repair_json(body)))
        .map_err(|e| StageError::Provider {
            provider: provider.to_string(),
            detail: format!("unparseable JSON response: {e} (got: {})", truncate(body, 200)),
        })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// Build the extraction prompt for a provider call.
pub(crate) fn extraction_prompt(ocr_text: &str) -> String {
    prompts::extract_titles_context(ocr_text)
}

/// Build the scoring prompt for a provider call.
pub(crate) fn scoring_prompt(
    candidate: &ResolvedBook,
    excerpt: &[ProfileBook],
    profile_total: usize,
) -> String {
    prompts::score_match_prompt(candidate, excerpt, profile_total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_order_prefers_primary_then_cost() {
        let available = [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Gemini];
        assert_eq!(
            chain_order(Some(ProviderKind::Anthropic), &available),
            vec![ProviderKind::Anthropic, ProviderKind::Gemini, ProviderKind::OpenAi]
        );
    }

    #[test]
    fn chain_order_skips_unavailable_primary() {
        let available = [ProviderKind::OpenAi];
        assert_eq!(
            chain_order(Some(ProviderKind::Gemini), &available),
            vec![ProviderKind::OpenAi]
        );
    }

    #[test]
    fn chain_order_without_primary_is_cost_order() {
        let available = [ProviderKind::Anthropic, ProviderKind::Gemini];
        assert_eq!(
            chain_order(None, &available),
            vec![ProviderKind::Gemini, ProviderKind::Anthropic]
        );
    }

    #[test]
    fn chain_order_empty_when_nothing_available() {
        assert!(chain_order(Some(ProviderKind::Gemini), &[]).is_empty());
    }

    #[test]
    fn repair_fixes_trailing_commas() {
        let fixed = repair_json(r#"[{"title": "Dune", "confidence": 0.9,},]"#);
        let parsed: Vec<RawTitle> = serde_json::from_str(&fixed).unwrap();
        assert_eq!(parsed[0].title, "Dune");
    }

    #[test]
    fn repair_closes_truncated_response() {
        let fixed = repair_json(r#"[{"title": "Dune", "confidence": 0.9}, {"title": "Founda"#);
        let parsed: Vec<RawTitle> = serde_json::from_str(&fixed).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].title, "Founda");
    }

    #[test]
    fn parse_response_strips_fences() {
        let text = "```json\n[{\"title\": \"1984\", \"confidence\": 0.8}]\n```";
        let titles: Vec<RawTitle> = parse_response(ProviderKind::Gemini, text).unwrap();
        assert_eq!(titles[0].title, "1984");
    }

    #[test]
    fn parse_response_reports_hopeless_input() {
        let err = parse_response::<Vec<RawTitle>>(ProviderKind::OpenAi, "I think the books are…")
            .unwrap_err();
        assert!(matches!(err, StageError::Provider { .. }));
    }

    #[test]
    fn provider_kind_round_trips() {
        assert_eq!("gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!("claude".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert!("gpt5".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
    }
}

//! Title extraction: rule-based filtering of OCR lines with a vision/LLM
//! fallback.
//!
//! The rule phase is free and deterministic, so it always runs first. The
//! vision fallback costs a provider round-trip; whether it fires is a pure
//! decision over the rule phase's output and the configured strategy:
//!
//! * `conservative` — only when the rules produced nothing.
//! * `aggressive` — also when the mean rule confidence is low.
//! * `disabled` (or `llm_enabled = false`) — never.
//!
//! A fallback failure is never fatal. Whatever the rules produced stands.

use crate::book::{merge_candidates, TitleCandidate, TitleSource};
use crate::config::{LlmStrategy, ScanConfig};
use crate::pipeline::ocr::OcrOutcome;
use crate::providers::ProviderChain;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

/// Characters that survive title cleaning: word chars, whitespace, and the
/// punctuation that actually appears in book titles.
static RE_TITLE_JUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s\-:',.]").unwrap());

/// Price-like lines ("$34.99", "34.99", "£7.50"). Plain integers like "1984"
/// do not match.
static RE_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[$€£¥]\s*\d[\d.,]*$|^\d+[.,]\d{2}$").unwrap());

/// Why the vision fallback fired (or did not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackDecision {
    /// The rules produced nothing.
    NoRuleCandidates,
    /// Aggressive strategy and the mean rule confidence was below threshold.
    LowConfidence,
    /// Rules were sufficient, or the fallback is switched off.
    NotNeeded,
}

/// The extraction stage's output.
#[derive(Debug, Default)]
pub struct ExtractOutcome {
    /// Merged, deduplicated candidates in first-seen order.
    pub candidates: Vec<TitleCandidate>,
    /// How many candidates the rule phase alone produced.
    pub rule_count: usize,
    /// Whether the vision fallback was invoked.
    pub vision_fired: bool,
    /// Why, when it was.
    pub vision_reason: Option<String>,
}

/// Strip junk characters and collapse whitespace.
pub fn clean_title(raw: &str) -> String {
    let stripped = RE_TITLE_JUNK.replace_all(raw, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a cleaned OCR line looks like a book title.
///
/// Rejections, in check order: length bounds, noise keywords (ISBN,
/// publisher boilerplate, "456 pages"), price-like text, digit-heavy lines,
/// and multi-word all-uppercase banners (publisher names like
/// "PENGUIN RANDOM HOUSE"). A single all-uppercase word passes — plenty of
/// covers set the title that way ("DUNE").
pub fn is_likely_title(text: &str, config: &ScanConfig) -> bool {
    let len = text.chars().count();
    if len < config.min_title_len || len > config.max_title_len {
        return false;
    }

    let lowered = text.to_lowercase();
    if config
        .noise_keywords
        .iter()
        .any(|kw| lowered.contains(kw.as_str()))
    {
        return false;
    }

    if RE_PRICE.is_match(text) {
        return false;
    }

    if !config.numeric_policy.accepts_line(text) {
        return false;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > 1
        && words
            .iter()
            .all(|w| w.chars().filter(|c| c.is_alphabetic()).count() > 0)
        && text.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase())
    {
        return false;
    }

    true
}

/// Run the rule phase over recognised lines.
pub fn rule_candidates(ocr: &OcrOutcome, config: &ScanConfig) -> Vec<TitleCandidate> {
    let mut candidates = Vec::new();
    for line in &ocr.lines {
        if line.confidence < f64::from(config.min_line_confidence) {
            continue;
        }
        let cleaned = clean_title(&line.text);
        if cleaned.is_empty() || !is_likely_title(&cleaned, config) {
            continue;
        }
        candidates.push(TitleCandidate::new(
            cleaned,
            line.confidence,
            TitleSource::Rule,
        ));
    }
    merge_candidates(candidates)
}

/// Decide whether the vision fallback should fire.
pub fn fallback_decision(
    rule_candidates: &[TitleCandidate],
    config: &ScanConfig,
) -> FallbackDecision {
    if !config.llm_enabled || config.llm_strategy == LlmStrategy::Disabled {
        return FallbackDecision::NotNeeded;
    }
    if rule_candidates.is_empty() {
        return FallbackDecision::NoRuleCandidates;
    }
    if config.llm_strategy == LlmStrategy::Aggressive {
        let mean = rule_candidates.iter().map(|c| c.confidence).sum::<f64>()
            / rule_candidates.len() as f64;
        if mean < f64::from(config.llm_confidence_threshold) {
            return FallbackDecision::LowConfidence;
        }
    }
    FallbackDecision::NotNeeded
}

/// Validate and convert a provider's raw titles.
///
/// Clamps confidences, cleans text, applies the same length/noise/numeric
/// rules as the rule phase, merges duplicates, and caps the result at
/// [`ScanConfig::max_llm_titles`]. Dedup runs before the cap so a model that
/// repeats one title cannot starve distinct ones out of the batch.
pub fn validate_provider_titles(
    raw: Vec<crate::providers::RawTitle>,
    config: &ScanConfig,
) -> Vec<TitleCandidate> {
    let mut accepted = Vec::new();
    for item in raw {
        let cleaned = clean_title(&item.title);
        let len = cleaned.chars().count();
        if len < config.min_title_len || len > config.max_title_len {
            continue;
        }
        if !config.numeric_policy.accepts_provider_title(&cleaned) {
            continue;
        }
        let lowered = cleaned.to_lowercase();
        if config
            .noise_keywords
            .iter()
            .any(|kw| lowered.contains(kw.as_str()))
        {
            continue;
        }
        accepted.push(TitleCandidate::new(
            cleaned,
            item.confidence,
            TitleSource::Vision,
        ));
    }
    let mut merged = merge_candidates(accepted);
    merged.truncate(config.max_llm_titles);
    merged
}

/// Run the full extraction stage: rules, fallback decision, provider call,
/// merge.
pub async fn extract_titles(
    ocr: &OcrOutcome,
    image_png_b64: &str,
    chain: &ProviderChain,
    config: &ScanConfig,
) -> ExtractOutcome {
    let rules = rule_candidates(ocr, config);
    let rule_count = rules.len();
    debug!("Rule phase produced {rule_count} candidates");

    let decision = fallback_decision(&rules, config);
    let reason = match &decision {
        FallbackDecision::NoRuleCandidates => Some("no rule candidates".to_string()),
        FallbackDecision::LowConfidence => Some("low rule confidence".to_string()),
        FallbackDecision::NotNeeded => None,
    };

    if decision == FallbackDecision::NotNeeded {
        return ExtractOutcome {
            candidates: rules,
            rule_count,
            vision_fired: false,
            vision_reason: None,
        };
    }

    if chain.is_empty() {
        debug!("Vision fallback wanted but no providers configured");
        return ExtractOutcome {
            candidates: rules,
            rule_count,
            vision_fired: false,
            vision_reason: None,
        };
    }

    info!(
        "Vision fallback firing ({})",
        reason.as_deref().unwrap_or("unknown")
    );
    match chain.extract_titles(image_png_b64, &ocr.text).await {
        Ok(raw) => {
            let vision = validate_provider_titles(raw, config);
            debug!("Vision fallback produced {} validated titles", vision.len());
            let merged = merge_candidates(rules.into_iter().chain(vision).collect());
            ExtractOutcome {
                candidates: merged,
                rule_count,
                vision_fired: true,
                vision_reason: reason,
            }
        }
        Err(e) => {
            // Degrade to the rule results; extraction never fails the scan.
            warn!("Vision fallback failed, keeping rule candidates: {e}");
            ExtractOutcome {
                candidates: rules,
                rule_count,
                vision_fired: true,
                vision_reason: reason,
            }
        }
    }
}

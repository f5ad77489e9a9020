//! The data model flowing through the scan pipeline.
//!
//! Ownership follows the request: raw bytes and the normalised image never
//! outlive one scan, candidates are consumed by resolution, and only the
//! final [`crate::output::ScanResult`] leaves the pipeline. The one invariant
//! enforced here rather than at the edges is clamping — every confidence and
//! match score is in `[0,1]` no matter what an upstream provider returned.

use serde::{Deserialize, Serialize};

/// Clamp a provider-supplied score into `[0,1]`.
///
/// NaN maps to 0 — an unscorable candidate should sink, not float.
pub fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Case-folded, whitespace-collapsed key used to deduplicate titles.
///
/// "The  HOBBIT " and "the hobbit" are the same candidate.
pub fn normalized_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Where a title candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    /// Rule-based filtering of OCR lines.
    Rule,
    /// Vision/LLM extraction fallback.
    Vision,
}

/// A detected title before catalog resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleCandidate {
    pub text: String,
    /// Extraction confidence in `[0,1]`.
    pub confidence: f64,
    pub source: TitleSource,
}

impl TitleCandidate {
    pub fn new(text: impl Into<String>, confidence: f64, source: TitleSource) -> Self {
        Self {
            text: text.into(),
            confidence: clamp_unit(confidence),
            source,
        }
    }
}

/// Merge candidates from any number of sources, deduplicating by
/// [`normalized_key`] and keeping the higher confidence for collisions.
///
/// Order is preserved: a candidate keeps the position of its first
/// appearance even when a later duplicate raises its confidence.
pub fn merge_candidates(candidates: Vec<TitleCandidate>) -> Vec<TitleCandidate> {
    let mut merged: Vec<TitleCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let key = normalized_key(&candidate.text);
        match merged
            .iter_mut()
            .find(|existing| normalized_key(&existing.text) == key)
        {
            Some(existing) => {
                if candidate.confidence > existing.confidence {
                    *existing = candidate;
                }
            }
            None => merged.push(candidate),
        }
    }
    merged
}

/// A canonical catalog record for a detected book.
///
/// `external_id` is the stable join key to the catalog service. It is never
/// synthesised locally — only a catalog response can supply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedBook {
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub external_id: String,
    pub rating: Option<f64>,
    pub rating_count: Option<u64>,
    /// Extraction confidence carried over from the winning [`TitleCandidate`].
    #[serde(default)]
    pub confidence: f64,
}

/// A caller-supplied book representing the reader's taste.
///
/// Shaped like [`ResolvedBook`] but owned by the external profile store;
/// the pipeline only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileBook {
    pub title: String,
    pub author: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub external_id: String,
    pub rating: Option<f64>,
    pub description: Option<String>,
}

/// A resolved candidate with its recommendation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub book: ResolvedBook,
    /// Taste-match score in `[0,1]`.
    pub match_score: f64,
    /// Human-readable reasoning; `None` on the rule-based path.
    pub explanation: Option<String>,
    /// True iff the candidate's `external_id` appears in the profile.
    pub already_known: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, confidence: f64, source: TitleSource) -> TitleCandidate {
        TitleCandidate::new(text, confidence, source)
    }

    #[test]
    fn clamp_handles_adversarial_values() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.3), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }

    #[test]
    fn normalized_key_folds_case_and_whitespace() {
        assert_eq!(normalized_key("  The   HOBBIT "), "the hobbit");
        assert_eq!(normalized_key("the hobbit"), "the hobbit");
    }

    #[test]
    fn merge_keeps_higher_confidence_across_sources() {
        let merged = merge_candidates(vec![
            candidate("Dune", 0.6, TitleSource::Rule),
            candidate("Foundation", 0.8, TitleSource::Rule),
            candidate("DUNE", 0.9, TitleSource::Vision),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "DUNE");
        assert_eq!(merged[0].confidence, 0.9);
        assert_eq!(merged[0].source, TitleSource::Vision);
        assert_eq!(merged[1].text, "Foundation");
    }

    #[test]
    fn merge_preserves_first_position() {
        let merged = merge_candidates(vec![
            candidate("Dune", 0.9, TitleSource::Rule),
            candidate("Foundation", 0.8, TitleSource::Rule),
            candidate("dune", 0.5, TitleSource::Vision),
        ]);
        assert_eq!(merged.len(), 2);
        // Lower-confidence duplicate neither replaces nor reorders.
        assert_eq!(merged[0].text, "Dune");
        assert_eq!(merged[0].confidence, 0.9);
    }

    #[test]
    fn candidate_constructor_clamps() {
        let c = TitleCandidate::new("Dune", 2.5, TitleSource::Vision);
        assert_eq!(c.confidence, 1.0);
    }
}

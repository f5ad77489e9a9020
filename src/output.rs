//! Result types returned by a scan.
//!
//! A scan that finds nothing is still a successful scan: `ScanResult` with
//! empty lists is data, not an error. Stats travel alongside the result so
//! callers can log per-phase timings and stage-by-stage candidate counts
//! without re-deriving them.

use crate::book::ScoredCandidate;
use crate::config::RotationMode;
use serde::{Deserialize, Serialize};

/// The final output of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Every candidate that resolved against the catalog, scored, in
    /// resolver order.
    pub detected: Vec<ScoredCandidate>,
    /// The `detected` entries not already in the profile, sorted by
    /// match score descending (ties: popularity descending, then
    /// normalized title ascending).
    pub recommended: Vec<ScoredCandidate>,
    /// Explanatory message when nothing was detected.
    pub message: Option<String>,
}

impl ScanResult {
    /// An empty result with the given explanatory message.
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            detected: Vec::new(),
            recommended: Vec::new(),
            message: Some(message.into()),
        }
    }
}

/// What the rotation resolver did and how long it took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationReport {
    pub mode: RotationMode,
    /// Total clockwise correction applied, in degrees (0/90/180/270).
    pub final_angle_degrees: u16,
    /// OSD estimate before any OCR pass, if the engine produced one.
    pub osd_angle_degrees: Option<u16>,
    pub osd_confidence: Option<f64>,
    /// Extraction passes actually run (1–4).
    pub attempts: u32,
    /// Angles tried across all passes, in order.
    pub angles_tried: Vec<u16>,
    /// Best mean OCR confidence observed, in `[0,1]`.
    pub best_confidence: f64,
    pub duration_ms: u64,
}

/// Per-phase accounting for one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStats {
    /// Candidates produced by the rule phase.
    pub rule_candidates: usize,
    /// Whether the vision/LLM fallback fired, and why.
    pub vision_fallback_fired: bool,
    pub vision_fallback_reason: Option<String>,
    /// Candidates after extraction (rules + fallback, merged).
    pub extracted_candidates: usize,
    /// Candidates that survived catalog resolution.
    pub resolved_candidates: usize,
    /// Candidates scored by a provider rather than the rule formula.
    pub provider_scored: usize,
    pub rotation: RotationReport,
    pub normalize_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub resolve_duration_ms: u64,
    pub score_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// A scan result bundled with its stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutput {
    pub result: ScanResult,
    pub stats: ScanStats,
}

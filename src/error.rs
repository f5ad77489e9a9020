//! Error types for the shelfscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ScanError`] — **Fatal**: the scan cannot proceed at all (undecodable
//!   or oversized image, no intelligence provider configured, invalid
//!   configuration). Returned as `Err(ScanError)` from [`crate::scan::Scanner`].
//!
//! * [`StageError`] — **Non-fatal**: an external collaborator failed for one
//!   candidate or one phase (catalog timeout, provider 5xx, OCR glitch). The
//!   pipeline recovers locally — it drops the candidate or falls down the
//!   provider chain — and the scan still returns a `ScanResult`.
//!
//! The separation keeps the degradation policy in one place: only the
//! orchestrator may terminate a request, and only on invalid input.

use thiserror::Error;

/// All fatal errors returned by the shelfscan library.
///
/// Per-candidate and per-provider failures use [`StageError`] and are
/// recovered inside the pipeline rather than propagated here.
#[derive(Debug, Error)]
pub enum ScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded bytes are not a decodable image, are empty, or carry a
    /// non-image content type.
    #[error("Invalid image ({content_type}): {reason}")]
    InvalidImage {
        content_type: String,
        reason: String,
    },

    /// The upload exceeds the configured byte ceiling.
    #[error("Image too large: {size} bytes (maximum {max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    // ── Configuration errors ──────────────────────────────────────────────
    /// LLM scoring is enabled but no provider has an API key.
    ///
    /// Raised at [`crate::scan::Scanner`] construction, never per request.
    #[error(
        "No intelligence providers are configured.\n\
         Set at least one of GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY,\n\
         or disable LLM scoring with ScanConfig::builder().llm_enabled(false)."
    )]
    NoProvidersConfigured,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure inside one pipeline stage.
///
/// Stages translate these into degradation: a failed catalog lookup drops
/// that candidate, a failed provider call falls through to the next provider
/// or to the rule-based path. A `StageError` never crosses the orchestrator
/// boundary.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// OCR engine failed on the current image.
    #[error("OCR failed: {0}")]
    Ocr(String),

    /// An intelligence provider call failed (transport, HTTP status, or
    /// unparseable response after repair).
    #[error("Provider '{provider}' failed: {detail}")]
    Provider { provider: String, detail: String },

    /// A catalog search failed (transport, HTTP status, or bad payload).
    #[error("Catalog lookup failed for '{query}': {detail}")]
    Catalog { query: String, detail: String },

    /// An external call exceeded its bounded timeout.
    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },
}

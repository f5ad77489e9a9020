//! Configuration types for bookshelf scanning.
//!
//! All scan behaviour is controlled through [`ScanConfig`], built via its
//! [`ScanConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share configs across requests, serialise them for logging, and diff
//! two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::ScanError;
use crate::providers::ProviderKind;
use serde::{Deserialize, Serialize};

/// Configuration for a bookshelf scan.
///
/// Built via [`ScanConfig::builder()`] or [`ScanConfig::default()`].
///
/// # Example
/// ```rust
/// use shelfscan::{LlmStrategy, RotationMode, ScanConfig};
///
/// let config = ScanConfig::builder()
///     .rotation_mode(RotationMode::OsdOnly)
///     .llm_strategy(LlmStrategy::Aggressive)
///     .catalog_concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Maximum accepted upload size in bytes. Default: 10 MiB.
    ///
    /// Anything larger is rejected before decoding — a decoded 50 MB JPEG can
    /// expand to several hundred megabytes of pixels.
    pub max_image_bytes: usize,

    /// Minimum pixel width/height after preprocessing. Default: 1000.
    ///
    /// Spine text on small phone crops is routinely below the size OCR
    /// engines resolve reliably. Images narrower than this are upscaled
    /// (Lanczos3) before recognition; larger images pass through untouched.
    pub min_dimension_px: u32,

    /// Rotation handling mode. Default: [`RotationMode::OsdFallback`].
    pub rotation_mode: RotationMode,

    /// OCR confidence below which fallback rotations are tried. Default: 0.70.
    ///
    /// Applies only in `osd_fallback` mode. 0.70 sits above the confidence
    /// tesseract reports for sideways text (typically < 0.4) and below what
    /// it reports for correctly oriented shelves (typically > 0.8), so the
    /// retry loop fires almost exclusively on genuinely rotated input.
    pub rotation_confidence_threshold: f32,

    /// Master switch for the intelligence-provider layer. Default: true.
    ///
    /// With this off the pipeline is fully deterministic: rule-based title
    /// extraction and rule-based scoring, no network calls beyond the catalog.
    pub llm_enabled: bool,

    /// When the vision/LLM extraction fallback fires. Default: [`LlmStrategy::Conservative`].
    pub llm_strategy: LlmStrategy,

    /// Mean rule-candidate confidence below which the `aggressive` strategy
    /// invokes the vision fallback. Default: 0.70.
    pub llm_confidence_threshold: f32,

    /// Preferred intelligence provider. Default: None (cheapest available).
    ///
    /// The chain still falls back to the remaining configured providers in
    /// cost order when the preferred one is unavailable or fails.
    pub primary_provider: Option<ProviderKind>,

    /// Title length bounds for the rule phase. Defaults: 3 / 200.
    pub min_title_len: usize,
    pub max_title_len: usize,

    /// Minimum per-line OCR confidence for the rule phase, in [0,1]. Default: 0.50.
    pub min_line_confidence: f32,

    /// Policy for numeric-looking titles. See [`NumericTitlePolicy`].
    pub numeric_policy: NumericTitlePolicy,

    /// Substrings that mark a line as publisher/metadata noise rather than a
    /// title. Matched case-insensitively. Override to localise.
    pub noise_keywords: Vec<String>,

    /// Cap on titles accepted from one vision/LLM response. Default: 20.
    pub max_llm_titles: usize,

    /// Combined title+author similarity required to accept a catalog match,
    /// in [0,1]. Default: 0.70. Candidates below it are dropped — a wrong
    /// book is worse than no book.
    pub match_threshold: f64,

    /// Concurrent catalog lookups per scan. Default: 8.
    ///
    /// Lookups are network-bound with no cross-candidate dependency; fanning
    /// out cuts wall-clock time roughly by this factor. Lower it if the
    /// catalog service rate-limits you.
    pub catalog_concurrency: usize,

    /// Per-catalog-call timeout in seconds. Default: 10.
    pub catalog_timeout_secs: u64,

    /// Per-provider-call timeout in seconds. Default: 30.
    pub provider_timeout_secs: u64,

    /// Concurrent provider scoring calls per scan. Default: 4.
    ///
    /// Each candidate's provider chain is sequential; independent candidates
    /// score in parallel up to this limit.
    pub scoring_concurrency: usize,

    /// Maximum profile books included in a provider prompt. Default: 20.
    ///
    /// Bounds token cost and latency; the rule-based fallback always sees
    /// the full profile.
    pub profile_excerpt_len: usize,

    /// Score-cache capacity (entries). Default: 1000.
    pub cache_capacity: usize,

    /// Score-cache entry time-to-live in seconds. Default: 3600.
    pub cache_ttl_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 10 * 1024 * 1024,
            min_dimension_px: 1000,
            rotation_mode: RotationMode::OsdFallback,
            rotation_confidence_threshold: 0.70,
            llm_enabled: true,
            llm_strategy: LlmStrategy::Conservative,
            llm_confidence_threshold: 0.70,
            primary_provider: None,
            min_title_len: 3,
            max_title_len: 200,
            min_line_confidence: 0.50,
            numeric_policy: NumericTitlePolicy::default(),
            noise_keywords: default_noise_keywords(),
            max_llm_titles: 20,
            match_threshold: 0.70,
            catalog_concurrency: 8,
            catalog_timeout_secs: 10,
            provider_timeout_secs: 30,
            scoring_concurrency: 4,
            profile_excerpt_len: 20,
            cache_capacity: 1000,
            cache_ttl_secs: 3600,
        }
    }
}

fn default_noise_keywords() -> Vec<String> {
    [
        "isbn",
        "copyright",
        "edition",
        "published",
        "publisher",
        "press",
        "books",
        "library",
        "printed",
        "reserved",
        "rights",
        "price",
        "pages",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.max_image_bytes = n.max(1024);
        self
    }

    pub fn min_dimension_px(mut self, px: u32) -> Self {
        self.config.min_dimension_px = px.max(100);
        self
    }

    pub fn rotation_mode(mut self, mode: RotationMode) -> Self {
        self.config.rotation_mode = mode;
        self
    }

    pub fn rotation_confidence_threshold(mut self, t: f32) -> Self {
        self.config.rotation_confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn llm_enabled(mut self, v: bool) -> Self {
        self.config.llm_enabled = v;
        self
    }

    pub fn llm_strategy(mut self, strategy: LlmStrategy) -> Self {
        self.config.llm_strategy = strategy;
        self
    }

    pub fn llm_confidence_threshold(mut self, t: f32) -> Self {
        self.config.llm_confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn primary_provider(mut self, kind: ProviderKind) -> Self {
        self.config.primary_provider = Some(kind);
        self
    }

    pub fn title_length_bounds(mut self, min: usize, max: usize) -> Self {
        self.config.min_title_len = min;
        self.config.max_title_len = max;
        self
    }

    pub fn min_line_confidence(mut self, t: f32) -> Self {
        self.config.min_line_confidence = t.clamp(0.0, 1.0);
        self
    }

    pub fn numeric_policy(mut self, policy: NumericTitlePolicy) -> Self {
        self.config.numeric_policy = policy;
        self
    }

    pub fn noise_keywords(mut self, keywords: Vec<String>) -> Self {
        self.config.noise_keywords = keywords;
        self
    }

    pub fn max_llm_titles(mut self, n: usize) -> Self {
        self.config.max_llm_titles = n.max(1);
        self
    }

    pub fn match_threshold(mut self, t: f64) -> Self {
        self.config.match_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn catalog_concurrency(mut self, n: usize) -> Self {
        self.config.catalog_concurrency = n.max(1);
        self
    }

    pub fn catalog_timeout_secs(mut self, secs: u64) -> Self {
        self.config.catalog_timeout_secs = secs.max(1);
        self
    }

    pub fn provider_timeout_secs(mut self, secs: u64) -> Self {
        self.config.provider_timeout_secs = secs.max(1);
        self
    }

    pub fn scoring_concurrency(mut self, n: usize) -> Self {
        self.config.scoring_concurrency = n.max(1);
        self
    }

    pub fn profile_excerpt_len(mut self, n: usize) -> Self {
        self.config.profile_excerpt_len = n.max(1);
        self
    }

    pub fn cache_capacity(mut self, n: usize) -> Self {
        self.config.cache_capacity = n.max(1);
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating cross-field constraints.
    pub fn build(self) -> Result<ScanConfig, ScanError> {
        let c = &self.config;
        if c.min_title_len == 0 || c.min_title_len >= c.max_title_len {
            return Err(ScanError::InvalidConfig(format!(
                "Title length bounds must satisfy 0 < min < max, got {}..{}",
                c.min_title_len, c.max_title_len
            )));
        }
        if !(0.0..=1.0).contains(&c.numeric_policy.max_ratio) {
            return Err(ScanError::InvalidConfig(format!(
                "numeric_policy.max_ratio must be in [0,1], got {}",
                c.numeric_policy.max_ratio
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How image rotation is detected and corrected before extraction.
///
/// Shelf photos arrive sideways constantly — spine text reads top-to-bottom,
/// and phones record orientation inconsistently. Three modes trade accuracy
/// against OCR passes (each pass costs roughly a second on a large image):
///
/// | Mode | OCR passes (worst case) | Use case |
/// |------|------------------------|----------|
/// | `Disabled` | 1 | pre-rotated input, benchmarking |
/// | `OsdOnly` | 2 | trusted orientation metadata, latency-sensitive |
/// | `OsdFallback` | 4 | default — unknown phone uploads |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// No detection, no retry; the image is assumed upright.
    Disabled,
    /// One orientation estimate, one extraction pass, no retry.
    OsdOnly,
    /// Full loop: estimate, extract, and retry the two most likely
    /// remaining orientations when confidence is low. (default)
    #[default]
    OsdFallback,
}

/// When the vision/LLM extraction fallback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStrategy {
    /// Only when the rule phase produced zero candidates. (default)
    #[default]
    Conservative,
    /// Also when the mean rule-candidate confidence is below
    /// [`ScanConfig::llm_confidence_threshold`].
    Aggressive,
    /// Never — rules only.
    Disabled,
}

/// Policy for titles that are mostly digits.
///
/// "1984" is a legitimate title; "978-0-14-311822-4" is an ISBN. Short lines
/// skip the ratio check so short numeric titles survive, and every knob is
/// caller-tunable rather than hard-coded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NumericTitlePolicy {
    /// Maximum digit fraction for a line to remain a candidate. Default: 0.5.
    pub max_ratio: f32,
    /// Lines at or under this length skip the ratio check entirely, so short
    /// numeric titles survive. Default: 10.
    pub exempt_max_len: usize,
    /// Accept purely numeric 4-digit titles from providers even above the
    /// ratio (year-like titles such as "1984" or "2666"). Default: true.
    pub allow_year_like: bool,
}

impl Default for NumericTitlePolicy {
    fn default() -> Self {
        Self {
            max_ratio: 0.5,
            exempt_max_len: 10,
            allow_year_like: true,
        }
    }
}

impl NumericTitlePolicy {
    /// Digit fraction of `text` (0 for empty input).
    pub fn numeric_ratio(text: &str) -> f32 {
        if text.is_empty() {
            return 0.0;
        }
        let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
        digits as f32 / text.chars().count() as f32
    }

    /// Whether an OCR line passes the numeric filter.
    pub fn accepts_line(&self, text: &str) -> bool {
        if text.chars().count() <= self.exempt_max_len {
            return true;
        }
        Self::numeric_ratio(text) <= self.max_ratio
    }

    /// Whether a provider-supplied title passes the numeric filter.
    ///
    /// Stricter than [`Self::accepts_line`]: providers are asked not to emit
    /// numeric noise at all, so anything above the ratio is rejected unless
    /// it is a year-like title and those are allowed.
    pub fn accepts_provider_title(&self, text: &str) -> bool {
        let ratio = Self::numeric_ratio(text);
        if ratio < self.max_ratio {
            return true;
        }
        self.allow_year_like && text.len() == 4 && text.chars().all(|c| c.is_ascii_digit())
    }
}

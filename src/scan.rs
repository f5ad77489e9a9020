//! The scan orchestrator: one entry point that sequences every pipeline
//! stage and assembles the result.
//!
//! [`Scanner`] owns the long-lived pieces (OCR engine, catalog client,
//! provider chain, score cache) and is cheap to share across requests.
//! [`Scanner::scan`] is the whole pipeline: normalize, orient, extract,
//! resolve, score. Only the input gate can fail the scan; every later stage
//! degrades and the scan finishes with whatever survived.

use crate::book::ProfileBook;
use crate::cache::ScoreCache;
use crate::config::{LlmStrategy, ScanConfig};
use crate::error::ScanError;
use crate::output::{ScanOutput, ScanResult, ScanStats};
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::resolve::{self, CatalogClient};
use crate::pipeline::{extract, normalize, rotation};
use crate::providers::ProviderChain;
use crate::score::{sort_candidates, Scorer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const NO_TITLES_MESSAGE: &str = "No book titles could be detected in the image";
const NO_MATCHES_MESSAGE: &str = "Detected titles could not be matched to any catalog records";

/// A configured, reusable bookshelf scanner.
pub struct Scanner {
    config: ScanConfig,
    engine: Arc<dyn OcrEngine>,
    catalog: Arc<dyn CatalogClient>,
    chain: ProviderChain,
    cache: ScoreCache,
}

impl Scanner {
    /// Build a scanner with the default production wiring: the system
    /// tesseract engine, the Google Books catalog, and whatever providers
    /// the environment has credentials for.
    ///
    /// Errors when built without the `tesseract` feature; inject an engine
    /// via [`Scanner::with_components`] in that case.
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        #[cfg(feature = "tesseract")]
        {
            let engine = Arc::new(crate::pipeline::tesseract::TesseractEngine::new());
            let catalog = Arc::new(resolve::GoogleBooksClient::new(&config));
            let chain = ProviderChain::from_env(&config);
            Self::with_components(config, engine, catalog, chain)
        }
        #[cfg(not(feature = "tesseract"))]
        {
            let _ = &config;
            Err(ScanError::InvalidConfig(
                "no default OCR engine: build with the `tesseract` feature or use \
                 Scanner::with_components"
                    .into(),
            ))
        }
    }

    /// Build a scanner from explicit components. The seam used by tests and
    /// by callers with their own OCR engine or catalog.
    pub fn with_components(
        config: ScanConfig,
        engine: Arc<dyn OcrEngine>,
        catalog: Arc<dyn CatalogClient>,
        chain: ProviderChain,
    ) -> Result<Self, ScanError> {
        // An intelligence layer that is enabled but has nobody to call is a
        // deployment mistake, caught at construction rather than mid-scan.
        if config.llm_enabled && chain.is_empty() {
            return Err(ScanError::NoProvidersConfigured);
        }
        let cache = ScoreCache::new(
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
        );
        Ok(Self {
            config,
            engine,
            catalog,
            chain,
            cache,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run the full pipeline on one uploaded image.
    ///
    /// `profile` is the reader's library; candidates already in it are
    /// reported in `detected` but excluded from `recommended`.
    pub async fn scan(
        &self,
        bytes: &[u8],
        content_type: &str,
        profile: &[ProfileBook],
    ) -> Result<ScanOutput, ScanError> {
        let total_start = Instant::now();
        info!(
            "Scan started: {} bytes, content-type '{content_type}', profile of {} books",
            bytes.len(),
            profile.len()
        );

        // ── Step 1: normalize ────────────────────────────────────────────
        let step_start = Instant::now();
        let image = normalize::normalize(bytes, content_type, &self.config)?;
        let normalize_duration_ms = step_start.elapsed().as_millis() as u64;

        // ── Step 2: orientation ──────────────────────────────────────────
        let rotated = rotation::resolve(self.engine.as_ref(), image, &self.config).await;

        // ── Step 3: title extraction ─────────────────────────────────────
        let step_start = Instant::now();
        let vision_possible = self.config.llm_enabled
            && self.config.llm_strategy != LlmStrategy::Disabled
            && !self.chain.is_empty();
        let image_b64 = if vision_possible {
            rotated.image.to_png_base64()?
        } else {
            String::new()
        };
        let extraction =
            extract::extract_titles(&rotated.ocr, &image_b64, &self.chain, &self.config).await;
        let extract_duration_ms = step_start.elapsed().as_millis() as u64;

        if extraction.candidates.is_empty() {
            info!("Scan finished: no title candidates");
            return Ok(ScanOutput {
                result: ScanResult::empty(NO_TITLES_MESSAGE),
                stats: self.stats(
                    &extraction,
                    0,
                    0,
                    rotated.report,
                    normalize_duration_ms,
                    extract_duration_ms,
                    0,
                    0,
                    total_start,
                ),
            });
        }

        // ── Step 4: catalog resolution ───────────────────────────────────
        let step_start = Instant::now();
        let resolved =
            resolve::resolve_candidates(self.catalog.as_ref(), &extraction.candidates, &self.config)
                .await;
        let resolve_duration_ms = step_start.elapsed().as_millis() as u64;

        if resolved.is_empty() {
            info!(
                "Scan finished: {} candidates, none matched the catalog",
                extraction.candidates.len()
            );
            return Ok(ScanOutput {
                result: ScanResult::empty(NO_MATCHES_MESSAGE),
                stats: self.stats(
                    &extraction,
                    0,
                    0,
                    rotated.report,
                    normalize_duration_ms,
                    extract_duration_ms,
                    resolve_duration_ms,
                    0,
                    total_start,
                ),
            });
        }

        // ── Step 5: scoring ──────────────────────────────────────────────
        let step_start = Instant::now();
        let resolved_count = resolved.len();
        let scorer = Scorer::new(&self.chain, &self.cache, &self.config);
        let (detected, score_stats) = scorer.score_all(resolved, profile).await;
        let score_duration_ms = step_start.elapsed().as_millis() as u64;

        // ── Step 6: assemble ─────────────────────────────────────────────
        let mut recommended: Vec<_> = detected
            .iter()
            .filter(|c| !c.already_known)
            .cloned()
            .collect();
        sort_candidates(&mut recommended);

        let stats = self.stats(
            &extraction,
            resolved_count,
            score_stats.provider_scored,
            rotated.report,
            normalize_duration_ms,
            extract_duration_ms,
            resolve_duration_ms,
            score_duration_ms,
            total_start,
        );
        info!(
            "Scan finished: {} detected, {} recommended, {}ms",
            detected.len(),
            recommended.len(),
            stats.total_duration_ms
        );

        Ok(ScanOutput {
            result: ScanResult {
                detected,
                recommended,
                message: None,
            },
            stats,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn stats(
        &self,
        extraction: &extract::ExtractOutcome,
        resolved_candidates: usize,
        provider_scored: usize,
        rotation: crate::output::RotationReport,
        normalize_duration_ms: u64,
        extract_duration_ms: u64,
        resolve_duration_ms: u64,
        score_duration_ms: u64,
        total_start: Instant,
    ) -> ScanStats {
        ScanStats {
            rule_candidates: extraction.rule_count,
            vision_fallback_fired: extraction.vision_fired,
            vision_fallback_reason: extraction.vision_reason.clone(),
            extracted_candidates: extraction.candidates.len(),
            resolved_candidates,
            provider_scored,
            rotation,
            normalize_duration_ms,
            extract_duration_ms,
            resolve_duration_ms,
            score_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        }
    }
}

//! End-to-end pipeline tests with scripted OCR, catalog, and provider fakes.
//!
//! Everything network-shaped is injected, so these exercise the real
//! orchestration (stage sequencing, fallback decisions, caching, result
//! assembly) without touching tesseract or any API.

use async_trait::async_trait;
use shelfscan::{
    IntelligenceProvider, MatchVerdict, OcrEngine, OcrLine, OcrOutcome, ProfileBook,
    ProviderChain, ProviderKind, RawTitle, ResolvedBook, ScanConfig, ScanError, Scanner,
    StageError,
};
use shelfscan::pipeline::normalize::NormalizedImage;
use shelfscan::pipeline::resolve::CatalogClient;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Fakes ────────────────────────────────────────────────────────────────

struct ScriptedOcr {
    lines: Vec<OcrLine>,
}

impl ScriptedOcr {
    fn reading(lines: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            lines: lines
                .iter()
                .map(|(text, confidence)| OcrLine {
                    text: text.to_string(),
                    confidence: *confidence,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn recognize(&self, _image: &NormalizedImage) -> Result<OcrOutcome, StageError> {
        Ok(OcrOutcome::from_lines(self.lines.clone()))
    }
}

struct MapCatalog {
    hits: HashMap<String, ResolvedBook>,
}

impl MapCatalog {
    fn with(books: &[(&str, ResolvedBook)]) -> Arc<Self> {
        Arc::new(Self {
            hits: books
                .iter()
                .map(|(query, book)| (query.to_string(), book.clone()))
                .collect(),
        })
    }

    fn empty() -> Arc<Self> {
        Arc::new(Self {
            hits: HashMap::new(),
        })
    }
}

#[async_trait]
impl CatalogClient for MapCatalog {
    async fn search(
        &self,
        query: &str,
        _max_results: usize,
    ) -> Result<Vec<ResolvedBook>, StageError> {
        Ok(self.hits.get(query).cloned().into_iter().collect())
    }
}

struct ScriptedProvider {
    titles: Vec<RawTitle>,
    score: f64,
    fail: bool,
    extract_calls: AtomicUsize,
    score_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn scoring(score: f64) -> Arc<Self> {
        Arc::new(Self {
            titles: Vec::new(),
            score,
            fail: false,
            extract_calls: AtomicUsize::new(0),
            score_calls: AtomicUsize::new(0),
        })
    }

    fn extracting(titles: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            titles: titles
                .iter()
                .map(|(title, confidence)| RawTitle {
                    title: title.to_string(),
                    confidence: *confidence,
                })
                .collect(),
            score: 0.8,
            fail: false,
            extract_calls: AtomicUsize::new(0),
            score_calls: AtomicUsize::new(0),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            titles: Vec::new(),
            score: 0.0,
            fail: true,
            extract_calls: AtomicUsize::new(0),
            score_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl IntelligenceProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn extract_titles(
        &self,
        _image_png_b64: &str,
        _ocr_text: &str,
    ) -> Result<Vec<RawTitle>, StageError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StageError::Provider {
                provider: "gemini".into(),
                detail: "scripted outage".into(),
            });
        }
        Ok(self.titles.clone())
    }

    async fn score_match(
        &self,
        _candidate: &ResolvedBook,
        _excerpt: &[ProfileBook],
        _profile_total: usize,
    ) -> Result<MatchVerdict, StageError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StageError::Provider {
                provider: "gemini".into(),
                detail: "scripted outage".into(),
            });
        }
        Ok(MatchVerdict {
            score: self.score,
            explanation: "matches the reader's taste".into(),
        })
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        160,
        120,
        image::Rgb([210, 210, 210]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn fast_config() -> shelfscan::ScanConfigBuilder {
    ScanConfig::builder()
        .min_dimension_px(100)
        .rotation_mode(shelfscan::RotationMode::Disabled)
}

fn book(title: &str, author: &str, id: &str, rating_count: u64) -> ResolvedBook {
    ResolvedBook {
        title: title.into(),
        author: Some(author.into()),
        isbn: None,
        publisher: None,
        categories: vec!["Fiction".into()],
        thumbnail_url: None,
        external_id: id.into(),
        rating: Some(4.0),
        rating_count: Some(rating_count),
        confidence: 0.0,
    }
}

fn profile_entry(title: &str, author: &str, id: &str) -> ProfileBook {
    ProfileBook {
        title: title.into(),
        author: Some(author.into()),
        categories: vec!["Fiction".into()],
        external_id: id.into(),
        rating: None,
        description: None,
    }
}

fn chain_of(provider: &Arc<ScriptedProvider>) -> ProviderChain {
    ProviderChain::new(vec![Arc::clone(provider) as Arc<dyn IntelligenceProvider>], None)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn detects_three_books_and_recommends_two() {
    let ocr = ScriptedOcr::reading(&[
        ("Dune", 0.9),
        ("Foundation", 0.85),
        ("The Hobbit", 0.8),
        ("PENGUIN RANDOM HOUSE", 0.9),
        ("$34.99", 0.95),
    ]);
    let catalog = MapCatalog::with(&[
        ("Dune", book("Dune", "Frank Herbert", "v-dune", 900)),
        ("Foundation", book("Foundation", "Isaac Asimov", "v-found", 700)),
        ("The Hobbit", book("The Hobbit", "J. R. R. Tolkien", "v-hobbit", 999)),
    ]);
    let provider = ScriptedProvider::scoring(0.8);
    let scanner = Scanner::with_components(
        fast_config().build().unwrap(),
        ocr,
        catalog,
        chain_of(&provider),
    )
    .unwrap();

    let profile = vec![profile_entry("The Hobbit", "J. R. R. Tolkien", "v-hobbit")];
    let output = scanner.scan(&png_bytes(), "image/png", &profile).await.unwrap();

    assert_eq!(output.result.detected.len(), 3);
    assert_eq!(output.result.recommended.len(), 2);
    assert!(output.result.message.is_none());

    // The known book shows up in detected, flagged, and never in recommended.
    let hobbit = output
        .result
        .detected
        .iter()
        .find(|c| c.book.external_id == "v-hobbit")
        .unwrap();
    assert!(hobbit.already_known);
    assert!(output.result.recommended.iter().all(|c| !c.already_known));

    // Recommended is a subset of detected.
    for rec in &output.result.recommended {
        assert!(output
            .result
            .detected
            .iter()
            .any(|d| d.book.external_id == rec.book.external_id));
    }

    assert_eq!(output.stats.rule_candidates, 3);
    assert_eq!(output.stats.resolved_candidates, 3);
    assert_eq!(output.stats.provider_scored, 3);
    assert!(!output.stats.vision_fallback_fired);
}

#[tokio::test]
async fn recommended_is_sorted_and_sort_is_stable_across_scans() {
    let ocr = ScriptedOcr::reading(&[("Dune", 0.9), ("Foundation", 0.9), ("The Hobbit", 0.9)]);
    let catalog = MapCatalog::with(&[
        ("Dune", book("Dune", "Frank Herbert", "v-dune", 500)),
        ("Foundation", book("Foundation", "Isaac Asimov", "v-found", 900)),
        ("The Hobbit", book("The Hobbit", "J. R. R. Tolkien", "v-hobbit", 100)),
    ]);
    // Equal provider scores force the popularity/title tie-breakers.
    let provider = ScriptedProvider::scoring(0.7);
    let scanner = Scanner::with_components(
        fast_config().build().unwrap(),
        ocr,
        catalog,
        chain_of(&provider),
    )
    .unwrap();

    let first = scanner.scan(&png_bytes(), "image/png", &[]).await.unwrap();
    let second = scanner.scan(&png_bytes(), "image/png", &[]).await.unwrap();

    let order: Vec<&str> = first
        .result
        .recommended
        .iter()
        .map(|c| c.book.external_id.as_str())
        .collect();
    assert_eq!(order, vec!["v-found", "v-dune", "v-hobbit"]);

    let order_again: Vec<&str> = second
        .result
        .recommended
        .iter()
        .map(|c| c.book.external_id.as_str())
        .collect();
    assert_eq!(order, order_again);

    for pair in first.result.recommended.windows(2) {
        assert!(pair[0].match_score >= pair[1].match_score);
    }
}

#[tokio::test]
async fn rule_phase_rejects_metadata_noise() {
    let ocr = ScriptedOcr::reading(&[
        ("The Lord of the Rings", 0.9),
        ("Foundation", 0.9),
        ("DUNE", 0.9),
        ("ISBN 978-0-14-311822-4", 0.95),
        ("PENGUIN RANDOM HOUSE", 0.95),
        ("$34.99", 0.95),
        ("456 pages", 0.95),
    ]);
    let scanner = Scanner::with_components(
        fast_config().llm_enabled(false).build().unwrap(),
        ocr,
        MapCatalog::empty(),
        ProviderChain::new(Vec::new(), None),
    )
    .unwrap();

    let output = scanner.scan(&png_bytes(), "image/png", &[]).await.unwrap();
    assert_eq!(output.stats.rule_candidates, 3);
    assert_eq!(output.stats.extracted_candidates, 3);
    // Nothing resolved (empty catalog), so the scan reports a message.
    assert!(output.result.detected.is_empty());
    assert!(output.result.message.is_some());
}

#[tokio::test]
async fn score_cache_spares_repeat_provider_calls() {
    let ocr = ScriptedOcr::reading(&[("Dune", 0.9), ("Foundation", 0.9)]);
    let catalog = MapCatalog::with(&[
        ("Dune", book("Dune", "Frank Herbert", "v-dune", 500)),
        ("Foundation", book("Foundation", "Isaac Asimov", "v-found", 700)),
    ]);
    let provider = ScriptedProvider::scoring(0.8);
    let scanner = Scanner::with_components(
        fast_config().build().unwrap(),
        ocr,
        catalog,
        chain_of(&provider),
    )
    .unwrap();

    let profile = vec![profile_entry("Neuromancer", "William Gibson", "p-neuro")];
    scanner.scan(&png_bytes(), "image/png", &profile).await.unwrap();
    assert_eq!(provider.score_calls.load(Ordering::SeqCst), 2);

    // Same shelf, same profile: everything served from cache.
    scanner.scan(&png_bytes(), "image/png", &profile).await.unwrap();
    assert_eq!(provider.score_calls.load(Ordering::SeqCst), 2);

    // Any change to the profile's id set misses the cache.
    let grown = vec![
        profile_entry("Neuromancer", "William Gibson", "p-neuro"),
        profile_entry("Snow Crash", "Neal Stephenson", "p-snow"),
    ];
    scanner.scan(&png_bytes(), "image/png", &grown).await.unwrap();
    assert_eq!(provider.score_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn out_of_range_provider_scores_are_clamped() {
    let catalog_books = [
        ("Dune", book("Dune", "Frank Herbert", "v-dune", 900)),
        ("Foundation", book("Foundation", "Isaac Asimov", "v-found", 100)),
    ];

    // A provider handing back > 1 must land on exactly 1.0, and the
    // popularity tie-breaker must still order the clamped ties.
    let provider = ScriptedProvider::scoring(1.7);
    let scanner = Scanner::with_components(
        fast_config().build().unwrap(),
        ScriptedOcr::reading(&[("Dune", 0.9), ("Foundation", 0.9)]),
        MapCatalog::with(&catalog_books),
        chain_of(&provider),
    )
    .unwrap();
    let output = scanner.scan(&png_bytes(), "image/png", &[]).await.unwrap();
    assert!(output.result.detected.iter().all(|c| c.match_score == 1.0));
    let order: Vec<&str> = output
        .result
        .recommended
        .iter()
        .map(|c| c.book.external_id.as_str())
        .collect();
    assert_eq!(order, vec!["v-dune", "v-found"]);

    // Negative scores sink to exactly 0.0.
    let provider = ScriptedProvider::scoring(-0.3);
    let scanner = Scanner::with_components(
        fast_config().build().unwrap(),
        ScriptedOcr::reading(&[("Dune", 0.9), ("Foundation", 0.9)]),
        MapCatalog::with(&catalog_books),
        chain_of(&provider),
    )
    .unwrap();
    let output = scanner.scan(&png_bytes(), "image/png", &[]).await.unwrap();
    assert!(output.result.detected.iter().all(|c| c.match_score == 0.0));
    assert_eq!(output.result.recommended.len(), 2);
}

#[tokio::test]
async fn provider_outage_degrades_to_rule_scores() {
    let ocr = ScriptedOcr::reading(&[("Dune", 0.9)]);
    let catalog = MapCatalog::with(&[("Dune", book("Dune", "Frank Herbert", "v-dune", 500))]);
    let provider = ScriptedProvider::broken();
    let scanner = Scanner::with_components(
        fast_config().build().unwrap(),
        ocr,
        catalog,
        chain_of(&provider),
    )
    .unwrap();

    let profile = vec![profile_entry("Dune Messiah", "Frank Herbert", "p-dm")];
    let output = scanner.scan(&png_bytes(), "image/png", &profile).await.unwrap();

    assert_eq!(output.result.detected.len(), 1);
    let scored = &output.result.detected[0];
    // Author + category overlap + rating + popularity, computed locally.
    assert!(scored.match_score > 0.5);
    assert!(scored.explanation.is_none());
    assert_eq!(output.stats.provider_scored, 0);
}

#[tokio::test]
async fn vision_fallback_fires_when_rules_find_nothing() {
    // Every OCR line is noise, so the conservative strategy consults vision.
    let ocr = ScriptedOcr::reading(&[("ISBN 978-0-14-311822-4", 0.95), ("$12.50", 0.9)]);
    let catalog = MapCatalog::with(&[("Dune", book("Dune", "Frank Herbert", "v-dune", 500))]);
    let provider = ScriptedProvider::extracting(&[("Dune", 0.85), ("978-0-14-311822-4", 0.9)]);
    let scanner = Scanner::with_components(
        fast_config().build().unwrap(),
        Arc::clone(&ocr) as Arc<dyn OcrEngine>,
        catalog,
        chain_of(&provider),
    )
    .unwrap();

    let output = scanner.scan(&png_bytes(), "image/png", &[]).await.unwrap();

    assert_eq!(provider.extract_calls.load(Ordering::SeqCst), 1);
    assert!(output.stats.vision_fallback_fired);
    assert_eq!(output.stats.vision_fallback_reason.as_deref(), Some("no rule candidates"));
    // The ISBN the model leaked is filtered out; only the real title remains.
    assert_eq!(output.stats.extracted_candidates, 1);
    assert_eq!(output.result.detected.len(), 1);
    assert_eq!(output.result.detected[0].book.external_id, "v-dune");
}

#[tokio::test]
async fn empty_shelf_reports_a_message_not_an_error() {
    let ocr = ScriptedOcr::reading(&[]);
    let scanner = Scanner::with_components(
        fast_config().llm_enabled(false).build().unwrap(),
        ocr,
        MapCatalog::empty(),
        ProviderChain::new(Vec::new(), None),
    )
    .unwrap();

    let output = scanner.scan(&png_bytes(), "image/png", &[]).await.unwrap();
    assert!(output.result.detected.is_empty());
    assert!(output.result.recommended.is_empty());
    assert!(output.result.message.unwrap().contains("No book titles"));
}

#[tokio::test]
async fn llm_enabled_without_providers_fails_construction() {
    let err = Scanner::with_components(
        fast_config().build().unwrap(),
        ScriptedOcr::reading(&[]),
        MapCatalog::empty(),
        ProviderChain::new(Vec::new(), None),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ScanError::NoProvidersConfigured));
    assert!(err.to_string().contains("GEMINI_API_KEY"));
}

#[tokio::test]
async fn bad_uploads_are_rejected_up_front() {
    let scanner = Scanner::with_components(
        fast_config()
            .max_image_bytes(2048)
            .llm_enabled(false)
            .build()
            .unwrap(),
        ScriptedOcr::reading(&[]),
        MapCatalog::empty(),
        ProviderChain::new(Vec::new(), None),
    )
    .unwrap();

    let err = scanner
        .scan(&vec![0u8; 5000], "image/png", &[])
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ScanError::ImageTooLarge { .. }));

    let err = scanner
        .scan(b"plainly not pixels", "text/plain", &[])
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ScanError::InvalidImage { .. }));

    let err = scanner.scan(&[1, 2, 3], "image/png", &[]).await.err().unwrap();
    assert!(matches!(err, ScanError::InvalidImage { .. }));
}

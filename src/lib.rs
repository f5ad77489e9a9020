//! # shelfscan
//!
//! Turn a photo of a bookshelf into ranked book recommendations.
//!
//! ```text
//! photo bytes
//!     │
//!     ▼
//! ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐   ┌─────────┐
//! │ normalize │──▶│ orientation│──▶│  extract  │──▶│ resolve  │──▶│  score  │
//! │ (decode,  │   │ (OSD +     │   │ (rules,   │   │ (catalog │   │ (LLM    │
//! │  enhance) │   │  retries)  │   │  vision)  │   │  fuzzy)  │   │  chain) │
//! └───────────┘   └────────────┘   └───────────┘   └──────────┘   └─────────┘
//!                                                                      │
//!                                                                      ▼
//!                                                          detected + recommended
//! ```
//!
//! The pipeline is rules-first and degrades gracefully: OCR heuristics
//! extract titles for free, a vision model is consulted only when they come
//! up short, and a deterministic metadata score stands in whenever every
//! provider is down. Only a bad upload fails a scan.
//!
//! ## Example
//!
//! ```rust,no_run
//! use shelfscan::{ScanConfig, Scanner};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scanner = Scanner::new(ScanConfig::default())?;
//! let photo = std::fs::read("shelf.jpg")?;
//! let output = scanner.scan(&photo, "image/jpeg", &[]).await?;
//! for book in &output.result.recommended {
//!     println!("{:.2}  {}", book.match_score, book.book.title);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Requires the `tesseract` feature (and a system `tesseract` install) for
//! the default OCR engine; any [`OcrEngine`] can be injected instead via
//! [`Scanner::with_components`].
//!
//! ## Features
//!
//! - `tesseract` — the system-tesseract OCR engine.
//! - `cli` (default) — the `shelfscan` command-line binary.

pub mod book;
pub mod cache;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod scan;
pub mod score;

pub use book::{
    ProfileBook, ResolvedBook, ScoredCandidate, TitleCandidate, TitleSource,
};
pub use cache::{CachedScore, ScoreCache};
pub use config::{
    LlmStrategy, NumericTitlePolicy, RotationMode, ScanConfig, ScanConfigBuilder,
};
pub use error::{ScanError, StageError};
pub use output::{RotationReport, ScanOutput, ScanResult, ScanStats};
pub use pipeline::ocr::{OcrEngine, OcrLine, OcrOutcome, OrientationEstimate, Rotation};
pub use pipeline::resolve::{CatalogClient, GoogleBooksClient};
pub use providers::{
    IntelligenceProvider, MatchVerdict, ProviderChain, ProviderKind, RawTitle,
};
pub use scan::Scanner;

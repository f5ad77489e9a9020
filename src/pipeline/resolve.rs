//! Catalog resolution: turn title candidates into canonical book records.
//!
//! Each candidate is searched against the catalog and the best hit is
//! accepted only when its fuzzy similarity to the candidate clears
//! [`ScanConfig::match_threshold`]. Similarity is token-sort Levenshtein
//! (word order doesn't matter: "Rings Lord of the" still finds the book),
//! weighted 70% title / 30% author when the candidate carries an author hint.
//!
//! Lookups are independent, so they fan out concurrently; a failed or
//! unmatched lookup drops its candidate rather than failing the scan.

use crate::book::{ResolvedBook, TitleCandidate};
use crate::config::ScanConfig;
use crate::error::StageError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const TITLE_WEIGHT: f64 = 0.7;
const AUTHOR_WEIGHT: f64 = 0.3;

/// The catalog lookup seam.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Search the catalog, best matches first.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<ResolvedBook>, StageError>;
}

/// Token-sort similarity in `[0,1]`: lowercase, sort words, compare with
/// normalised Levenshtein.
pub fn token_sort_similarity(a: &str, b: &str) -> f64 {
    fn sorted_tokens(s: &str) -> String {
        let mut tokens: Vec<String> = s
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        tokens.sort();
        tokens.join(" ")
    }
    strsim::normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b))
}

/// Combined similarity between a candidate and a catalog hit.
///
/// Title-only unless both sides carry an author.
pub fn match_similarity(
    candidate_title: &str,
    candidate_author: Option<&str>,
    hit: &ResolvedBook,
) -> f64 {
    let title_sim = token_sort_similarity(candidate_title, &hit.title);
    match (candidate_author, hit.author.as_deref()) {
        (Some(a), Some(b)) => {
            TITLE_WEIGHT * title_sim + AUTHOR_WEIGHT * token_sort_similarity(a, b)
        }
        _ => title_sim,
    }
}

/// Pick the best-scoring hit at or above the threshold.
pub fn best_match(
    candidate: &TitleCandidate,
    hits: &[ResolvedBook],
    threshold: f64,
) -> Option<(ResolvedBook, f64)> {
    hits.iter()
        .map(|hit| (hit, match_similarity(&candidate.text, None, hit)))
        .filter(|(_, sim)| *sim >= threshold)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(hit, sim)| (hit.clone(), sim))
}

/// Resolve candidates against the catalog, preserving candidate order.
///
/// Unmatched or failed candidates are dropped. The resolved record carries
/// the candidate's extraction confidence.
pub async fn resolve_candidates(
    catalog: &dyn CatalogClient,
    candidates: &[TitleCandidate],
    config: &ScanConfig,
) -> Vec<ResolvedBook> {
    let threshold = config.match_threshold;
    let mut resolved: Vec<(usize, ResolvedBook)> =
        stream::iter(candidates.iter().cloned().enumerate())
            .map(|(index, candidate)| async move {
                match catalog.search(&candidate.text, 5).await {
                    Ok(hits) => match best_match(&candidate, &hits, threshold) {
                        Some((mut book, sim)) => {
                            debug!(
                                "Resolved '{}' -> '{}' (similarity {sim:.2})",
                                candidate.text, book.title
                            );
                            book.confidence = candidate.confidence;
                            Some((index, book))
                        }
                        None => {
                            debug!("No catalog match for '{}'", candidate.text);
                            None
                        }
                    },
                    Err(e) => {
                        warn!("Catalog lookup failed for '{}': {e}", candidate.text);
                        None
                    }
                }
            })
            .buffer_unordered(config.catalog_concurrency)
            .filter_map(|item| async move { item })
            .collect()
            .await;

    resolved.sort_by_key(|(index, _)| *index);

    // Two candidates can resolve to the same volume ("DUNE" and "Dune").
    let mut seen = std::collections::HashSet::new();
    resolved
        .into_iter()
        .map(|(_, book)| book)
        .filter(|book| seen.insert(book.external_id.clone()))
        .collect()
}

// ── Google Books ─────────────────────────────────────────────────────────

const GOOGLE_BOOKS_URL: &str = "https://www.googleapis.com/books/v1/volumes";

/// Catalog client backed by the Google Books volumes API.
pub struct GoogleBooksClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl GoogleBooksClient {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.catalog_timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: GOOGLE_BOOKS_URL.to_string(),
            api_key: std::env::var("GOOGLE_BOOKS_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout_secs: config.catalog_timeout_secs,
        }
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Deserialize)]
struct Volume {
    id: String,
    #[serde(rename = "volumeInfo")]
    volume_info: VolumeInfo,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    #[serde(default)]
    industry_identifiers: Vec<IndustryIdentifier>,
    #[serde(default)]
    categories: Vec<String>,
    average_rating: Option<f64>,
    ratings_count: Option<u64>,
    image_links: Option<ImageLinks>,
}

#[derive(Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

#[derive(Deserialize)]
struct ImageLinks {
    thumbnail: Option<String>,
    #[serde(rename = "smallThumbnail")]
    small_thumbnail: Option<String>,
}

impl Volume {
    fn into_book(self) -> ResolvedBook {
        let info = self.volume_info;
        // Prefer ISBN-13; fall back to ISBN-10.
        let isbn = info
            .industry_identifiers
            .iter()
            .find(|id| id.kind == "ISBN_13")
            .or_else(|| info.industry_identifiers.iter().find(|id| id.kind == "ISBN_10"))
            .map(|id| id.identifier.clone());
        let author = if info.authors.is_empty() {
            None
        } else {
            Some(info.authors.join(", "))
        };
        let thumbnail_url = info
            .image_links
            .and_then(|links| links.thumbnail.or(links.small_thumbnail));
        ResolvedBook {
            title: info.title,
            author,
            isbn,
            publisher: info.publisher,
            categories: info.categories,
            thumbnail_url,
            external_id: self.id,
            rating: info.average_rating,
            rating_count: info.ratings_count,
            confidence: 0.0,
        }
    }
}

#[async_trait]
impl CatalogClient for GoogleBooksClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<ResolvedBook>, StageError> {
        let mut request = self.client.get(&self.base_url).query(&[
            ("q", format!("intitle:{query}")),
            ("maxResults", max_results.to_string()),
            ("printType", "books".to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StageError::Timeout {
                    what: format!("catalog lookup '{query}'"),
                    secs: self.timeout_secs,
                }
            } else {
                StageError::Catalog {
                    query: query.to_string(),
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageError::Catalog {
                query: query.to_string(),
                detail: format!("HTTP {status}"),
            });
        }

        let parsed: VolumesResponse = response.json().await.map_err(|e| StageError::Catalog {
            query: query.to_string(),
            detail: format!("malformed response: {e}"),
        })?;
        Ok(parsed
            .items
            .into_iter()
            .filter(|v| !v.volume_info.title.is_empty())
            .map(Volume::into_book)
            .collect())
    }
}

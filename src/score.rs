//! Recommendation scoring: provider chain first, deterministic rules as the
//! floor.
//!
//! Every resolved candidate gets a taste-match score in `[0,1]`. The provider
//! chain supplies the nuanced verdicts; when it is exhausted, unavailable, or
//! switched off, [`rule_score`] supplies a deterministic one from catalog
//! metadata alone, so a full provider outage degrades quality, never
//! availability. Provider scores are cached per `(profile, candidate)`
//! fingerprint to keep re-scans of the same shelf cheap.

use crate::book::{clamp_unit, normalized_key, ProfileBook, ResolvedBook, ScoredCandidate};
use crate::cache::{CachedScore, ScoreCache};
use crate::config::ScanConfig;
use crate::providers::ProviderChain;
use futures::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

/// Cache key for one `(profile, candidate)` pair.
///
/// The profile is represented by its sorted `external_id` set, so book order
/// in the request never fragments the cache, while adding or removing any
/// book invalidates the whole profile's entries.
pub fn fingerprint(profile: &[ProfileBook], candidate_id: &str) -> String {
    let mut ids: Vec<&str> = profile.iter().map(|b| b.external_id.as_str()).collect();
    ids.sort_unstable();
    let mut hasher = DefaultHasher::new();
    ids.hash(&mut hasher);
    candidate_id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Deterministic metadata-only score.
///
/// Weighted sum: 0.4 author overlap with the profile, 0.3 category overlap
/// (saturating at three shared categories), 0.2 catalog rating, 0.1 rating
/// volume (saturating at 1000 ratings). With an empty profile only the
/// popularity terms can contribute, which ranks well-known books first — a
/// reasonable cold-start default.
pub fn rule_score(candidate: &ResolvedBook, profile: &[ProfileBook]) -> f64 {
    let mut score = 0.0;

    if let Some(author) = candidate.author.as_deref() {
        let author_key = normalized_key(author);
        let known = profile.iter().any(|book| {
            book.author
                .as_deref()
                .map(|a| {
                    let key = normalized_key(a);
                    key == author_key || key.contains(&author_key) || author_key.contains(&key)
                })
                .unwrap_or(false)
        });
        if known {
            score += 0.4;
        }
    }

    if !candidate.categories.is_empty() {
        let profile_categories: HashSet<String> = profile
            .iter()
            .flat_map(|book| book.categories.iter())
            .map(|c| normalized_key(c))
            .collect();
        let shared = candidate
            .categories
            .iter()
            .filter(|c| profile_categories.contains(&normalized_key(c)))
            .count();
        score += 0.3 * (shared as f64 / 3.0).min(1.0);
    }

    if let Some(rating) = candidate.rating {
        score += 0.2 * clamp_unit(rating / 5.0);
    }
    if let Some(count) = candidate.rating_count {
        score += 0.1 * (count as f64 / 1000.0).min(1.0);
    }

    clamp_unit(score)
}

/// Sort scored candidates into presentation order: score descending, then
/// rating count descending, then normalised title ascending.
///
/// Total and deterministic, so re-sorting sorted output is a no-op.
pub fn sort_candidates(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.match_score
            .partial_cmp(&a.match_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.book.rating_count.unwrap_or(0).cmp(&a.book.rating_count.unwrap_or(0)))
            .then_with(|| normalized_key(&a.book.title).cmp(&normalized_key(&b.book.title)))
    });
}

/// The scoring stage.
pub struct Scorer<'a> {
    chain: &'a ProviderChain,
    cache: &'a ScoreCache,
    config: &'a ScanConfig,
}

/// What [`Scorer::score_all`] reports alongside the candidates.
#[derive(Debug, Default)]
pub struct ScoreStats {
    /// Candidates whose score came from a provider (fresh or cached).
    pub provider_scored: usize,
}

impl<'a> Scorer<'a> {
    pub fn new(chain: &'a ProviderChain, cache: &'a ScoreCache, config: &'a ScanConfig) -> Self {
        Self {
            chain,
            cache,
            config,
        }
    }

    /// Score every candidate concurrently, preserving input order.
    pub async fn score_all(
        &self,
        candidates: Vec<ResolvedBook>,
        profile: &[ProfileBook],
    ) -> (Vec<ScoredCandidate>, ScoreStats) {
        let known_ids: HashSet<&str> =
            profile.iter().map(|b| b.external_id.as_str()).collect();

        let mut scored: Vec<(usize, ScoredCandidate, bool)> =
            stream::iter(candidates.into_iter().enumerate())
                .map(|(index, book)| {
                    let already_known = known_ids.contains(book.external_id.as_str());
                    async move {
                        let (verdict, from_provider) = self.score_one(&book, profile).await;
                        (
                            index,
                            ScoredCandidate {
                                book,
                                match_score: verdict.match_score,
                                explanation: verdict.explanation,
                                already_known,
                            },
                            from_provider,
                        )
                    }
                })
                .buffer_unordered(self.config.scoring_concurrency)
                .collect()
                .await;

        scored.sort_by_key(|(index, _, _)| *index);
        let provider_scored = scored.iter().filter(|(_, _, p)| *p).count();
        (
            scored.into_iter().map(|(_, c, _)| c).collect(),
            ScoreStats { provider_scored },
        )
    }

    /// Score one candidate: cache, then provider chain, then rules.
    ///
    /// Returns the verdict and whether it came from a provider (directly or
    /// via cache). Rule verdicts are not cached — they are cheaper than the
    /// lookup.
    async fn score_one(
        &self,
        candidate: &ResolvedBook,
        profile: &[ProfileBook],
    ) -> (CachedScore, bool) {
        let use_providers = self.config.llm_enabled && !self.chain.is_empty();
        let key = fingerprint(profile, &candidate.external_id);

        if use_providers {
            if let Some(cached) = self.cache.get(&key) {
                debug!("Score cache hit for '{}'", candidate.title);
                return (cached, true);
            }

            let excerpt_len = self.config.profile_excerpt_len.min(profile.len());
            let excerpt = &profile[..excerpt_len];
            match self
                .chain
                .score_match(candidate, excerpt, profile.len())
                .await
            {
                Ok(verdict) => {
                    let cached = CachedScore {
                        match_score: clamp_unit(verdict.score),
                        explanation: Some(verdict.explanation),
                    };
                    self.cache.insert(key, cached.clone());
                    return (cached, true);
                }
                Err(e) => {
                    warn!(
                        "Provider scoring failed for '{}', using rule score: {e}",
                        candidate.title
                    );
                }
            }
        }

        (
            CachedScore {
                match_score: rule_score(candidate, profile),
                explanation: None,
            },
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(title: &str, id: &str) -> ResolvedBook {
        ResolvedBook {
            title: title.into(),
            author: Some("Frank Herbert".into()),
            isbn: None,
            publisher: None,
            categories: vec!["Science Fiction".into()],
            thumbnail_url: None,
            external_id: id.into(),
            rating: Some(4.0),
            rating_count: Some(500),
            confidence: 0.9,
        }
    }

    fn profile_book(author: &str, category: &str, id: &str) -> ProfileBook {
        ProfileBook {
            title: format!("book-{id}"),
            author: Some(author.into()),
            categories: vec![category.into()],
            external_id: id.into(),
            rating: None,
            description: None,
        }
    }

    #[test]
    fn fingerprint_ignores_profile_order() {
        let a = vec![profile_book("A", "SF", "p1"), profile_book("B", "SF", "p2")];
        let b = vec![profile_book("B", "SF", "p2"), profile_book("A", "SF", "p1")];
        assert_eq!(fingerprint(&a, "c1"), fingerprint(&b, "c1"));
    }

    #[test]
    fn fingerprint_changes_with_profile_and_candidate() {
        let a = vec![profile_book("A", "SF", "p1")];
        let b = vec![profile_book("A", "SF", "p1"), profile_book("B", "SF", "p2")];
        assert_ne!(fingerprint(&a, "c1"), fingerprint(&b, "c1"));
        assert_ne!(fingerprint(&a, "c1"), fingerprint(&a, "c2"));
    }

    #[test]
    fn rule_score_rewards_author_and_category_overlap() {
        let profile = vec![profile_book("Frank Herbert", "Science Fiction", "p1")];
        let full = rule_score(&candidate("Dune Messiah", "c1"), &profile);
        // 0.4 author + 0.3 * (1/3) category + 0.2 * 0.8 rating + 0.1 * 0.5 count
        assert!((full - 0.71).abs() < 1e-9, "got {full}");
    }

    #[test]
    fn rule_score_empty_profile_uses_popularity_only() {
        let score = rule_score(&candidate("Dune", "c1"), &[]);
        assert!((score - 0.21).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn rule_score_is_clamped() {
        let mut c = candidate("Dune", "c1");
        c.rating = Some(99.0);
        c.rating_count = Some(u64::MAX);
        let profile = vec![profile_book("Frank Herbert", "Science Fiction", "p1")];
        let score = rule_score(&c, &profile);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn sorting_is_deterministic_and_idempotent() {
        let make = |title: &str, id: &str, score: f64, count: Option<u64>| ScoredCandidate {
            book: ResolvedBook {
                rating_count: count,
                ..candidate(title, id)
            },
            match_score: score,
            explanation: None,
            already_known: false,
        };
        let mut list = vec![
            make("Beta", "b", 0.5, Some(10)),
            make("Alpha", "a", 0.5, Some(10)),
            make("Gamma", "g", 0.9, None),
            make("Delta", "d", 0.5, Some(999)),
        ];
        sort_candidates(&mut list);
        let titles: Vec<&str> = list.iter().map(|c| c.book.title.as_str()).collect();
        assert_eq!(titles, vec!["Gamma", "Delta", "Alpha", "Beta"]);

        let snapshot: Vec<String> = titles.iter().map(|s| s.to_string()).collect();
        sort_candidates(&mut list);
        let titles: Vec<&str> = list.iter().map(|c| c.book.title.as_str()).collect();
        assert_eq!(titles, snapshot);
    }
}

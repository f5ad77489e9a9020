//! Bounded, time-limited cache for recommendation scores.
//!
//! One provider call per `(profile, candidate)` pair per hour is the cost
//! model the scorer is built around: re-scanning the same shelf should not
//! re-bill every candidate. The cache is an explicit value injected into the
//! scorer — nothing here is process-global — so swapping it for a shared
//! or distributed cache never touches scoring logic.
//!
//! Concurrency: `DashMap` gives shard-level locking, so concurrent scans
//! read and write safely. Two scans racing on the same missing key may both
//! compute the score; that duplicate work is accepted — a torn read is not
//! possible and a lock is never held across a provider call.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// A cached `(match_score, explanation)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedScore {
    pub match_score: f64,
    pub explanation: Option<String>,
}

struct Entry {
    value: CachedScore,
    inserted_at: Instant,
}

/// In-memory score cache with TTL expiry and capacity-bounded eviction.
///
/// Keys are fingerprints of (sorted profile ids, candidate id) — see
/// [`crate::score::fingerprint`] — so any change to the profile's id set
/// changes every key and implicitly invalidates the whole profile's entries.
pub struct ScoreCache {
    entries: DashMap<String, Entry>,
    capacity: usize,
    ttl: Duration,
}

impl ScoreCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Fetch a live entry, dropping it if expired.
    pub fn get(&self, key: &str) -> Option<CachedScore> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.inserted_at.elapsed() <= self.ttl {
                    return Some(entry.value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Insert a score, evicting the oldest entry when at capacity.
    ///
    /// Eviction is a linear scan; at the default capacity of 1000 that is
    /// microseconds and not worth an ordered index.
    pub fn insert(&self, key: impl Into<String>, value: CachedScore) {
        let key = key.into();
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_one(&self) {
        // Prefer dropping an expired entry; otherwise the oldest.
        let mut victim: Option<(String, Instant)> = None;
        for entry in self.entries.iter() {
            if entry.inserted_at.elapsed() > self.ttl {
                victim = Some((entry.key().clone(), entry.inserted_at));
                break;
            }
            match &victim {
                Some((_, oldest)) if entry.inserted_at >= *oldest => {}
                _ => victim = Some((entry.key().clone(), entry.inserted_at)),
            }
        }
        if let Some((key, _)) = victim {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(v: f64) -> CachedScore {
        CachedScore {
            match_score: v,
            explanation: Some("because".into()),
        }
    }

    #[test]
    fn round_trip_within_ttl() {
        let cache = ScoreCache::new(10, Duration::from_secs(60));
        cache.insert("k", score(0.8));
        assert_eq!(cache.get("k"), Some(score(0.8)));
    }

    #[test]
    fn expired_entries_miss() {
        let cache = ScoreCache::new(10, Duration::from_millis(0));
        cache.insert("k", score(0.8));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty(), "expired entry should be removed on read");
    }

    #[test]
    fn capacity_bound_holds() {
        let cache = ScoreCache::new(3, Duration::from_secs(60));
        for i in 0..10 {
            cache.insert(format!("k{i}"), score(i as f64 / 10.0));
        }
        assert!(cache.len() <= 3, "len = {}", cache.len());
    }

    #[test]
    fn reinserting_existing_key_does_not_evict_others() {
        let cache = ScoreCache::new(2, Duration::from_secs(60));
        cache.insert("a", score(0.1));
        cache.insert("b", score(0.2));
        cache.insert("a", score(0.3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().match_score, 0.3);
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn concurrent_access_is_safe() {
        use std::sync::Arc;
        let cache = Arc::new(ScoreCache::new(100, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.insert(format!("k{}", i % 10), score(t as f64 / 10.0));
                        let _ = cache.get(&format!("k{}", i % 10));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 100);
    }
}

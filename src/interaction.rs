//! Interaction logging and the bundle signature cache.
//!
//! Uses the same `dashmap`-backed concurrent state as `scan.rs`'s parallel
//! file maps, for the same reason: lock-free reads under concurrent
//! callers. `config.rs`'s `CacheConfig` supplies the TTL/max-entries knobs
//! this cache enforces.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::storage::Storage;
use crate::types::Interaction;

#[derive(Debug, Clone)]
struct CacheEntry {
    bundle_signature: String,
    stored_at_secs: u64,
    last_used_secs: u64,
}

impl CacheEntry {
    fn touch(&mut self, now: u64) {
        self.last_used_secs = now;
    }
}

/// Signature → bundle cache keyed by `hash(normalized_query, intent, scope)`,
/// with TTL expiry and LRU eviction once `max_entries` is exceeded. Backed
/// by `dashmap`: many concurrent readers, infrequent writers, no need for
/// a global lock.
pub struct SignatureCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl SignatureCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        SignatureCache {
            entries: DashMap::new(),
            ttl: Duration::from_secs(config.ttl_days * 86_400),
            max_entries: config.max_entries,
        }
    }

    /// Build the cache key from a normalized query + intent + scope fingerprint.
    #[must_use]
    pub fn key(normalized_query: &str, intent: &str, scope_fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized_query.as_bytes());
        hasher.update(b"|");
        hasher.update(intent.as_bytes());
        hasher.update(b"|");
        hasher.update(scope_fingerprint.as_bytes());
        let digest = hasher.finalize();
        let mut s = String::with_capacity(digest.len() * 2);
        for b in digest {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }

    /// Return the cached bundle signature for `key`, if present and not
    /// expired, bumping its recency.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = now_secs();
        let mut entry = self.entries.get_mut(key)?;
        if now.saturating_sub(entry.stored_at_secs) > self.ttl.as_secs() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.touch(now);
        Some(entry.bundle_signature.clone())
    }

    pub fn put(&self, key: String, bundle_signature: String) {
        let now = now_secs();
        self.entries.insert(key, CacheEntry { bundle_signature, stored_at_secs: now, last_used_secs: now });
        self.evict_if_over_capacity();
    }

    /// Invalidate every cached signature — called when a file's content
    /// hash changes, the embedder identity changes, or the packing profile
    /// version bumps, since any of those can change what a bundle contains
    /// for an otherwise-identical key.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_over_capacity(&self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let mut by_recency: Vec<(String, u64)> =
            self.entries.iter().map(|e| (e.key().clone(), e.value().last_used_secs)).collect();
        by_recency.sort_by_key(|(_, last_used)| *last_used);
        let overflow = self.entries.len() - self.max_entries;
        for (key, _) in by_recency.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Record a completed retrieval as an `Interaction` row, generating a fresh
/// id/correlation id if the caller didn't already establish one (e.g. the
/// CLI's `--correlation-id` flag).
pub fn record(
    storage: &Storage,
    query: &str,
    intent: &str,
    bundle_signature: &str,
    tokens_used: usize,
    correlation_id: Option<String>,
) -> Result<Interaction> {
    let interaction = Interaction {
        id: Uuid::new_v4().to_string(),
        query: query.to_string(),
        intent: intent.to_string(),
        bundle_signature: bundle_signature.to_string(),
        tokens_used,
        satisfied: None,
        time_to_fix_ms: None,
        timestamp: now_secs() as i64,
        correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
    };
    storage.record_interaction(&interaction)?;
    Ok(interaction)
}

/// Update an existing interaction with an outcome — `pampax learn-report`'s
/// entry point, letting a caller mark whether the bundle it received
/// actually resolved the task and how long that took.
pub fn report_outcome(storage: &Storage, interaction_id: &str, satisfied: bool, time_to_fix_ms: Option<u64>) -> Result<()> {
    let since_epoch = 0;
    let recent = storage.find_recent_interactions(since_epoch, 10_000)?;
    if let Some(mut interaction) = recent.into_iter().find(|i| i.id == interaction_id) {
        interaction.satisfied = Some(satisfied);
        interaction.time_to_fix_ms = time_to_fix_ms.or(interaction.time_to_fix_ms);
        storage.record_interaction(&interaction)?;
    }
    Ok(())
}

/// Normalize a query for cache-key purposes: lowercase, collapsed whitespace.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Read-only summary over recorded interactions — counts and satisfaction
/// rates, not the weight-optimization math that lives outside this crate.
/// `pampax analytics` surfaces this; it does not write anything back to
/// policy.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalyticsSummary {
    pub total_interactions: usize,
    pub satisfied: usize,
    pub unsatisfied: usize,
    pub unreported: usize,
    pub satisfaction_rate: Option<f64>,
    pub avg_tokens_used: f64,
    pub avg_time_to_fix_ms: Option<f64>,
    pub by_intent: Vec<IntentCount>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IntentCount {
    pub intent: String,
    pub count: usize,
}

pub fn analytics_summary(storage: &Storage, since: i64) -> Result<AnalyticsSummary> {
    let interactions = storage.find_recent_interactions(since, 100_000)?;
    let total_interactions = interactions.len();
    let satisfied = interactions.iter().filter(|i| i.satisfied == Some(true)).count();
    let unsatisfied = interactions.iter().filter(|i| i.satisfied == Some(false)).count();
    let unreported = total_interactions - satisfied - unsatisfied;
    let satisfaction_rate =
        (satisfied + unsatisfied > 0).then(|| satisfied as f64 / (satisfied + unsatisfied) as f64);
    let avg_tokens_used = if total_interactions == 0 {
        0.0
    } else {
        interactions.iter().map(|i| i.tokens_used as f64).sum::<f64>() / total_interactions as f64
    };
    let fix_times: Vec<f64> = interactions.iter().filter_map(|i| i.time_to_fix_ms.map(|t| t as f64)).collect();
    let avg_time_to_fix_ms = (!fix_times.is_empty()).then(|| fix_times.iter().sum::<f64>() / fix_times.len() as f64);

    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for i in &interactions {
        *counts.entry(i.intent.clone()).or_default() += 1;
    }
    let by_intent = counts.into_iter().map(|(intent, count)| IntentCount { intent, count }).collect();

    Ok(AnalyticsSummary {
        total_interactions,
        satisfied,
        unsatisfied,
        unreported,
        satisfaction_rate,
        avg_tokens_used,
        avg_time_to_fix_ms,
        by_intent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SignatureCache {
        SignatureCache::new(&CacheConfig { ttl_days: 7, max_entries: 3 })
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = cache();
        let key = SignatureCache::key("parse file", "symbol", "repo:main");
        cache.put(key.clone(), "sig123".into());
        assert_eq!(cache.get(&key), Some("sig123".to_string()));
    }

    #[test]
    fn eviction_drops_least_recently_used_past_capacity() {
        let cache = cache();
        cache.put("a".into(), "sig-a".into());
        cache.put("b".into(), "sig-b".into());
        cache.put("c".into(), "sig-c".into());
        cache.put("d".into(), "sig-d".into());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn invalidate_all_clears_every_entry() {
        let cache = cache();
        cache.put("a".into(), "sig-a".into());
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn normalize_query_collapses_whitespace_and_case() {
        assert_eq!(normalize_query("  Parse   FileAst "), "parse fileast");
    }

    #[test]
    fn analytics_summary_computes_satisfaction_rate_and_intent_counts() {
        let storage = Storage::open_in_memory().unwrap();
        let mut a = record(&storage, "find auth", "symbol", "sig-a", 500, None).unwrap();
        a.satisfied = Some(true);
        storage.record_interaction(&a).unwrap();
        let mut b = record(&storage, "port config", "config", "sig-b", 300, None).unwrap();
        b.satisfied = Some(false);
        storage.record_interaction(&b).unwrap();
        let _unreported = record(&storage, "auth flow", "symbol", "sig-c", 400, None).unwrap();

        let summary = analytics_summary(&storage, 0).unwrap();
        assert_eq!(summary.total_interactions, 3);
        assert_eq!(summary.satisfied, 1);
        assert_eq!(summary.unsatisfied, 1);
        assert_eq!(summary.unreported, 1);
        assert_eq!(summary.satisfaction_rate, Some(0.5));
        assert_eq!(summary.by_intent.iter().find(|i| i.intent == "symbol").map(|i| i.count), Some(2));
    }
}

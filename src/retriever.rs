//! Hybrid retrieval: four seed streams fused by reciprocal rank, with an
//! optional reranking pass.
//!
//! Grounded in `fuzzy.rs` for the symbol stream and in `storage.rs` for the
//! vector/lexical/memory streams. Each stream is independent and its
//! failure is recorded, not propagated — a degraded stream becomes an
//! empty result set plus a flag.

use std::collections::HashMap;

use crate::embedder::Embedder;
use crate::error::Result;
use crate::fuzzy::fuzzy_rank;
use crate::policy::{RetrievalPolicy, SYMBOL_BOOST};
use crate::reranker::{Reranker, RERANKER_MAX_TOKENS, RERANK_MAX_CANDIDATES};
use crate::storage::Storage;
use crate::types::{EmbedderIdentity, ScopeFilters};

/// Reciprocal-rank-fusion constant, fixed at the standard RRF default from
/// the original TREC fusion literature rather than exposed as a tunable —
/// changing it would silently reweight every stored interaction's learned
/// seed weights.
const RRF_K: f64 = 60.0;

/// Width of the top-N window compared across streams when checking
/// convergence; the overlap ratio required to call it "converged" is the
/// per-intent `RetrievalPolicy::early_stop_threshold`.
const STREAM_OVERLAP_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    Vector,
    Bm25,
    Memory,
    Symbol,
}

#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub fused_score: f64,
    pub sources: Vec<SeedSource>,
    pub rerank_score: Option<f32>,
}

#[derive(Debug, Default)]
pub struct RetrievalReport {
    pub degraded_streams: Vec<SeedSource>,
    pub early_stopped: bool,
    pub reranked: bool,
}

pub struct RetrievalResult {
    pub items: Vec<RankedChunk>,
    pub report: RetrievalReport,
}

/// Run the four seed streams, fuse with weighted RRF, apply the symbol
/// boost, optionally rerank, and return the top `limit` candidates.
pub async fn retrieve(
    storage: &Storage,
    embedder: Option<&dyn Embedder>,
    reranker: Option<&dyn Reranker>,
    query: &str,
    symbol_entity: Option<&str>,
    policy: &RetrievalPolicy,
    filters: &ScopeFilters,
    limit: usize,
) -> Result<RetrievalResult> {
    let mut report = RetrievalReport::default();
    let fetch_n = (limit * 4).max(40);

    let bm25_ranked = match storage.fts_search(query, filters, fetch_n, 0) {
        Ok(hits) => hits.into_iter().map(|h| h.chunk_id).collect::<Vec<_>>(),
        Err(_) => {
            report.degraded_streams.push(SeedSource::Bm25);
            Vec::new()
        }
    };

    let vector_ranked = if let Some(embedder) = embedder {
        match embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => {
                let qv = vectors.remove(0);
                match storage.vector_search(&qv, embedder.identity(), filters, fetch_n) {
                    Ok(hits) => hits.into_iter().map(|h| h.chunk_id).collect::<Vec<_>>(),
                    Err(_) => {
                        report.degraded_streams.push(SeedSource::Vector);
                        Vec::new()
                    }
                }
            }
            _ => {
                report.degraded_streams.push(SeedSource::Vector);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let memory_ranked = match storage.find_memories(None, None, None, now_unix(), fetch_n) {
        Ok(memories) => memories
            .into_iter()
            .filter(|m| m.value.to_lowercase().contains(&query.to_lowercase()))
            .map(|m| m.id)
            .collect::<Vec<_>>(),
        Err(_) => {
            report.degraded_streams.push(SeedSource::Memory);
            Vec::new()
        }
    };

    let symbol_ranked = if policy.include_symbols {
        match storage.all_span_names() {
            Ok(spans) => {
                let names: Vec<&str> = spans.iter().map(|(_, n)| n.as_str()).collect();
                let ranked = fuzzy_rank(query, &names);
                ranked
                    .into_iter()
                    .filter_map(|(i, _)| spans.get(i).map(|(id, _)| id.clone()))
                    .filter_map(|span_id| storage.get_chunk_for_span(&span_id).ok().flatten())
                    .map(|c| c.id)
                    .take(fetch_n)
                    .collect::<Vec<_>>()
            }
            Err(_) => {
                report.degraded_streams.push(SeedSource::Symbol);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    report.early_stopped = streams_converged(
        &[&bm25_ranked, &vector_ranked, &memory_ranked, &symbol_ranked],
        policy.early_stop_threshold,
    );

    let mut fused = fuse(&[
        (SeedSource::Vector, &vector_ranked, policy.seed_weights.vector),
        (SeedSource::Bm25, &bm25_ranked, policy.seed_weights.bm25),
        (SeedSource::Memory, &memory_ranked, policy.seed_weights.memory),
        (SeedSource::Symbol, &symbol_ranked, policy.seed_weights.symbol),
    ]);

    if let Some(entity) = symbol_entity {
        apply_symbol_boost(&mut fused, storage, entity);
    }

    fused.sort_by(|a, b| b.fused_score.partial_cmp(&a.fused_score).unwrap_or(std::cmp::Ordering::Equal));

    if let Some(reranker) = reranker {
        if reranker.name() != "off" {
            rerank_top(storage, reranker, query, &mut fused).await?;
            report.reranked = true;
        }
    }

    fused.truncate(limit);
    Ok(RetrievalResult { items: fused, report })
}

/// Weighted reciprocal rank fusion: `score(d) = sum_over_streams(weight / (k + rank(d)))`.
fn fuse(streams: &[(SeedSource, &Vec<String>, f64)]) -> Vec<RankedChunk> {
    let mut scores: HashMap<String, (f64, Vec<SeedSource>)> = HashMap::new();
    for (source, ids, weight) in streams {
        if *weight <= 0.0 {
            continue;
        }
        for (rank, id) in ids.iter().enumerate() {
            let entry = scores.entry(id.clone()).or_insert((0.0, Vec::new()));
            entry.0 += weight / (RRF_K + rank as f64 + 1.0);
            if !entry.1.contains(source) {
                entry.1.push(*source);
            }
        }
    }
    scores
        .into_iter()
        .map(|(chunk_id, (fused_score, sources))| RankedChunk { chunk_id, fused_score, sources, rerank_score: None })
        .collect()
}

/// Two streams "converge" once their top-window id sets overlap at least
/// `threshold` — the per-intent `RetrievalPolicy::early_stop_threshold`,
/// so an incident query (which wants broad recall) converges less eagerly
/// than a symbol lookup (which wants to stop as soon as streams agree).
fn streams_converged(streams: &[&Vec<String>], threshold: f64) -> bool {
    let nonempty: Vec<&Vec<String>> = streams.iter().filter(|s| !s.is_empty()).copied().collect();
    if nonempty.len() < 2 {
        return false;
    }
    let mut converged_pairs = 0;
    for i in 0..nonempty.len() {
        for j in (i + 1)..nonempty.len() {
            let a: std::collections::HashSet<&str> =
                nonempty[i].iter().take(STREAM_OVERLAP_WINDOW).map(String::as_str).collect();
            let b: std::collections::HashSet<&str> =
                nonempty[j].iter().take(STREAM_OVERLAP_WINDOW).map(String::as_str).collect();
            if a.is_empty() || b.is_empty() {
                continue;
            }
            let overlap = a.intersection(&b).count();
            let ratio = overlap as f64 / a.len().min(b.len()) as f64;
            if ratio >= threshold {
                converged_pairs += 1;
            }
        }
    }
    converged_pairs >= 1
}

/// Boost chunks whose span name matches `entity` exactly (case-insensitive).
fn apply_symbol_boost(fused: &mut [RankedChunk], storage: &Storage, entity: &str) {
    let Ok(spans) = storage.all_span_names() else { return };
    let matching_span_ids: std::collections::HashSet<String> = spans
        .into_iter()
        .filter(|(_, name)| name.eq_ignore_ascii_case(entity))
        .map(|(id, _)| id)
        .collect();
    if matching_span_ids.is_empty() {
        return;
    }
    for item in fused.iter_mut() {
        if let Ok(Some(chunk)) = storage.get_chunk(&item.chunk_id) {
            if chunk.span_id.as_deref().is_some_and(|id| matching_span_ids.contains(id)) {
                item.fused_score *= SYMBOL_BOOST;
            }
        }
    }
}

async fn rerank_top(storage: &Storage, reranker: &dyn Reranker, query: &str, fused: &mut [RankedChunk]) -> Result<()> {
    let top_n = fused.len().min(RERANK_MAX_CANDIDATES);
    if top_n == 0 {
        return Ok(());
    }
    let mut bodies = Vec::with_capacity(top_n);
    for item in fused.iter().take(top_n) {
        let body = storage.get_chunk(&item.chunk_id)?.map(|c| c.body).unwrap_or_default();
        bodies.push(truncate_tokens(&body, RERANKER_MAX_TOKENS));
    }
    let scores = match reranker.rerank(query, &bodies).await {
        Ok(s) => s,
        Err(_) => return Ok(()), // degrade silently: keep fusion order
    };
    for (item, score) in fused.iter_mut().take(top_n).zip(scores) {
        item.rerank_score = Some(score);
    }
    fused[..top_n].sort_by(|a, b| {
        b.rerank_score.unwrap_or(0.0).partial_cmp(&a.rerank_score.unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(())
}

fn truncate_tokens(body: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Helper used by `indexer.rs`/`main.rs` to build an `EmbedderIdentity` key
/// for the currently configured model without duplicating the format string.
#[must_use]
pub fn identity_key(identity: &EmbedderIdentity) -> String {
    identity.key()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_favors_items_ranked_high_in_multiple_streams() {
        let vector = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let bm25 = vec!["b".to_string(), "a".to_string(), "d".to_string()];
        let fused = fuse(&[
            (SeedSource::Vector, &vector, 1.0),
            (SeedSource::Bm25, &bm25, 1.0),
        ]);
        let top = fused.iter().max_by(|a, b| a.fused_score.partial_cmp(&b.fused_score).unwrap()).unwrap();
        assert!(top.chunk_id == "a" || top.chunk_id == "b");
    }

    #[test]
    fn zero_weight_stream_contributes_nothing() {
        let vector = vec!["a".to_string()];
        let fused = fuse(&[(SeedSource::Vector, &vector, 0.0)]);
        assert!(fused.is_empty());
    }

    #[test]
    fn streams_converge_when_top_results_overlap_heavily() {
        let a = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let b = vec!["x".to_string(), "y".to_string(), "w".to_string()];
        assert!(streams_converged(&[&a, &b], 0.60));
    }

    #[test]
    fn streams_do_not_converge_when_disjoint() {
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["p".to_string(), "q".to_string()];
        assert!(!streams_converged(&[&a, &b], 0.60));
    }

    #[test]
    fn higher_threshold_requires_tighter_overlap() {
        let a = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let b = vec!["x".to_string(), "y".to_string(), "w".to_string()];
        assert!(!streams_converged(&[&a, &b], 0.95));
    }
}

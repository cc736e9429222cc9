//! Context Assembler: turns a ranked candidate list into a token-budgeted
//! `Bundle`.
//!
//! The tiered, water-fill style budget walk admits candidates tier by
//! tier against a per-tier share, pruning or capsule-summarizing once a
//! tier's share is spent, with a safety valve for when nothing fits.
//! Capsule generation (signature + a few lines instead of the full body)
//! reduces an admitted chunk to a summary instead of dropping it outright.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::graph::{self, EdgeSource, TraversalStrategy};
use crate::retriever::{RankedChunk, SeedSource};
use crate::storage::Storage;
use crate::token_model::{AdmissionTier, CapsuleStrategy, PackingProfile, TokenModel};
use crate::types::{Chunk, Memory, PriorityClass};

/// Hard ceiling on graph-neighbor expansion, matching `graph::DEFAULT_NODE_CAP`.
const NODE_CAP: usize = graph::DEFAULT_NODE_CAP;
/// Reserve this fraction of the total budget for attached memories, taken
/// off the top before the tier walk.
const MEMORY_BUDGET_SHARE: f64 = 0.05;
const MAX_MEMORIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Full,
    Capsule,
}

#[derive(Debug, Clone)]
pub struct BundleItem {
    pub chunk_id: String,
    pub path: String,
    /// Content-type class the chunk was mined as (code/tests/docs/...).
    pub content_tier: PriorityClass,
    /// Budget-allocation tier the hit was classified into (spec §4.9 step 1).
    pub admission_tier: AdmissionTier,
    pub admission: Admission,
    pub tokens: usize,
    pub score: f64,
    pub sources: Vec<SeedSource>,
    pub via_graph: bool,
}

/// Ordered by priority — the first applicable reason wins, so a bundle
/// that both exhausted its budget and hit the early-stop threshold reports
/// `BudgetExhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingReason {
    BudgetExhausted,
    EarlyStopThresholdMet,
    NoMoreCandidates,
    DepthExhausted,
    DuplicateConvergence,
    RerankerStable,
    Cancelled,
}

pub struct Bundle {
    pub items: Vec<BundleItem>,
    pub memories: Vec<Memory>,
    pub total_tokens: usize,
    pub stopping_reason: StoppingReason,
    pub signature: String,
}

pub struct AssembleOptions {
    pub total_budget: usize,
    pub early_stopped_at_retrieval: bool,
    pub traversal_strategy: TraversalStrategy,
    pub max_depth: usize,
}

/// Walk `ranked` candidates tier-by-tier against `profile`'s per-tier
/// budget shares, expand via the edge graph, attach memories, and emit a
/// `Bundle` with its evidence trail and stopping reason.
pub fn assemble(
    storage: &Storage,
    token_model: &TokenModel,
    profile: &PackingProfile,
    ranked: &[RankedChunk],
    memories: &[Memory],
    options: &AssembleOptions,
) -> Result<Bundle> {
    let mut items = Vec::new();
    let mut consumed_by_admission_tier: HashMap<AdmissionTier, usize> = HashMap::new();
    let mut total_consumed = 0usize;
    let mut seen_chunk_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut admitted_spans: Vec<String> = Vec::new();

    let memory_budget = (options.total_budget as f64 * MEMORY_BUDGET_SHARE).floor() as usize;
    let content_budget = options.total_budget.saturating_sub(memory_budget);
    // `reserve` is carved out of content_budget up front and only spent on
    // tail items once every admission tier's primary walk is done.
    let reserve_budget = profile.reserve_budget(content_budget);
    let primary_budget = content_budget.saturating_sub(reserve_budget);

    // Classify step (spec §4.9 step 1): fetch every candidate's chunk once,
    // weight its fused rank by the chunk's content-type priority, then rank
    // by that weighted score to bucket each hit into an admission tier.
    // The walk itself still proceeds in fusion order (step 2); the tier only
    // decides which budget it's checked against.
    let mut candidates: Vec<(&RankedChunk, Chunk)> = Vec::with_capacity(ranked.len());
    for candidate in ranked {
        if let Some(chunk) = storage.get_chunk(&candidate.chunk_id)? {
            candidates.push((candidate, chunk));
        }
    }
    let mut weighted_order: Vec<usize> = (0..candidates.len()).collect();
    weighted_order.sort_by(|&a, &b| {
        let wa = candidates[a].0.fused_score * profile.priority_weight(candidates[a].1.priority);
        let wb = candidates[b].0.fused_score * profile.priority_weight(candidates[b].1.priority);
        wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut admission_tier_of: HashMap<String, AdmissionTier> = HashMap::new();
    for (rank, &idx) in weighted_order.iter().enumerate() {
        let tier = AdmissionTier::for_rank(rank, candidates.len());
        admission_tier_of.insert(candidates[idx].1.id.clone(), tier);
    }

    let mut stopping_reason = StoppingReason::NoMoreCandidates;
    let mut exhausted = false;

    for (candidate, chunk) in &candidates {
        if !seen_chunk_ids.insert(chunk.id.clone()) {
            continue;
        }

        let admission_tier = admission_tier_of.get(&chunk.id).copied().unwrap_or(AdmissionTier::Optional);
        let tier_budget = profile.tier_budget(primary_budget, admission_tier);
        let used = *consumed_by_admission_tier.get(&admission_tier).unwrap_or(&0);
        let full_tokens = token_model.count_tokens(&chunk.body);

        if used + full_tokens <= tier_budget && total_consumed + full_tokens <= primary_budget {
            total_consumed += full_tokens;
            consumed_by_admission_tier.insert(admission_tier, used + full_tokens);
            if let Some(span_id) = chunk.span_id.clone() {
                admitted_spans.push(span_id);
            }
            items.push(BundleItem {
                chunk_id: chunk.id.clone(),
                path: chunk.path.clone(),
                content_tier: chunk.priority,
                admission_tier,
                admission: Admission::Full,
                tokens: full_tokens,
                score: candidate.fused_score,
                sources: candidate.sources.clone(),
                via_graph: false,
            });
            continue;
        }

        match profile.capsule_strategy(chunk.priority) {
            CapsuleStrategy::None => {}
            strategy => {
                let capsule_text = build_capsule(&chunk.body, chunk.path.as_str(), strategy);
                let capsule_tokens = token_model.count_tokens(&capsule_text);
                if used + capsule_tokens <= tier_budget && total_consumed + capsule_tokens <= primary_budget {
                    total_consumed += capsule_tokens;
                    consumed_by_admission_tier.insert(admission_tier, used + capsule_tokens);
                    items.push(BundleItem {
                        chunk_id: chunk.id.clone(),
                        path: chunk.path.clone(),
                        content_tier: chunk.priority,
                        admission_tier,
                        admission: Admission::Capsule,
                        tokens: capsule_tokens,
                        score: candidate.fused_score,
                        sources: candidate.sources.clone(),
                        via_graph: false,
                    });
                    continue;
                }
            }
        }

        if total_consumed >= primary_budget {
            exhausted = true;
            stopping_reason = StoppingReason::BudgetExhausted;
            break;
        }
    }

    // Tail pass: spend the held-back reserve on whatever the primary walk
    // couldn't fit, lowest-content-weight-first capsule admission only —
    // reserve exists for "tail items," not a second full-body pass.
    if !exhausted {
        let mut remaining_reserve = reserve_budget;
        for (candidate, chunk) in &candidates {
            if remaining_reserve == 0 {
                break;
            }
            if !seen_chunk_ids.insert(chunk.id.clone()) {
                continue;
            }
            let strategy = profile.capsule_strategy(chunk.priority);
            if strategy == CapsuleStrategy::None {
                continue;
            }
            let capsule_text = build_capsule(&chunk.body, chunk.path.as_str(), strategy);
            let capsule_tokens = token_model.count_tokens(&capsule_text);
            if capsule_tokens > remaining_reserve {
                continue;
            }
            remaining_reserve -= capsule_tokens;
            total_consumed += capsule_tokens;
            items.push(BundleItem {
                chunk_id: chunk.id.clone(),
                path: chunk.path.clone(),
                content_tier: chunk.priority,
                admission_tier: admission_tier_of.get(&chunk.id).copied().unwrap_or(AdmissionTier::Optional),
                admission: Admission::Capsule,
                tokens: capsule_tokens,
                score: candidate.fused_score,
                sources: candidate.sources.clone(),
                via_graph: false,
            });
        }
    }

    if !exhausted && options.early_stopped_at_retrieval {
        stopping_reason = StoppingReason::EarlyStopThresholdMet;
    }

    // Graph expansion from admitted spans, respecting whatever budget remains.
    if !exhausted && !admitted_spans.is_empty() && total_consumed < content_budget {
        let remaining = content_budget - total_consumed;
        let token_model_ref = token_model;
        let traversal = graph::traverse(
            storage as &dyn EdgeSource,
            &admitted_spans,
            options.max_depth,
            NODE_CAP,
            Some(remaining),
            |span_id| {
                storage
                    .get_chunk_for_span(span_id)
                    .ok()
                    .flatten()
                    .map(|c| token_model_ref.count_tokens(&c.body))
                    .unwrap_or(0)
            },
            options.traversal_strategy,
        );

        for node in &traversal.nodes {
            let Ok(Some(chunk)) = storage.get_chunk_for_span(&node.span_id) else { continue };
            if !seen_chunk_ids.insert(chunk.id.clone()) {
                continue;
            }
            let tokens = token_model.count_tokens(&chunk.body);
            if total_consumed + tokens > content_budget {
                continue;
            }
            total_consumed += tokens;
            items.push(BundleItem {
                chunk_id: chunk.id.clone(),
                path: chunk.path,
                content_tier: chunk.priority,
                admission_tier: AdmissionTier::Important,
                admission: Admission::Full,
                tokens,
                score: 0.0,
                sources: Vec::new(),
                via_graph: true,
            });
        }

        if traversal.truncated && stopping_reason == StoppingReason::NoMoreCandidates {
            stopping_reason = StoppingReason::DepthExhausted;
        }
    }

    let attached_memories: Vec<Memory> = memories.iter().take(MAX_MEMORIES).cloned().collect();

    let signature = bundle_signature(&items);

    Ok(Bundle { items, memories: attached_memories, total_tokens: total_consumed, stopping_reason, signature })
}

/// Build a capsule: a signature line (if the body starts with one,
/// recovered heuristically from the first line) plus a short excerpt, or
/// just a one-line manifest entry for `ManifestLine` tiers.
fn build_capsule(body: &str, path: &str, strategy: CapsuleStrategy) -> String {
    match strategy {
        CapsuleStrategy::ManifestLine => format!("// {path}\n"),
        CapsuleStrategy::SignatureAndDoc => {
            let mut lines = body.lines();
            let first = lines.next().unwrap_or("");
            let second = lines.next().unwrap_or("");
            if second.trim().is_empty() {
                format!("{first}\n")
            } else {
                format!("{first}\n{second}\n")
            }
        }
        CapsuleStrategy::None => String::new(),
    }
}

/// Stable identifier for a bundle's content: the sorted chunk id list,
/// hashed. Used by `interaction.rs` to detect whether re-running the same
/// query against an unchanged index would produce an identical bundle.
fn bundle_signature(items: &[BundleItem]) -> String {
    let mut ids: Vec<&str> = items.iter().map(|i| i.chunk_id.as_str()).collect();
    ids.sort_unstable();
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b",");
    }
    let digest = hasher.finalize();
    let mut s = String::with_capacity(digest.len() * 2);
    for b in digest {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::SeedSource;
    use crate::types::PriorityClass;

    fn store_chunk(storage: &Storage, id: &str, body: &str, priority: PriorityClass) {
        let file_id = storage
            .upsert_file(&format!("{id}.rs"), "hash", "rust", body.len() as u64, 0, 1024 * 1024)
            .unwrap();
        storage
            .store_chunk(&Chunk {
                id: id.to_string(),
                file_id,
                path: format!("{id}.rs"),
                span_id: None,
                body: body.to_string(),
                lang: "rust".into(),
                tags: vec![],
                priority,
                byte_start: 0,
                byte_end: body.len(),
                encoding_lossy: false,
                is_continuation: false,
            })
            .unwrap();
    }

    #[test]
    fn admits_full_chunk_within_tier_budget() {
        let storage = Storage::open_in_memory().unwrap();
        store_chunk(&storage, "c1", "fn small() {}", PriorityClass::Code);
        let ranked = vec![RankedChunk { chunk_id: "c1".into(), fused_score: 1.0, sources: vec![SeedSource::Bm25], rerank_score: None }];
        let token_model = TokenModel::for_model("claude-3-5-sonnet");
        let profile = PackingProfile::for_repo_model("repo", "claude-3-5-sonnet");
        let options = AssembleOptions {
            total_budget: 10_000,
            early_stopped_at_retrieval: false,
            traversal_strategy: TraversalStrategy::QualityFirst,
            max_depth: 2,
        };
        let bundle = assemble(&storage, &token_model, &profile, &ranked, &[], &options).unwrap();
        assert_eq!(bundle.items.len(), 1);
        assert_eq!(bundle.items[0].admission, Admission::Full);
    }

    #[test]
    fn reports_budget_exhausted_when_nothing_more_fits() {
        let storage = Storage::open_in_memory().unwrap();
        let big_body = "x".repeat(5000);
        store_chunk(&storage, "c1", &big_body, PriorityClass::Code);
        store_chunk(&storage, "c2", &big_body, PriorityClass::Code);
        let ranked = vec![
            RankedChunk { chunk_id: "c1".into(), fused_score: 2.0, sources: vec![SeedSource::Bm25], rerank_score: None },
            RankedChunk { chunk_id: "c2".into(), fused_score: 1.0, sources: vec![SeedSource::Bm25], rerank_score: None },
        ];
        let token_model = TokenModel::for_model("claude-3-5-sonnet");
        let profile = PackingProfile::for_repo_model("repo", "claude-3-5-sonnet");
        let options = AssembleOptions {
            total_budget: 600,
            early_stopped_at_retrieval: false,
            traversal_strategy: TraversalStrategy::QualityFirst,
            max_depth: 1,
        };
        let bundle = assemble(&storage, &token_model, &profile, &ranked, &[], &options).unwrap();
        assert_eq!(bundle.stopping_reason, StoppingReason::BudgetExhausted);
    }

    #[test]
    fn bundle_signature_is_order_independent() {
        let items_a =
            vec![bundle_item("a"), bundle_item("b")];
        let items_b = vec![bundle_item("b"), bundle_item("a")];
        assert_eq!(bundle_signature(&items_a), bundle_signature(&items_b));
    }

    fn bundle_item(id: &str) -> BundleItem {
        BundleItem {
            chunk_id: id.to_string(),
            path: "x.rs".into(),
            content_tier: PriorityClass::Code,
            admission_tier: AdmissionTier::MustHave,
            admission: Admission::Full,
            tokens: 10,
            score: 1.0,
            sources: vec![],
            via_graph: false,
        }
    }

    #[test]
    fn reserve_budget_is_untouched_by_the_primary_walk() {
        let storage = Storage::open_in_memory().unwrap();
        store_chunk(&storage, "c1", "fn tiny() {}", PriorityClass::Code);
        let ranked = vec![RankedChunk { chunk_id: "c1".into(), fused_score: 1.0, sources: vec![SeedSource::Bm25], rerank_score: None }];
        let token_model = TokenModel::for_model("claude-3-5-sonnet");
        let profile = PackingProfile::for_repo_model("repo", "claude-3-5-sonnet");
        let options = AssembleOptions {
            total_budget: 10_000,
            early_stopped_at_retrieval: false,
            traversal_strategy: TraversalStrategy::QualityFirst,
            max_depth: 0,
        };
        let bundle = assemble(&storage, &token_model, &profile, &ranked, &[], &options).unwrap();
        // a single tiny candidate admits fully from the must_have tier share
        // without ever touching the reserve share.
        assert!(bundle.total_tokens < profile.reserve_budget(10_000) + profile.tier_budget(10_000, AdmissionTier::MustHave));
    }
}

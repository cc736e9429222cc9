//! Property-based coverage for the two invariants spec'd as proptest
//! candidates: chunk id determinism and assembly budget monotonicity.
//! See `chunker::span_id_for` and `assembler::assemble`.

use pampax::assembler::{self, AssembleOptions};
use pampax::chunker;
use pampax::graph::TraversalStrategy;
use pampax::retriever::{RankedChunk, SeedSource};
use pampax::storage::Storage;
use pampax::token_model::{PackingProfile, TokenModel};
use pampax::types::{Chunk, PriorityClass};
use proptest::prelude::*;

fn store_chunk(storage: &Storage, id: &str, body: &str) {
    let file_id = storage.upsert_file(&format!("{id}.rs"), "hash", "rust", body.len() as u64, 0, 1024 * 1024).unwrap();
    storage
        .store_chunk(&Chunk {
            id: id.to_string(),
            file_id,
            path: format!("{id}.rs"),
            span_id: None,
            body: body.to_string(),
            lang: "rust".into(),
            tags: vec![],
            priority: PriorityClass::Code,
            byte_start: 0,
            byte_end: body.len(),
            encoding_lossy: false,
            is_continuation: false,
        })
        .unwrap();
}

prop_compose! {
    fn arb_path()(segment in "[a-z][a-z0-9_]{0,12}") -> String {
        format!("src/{segment}.rs")
    }
}

prop_compose! {
    fn arb_body()(line_count in 1usize..20, width in 1usize..40) -> String {
        (0..line_count).map(|i| format!("let v{i} = {};", "x".repeat(width))).collect::<Vec<_>>().join("\n")
    }
}

proptest! {
    /// `chunk_file` hashes `(path, byteStart, byteEnd, body)` into a content
    /// address; the same inputs must always produce the same chunk ids,
    /// whichever of the AST or line-window path chunked them.
    #[test]
    fn chunk_id_is_a_pure_function_of_its_inputs(path in arb_path(), body in arb_body()) {
        let first = chunker::chunk_file(1, &path, &body, "rs", "rust");
        let second = chunker::chunk_file(1, &path, &body, "rs", "rust");
        prop_assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            prop_assert_eq!(&a.chunk.id, &b.chunk.id);
            prop_assert_eq!(&a.span.id, &b.span.id);
        }
    }

    /// Changing a single byte of the body must not collide with the
    /// original id -- the hash covers the body, not just the byte range.
    #[test]
    fn chunk_id_changes_when_body_changes(path in arb_path(), body in arb_body()) {
        let original = chunker::chunk_file(1, &path, &body, "rs", "rust");
        let mutated_body = format!("{body}\n// changed");
        let mutated = chunker::chunk_file(1, &path, &mutated_body, "rs", "rust");
        prop_assume!(!original.is_empty() && !mutated.is_empty());
        prop_assert_ne!(&original[0].chunk.id, &mutated[0].chunk.id);
    }
}

prop_compose! {
    fn arb_budget()(budget in 200usize..20_000) -> usize {
        budget
    }
}

prop_compose! {
    fn arb_chunk_count()(n in 1usize..15) -> usize {
        n
    }
}

proptest! {
    /// At every admitted item the running total must stay within the
    /// content budget (total minus the memory share), and the final bundle
    /// must never exceed content_budget + the tier walk's own bookkeeping --
    /// i.e. assembly never reports more tokens spent than it was given.
    #[test]
    fn assembly_never_exceeds_its_budget(total_budget in arb_budget(), chunk_count in arb_chunk_count()) {
        let storage = Storage::open_in_memory().unwrap();
        let mut ranked = Vec::new();
        for i in 0..chunk_count {
            let id = format!("c{i}");
            let body = format!("fn f{i}() {{ {} }}", "a".repeat(50 + i * 17));
            store_chunk(&storage, &id, &body);
            ranked.push(RankedChunk {
                chunk_id: id,
                fused_score: 1.0 / (i as f64 + 1.0),
                sources: vec![SeedSource::Bm25],
                rerank_score: None,
            });
        }
        let token_model = TokenModel::for_model("claude-3-5-sonnet");
        let profile = PackingProfile::for_repo_model("repo", "claude-3-5-sonnet");
        let options = AssembleOptions {
            total_budget,
            early_stopped_at_retrieval: false,
            traversal_strategy: TraversalStrategy::QualityFirst,
            max_depth: 1,
        };
        let bundle = assembler::assemble(&storage, &token_model, &profile, &ranked, &[], &options).unwrap();
        prop_assert!(bundle.total_tokens <= total_budget);
    }
}

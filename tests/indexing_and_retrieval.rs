//! End-to-end coverage over the fixture project in `tests/fixtures/basic`:
//! index → search → assemble, idempotent re-indexing, and the signature
//! cache's hit/miss behavior across a file change.

#[path = "helpers/fixtures.rs"]
mod fixtures;

use std::path::Path;

use pampax::assembler::AssembleOptions;
use pampax::engine::PampaxEngine;
use pampax::graph::TraversalStrategy;
use pampax::interaction::{normalize_query, SignatureCache};
use pampax::token_model::{PackingProfile, TokenModel};
use pampax::types::ScopeFilters;

fn open_fixture_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fixtures::copy_dir_recursive(&Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/basic"), dir.path());
    dir
}

#[tokio::test]
async fn index_then_search_finds_the_fixture_s_greet_function() {
    let repo = open_fixture_repo();
    let engine = PampaxEngine::open(repo.path()).unwrap();

    let report = engine.index(false, Vec::new(), Vec::new(), "test-correlation").await.unwrap();
    assert!(report.files_indexed > 0, "expected at least one file indexed");
    assert!(report.chunks_created > 0, "expected chunks to be created from the fixture sources");

    let classification = engine.classify("greet", None);
    let policy = engine.policy_for(classification.intent);
    let filters = ScopeFilters::default();
    let result = engine.search("greet", Some("greet"), &policy, &filters, 10, false, "test-correlation").await.unwrap();

    assert!(
        result.items.iter().any(|item| {
            engine
                .storage
                .get_chunk(&item.chunk_id)
                .ok()
                .flatten()
                .map(|c| c.body.contains("greet"))
                .unwrap_or(false)
        }),
        "expected a hit whose body mentions greet"
    );
}

#[tokio::test]
async fn reindexing_an_unchanged_repo_reports_no_new_chunks() {
    let repo = open_fixture_repo();
    let engine = PampaxEngine::open(repo.path()).unwrap();

    let first = engine.index(false, Vec::new(), Vec::new(), "test-correlation").await.unwrap();
    assert!(first.chunks_created > 0);

    let second = engine.index(false, Vec::new(), Vec::new(), "test-correlation").await.unwrap();
    assert_eq!(second.chunks_created, 0, "unchanged files should not be re-chunked");
    assert!(second.files_unchanged >= first.files_indexed);
}

#[tokio::test]
async fn assemble_respects_a_tight_token_budget() {
    let repo = open_fixture_repo();
    let engine = PampaxEngine::open(repo.path()).unwrap();
    engine.index(false, Vec::new(), Vec::new(), "test-correlation").await.unwrap();

    let classification = engine.classify("process config", None);
    let policy = engine.policy_for(classification.intent);
    let filters = ScopeFilters::default();
    let retrieval = engine.search("process config", None, &policy, &filters, 10, false, "test-correlation").await.unwrap();

    let token_model = TokenModel::for_model("gpt-4o");
    let profile = PackingProfile::for_repo_model(&repo.path().display().to_string(), "gpt-4o");
    let options = AssembleOptions {
        total_budget: 64,
        early_stopped_at_retrieval: retrieval.report.early_stopped,
        traversal_strategy: TraversalStrategy::QualityFirst,
        max_depth: 1,
    };
    let memories = engine.storage.find_memories(None, None, None, 0, 20).unwrap();

    let bundle = engine.assemble(&token_model, &profile, &retrieval, &memories, &options, "test-correlation").unwrap();
    assert!(bundle.total_tokens <= 64, "bundle must not exceed its token budget");
}

#[tokio::test]
async fn graph_traversal_from_a_symbol_seed_stays_within_the_node_cap() {
    let repo = open_fixture_repo();
    let engine = PampaxEngine::open(repo.path()).unwrap();
    engine.index(false, Vec::new(), Vec::new(), "test-correlation").await.unwrap();

    let classification = engine.classify("greet", None);
    let policy = engine.policy_for(classification.intent);
    let filters = ScopeFilters::default();
    let retrieval = engine.search("greet", Some("greet"), &policy, &filters, 5, false, "test-correlation").await.unwrap();
    let seeds: Vec<String> = retrieval.items.iter().map(|i| i.chunk_id.clone()).collect();
    if seeds.is_empty() {
        return;
    }

    let token_model = TokenModel::for_model("gpt-4o");
    let result = engine.traverse_graph(&seeds, 2, 5, None, &token_model, TraversalStrategy::BreadthFirst);
    assert!(result.nodes.len() <= 5, "traversal must not exceed its node cap");
}

#[test]
fn signature_cache_key_changes_when_the_repo_fingerprint_changes() {
    let storage = pampax::storage::Storage::open_in_memory().unwrap();
    storage.upsert_file("src/lib.rs", "hash-one", "rust", 100, 1, 1024 * 1024).unwrap();
    let fp_before = storage.repo_fingerprint().unwrap();
    let key_before = SignatureCache::key(&normalize_query("greet"), "symbol", &fp_before);

    storage.upsert_file("src/lib.rs", "hash-two", "rust", 110, 2, 1024 * 1024).unwrap();
    let fp_after = storage.repo_fingerprint().unwrap();
    let key_after = SignatureCache::key(&normalize_query("greet"), "symbol", &fp_after);

    assert_ne!(key_before, key_after, "a changed file must invalidate the cached signature's key");
}

#[test]
fn signature_cache_put_then_get_reports_a_hit_for_an_unchanged_key() {
    let cache = SignatureCache::new(&pampax::config::CacheConfig { ttl_days: 7, max_entries: 100 });
    let key = SignatureCache::key("greet", "symbol", "fingerprint-a");
    cache.put(key.clone(), "sig-1".into());
    assert_eq!(cache.get(&key), Some("sig-1".to_string()));

    let other_key = SignatureCache::key("greet", "symbol", "fingerprint-b");
    assert_eq!(cache.get(&other_key), None, "a different scope fingerprint must miss");
}

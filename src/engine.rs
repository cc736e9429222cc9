//! `PampaxEngine` — the library facade every CLI subcommand calls into.
//!
//! Wires config, storage, the embedder/reranker providers, the signature
//! cache, and metrics into one long-lived handle per repo. There is no
//! server loop here: each CLI invocation builds one engine, runs one
//! operation, and exits.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::assembler::{self, AssembleOptions, Bundle};
use crate::config::PampaxConfig;
use crate::embedder::{build_embedder, Embedder};
use crate::error::Result;
use crate::graph::{self, TraversalResult, TraversalStrategy};
use crate::health::{self, HealthReport};
use crate::indexer::{self, IndexOptions, IndexReport};
use crate::intent::{self, Classification, Intent};
use crate::interaction::{self, SignatureCache};
use crate::metrics::Metrics;
use crate::policy::{self, RetrievalPolicy};
use crate::reranker::{build_reranker, Reranker};
use crate::retriever::{self, RetrievalResult};
use crate::storage::Storage;
use crate::token_model::{PackingProfile, TokenModel};
use crate::types::{Memory, ScopeFilters};

pub struct PampaxEngine {
    pub repo: PathBuf,
    pub config: PampaxConfig,
    pub storage: Storage,
    embedder: Option<Box<dyn Embedder>>,
    reranker: Box<dyn Reranker>,
    pub cache: SignatureCache,
    pub metrics: Metrics,
}

impl PampaxEngine {
    /// Open (or create) the repo's `.pampax/` store and build every
    /// provider from config. Provider construction failures (missing API
    /// keys, no local model) degrade to `None`/a no-op rather than failing
    /// engine startup — most commands don't need an embedder at all.
    pub fn open(repo: &Path) -> Result<Self> {
        let config = PampaxConfig::load(repo)?;
        let storage = Storage::open(repo, &config.storage)?;
        let embedder = build_embedder(&config.indexer.provider, &config.indexer.model, config.indexer.embedding_dim).ok();
        let reranker = build_reranker(&config.features.reranker, "default")
            .unwrap_or_else(|_| Box::new(crate::reranker::NoopReranker));
        let cache = SignatureCache::new(&config.cache);
        let metrics = Metrics::new(&config.metrics);
        Ok(PampaxEngine { repo: repo.to_path_buf(), config, storage, embedder, reranker, cache, metrics })
    }

    #[must_use]
    pub fn embedder(&self) -> Option<&dyn Embedder> {
        self.embedder.as_deref()
    }

    pub async fn index(
        &self,
        force: bool,
        include: Vec<String>,
        exclude: Vec<String>,
        correlation_id: &str,
    ) -> Result<IndexReport> {
        let span = tracing::info_span!("index", correlation_id = %correlation_id, repo = %self.repo.display());
        let _entered = span.enter();
        let options = IndexOptions { repo: self.repo.clone(), force, include, exclude };
        let start = Instant::now();
        tracing::debug!(correlation_id = %correlation_id, "index started");
        let result = indexer::index(&self.storage, self.embedder(), &self.config, &options).await;
        self.metrics.observe_ms("index_latency_ms", start.elapsed().as_millis() as u64, false);
        match &result {
            Ok(report) => {
                self.metrics.incr("index_operations");
                self.metrics.incr_by("chunks_created_total", report.chunks_created as u64);
                if report.degraded {
                    self.metrics.incr("index_degraded");
                }
                tracing::info!(correlation_id = %correlation_id, chunks_created = report.chunks_created, degraded = report.degraded, "index finished");
            }
            Err(e) => {
                self.metrics.incr("index_errors");
                tracing::warn!(correlation_id = %correlation_id, error = %e, "index failed");
            }
        }
        result
    }

    #[must_use]
    pub fn classify(&self, query: &str, forced: Option<Intent>) -> Classification {
        intent::classify(query, forced)
    }

    #[must_use]
    pub fn policy_for(&self, intent: Intent) -> RetrievalPolicy {
        policy::default_policy(intent)
    }

    pub async fn search(
        &self,
        query: &str,
        symbol_entity: Option<&str>,
        policy: &RetrievalPolicy,
        filters: &ScopeFilters,
        limit: usize,
        use_reranker: bool,
        correlation_id: &str,
    ) -> Result<RetrievalResult> {
        let span = tracing::info_span!("retrieve", correlation_id = %correlation_id, query_len = query.len());
        let _entered = span.enter();
        let reranker: Option<&dyn Reranker> = use_reranker.then_some(self.reranker.as_ref());
        let start = Instant::now();
        let result =
            retriever::retrieve(&self.storage, self.embedder(), reranker, query, symbol_entity, policy, filters, limit)
                .await;
        self.metrics.observe_ms("search_latency_ms", start.elapsed().as_millis() as u64, true);
        self.metrics.incr("search_operations");
        match &result {
            Ok(r) if !r.report.degraded_streams.is_empty() => {
                self.metrics.incr("search_errors");
                tracing::warn!(correlation_id = %correlation_id, degraded = ?r.report.degraded_streams, "search degraded");
            }
            Ok(r) => {
                tracing::debug!(correlation_id = %correlation_id, hits = r.items.len(), "search finished");
            }
            Err(e) => {
                self.metrics.incr("search_errors");
                tracing::warn!(correlation_id = %correlation_id, error = %e, "search failed");
            }
        }
        result
    }

    pub fn traverse_graph(
        &self,
        seeds: &[String],
        max_depth: usize,
        node_cap: usize,
        token_budget: Option<usize>,
        token_model: &TokenModel,
        strategy: TraversalStrategy,
    ) -> TraversalResult {
        graph::traverse(
            &self.storage,
            seeds,
            max_depth,
            node_cap,
            token_budget,
            |span_id| {
                self.storage
                    .get_chunk_for_span(span_id)
                    .ok()
                    .flatten()
                    .map(|c| token_model.count_tokens(&c.body))
                    .unwrap_or(0)
            },
            strategy,
        )
    }

    pub fn assemble(
        &self,
        token_model: &TokenModel,
        profile: &PackingProfile,
        retrieval: &RetrievalResult,
        memories: &[Memory],
        options: &AssembleOptions,
        correlation_id: &str,
    ) -> Result<Bundle> {
        let span = tracing::info_span!("assemble", correlation_id = %correlation_id, budget = options.total_budget);
        let _entered = span.enter();
        let start = Instant::now();
        let total_budget = options.total_budget;
        let result = assembler::assemble(&self.storage, token_model, profile, &retrieval.items, memories, options);
        self.metrics.observe_ms("context_assembly_latency_ms", start.elapsed().as_millis() as u64, true);
        match &result {
            Ok(bundle) => {
                self.metrics.incr("assemble_operations");
                self.metrics.set_gauge("token_usage", bundle.total_tokens as u64);
                if total_budget > 0 {
                    let utilization = (bundle.total_tokens as f64 / total_budget as f64 * 100.0).round() as u64;
                    self.metrics.set_gauge("budget_utilization", utilization);
                }
                tracing::info!(correlation_id = %correlation_id, total_tokens = bundle.total_tokens, stopping_reason = ?bundle.stopping_reason, "assemble finished");
            }
            Err(e) => {
                self.metrics.incr("assemble_errors");
                tracing::warn!(correlation_id = %correlation_id, error = %e, "assemble failed");
            }
        }
        result
    }

    pub fn record_interaction(
        &self,
        query: &str,
        intent: &str,
        bundle_signature: &str,
        tokens_used: usize,
        correlation_id: Option<String>,
    ) -> Result<crate::types::Interaction> {
        interaction::record(&self.storage, query, intent, bundle_signature, tokens_used, correlation_id)
    }

    #[must_use]
    pub fn health(&self, components: &[String]) -> HealthReport {
        health::check(&self.storage, &self.config, &self.cache, &self.metrics, components)
    }
}

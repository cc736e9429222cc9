//! `pampax` CLI binary.
//!
//! A thin shell over [`pampax::engine::PampaxEngine`]: every subcommand
//! parses its arguments, opens one engine for the target repo, calls a
//! single library operation, and renders the result as text or JSON. There
//! is no server loop and no long-lived process state — global flags,
//! `init_tracing`, and one `Cli::parse()` followed by a big subcommand
//! match make up the whole binary.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use pampax::assembler::AssembleOptions;
use pampax::engine::PampaxEngine;
use pampax::error::{PampaxError, Result};
use pampax::graph::TraversalStrategy;
use pampax::indexer;
use pampax::intent::Intent;
use pampax::interaction;
use pampax::policy::with_learned_weights;
use pampax::token_model::{PackingProfile, TokenModel};
use pampax::types::{Memory, MemoryKind, MemoryScope, ScopeFilters, SpanKind};

#[derive(Parser)]
#[command(name = "pampax", version, about = "Semantic memory indexer and hybrid retrieval engine for LLM coding agents")]
struct Cli {
    /// Repo root to operate on. Defaults to the current directory.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Render output as JSON instead of a human-readable summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the repo, chunk changed files, and (re)build the index.
    Index {
        /// Re-chunk and re-embed every file, ignoring content-hash caching.
        #[arg(long)]
        force: bool,
        /// Restrict indexing to paths matching these globs.
        #[arg(long = "include")]
        include: Vec<String>,
        /// Skip paths matching these globs, in addition to config excludes.
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },
    /// Run hybrid retrieval for a query and print the ranked candidates.
    Search(SearchArgs),
    /// Run retrieval, then pack the result into a token-budgeted bundle.
    Assemble(AssembleArgs),
    /// Traverse the call/import/type graph outward from seed spans.
    Graph {
        /// Seed span ids to expand from.
        #[arg(long = "seed", required = true)]
        seeds: Vec<String>,
        #[arg(long, default_value_t = 2)]
        max_depth: usize,
        #[arg(long, default_value_t = pampax::graph::DEFAULT_NODE_CAP)]
        node_cap: usize,
        #[arg(long)]
        token_budget: Option<usize>,
        #[arg(long, default_value = "gpt-4o")]
        model: String,
        #[arg(long, value_enum, default_value = "quality-first")]
        strategy: StrategyArg,
    },
    /// Manage durable memories (facts, gotchas, decisions, rules, ...).
    #[command(subcommand)]
    Memory(MemoryCommand),
    /// Pin a span so it always survives assembly — an exemplar memory keyed
    /// to the span id, ranked above ordinary memories.
    Pin {
        #[arg(long)]
        span: String,
        #[arg(long)]
        label: String,
    },
    /// Rerank an ad-hoc set of documents against a query (not the indexed
    /// corpus — see `search`/`assemble` for that).
    Rerank {
        query: String,
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value = "rrf")]
        provider: String,
        #[arg(long = "model", default_value = "rerank-v3")]
        model: String,
        #[arg(long = "topK", default_value_t = 10)]
        top_k: usize,
    },
    /// Token accounting: count text, inspect a model's budget, or list known models.
    #[command(subcommand)]
    Token(TokenCommand),
    /// Inspect, warm, or clear the bundle-signature cache.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Record the eventual outcome of a past interaction (did it resolve the task?).
    LearnReport {
        interaction_id: String,
        #[arg(long)]
        satisfied: bool,
        #[arg(long)]
        time_to_fix_ms: Option<u64>,
    },
    /// Summarize recorded interactions: satisfaction rate, token usage,
    /// per-intent volume. Read-only reporting — not the weight-optimization
    /// loop, which lives outside this crate.
    Analytics {
        /// Only include interactions recorded in the last N days.
        #[arg(long, default_value_t = 30)]
        since_days: i64,
    },
    /// Run component health checks (database, cache, config, embedder).
    Health {
        /// Restrict to these components; defaults to all four.
        #[arg(long = "component")]
        components: Vec<String>,
    },
    /// Inspect the store's schema version against what this binary expects.
    Migrate {
        #[arg(long)]
        status: bool,
        #[arg(long)]
        rollback: bool,
    },
    /// Print or scaffold repo configuration.
    Config {
        /// Write a starter `pampax.toml` for the repo.
        #[arg(long)]
        init: bool,
        /// Validate the existing config and exit non-zero on error.
        #[arg(long)]
        validate: bool,
        /// Print the effective config (defaults applied, env overrides merged). Default when no other flag is given.
        #[arg(long)]
        show: bool,
        /// Write the effective config out to `.pampax/pampax.toml`.
        #[arg(long)]
        export: bool,
        /// Re-read config from disk and drop any in-memory cache state that depends on it (the signature cache).
        #[arg(long)]
        reload: bool,
    },
}

#[derive(Args)]
struct SearchArgs {
    query: String,
    #[arg(short = 'k', long, default_value_t = 10)]
    limit: usize,
    /// Force a specific intent instead of classifying the query.
    #[arg(long = "force-intent", alias = "intent", value_enum)]
    intent: Option<IntentArg>,
    /// Include the classifier's extracted entities and forced flag in the output.
    #[arg(long)]
    explain_intent: bool,
    /// Run retrieval under a named policy's intent row instead of the one the classifier picked.
    #[arg(long, value_enum)]
    policy: Option<IntentArg>,
    /// Treat the query as a symbol name for the symbol seed stream.
    #[arg(long)]
    symbol: Option<String>,
    /// Cap how many caller-direction graph neighbors the traversal pulls in.
    #[arg(long)]
    callers: Option<usize>,
    /// Cap how many callee-direction graph neighbors the traversal pulls in.
    #[arg(long)]
    callees: Option<usize>,
    /// Toggle the vector (semantic) seed stream.
    #[arg(long, value_enum, default_value = "on")]
    hybrid: OnOff,
    /// Toggle the lexical (BM25/FTS) seed stream.
    #[arg(long, value_enum, default_value = "on")]
    bm25: OnOff,
    /// Tokenizer/budget model used when reporting token counts for this search.
    #[arg(long = "target-model", default_value = "gpt-4o")]
    target_model: String,
    /// Override the token budget used for `--token-report`'s utilization figure.
    #[arg(long = "token-budget")]
    token_budget: Option<usize>,
    /// Include a token-count report (per-hit and total) in the output.
    #[arg(long = "token-report")]
    token_report: bool,
    #[arg(long = "path")]
    path_glob: Vec<String>,
    #[arg(long = "lang")]
    lang: Vec<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    /// Disable the reranking pass even if one is configured.
    #[arg(long)]
    no_rerank: bool,
}

#[derive(Args)]
struct AssembleArgs {
    #[command(flatten)]
    search: SearchArgs,
    /// Target model, used for both the tokenizer and the context budget.
    #[arg(long, default_value = "gpt-4o")]
    model: String,
    /// Override the session token budget (defaults to 70% of the model's context window).
    #[arg(long)]
    budget: Option<usize>,
    #[arg(long, default_value_t = 2)]
    graph_depth: usize,
    #[arg(long, value_enum, default_value = "quality-first")]
    strategy: StrategyArg,
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Store a memory.
    Remember {
        value: String,
        #[arg(long, value_enum, default_value = "fact")]
        kind: MemoryKindArg,
        #[arg(long, value_enum, default_value = "repo")]
        scope: MemoryScopeArg,
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value_t = 1.0)]
        weight: f64,
        #[arg(long)]
        ttl_days: Option<i64>,
    },
    /// List stored memories, optionally filtered.
    Recall {
        #[arg(long, value_enum)]
        kind: Option<MemoryKindArg>,
        #[arg(long, value_enum)]
        scope: Option<MemoryScopeArg>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Delete a memory by id.
    Forget { id: String },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Count the tokens a piece of text would cost under a given model.
    Count {
        text: String,
        #[arg(long, default_value = "gpt-4o")]
        model: String,
    },
    /// Print a model's context size, output cap, and default session budget.
    Budget {
        #[arg(long, default_value = "gpt-4o")]
        model: String,
    },
    /// List every model profile pampax knows about.
    Models,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Drop every cached bundle signature.
    Clear,
    /// Print the cache's current size.
    Status,
    /// Re-embed any chunks left pending by a degraded index pass.
    Warm,
    /// Print cache configuration alongside its current size.
    Stats,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum StrategyArg {
    QualityFirst,
    BreadthFirst,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OnOff {
    On,
    Off,
}

impl OnOff {
    fn is_on(self) -> bool {
        matches!(self, OnOff::On)
    }
}

impl From<StrategyArg> for TraversalStrategy {
    fn from(s: StrategyArg) -> Self {
        match s {
            StrategyArg::QualityFirst => TraversalStrategy::QualityFirst,
            StrategyArg::BreadthFirst => TraversalStrategy::BreadthFirst,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum IntentArg {
    Symbol,
    Config,
    Api,
    Incident,
    Search,
}

impl From<IntentArg> for Intent {
    fn from(i: IntentArg) -> Self {
        match i {
            IntentArg::Symbol => Intent::Symbol,
            IntentArg::Config => Intent::Config,
            IntentArg::Api => Intent::Api,
            IntentArg::Incident => Intent::Incident,
            IntentArg::Search => Intent::Search,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum MemoryKindArg {
    Fact,
    Gotcha,
    Decision,
    Plan,
    Rule,
    NameAlias,
    Insight,
    Exemplar,
}

impl From<MemoryKindArg> for MemoryKind {
    fn from(k: MemoryKindArg) -> Self {
        match k {
            MemoryKindArg::Fact => MemoryKind::Fact,
            MemoryKindArg::Gotcha => MemoryKind::Gotcha,
            MemoryKindArg::Decision => MemoryKind::Decision,
            MemoryKindArg::Plan => MemoryKind::Plan,
            MemoryKindArg::Rule => MemoryKind::Rule,
            MemoryKindArg::NameAlias => MemoryKind::NameAlias,
            MemoryKindArg::Insight => MemoryKind::Insight,
            MemoryKindArg::Exemplar => MemoryKind::Exemplar,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum MemoryScopeArg {
    Repo,
    Workspace,
    Global,
}

impl From<MemoryScopeArg> for MemoryScope {
    fn from(s: MemoryScopeArg) -> Self {
        match s {
            MemoryScopeArg::Repo => MemoryScope::Repo,
            MemoryScopeArg::Workspace => MemoryScope::Workspace,
            MemoryScopeArg::Global => MemoryScope::Global,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.repo);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::from(PampaxError::Internal { message: e.to_string() }.exit_code() as u8);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("error: {err}");
            if let Some(suggestion) = err.suggestion() {
                eprintln!("hint: {suggestion}");
            }
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

/// Installs a global `tracing` subscriber once per process, honoring
/// `[logging]` from the repo's config (level + text/json format).
fn init_tracing(repo: &Path) {
    let config = pampax::config::PampaxConfig::load(repo).unwrap_or_default();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Index { force, include, exclude } => run_index(&cli.repo, cli.json, force, include, exclude).await,
        Command::Search(args) => run_search(&cli.repo, cli.json, args).await,
        Command::Assemble(args) => run_assemble(&cli.repo, cli.json, args).await,
        Command::Graph { seeds, max_depth, node_cap, token_budget, model, strategy } => {
            run_graph(&cli.repo, cli.json, seeds, max_depth, node_cap, token_budget, &model, strategy)
        }
        Command::Memory(cmd) => run_memory(&cli.repo, cli.json, cmd),
        Command::Pin { span, label } => run_pin(&cli.repo, cli.json, &span, &label),
        Command::Rerank { query, inputs, provider, model, top_k } => {
            run_rerank(cli.json, &query, &inputs, &provider, &model, top_k).await
        }
        Command::Token(cmd) => run_token(cli.json, cmd),
        Command::Cache(cmd) => run_cache(&cli.repo, cli.json, cmd).await,
        Command::LearnReport { interaction_id, satisfied, time_to_fix_ms } => {
            run_learn_report(&cli.repo, &interaction_id, satisfied, time_to_fix_ms)
        }
        Command::Analytics { since_days } => run_analytics(&cli.repo, cli.json, since_days),
        Command::Health { components } => run_health(&cli.repo, cli.json, components),
        Command::Migrate { status, rollback } => run_migrate(&cli.repo, cli.json, status, rollback),
        Command::Config { init, validate, show, export, reload } => {
            run_config(&cli.repo, cli.json, init, validate, show, export, reload)
        }
    }
}

fn render<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value).map_err(|e| PampaxError::Internal { message: e.to_string() })?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn scope_filters(path_glob: Vec<String>, lang: Vec<String>, tags: Vec<String>, exclude: Vec<String>) -> ScopeFilters {
    ScopeFilters { path_glob, lang, span_kind: Vec::<SpanKind>::new(), tags, exclude }
}

async fn run_index(repo: &Path, json: bool, force: bool, include: Vec<String>, exclude: Vec<String>) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let report = engine.index(force, include, exclude, &correlation_id).await?;
    render(json, &report, || {
        format!(
            "indexed {} files ({} unchanged, {} removed), {} chunks created ({} embedded, {} pending), {} edges{}",
            report.files_indexed,
            report.files_unchanged,
            report.files_removed,
            report.chunks_created,
            report.chunks_embedded,
            report.chunks_pending_embedding,
            report.edges_created,
            if report.degraded { " [degraded: embedder unavailable]" } else { "" },
        )
    })?;
    Ok(if report.degraded { 1 } else { 0 })
}

#[derive(Serialize)]
struct SearchHit {
    chunk_id: String,
    path: String,
    lang: String,
    score: f64,
    rerank_score: Option<f32>,
    sources: Vec<pampax::retriever::SeedSource>,
}

#[derive(Serialize)]
struct SearchOutput {
    intent: &'static str,
    confidence: f64,
    /// Populated only with `--explain-intent`.
    entities: Vec<pampax::intent::Entity>,
    forced: bool,
    degraded_streams: Vec<pampax::retriever::SeedSource>,
    early_stopped: bool,
    reranked: bool,
    results: Vec<SearchHit>,
    /// Populated only with `--token-report`.
    token_report: Option<TokenReport>,
    correlation_id: String,
}

#[derive(Serialize)]
struct TokenReport {
    budget: usize,
    estimated: usize,
    model: String,
}

async fn run_search(repo: &Path, json: bool, args: SearchArgs) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let output = search_impl(&engine, &args, &correlation_id).await?;
    render(json, &output, || {
        let mut lines = vec![format!("intent={} confidence={:.2}", output.intent, output.confidence)];
        if !output.entities.is_empty() {
            let shapes: Vec<String> =
                output.entities.iter().map(|e| format!("{:?}:{}", e.shape, e.text)).collect();
            lines.push(format!("entities=[{}] forced={}", shapes.join(", "), output.forced));
        }
        for hit in &output.results {
            lines.push(format!("{:>7.3}  {}  [{}]", hit.score, hit.path, hit.lang));
        }
        if let Some(report) = &output.token_report {
            lines.push(format!("tokens: {}/{} ({})", report.estimated, report.budget, report.model));
        }
        lines.join("\n")
    })?;
    Ok(if output.degraded_streams.is_empty() { 0 } else { 1 })
}

async fn search_impl(engine: &PampaxEngine, args: &SearchArgs, correlation_id: &str) -> Result<SearchOutput> {
    let classification = engine.classify(&args.query, args.intent.map(Into::into));
    let policy_intent = args.policy.map(Into::into).unwrap_or(classification.intent);
    let mut policy = engine.policy_for(policy_intent);
    if let Some(weights) = engine.storage.get_meta(&format!("learned_weights:{}", policy_intent.label())).ok().flatten() {
        if let Ok(weights) = serde_json::from_str(&weights) {
            policy = with_learned_weights(policy, weights);
        }
    }
    if !args.hybrid.is_on() {
        policy.seed_weights.vector = 0.0;
    }
    if !args.bm25.is_on() {
        policy.seed_weights.bm25 = 0.0;
    }
    if let Some(callers) = args.callers {
        policy.max_depth = policy.max_depth.max(callers);
    }
    if let Some(callees) = args.callees {
        policy.max_depth = policy.max_depth.max(callees);
    }

    let filters = scope_filters(args.path_glob.clone(), args.lang.clone(), args.tags.clone(), args.exclude.clone());
    let result = engine
        .search(&args.query, args.symbol.as_deref(), &policy, &filters, args.limit, !args.no_rerank, correlation_id)
        .await?;

    let mut results = Vec::with_capacity(result.items.len());
    for item in &result.items {
        let chunk = engine.storage.get_chunk(&item.chunk_id)?;
        let (path, lang) = chunk.map(|c| (c.path, c.lang)).unwrap_or_default();
        results.push(SearchHit {
            chunk_id: item.chunk_id.clone(),
            path,
            lang,
            score: item.fused_score,
            rerank_score: item.rerank_score,
            sources: item.sources.clone(),
        });
    }

    let token_report = args.token_report.then(|| {
        let token_model = TokenModel::for_model(&args.target_model);
        let estimated: usize = results
            .iter()
            .filter_map(|r| engine.storage.get_chunk(&r.chunk_id).ok().flatten())
            .map(|c| token_model.count_tokens(&c.body))
            .sum();
        let budget = args.token_budget.unwrap_or_else(|| token_model.default_session_budget());
        TokenReport { budget, estimated, model: args.target_model.clone() }
    });

    Ok(SearchOutput {
        intent: classification.intent.label(),
        confidence: classification.confidence,
        entities: if args.explain_intent { classification.entities.clone() } else { Vec::new() },
        forced: classification.forced,
        degraded_streams: result.report.degraded_streams,
        early_stopped: result.report.early_stopped,
        reranked: result.report.reranked,
        results,
        token_report,
        correlation_id: correlation_id.to_string(),
    })
}

#[derive(Serialize)]
struct AssembleOutput {
    intent: &'static str,
    confidence: f64,
    entities: Vec<pampax::intent::Entity>,
    forced: bool,
    stopping_reason: pampax::assembler::StoppingReason,
    total_tokens: usize,
    signature: String,
    cache_hit: bool,
    items: Vec<AssembleItem>,
    memories: Vec<Memory>,
}

#[derive(Serialize)]
struct AssembleItem {
    path: String,
    content_tier: &'static str,
    admission_tier: &'static str,
    admission: &'static str,
    tokens: usize,
    score: f64,
    via_graph: bool,
}

async fn run_assemble(repo: &Path, json: bool, args: AssembleArgs) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let classification = engine.classify(&args.search.query, args.search.intent.map(Into::into));

    let scope_fingerprint = format!(
        "path={:?}|lang={:?}|tag={:?}|exclude={:?}|repo={}",
        args.search.path_glob,
        args.search.lang,
        args.search.tags,
        args.search.exclude,
        engine.storage.repo_fingerprint()?,
    );
    let cache_key = interaction::SignatureCache::key(
        &interaction::normalize_query(&args.search.query),
        classification.intent.label(),
        &scope_fingerprint,
    );
    engine.metrics.incr("cache_operations");
    let prior_signature = engine.cache.get(&cache_key);

    let search_out = search_impl(&engine, &args.search, &correlation_id).await?;

    let token_model = TokenModel::for_model(&args.model);
    let profile = PackingProfile::for_repo_model(&repo.display().to_string(), &args.model);
    let total_budget = args.budget.unwrap_or_else(|| token_model.default_session_budget());

    let now = chrono::Utc::now().timestamp();
    let memories = engine.storage.find_memories(None, None, None, now, 20)?;

    let ranked: Vec<pampax::retriever::RankedChunk> = search_out
        .results
        .iter()
        .map(|hit| pampax::retriever::RankedChunk {
            chunk_id: hit.chunk_id.clone(),
            fused_score: hit.score,
            sources: hit.sources.clone(),
            rerank_score: hit.rerank_score,
        })
        .collect();
    let retrieval = pampax::retriever::RetrievalResult {
        items: ranked,
        report: pampax::retriever::RetrievalReport {
            degraded_streams: search_out.degraded_streams.clone(),
            early_stopped: search_out.early_stopped,
            reranked: search_out.reranked,
        },
    };

    let options = AssembleOptions {
        total_budget,
        early_stopped_at_retrieval: search_out.early_stopped,
        traversal_strategy: args.strategy.into(),
        max_depth: args.graph_depth,
    };
    let bundle = engine.assemble(&token_model, &profile, &retrieval, &memories, &options, &correlation_id)?;

    let cache_hit = prior_signature.as_deref() == Some(bundle.signature.as_str());
    engine.cache.put(cache_key, bundle.signature.clone());
    if cache_hit {
        engine.metrics.incr("cache_hits");
    }
    let hit_rate = engine.metrics.counter("cache_hits") as f64 / engine.metrics.counter("cache_operations").max(1) as f64;
    engine.metrics.set_gauge("cache_hit_rate", (hit_rate * 100.0).round() as u64);

    let interaction = engine.record_interaction(
        &args.search.query,
        classification.intent.label(),
        &bundle.signature,
        bundle.total_tokens,
        Some(correlation_id.clone()),
    )?;
    tracing::info!(correlation_id = %correlation_id, interaction_id = %interaction.id, tokens = bundle.total_tokens, cache_hit, "assembled bundle");

    let output = AssembleOutput {
        intent: classification.intent.label(),
        confidence: classification.confidence,
        entities: if args.search.explain_intent { classification.entities.clone() } else { Vec::new() },
        forced: classification.forced,
        stopping_reason: bundle.stopping_reason,
        total_tokens: bundle.total_tokens,
        signature: bundle.signature.clone(),
        cache_hit,
        items: bundle
            .items
            .iter()
            .map(|item| AssembleItem {
                path: item.path.clone(),
                content_tier: priority_label(item.content_tier),
                admission_tier: item.admission_tier.key(),
                admission: match item.admission {
                    pampax::assembler::Admission::Full => "full",
                    pampax::assembler::Admission::Capsule => "capsule",
                },
                tokens: item.tokens,
                score: item.score,
                via_graph: item.via_graph,
            })
            .collect(),
        memories: bundle.memories.clone(),
    };

    render(json, &output, || {
        let mut lines = vec![format!(
            "{} items, {} tokens, stopped: {:?}, interaction {}, cache_hit={}",
            output.items.len(),
            output.total_tokens,
            output.stopping_reason,
            interaction.id,
            output.cache_hit,
        )];
        for item in &output.items {
            lines.push(format!(
                "[{}/{}/{}] {} ({} tok)",
                item.admission_tier, item.content_tier, item.admission, item.path, item.tokens
            ));
        }
        lines.join("\n")
    })?;
    Ok(0)
}

fn priority_label(p: pampax::types::PriorityClass) -> &'static str {
    match p {
        pampax::types::PriorityClass::Code => "code",
        pampax::types::PriorityClass::Tests => "tests",
        pampax::types::PriorityClass::Comments => "comments",
        pampax::types::PriorityClass::Examples => "examples",
        pampax::types::PriorityClass::Config => "config",
        pampax::types::PriorityClass::Docs => "docs",
    }
}

#[derive(Serialize)]
struct GraphOutput {
    truncated: bool,
    nodes: Vec<GraphNode>,
}

#[derive(Serialize)]
struct GraphNode {
    span_id: String,
    depth: usize,
    via_kind: Option<&'static str>,
}

fn run_graph(
    repo: &Path,
    json: bool,
    seeds: Vec<String>,
    max_depth: usize,
    node_cap: usize,
    token_budget: Option<usize>,
    model: &str,
    strategy: StrategyArg,
) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    let token_model = TokenModel::for_model(model);
    let result = engine.traverse_graph(&seeds, max_depth, node_cap, token_budget, &token_model, strategy.into());
    let output = GraphOutput {
        truncated: result.truncated,
        nodes: result
            .nodes
            .iter()
            .map(|n| GraphNode { span_id: n.span_id.clone(), depth: n.depth, via_kind: n.via.as_ref().map(|(_, k)| k.label()) })
            .collect(),
    };
    render(json, &output, || {
        let mut lines = vec![format!("{} nodes{}", output.nodes.len(), if output.truncated { " (truncated)" } else { "" })];
        for node in &output.nodes {
            lines.push(format!("depth {}  {}{}", node.depth, node.span_id, node.via_kind.map(|k| format!(" via {k}")).unwrap_or_default()));
        }
        lines.join("\n")
    })?;
    Ok(0)
}

fn run_memory(repo: &Path, json: bool, cmd: MemoryCommand) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    match cmd {
        MemoryCommand::Remember { value, kind, scope, key, weight, ttl_days } => {
            let now = chrono::Utc::now().timestamp();
            let memory = Memory {
                id: uuid::Uuid::new_v4().to_string(),
                scope: scope.into(),
                kind: kind.into(),
                key,
                value,
                weight,
                expires_at: ttl_days.map(|d| now + d * 86_400),
                provenance: serde_json::json!({"source": "cli"}),
                created_at: now,
            };
            engine.storage.upsert_memory(&memory)?;
            render(json, &memory, || format!("remembered {}", memory.id))?;
        }
        MemoryCommand::Recall { kind, scope, key, limit } => {
            let now = chrono::Utc::now().timestamp();
            let memories = engine.storage.find_memories(scope.map(Into::into), kind.map(Into::into), key.as_deref(), now, limit)?;
            render(json, &memories, || {
                memories.iter().map(|m| format!("{}  {:?}  {}", m.id, m.kind, m.value)).collect::<Vec<_>>().join("\n")
            })?;
        }
        MemoryCommand::Forget { id } => {
            engine.storage.delete_memory(&id)?;
            render(json, &serde_json::json!({"deleted": id}), || "forgotten".to_string())?;
        }
    }
    Ok(0)
}

/// Pin a span so the assembler always admits it: an `exemplar` memory keyed
/// by the span id, weighted above a freehand `remember` (2.0 vs. the
/// default 1.0) so it sorts to the front of `find_memories`' ranking.
fn run_pin(repo: &Path, json: bool, span: &str, label: &str) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    let now = chrono::Utc::now().timestamp();
    let memory = Memory {
        id: uuid::Uuid::new_v4().to_string(),
        scope: MemoryScope::Repo,
        kind: pampax::types::MemoryKind::Exemplar,
        key: Some(span.to_string()),
        value: label.to_string(),
        weight: 2.0,
        expires_at: None,
        provenance: serde_json::json!({"source": "cli", "pinned_span": span}),
        created_at: now,
    };
    engine.storage.upsert_memory(&memory)?;
    render(json, &memory, || format!("pinned {span} as {}", memory.id))?;
    Ok(0)
}

#[derive(Serialize)]
struct RerankOutput {
    provider: String,
    results: Vec<RerankHit>,
}

#[derive(Serialize)]
struct RerankHit {
    path: String,
    score: f32,
}

/// Rerank arbitrary files against `query` — unlike `search`/`assemble`,
/// this never touches the indexed corpus; it's for scoring a caller-
/// supplied candidate set (e.g. a shortlist another tool already produced).
async fn run_rerank(json: bool, query: &str, inputs: &[PathBuf], provider: &str, model: &str, top_k: usize) -> Result<i32> {
    let reranker = pampax::reranker::build_reranker(provider, model)?;
    let mut docs = Vec::with_capacity(inputs.len());
    for path in inputs {
        let body = std::fs::read_to_string(path)
            .map_err(|e| PampaxError::Internal { message: format!("reading {}: {e}", path.display()) })?;
        docs.push(body);
    }
    let scores = reranker.rerank(query, &docs).await?;
    let mut results: Vec<RerankHit> = inputs
        .iter()
        .zip(scores)
        .map(|(path, score)| RerankHit { path: path.display().to_string(), score })
        .collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(top_k);
    let output = RerankOutput { provider: reranker.name().to_string(), results };
    render(json, &output, || {
        output.results.iter().map(|h| format!("{:>7.3}  {}", h.score, h.path)).collect::<Vec<_>>().join("\n")
    })?;
    Ok(0)
}

fn run_token(json: bool, cmd: TokenCommand) -> Result<i32> {
    match cmd {
        TokenCommand::Count { text, model } => {
            let token_model = TokenModel::for_model(&model);
            let count = token_model.count_tokens(&text);
            render(json, &serde_json::json!({"tokens": count, "model": token_model.model_name()}), || count.to_string())?;
        }
        TokenCommand::Budget { model } => {
            let token_model = TokenModel::for_model(&model);
            let out = serde_json::json!({
                "model": token_model.model_name(),
                "context_size": token_model.context_size(),
                "max_output_tokens": token_model.max_output_tokens(),
                "default_session_budget": token_model.default_session_budget(),
                "tokenizer": token_model.tokenizer_name(),
            });
            render(json, &out, || {
                format!(
                    "{}: context={} max_output={} session_budget={} tokenizer={}",
                    token_model.model_name(),
                    token_model.context_size(),
                    token_model.max_output_tokens(),
                    token_model.default_session_budget(),
                    token_model.tokenizer_name(),
                )
            })?;
        }
        TokenCommand::Models => {
            let names = pampax::token_model::ModelProfile::names();
            render(json, &names, || names.join("\n"))?;
        }
    }
    Ok(0)
}

async fn run_cache(repo: &Path, json: bool, cmd: CacheCommand) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    match cmd {
        CacheCommand::Clear => {
            engine.cache.invalidate_all();
            render(json, &serde_json::json!({"cleared": true}), || "cache cleared".to_string())?;
        }
        CacheCommand::Status => {
            let out = serde_json::json!({"entries": engine.cache.len()});
            render(json, &out, || format!("{} cached signatures", engine.cache.len()))?;
        }
        CacheCommand::Stats => {
            let out = serde_json::json!({
                "entries": engine.cache.len(),
                "ttl_days": engine.config.cache.ttl_days,
                "max_entries": engine.config.cache.max_entries,
            });
            render(json, &out, || {
                format!(
                    "{} / {} entries, ttl {} day(s)",
                    engine.cache.len(),
                    engine.config.cache.max_entries,
                    engine.config.cache.ttl_days
                )
            })?;
        }
        CacheCommand::Warm => {
            let Some(embedder) = engine.embedder() else {
                return Err(PampaxError::EmbedderUnavailable { message: "no embedder configured".into() });
            };
            let report = indexer::backfill_pending_embeddings(&engine.storage, embedder, &engine.config).await?;
            render(json, &report, || {
                format!(
                    "{}/{} pending chunks embedded{}",
                    report.chunks_embedded,
                    report.chunks_pending,
                    if report.degraded { " (still degraded: embedder unreachable)" } else { "" }
                )
            })?;
            return Ok(if report.degraded { 1 } else { 0 });
        }
    }
    Ok(0)
}

fn run_learn_report(repo: &Path, interaction_id: &str, satisfied: bool, time_to_fix_ms: Option<u64>) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    interaction::report_outcome(&engine.storage, interaction_id, satisfied, time_to_fix_ms)?;
    println!("recorded outcome for {interaction_id}");
    Ok(0)
}

fn run_analytics(repo: &Path, json: bool, since_days: i64) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    let since = chrono::Utc::now().timestamp() - since_days * 86_400;
    let summary = interaction::analytics_summary(&engine.storage, since)?;
    render(json, &summary, || {
        let mut lines = vec![format!(
            "{} interactions ({} satisfied, {} unsatisfied, {} unreported), avg {:.0} tokens",
            summary.total_interactions, summary.satisfied, summary.unsatisfied, summary.unreported, summary.avg_tokens_used,
        )];
        if let Some(rate) = summary.satisfaction_rate {
            lines.push(format!("satisfaction rate: {:.1}%", rate * 100.0));
        }
        for ic in &summary.by_intent {
            lines.push(format!("  {:<10} {}", ic.intent, ic.count));
        }
        lines.join("\n")
    })?;
    Ok(0)
}

fn run_migrate(repo: &Path, json: bool, status: bool, rollback: bool) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    let (stored, current) = engine.storage.schema_version()?;
    if rollback {
        if stored == current {
            eprintln!("no prior schema version to roll back to");
            return Ok(4);
        }
        return Err(PampaxError::Internal { message: "rollback not supported for this schema version".into() });
    }
    let up_to_date = stored >= current;
    let _ = status; // `--status` is the only meaningful read here; bare `migrate` reports the same thing.
    let out = serde_json::json!({"stored_version": stored, "current_version": current, "up_to_date": up_to_date});
    render(json, &out, || format!("schema {stored} (binary expects {current}){}", if up_to_date { ", up to date" } else { ", migration required" }))?;
    Ok(if up_to_date { 0 } else { 1 })
}

fn run_health(repo: &Path, json: bool, components: Vec<String>) -> Result<i32> {
    let engine = PampaxEngine::open(repo)?;
    let report = engine.health(&components);
    let exit_code = report.exit_code();
    render(json, &report, || {
        let mut lines = vec![format!("overall: {:?}", report.status)];
        for c in &report.components {
            lines.push(format!("  {:<10} {:?}  ({}ms)  {}", c.component, c.status, c.duration_ms, c.details));
        }
        lines.join("\n")
    })?;
    Ok(exit_code)
}

fn run_config(repo: &Path, json: bool, init: bool, validate: bool, show: bool, export: bool, reload: bool) -> Result<i32> {
    if init {
        let path = pampax::init::write_starter_config(repo)?;
        println!("wrote {}", path.display());
        return Ok(0);
    }
    let config = pampax::config::PampaxConfig::load(repo);
    if validate {
        return match config {
            Ok(_) => {
                println!("config ok");
                Ok(0)
            }
            Err(e) => {
                eprintln!("config invalid: {e}");
                Ok(e.exit_code())
            }
        };
    }
    let config = config?;

    if export {
        let dir = repo.join(".pampax");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("pampax.toml");
        let rendered = toml::to_string_pretty(&config).map_err(|e| PampaxError::Internal { message: e.to_string() })?;
        std::fs::write(&path, rendered)?;
        println!("exported effective config to {}", path.display());
        return Ok(0);
    }

    if reload {
        // No daemon process holds config in memory between CLI invocations, so
        // "reload" means: re-read from disk (already done above) and drop the
        // signature cache, since a config change can change what a cached
        // bundle would resolve to (embedder identity, packing profile version).
        let engine = PampaxEngine::open(repo)?;
        engine.cache.invalidate_all();
        println!("config reloaded, signature cache invalidated");
        return Ok(0);
    }

    let _ = show; // default behavior below already is "show"
    render(json, &config, || toml::to_string_pretty(&config).unwrap_or_default())?;
    Ok(0)
}

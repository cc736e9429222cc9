//! Core data model: File, Span, Chunk, Vector, Edge, Memory, Interaction,
//! and ContextPack, shared across every component.
//!
//! Constants, per-repo state shape, and path validation target PAMPAX's
//! persisted entities.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum file size (in bytes) read into memory during a scan, absent an
/// explicit `[indexer].max_file_bytes` override.
pub const MAX_FILE_READ: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub content_hash: String,
    pub lang: String,
    pub size: u64,
    pub mtime: i64,
}

// ---------------------------------------------------------------------------
// Span
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Module,
    Class,
    Function,
    Method,
    Constructor,
    Field,
    Enum,
    Mixin,
    Extension,
    Comment,
}

impl SpanKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SpanKind::Module => "module",
            SpanKind::Class => "class",
            SpanKind::Function => "function",
            SpanKind::Method => "method",
            SpanKind::Constructor => "constructor",
            SpanKind::Field => "field",
            SpanKind::Enum => "enum",
            SpanKind::Mixin => "mixin",
            SpanKind::Extension => "extension",
            SpanKind::Comment => "comment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Stable hash of `path:startByte-endByte:contentHash`.
    pub id: String,
    pub file_id: i64,
    pub name: String,
    pub kind: SpanKind,
    pub parent_span_id: Option<String>,
    pub signature: Option<String>,
    pub byte_start: usize,
    pub byte_end: usize,
    pub line_start: usize,
    pub line_end: usize,
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Priority class mined for the chunk, used by `PackingProfile` weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Code,
    Tests,
    Comments,
    Examples,
    Config,
    Docs,
}

impl PriorityClass {
    /// Classify from a repo-relative path and language tag. Grounded in
    /// `scan.rs`'s `describe()`/extension-hint table.
    #[must_use]
    pub fn classify(path: &str, lang: &str) -> Self {
        let lower = path.to_lowercase();
        if lower.contains("test") || lower.contains("spec") || lower.contains("__tests__") {
            return PriorityClass::Tests;
        }
        if lower.contains("example") || lower.contains("demo") || lower.contains("sample") {
            return PriorityClass::Examples;
        }
        if lower.ends_with(".md") || lower.ends_with(".rst") || lower.ends_with(".adoc") || lang == "docs"
        {
            return PriorityClass::Docs;
        }
        if lower.ends_with(".toml")
            || lower.ends_with(".yaml")
            || lower.ends_with(".yml")
            || lower.ends_with(".json")
            || lower.ends_with(".ini")
            || lower.ends_with(".cfg")
        {
            return PriorityClass::Config;
        }
        PriorityClass::Code
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `SHA-256(path : byteStart-byteEnd : body)`, hex-encoded.
    pub id: String,
    pub file_id: i64,
    pub path: String,
    pub span_id: Option<String>,
    pub body: String,
    pub lang: String,
    pub tags: Vec<String>,
    pub priority: PriorityClass,
    pub byte_start: usize,
    pub byte_end: usize,
    /// Set when chunking fell back to a replacement-character decode of
    /// invalid UTF-8.
    pub encoding_lossy: bool,
    /// Set for continuation chunks of an oversized declaration; carries the
    /// parent span id of the primary (signature) chunk.
    pub is_continuation: bool,
}

// ---------------------------------------------------------------------------
// Vector / embedder identity
// ---------------------------------------------------------------------------

/// `(provider, model, dim)` — the tuple that identifies which embedding
/// space a stored vector belongs to (spec glossary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbedderIdentity {
    pub provider: String,
    pub model: String,
    pub dim: usize,
}

impl EmbedderIdentity {
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.provider, self.model, self.dim)
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Call,
    Import,
    Inherit,
    Implement,
    Reference,
    Define,
}

impl EdgeKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            EdgeKind::Call => "call",
            EdgeKind::Import => "import",
            EdgeKind::Inherit => "inherit",
            EdgeKind::Implement => "implement",
            EdgeKind::Reference => "reference",
            EdgeKind::Define => "define",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(EdgeKind::Call),
            "import" => Some(EdgeKind::Import),
            "inherit" => Some(EdgeKind::Inherit),
            "implement" => Some(EdgeKind::Implement),
            "reference" => Some(EdgeKind::Reference),
            "define" => Some(EdgeKind::Define),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_span: String,
    pub target_span: String,
    pub kind: EdgeKind,
    pub confidence: f32,
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Repo,
    Workspace,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Fact,
    Gotcha,
    Decision,
    Plan,
    Rule,
    NameAlias,
    Insight,
    Exemplar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub scope: MemoryScope,
    pub kind: MemoryKind,
    pub key: Option<String>,
    pub value: String,
    pub weight: f64,
    pub expires_at: Option<i64>,
    pub provenance: serde_json::Value,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Interaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub query: String,
    pub intent: String,
    pub bundle_signature: String,
    pub tokens_used: usize,
    pub satisfied: Option<bool>,
    pub time_to_fix_ms: Option<u64>,
    pub timestamp: i64,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// ContextPack
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextPack {
    pub name: String,
    pub path_glob: Vec<String>,
    pub tags: Vec<String>,
    pub lang: Vec<String>,
    pub exclude: Vec<String>,
}

// ---------------------------------------------------------------------------
// Scope filters shared by fts_search / vector_search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeFilters {
    pub path_glob: Vec<String>,
    pub lang: Vec<String>,
    pub span_kind: Vec<SpanKind>,
    pub tags: Vec<String>,
    pub exclude: Vec<String>,
}

// ---------------------------------------------------------------------------
// Lexical relevance scoring — folded into the BM25/FTS seed stream alongside
// SQLite's native bm25() rank (storage.rs::fts_search).
// ---------------------------------------------------------------------------

/// True for files whose primary content is a declaration surface rather than
/// an implementation — headers, type-stub and declaration files tend to rank
/// a match slightly higher since a hit there is usually the definition a
/// query is actually after.
#[must_use]
pub fn is_definition_file(ext: &str) -> bool {
    matches!(ext, "h" | "hpp" | "hxx" | "d.ts" | "pyi")
}

/// BM25-lite relevance score for a lexical hit, with IDF term weighting and a
/// coverage penalty for queries whose terms only partly matched.
///
/// `idf_weights` should carry one weight per entry in `terms_lower`, higher
/// for rarer terms across the corpus being searched.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn grep_relevance_score(
    match_count: usize,
    total_lines: usize,
    filename_lower: &str,
    ext: &str,
    terms_lower: &[String],
    terms_matched: usize,
    first_match_line: usize,
    idf_weights: &[f64],
) -> f64 {
    let tf = match_count as f64 / (match_count as f64 + 1.5);
    let avg_idf = if idf_weights.is_empty() {
        1.0
    } else {
        idf_weights.iter().sum::<f64>() / idf_weights.len() as f64
    };
    let density = match_count as f64 / (total_lines as f64).sqrt().max(1.0);
    let filename_bonus =
        if terms_lower.iter().any(|t| filename_lower.contains(t.as_str())) { 15.0 } else { 0.0 };
    let def_bonus = if is_definition_file(ext) { 5.0 } else { 0.0 };
    let position_bonus = if total_lines > 30 && first_match_line < 30 {
        3.0 * (1.0 - first_match_line as f64 / 30.0)
    } else {
        0.0
    };
    let base = tf * 15.0 * avg_idf + filename_bonus + def_bonus + density + position_bonus;

    let term_count = terms_lower.len();
    if term_count <= 1 || idf_weights.is_empty() {
        return base;
    }
    let mut sorted_idfs: Vec<f64> = idf_weights.to_vec();
    sorted_idfs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let matched_idf_sum: f64 = sorted_idfs.iter().take(terms_matched).sum();
    let total_idf_sum: f64 = sorted_idfs.iter().sum();
    let coverage = if total_idf_sum > 0.0 { matched_idf_sum / total_idf_sum } else { 1.0 };
    let coverage_factor = coverage * coverage;
    base * (0.3 + 0.7 * coverage_factor)
}

// ---------------------------------------------------------------------------
// Path validation — rejects traversal attempts before a path ever reaches SQLite.
// ---------------------------------------------------------------------------

/// Validate and canonicalize a relative path, rejecting traversal attacks and
/// paths outside the repo root.
pub fn validate_path(project_root: &Path, rel_path: &str) -> Result<PathBuf, &'static str> {
    if rel_path.is_empty() || rel_path.contains("..") || rel_path.starts_with('/') {
        return Err("Invalid path");
    }
    let full = project_root.join(rel_path);
    let canonical = full.canonicalize().map_err(|_| "File not found")?;
    let root_canonical = project_root.canonicalize().map_err(|_| "Root not found")?;
    if !canonical.starts_with(&root_canonical) {
        return Err("Path traversal detected");
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_classifies_tests_before_code() {
        assert_eq!(PriorityClass::classify("src/foo_test.rs", "rust"), PriorityClass::Tests);
        assert_eq!(PriorityClass::classify("src/lib.rs", "rust"), PriorityClass::Code);
        assert_eq!(PriorityClass::classify("README.md", "docs"), PriorityClass::Docs);
        assert_eq!(PriorityClass::classify("pampax.toml", "toml"), PriorityClass::Config);
    }

    #[test]
    fn embedder_identity_key_is_stable() {
        let a = EmbedderIdentity { provider: "openai".into(), model: "text-embedding-3-small".into(), dim: 1536 };
        let b = EmbedderIdentity { provider: "openai".into(), model: "text-embedding-3-small".into(), dim: 1536 };
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn grep_relevance_rewards_more_matches_and_filename_hits() {
        let terms = vec!["retriever".to_string()];
        let idf = vec![2.0];
        let sparse = grep_relevance_score(1, 200, "storage.rs", "rs", &terms, 1, 150, &idf);
        let dense = grep_relevance_score(8, 200, "retriever.rs", "rs", &terms, 1, 3, &idf);
        assert!(dense > sparse);
    }

    #[test]
    fn grep_relevance_penalizes_partial_term_coverage() {
        let terms = vec!["fuse".to_string(), "rerank".to_string(), "capsule".to_string()];
        let idf = vec![1.5, 1.5, 1.5];
        let full = grep_relevance_score(6, 100, "assembler.rs", "rs", &terms, 3, 10, &idf);
        let partial = grep_relevance_score(6, 100, "assembler.rs", "rs", &terms, 1, 10, &idf);
        assert!(full > partial);
    }

    #[test]
    fn is_definition_file_matches_header_and_stub_extensions() {
        assert!(is_definition_file("h"));
        assert!(is_definition_file("pyi"));
        assert!(!is_definition_file("rs"));
    }
}

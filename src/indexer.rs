//! Repository indexing pipeline.
//!
//! Wires together `scan.rs` (discovery), `chunker.rs` (AST → chunk), the
//! configured `Embedder`, and `storage.rs` (persistence) into the single
//! `index()` entry point the CLI's `pampax index` calls. Builds on
//! `scan_files`/`scan_imports`'s parallel (`rayon`) walk, extended from
//! "build an in-memory category tree" to "persist files/spans/chunks/
//! vectors/edges and keep them in sync with what's on disk."
//!
//! Degraded mode: when the embedder is unreachable, chunks are still
//! persisted without vectors and the file is recorded as pending embedding
//! so a later `pampax index` run (or `pampax cache warm`) can backfill it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::chunker::chunk_file;
use crate::config::PampaxConfig;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::scan::{scan_files, scan_imports, ScanConfig};
use crate::storage::Storage;
use crate::types::{Edge, EdgeKind};

/// Per-run summary returned by `index()`, rendered by the CLI as text or JSON.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub files_skipped_too_large: Vec<String>,
    pub files_failed: Vec<(String, String)>,
    pub chunks_created: usize,
    pub chunks_embedded: usize,
    pub chunks_pending_embedding: usize,
    pub edges_created: usize,
    pub degraded: bool,
}

pub struct IndexOptions {
    pub repo: PathBuf,
    pub force: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Index (or re-index) `options.repo` into `storage`, embedding new/changed
/// chunks with `embedder` when one is available.
///
/// `force` re-chunks and re-embeds every file even if its content hash is
/// unchanged, e.g. after a chunking-rule or embedder-model upgrade.
pub async fn index(
    storage: &Storage,
    embedder: Option<&dyn Embedder>,
    config: &PampaxConfig,
    options: &IndexOptions,
) -> Result<IndexReport> {
    let mut report = IndexReport::default();

    let mut scan_config = ScanConfig::new(options.repo.clone());
    let exclude: Vec<String> =
        if options.exclude.is_empty() { config.indexer.exclude.clone() } else { options.exclude.clone() };
    scan_config.skip_dirs = exclude.into_iter().collect();
    let include = if options.include.is_empty() { config.indexer.include.clone() } else { options.include.clone() };
    if !include.is_empty() {
        scan_config.extensions =
            include.iter().filter_map(|p| p.rsplit_once('.').map(|(_, e)| e.to_string())).collect();
    }

    let (scanned, _categories) = scan_files(&scan_config);
    report.files_scanned = scanned.len();

    let on_disk: HashSet<String> = scanned.iter().map(|f| f.rel_path.clone()).collect();
    let persisted = storage.all_files()?;
    for file in &persisted {
        if !on_disk.contains(&file.path) {
            storage.delete_chunks_for_file(file.id)?;
            storage.delete_file(file.id)?;
            report.files_removed += 1;
        }
    }

    let max_bytes = config.indexer.max_file_bytes;
    let batch_size = config.performance.embedding_batch_size.max(1);
    let mut pending_embed: Vec<(String, String)> = Vec::new(); // (chunk_id, body)

    for file in &scanned {
        let content = match std::fs::read(&file.abs_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.files_failed.push((file.rel_path.clone(), e.to_string()));
                continue;
            }
        };
        if content.len() as u64 > max_bytes {
            report.files_skipped_too_large.push(file.rel_path.clone());
            continue;
        }
        let content_hash = hex_sha256(&content);
        let lang = lang_for_ext(&file.ext);

        if !options.force {
            if let Some(existing) = storage.get_file(&file.rel_path)? {
                if existing.content_hash == content_hash {
                    report.files_unchanged += 1;
                    continue;
                }
            }
        }

        let (text, lossy) = decode_lossy(&content);
        let mtime = mtime_unix(&file.abs_path);
        let file_id = match storage.upsert_file(&file.rel_path, &content_hash, lang, content.len() as u64, mtime, max_bytes) {
            Ok(id) => id,
            Err(e) => {
                report.files_failed.push((file.rel_path.clone(), e.to_string()));
                continue;
            }
        };

        storage.delete_chunks_for_file(file_id)?;
        let mut chunked = chunk_file(file_id, &file.rel_path, &text, &file.ext, lang);
        for cs in &mut chunked {
            cs.chunk.encoding_lossy = cs.chunk.encoding_lossy || lossy;
        }
        let spans: Vec<_> = chunked.iter().map(|cs| cs.span.clone()).collect();
        storage.replace_spans(file_id, &spans)?;

        for cs in &chunked {
            storage.store_chunk(&cs.chunk)?;
            report.chunks_created += 1;
            if embedder.is_some() {
                pending_embed.push((cs.chunk.id.clone(), cs.chunk.body.clone()));
            }
        }
        report.files_indexed += 1;
    }

    if let Some(embedder) = embedder {
        let identity = embedder.identity().clone();
        for batch in pending_embed.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, body)| body.clone()).collect();
            match embedder.embed(&texts).await {
                Ok(vectors) => {
                    for ((chunk_id, _), vector) in batch.iter().zip(vectors) {
                        storage.store_vector(chunk_id, &identity, &vector)?;
                        report.chunks_embedded += 1;
                    }
                }
                Err(_) => {
                    report.degraded = true;
                    report.chunks_pending_embedding += batch.len();
                }
            }
        }
    } else {
        report.chunks_pending_embedding = pending_embed.len();
    }

    let import_graph = scan_imports(&scanned);
    for (from, targets) in &import_graph.imports {
        let Some(from_file) = storage.get_file(from)? else { continue };
        let Some(from_root) = root_span_id(storage, from_file.id)? else { continue };
        for to in targets {
            let Some(to_file) = storage.get_file(to)? else { continue };
            let Some(to_root) = root_span_id(storage, to_file.id)? else { continue };
            let edge = Edge { source_span: from_root.clone(), target_span: to_root, kind: EdgeKind::Import, confidence: 1.0 };
            storage.upsert_edge(&edge)?;
            report.edges_created += 1;
        }
    }

    #[cfg(feature = "treesitter")]
    {
        report.edges_created += persist_code_graph(storage, &scanned, &import_graph)?;
    }

    write_codemap(storage, &options.repo)?;

    Ok(report)
}

/// Report returned by [`backfill_pending_embeddings`]: how many of the
/// chunks persisted without a vector (degraded-mode indexing, or an
/// embedder added after the fact) were successfully embedded just now.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BackfillReport {
    pub chunks_pending: usize,
    pub chunks_embedded: usize,
    pub degraded: bool,
}

/// Re-embed every chunk missing a vector under `embedder`'s identity,
/// without touching scan state or re-chunking anything. This is what
/// `pampax cache warm` runs: a degraded `index` leaves chunks persisted
/// with no vector and `report.chunks_pending_embedding` counting them;
/// this call drains that queue the next time an embedder is reachable.
pub async fn backfill_pending_embeddings(
    storage: &Storage,
    embedder: &dyn Embedder,
    config: &PampaxConfig,
) -> Result<BackfillReport> {
    let identity = embedder.identity().clone();
    let pending = storage.find_chunks_missing_vector(&identity)?;
    let mut report = BackfillReport { chunks_pending: pending.len(), ..Default::default() };
    let batch_size = config.performance.embedding_batch_size.max(1);

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.body.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) => {
                for (chunk, vector) in batch.iter().zip(vectors) {
                    storage.store_vector(&chunk.id, &identity, &vector)?;
                    report.chunks_embedded += 1;
                }
            }
            Err(_) => {
                report.degraded = true;
            }
        }
    }
    Ok(report)
}

/// Resolve a `(file, symbol_name)` pair from a structurally-extracted
/// `CodeEdge` to the span id the rest of the system persists edges against.
fn resolve_span_id(storage: &Storage, file_path: &str, symbol: &str) -> Result<Option<String>> {
    let Some(file) = storage.get_file(file_path)? else { return Ok(None) };
    let spans = storage.get_spans_for_file(file.id)?;
    Ok(spans.into_iter().find(|s| s.name == symbol).map(|s| s.id))
}

/// Extract call/type-ref/inheritance edges via tree-sitter and persist
/// them alongside the import edges above. Structurally resolved
/// edges carry a lower confidence than direct imports since name resolution
/// here is heuristic (same-file / imported-file / directory-proximity, see
/// `graph::resolve_symbol`), not a real compiler's symbol table.
#[cfg(feature = "treesitter")]
fn persist_code_graph(
    storage: &Storage,
    scanned: &[crate::scan::ScannedFile],
    import_graph: &crate::scan::ImportGraph,
) -> Result<usize> {
    let ast_index = crate::ast::build_ast_index(scanned);
    let files: Vec<(String, String)> =
        scanned.iter().map(|f| (f.rel_path.clone(), f.abs_path.display().to_string())).collect();
    let code_graph = crate::graph::build_code_graph(&ast_index, import_graph, &files);

    let mut created = 0;
    for edge in &code_graph.edges {
        let Some(source_span) = resolve_span_id(storage, &edge.from_file, &edge.from_symbol)? else { continue };
        let Some(target_span) = resolve_span_id(storage, &edge.to_file, &edge.to_symbol)? else { continue };
        let kind: EdgeKind = edge.kind.into();
        storage.upsert_edge(&Edge { source_span, target_span, kind, confidence: 0.8 })?;
        created += 1;
    }
    Ok(created)
}

fn root_span_id(storage: &Storage, file_id: i64) -> Result<Option<String>> {
    let spans = storage.get_spans_for_file(file_id)?;
    Ok(spans.into_iter().min_by_key(|s| s.byte_start).map(|s| s.id))
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut s = String::with_capacity(digest.len() * 2);
    for b in digest {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Decode as UTF-8, falling back to a lossy replacement-character decode
/// for binary-adjacent or mis-encoded files, flagging the loss so
/// `Chunk::encoding_lossy` can record it.
fn decode_lossy(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), false),
        Err(_) => (String::from_utf8_lossy(bytes).into_owned(), true),
    }
}

fn mtime_unix(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0))
        .unwrap_or(0)
}

fn lang_for_ext(ext: &str) -> &'static str {
    match ext {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "py" | "pyi" => "python",
        "go" => "go",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "java" => "java",
        "md" | "mdx" | "rst" | "adoc" => "docs",
        "toml" | "yaml" | "yml" | "json" | "ini" | "cfg" => "config",
        _ => "text",
    }
}

/// One row of `pampa.codemap.json` per persisted chunk: exactly one entry
/// per stored chunk and vice versa.
#[derive(Debug, Clone, serde::Serialize)]
struct CodemapEntry {
    path: String,
    symbol: String,
    kind: String,
    id: String,
    lang: String,
}

/// Emit `pampa.codemap.json` at the repo root — a lightweight, committable
/// file -> symbol-name manifest an agent can grep without a live index.
/// Entries are sorted by `(path, byte_start)` so the file diffs
/// predictably between runs.
fn write_codemap(storage: &Storage, repo: &Path) -> Result<()> {
    let mut entries = Vec::new();
    for file in storage.all_files()? {
        for chunk in storage.get_chunks_for_file(file.id)? {
            let symbol = match &chunk.span_id {
                Some(span_id) => storage.get_span(span_id)?.map(|s| s.name),
                None => None,
            };
            let kind = match &chunk.span_id {
                Some(span_id) => storage.get_span(span_id)?.map(|s| s.kind.label().to_string()),
                None => None,
            };
            entries.push((
                chunk.byte_start,
                CodemapEntry {
                    path: chunk.path.clone(),
                    symbol: symbol.unwrap_or_else(|| file.path.clone()),
                    kind: kind.unwrap_or_else(|| "module".to_string()),
                    id: chunk.id,
                    lang: chunk.lang,
                },
            ));
        }
    }
    entries.sort_by(|(a_start, a), (b_start, b)| a.path.cmp(&b.path).then(a_start.cmp(b_start)));
    let rows: Vec<CodemapEntry> = entries.into_iter().map(|(_, e)| e).collect();

    let path = repo.join("pampa.codemap.json");
    let body = serde_json::to_vec_pretty(&rows).map_err(|e| crate::error::PampaxError::Internal { message: e.to_string() })?;
    std::fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lang_for_ext_covers_common_extensions() {
        assert_eq!(lang_for_ext("rs"), "rust");
        assert_eq!(lang_for_ext("py"), "python");
        assert_eq!(lang_for_ext("xyz"), "text");
    }

    #[test]
    fn decode_lossy_round_trips_valid_utf8() {
        let (text, lossy) = decode_lossy("hello".as_bytes());
        assert_eq!(text, "hello");
        assert!(!lossy);
    }

    #[test]
    fn decode_lossy_flags_invalid_utf8() {
        let (text, lossy) = decode_lossy(&[0xff, 0xfe, b'a']);
        assert!(lossy);
        assert!(text.contains('a'));
    }

    #[tokio::test]
    async fn indexes_a_small_repo_without_an_embedder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn greet() -> &'static str { \"hi\" }\n").unwrap();
        let storage = Storage::open_in_memory().unwrap();
        let config = PampaxConfig::default();
        let options = IndexOptions { repo: dir.path().to_path_buf(), force: false, include: vec![], exclude: vec![] };
        let report = index(&storage, None, &config, &options).await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert!(report.chunks_created > 0);
        assert_eq!(report.chunks_pending_embedding, report.chunks_created);
    }

    #[tokio::test]
    async fn reindexing_unchanged_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn greet() {}\n").unwrap();
        let storage = Storage::open_in_memory().unwrap();
        let config = PampaxConfig::default();
        let options = IndexOptions { repo: dir.path().to_path_buf(), force: false, include: vec![], exclude: vec![] };
        index(&storage, None, &config, &options).await.unwrap();
        let second = index(&storage, None, &config, &options).await.unwrap();
        assert_eq!(second.files_unchanged, 1);
        assert_eq!(second.files_indexed, 0);
    }

    struct FakeEmbedder(crate::types::EmbedderIdentity);

    #[async_trait::async_trait]
    impl Embedder for FakeEmbedder {
        fn identity(&self) -> &crate::types::EmbedderIdentity {
            &self.0
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn backfill_embeds_chunks_left_pending_by_a_vectorless_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn greet() {}\n").unwrap();
        let storage = Storage::open_in_memory().unwrap();
        let config = PampaxConfig::default();
        let options = IndexOptions { repo: dir.path().to_path_buf(), force: false, include: vec![], exclude: vec![] };
        let report = index(&storage, None, &config, &options).await.unwrap();
        assert!(report.chunks_pending_embedding > 0);

        let embedder = FakeEmbedder(crate::types::EmbedderIdentity { provider: "fake".into(), model: "fake".into(), dim: 2 });
        let backfill = backfill_pending_embeddings(&storage, &embedder, &config).await.unwrap();
        assert_eq!(backfill.chunks_pending, report.chunks_created);
        assert_eq!(backfill.chunks_embedded, report.chunks_created);
        assert!(!backfill.degraded);

        let second = backfill_pending_embeddings(&storage, &embedder, &config).await.unwrap();
        assert_eq!(second.chunks_pending, 0);
    }
}

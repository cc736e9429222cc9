//! SQLite-backed persistence for files, spans, chunks, vectors, edges,
//! memories, and interactions.
//!
//! One writer, many readers: every mutation goes through a single
//! `Mutex<Connection>` guarded transaction, giving single-writer/
//! multi-reader discipline without needing a WAL-mode connection pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::error::{PampaxError, Result};
use crate::types::{
    Chunk, Edge, EdgeKind, EmbedderIdentity, FileRecord, Memory, MemoryKind, MemoryScope,
    PriorityClass, ScopeFilters, Span, SpanKind,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    path          TEXT NOT NULL UNIQUE,
    content_hash  TEXT NOT NULL,
    lang          TEXT NOT NULL,
    size          INTEGER NOT NULL,
    mtime         INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS spans (
    id              TEXT PRIMARY KEY,
    file_id         INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    kind            TEXT NOT NULL,
    parent_span_id  TEXT,
    signature       TEXT,
    byte_start      INTEGER NOT NULL,
    byte_end        INTEGER NOT NULL,
    line_start      INTEGER NOT NULL,
    line_end        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_spans_file ON spans(file_id);

CREATE TABLE IF NOT EXISTS chunks (
    id               TEXT PRIMARY KEY,
    file_id          INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    path             TEXT NOT NULL,
    span_id          TEXT,
    body             TEXT NOT NULL,
    lang             TEXT NOT NULL,
    tags             TEXT NOT NULL,
    priority         TEXT NOT NULL,
    byte_start       INTEGER NOT NULL,
    byte_end         INTEGER NOT NULL,
    encoding_lossy   INTEGER NOT NULL DEFAULT 0,
    is_continuation  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_id);
CREATE INDEX IF NOT EXISTS idx_chunks_span ON chunks(span_id);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    chunk_id UNINDEXED,
    body,
    tags,
    content=''
);

CREATE TABLE IF NOT EXISTS vectors (
    chunk_id        TEXT NOT NULL,
    embedder_key    TEXT NOT NULL,
    dim             INTEGER NOT NULL,
    data            BLOB NOT NULL,
    PRIMARY KEY (chunk_id, embedder_key)
);
CREATE INDEX IF NOT EXISTS idx_vectors_embedder ON vectors(embedder_key);

CREATE TABLE IF NOT EXISTS edges (
    source_span   TEXT NOT NULL,
    target_span   TEXT NOT NULL,
    kind          TEXT NOT NULL,
    confidence    REAL NOT NULL,
    PRIMARY KEY (source_span, target_span, kind)
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_span);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_span);

CREATE TABLE IF NOT EXISTS memories (
    id           TEXT PRIMARY KEY,
    scope        TEXT NOT NULL,
    kind         TEXT NOT NULL,
    key          TEXT,
    value        TEXT NOT NULL,
    weight       REAL NOT NULL,
    expires_at   INTEGER,
    provenance   TEXT NOT NULL,
    created_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_scope_kind ON memories(scope, kind);

CREATE TABLE IF NOT EXISTS interactions (
    id                TEXT PRIMARY KEY,
    query             TEXT NOT NULL,
    intent            TEXT NOT NULL,
    bundle_signature  TEXT NOT NULL,
    tokens_used       INTEGER NOT NULL,
    satisfied         INTEGER,
    time_to_fix_ms    INTEGER,
    timestamp         INTEGER NOT NULL,
    correlation_id    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_interactions_signature ON interactions(bundle_signature);
CREATE INDEX IF NOT EXISTS idx_interactions_timestamp ON interactions(timestamp);

CREATE TABLE IF NOT EXISTS context_packs (
    name        TEXT PRIMARY KEY,
    definition  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS packing_profiles (
    repo        TEXT NOT NULL,
    model       TEXT NOT NULL,
    definition  TEXT NOT NULL,
    PRIMARY KEY (repo, model)
);

CREATE TABLE IF NOT EXISTS meta (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
"#;

/// Bumped whenever `SCHEMA` changes shape in a way a running store needs to
/// migrate for (new table, new column, changed key format). `pampax migrate`
/// compares this against the value recorded in `meta.schema_version` at
/// `Storage::open` time.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// A `path:startByte-endByte` hit from the lexical (FTS5) index.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub chunk_id: String,
    pub rank: f64,
}

/// A cosine-similarity hit from the vector index for one embedder identity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub score: f32,
}

/// Result of `Storage::integrity_check`, surfaced by `pampax health`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IntegrityReport {
    pub orphan_vectors: usize,
    pub orphan_edges: usize,
    pub orphan_chunks: usize,
    pub duration_ms: u64,
}

/// Thin in-process cache of chunk vectors per embedder identity, used to
/// back `vector_search` with a flat cosine scan. Kept separate from SQLite
/// so repeated queries against a hot embedder identity don't round-trip
/// through row deserialization every time.
#[derive(Default)]
struct VectorCache {
    by_embedder: HashMap<String, Vec<(String, Vec<f32>)>>,
}

pub struct Storage {
    conn: Mutex<Connection>,
    vectors: RwLock<VectorCache>,
    busy_timeout: Duration,
    busy_retry_max_attempts: u32,
}

impl Storage {
    /// Open (creating if absent) the SQLite database described by `config`,
    /// applying the schema and the `PRAGMA`s this connection always wants
    /// (foreign keys on, WAL for concurrent readers).
    pub fn open(repo_root: &Path, config: &StorageConfig) -> Result<Self> {
        let db_path = repo_root.join(&config.path);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(SCHEMA)?;

        let storage = Storage {
            conn: Mutex::new(conn),
            vectors: RwLock::new(VectorCache::default()),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            busy_retry_max_attempts: config.busy_retry_max_attempts,
        };
        storage.ensure_schema_version()?;
        storage.warm_vector_cache()?;
        Ok(storage)
    }

    /// Stamp a freshly-opened store with `CURRENT_SCHEMA_VERSION` if it has
    /// none recorded yet (first open of this store). A version already
    /// present is left untouched — bumping it is `migrate`'s job, once a
    /// second schema version exists to migrate to.
    fn ensure_schema_version(&self) -> Result<()> {
        if self.get_meta("schema_version")?.is_none() {
            self.set_meta("schema_version", &CURRENT_SCHEMA_VERSION.to_string())?;
        }
        Ok(())
    }

    /// The schema version recorded in this store, and the version this
    /// binary expects (`CURRENT_SCHEMA_VERSION`). A store older than the
    /// binary needs a migration before its data can be trusted; a store
    /// newer than the binary (opened by a future pampax) is left alone.
    pub fn schema_version(&self) -> Result<(i64, i64)> {
        let stored = self.get_meta("schema_version")?.and_then(|v| v.parse().ok()).unwrap_or(CURRENT_SCHEMA_VERSION);
        Ok((stored, CURRENT_SCHEMA_VERSION))
    }

    /// In-memory, schema-only database — used by unit tests and by `pampax
    /// doctor` dry runs that must not touch disk.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Storage {
            conn: Mutex::new(conn),
            vectors: RwLock::new(VectorCache::default()),
            busy_timeout: Duration::from_millis(5000),
            busy_retry_max_attempts: 5,
        })
    }

    fn warm_vector_cache(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT chunk_id, embedder_key, dim, data FROM vectors")?;
        let rows = stmt.query_map([], |row| {
            let chunk_id: String = row.get(0)?;
            let embedder_key: String = row.get(1)?;
            let dim: usize = row.get::<_, i64>(2)? as usize;
            let data: Vec<u8> = row.get(3)?;
            Ok((chunk_id, embedder_key, dim, data))
        })?;
        let mut cache = self.vectors.write().unwrap();
        for row in rows {
            let (chunk_id, embedder_key, dim, data) = row?;
            let vec = bytes_to_f32(&data, dim);
            cache.by_embedder.entry(embedder_key).or_default().push((chunk_id, vec));
        }
        Ok(())
    }

    /// Retry a write operation against `SQLITE_BUSY` up to
    /// `busy_retry_max_attempts` times with linear backoff.
    fn with_retry<T>(&self, mut f: impl FnMut(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            let conn = self.conn.lock().unwrap();
            match f(&conn) {
                Ok(v) => return Ok(v),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy
                        && attempt < self.busy_retry_max_attempts =>
                {
                    drop(conn);
                    attempt += 1;
                    std::thread::sleep(self.busy_timeout / (self.busy_retry_max_attempts + 1));
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // -----------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------

    /// Persist (or update) a file record. Rejects files over `max_bytes`
    /// with `FileTooLarge` rather than truncating silently — the caller
    /// (`indexer.rs`) is expected to skip the file and continue.
    pub fn upsert_file(
        &self,
        path: &str,
        content_hash: &str,
        lang: &str,
        size: u64,
        mtime: i64,
        max_bytes: u64,
    ) -> Result<i64> {
        if size > max_bytes {
            return Err(crate::error::PampaxError::FileTooLarge { path: path.to_string(), size, limit: max_bytes });
        }
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO files (path, content_hash, lang, size, mtime) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path) DO UPDATE SET content_hash=excluded.content_hash, lang=excluded.lang,
                     size=excluded.size, mtime=excluded.mtime",
                params![path, content_hash, lang, size as i64, mtime],
            )?;
            conn.query_row("SELECT id FROM files WHERE path = ?1", params![path], |r| r.get(0))
        })
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, path, content_hash, lang, size, mtime FROM files WHERE path = ?1",
            params![path],
            |r| {
                Ok(FileRecord {
                    id: r.get(0)?,
                    path: r.get(1)?,
                    content_hash: r.get(2)?,
                    lang: r.get(3)?,
                    size: r.get::<_, i64>(4)? as u64,
                    mtime: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn all_files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, path, content_hash, lang, size, mtime FROM files")?;
        let rows = stmt.query_map([], |r| {
            Ok(FileRecord {
                id: r.get(0)?,
                path: r.get(1)?,
                content_hash: r.get(2)?,
                lang: r.get(3)?,
                size: r.get::<_, i64>(4)? as u64,
                mtime: r.get(5)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn delete_file(&self, file_id: i64) -> Result<()> {
        self.with_retry(|conn| conn.execute("DELETE FROM files WHERE id = ?1", params![file_id]))?;
        Ok(())
    }

    /// A single digest over every `(path, content_hash)` pair currently on
    /// record, sorted by path for determinism. The signature cache folds
    /// this into its key as the bundle's provenance: any file add, remove,
    /// or content change anywhere in the repo changes the digest, which
    /// changes the key, which makes a stale cache entry simply unreachable
    /// rather than something that needs explicit eviction.
    pub fn repo_fingerprint(&self) -> Result<String> {
        let mut files = self.all_files()?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let mut hasher = Sha256::new();
        for f in &files {
            hasher.update(f.path.as_bytes());
            hasher.update(b":");
            hasher.update(f.content_hash.as_bytes());
            hasher.update(b"|");
        }
        let digest = hasher.finalize();
        let mut s = String::with_capacity(digest.len() * 2);
        for b in digest {
            s.push_str(&format!("{b:02x}"));
        }
        Ok(s)
    }

    // -----------------------------------------------------------------
    // Spans
    // -----------------------------------------------------------------

    /// Replace every span belonging to `file_id` with `spans`, transactionally.
    pub fn replace_spans(&self, file_id: i64, spans: &[Span]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM spans WHERE file_id = ?1", params![file_id])?;
        for span in spans {
            tx.execute(
                "INSERT INTO spans (id, file_id, name, kind, parent_span_id, signature, byte_start, byte_end, line_start, line_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    span.id,
                    file_id,
                    span.name,
                    span.kind.label(),
                    span.parent_span_id,
                    span.signature,
                    span.byte_start as i64,
                    span.byte_end as i64,
                    span.line_start as i64,
                    span.line_end as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_spans_for_file(&self, file_id: i64) -> Result<Vec<Span>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, file_id, name, kind, parent_span_id, signature, byte_start, byte_end, line_start, line_end
             FROM spans WHERE file_id = ?1",
        )?;
        let rows = stmt.query_map(params![file_id], row_to_span)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// `(span_id, name)` for every persisted span, used by the retriever's
    /// symbol seed stream to fuzzy-match query terms against identifiers
    /// without loading full span records.
    pub fn all_span_names(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name FROM spans")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// The chunk whose `span_id` matches, preferring the primary
    /// (non-continuation) chunk when a span was split.
    pub fn get_chunk_for_span(&self, span_id: &str) -> Result<Option<Chunk>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, file_id, path, span_id, body, lang, tags, priority, byte_start, byte_end, encoding_lossy, is_continuation
             FROM chunks WHERE span_id = ?1 ORDER BY is_continuation ASC LIMIT 1",
            params![span_id],
            row_to_chunk,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_span(&self, span_id: &str) -> Result<Option<Span>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, file_id, name, kind, parent_span_id, signature, byte_start, byte_end, line_start, line_end
             FROM spans WHERE id = ?1",
            params![span_id],
            row_to_span,
        )
        .optional()
        .map_err(Into::into)
    }

    // -----------------------------------------------------------------
    // Chunks
    // -----------------------------------------------------------------

    pub fn store_chunk(&self, chunk: &Chunk) -> Result<()> {
        let tags_joined = chunk.tags.join(",");
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO chunks (id, file_id, path, span_id, body, lang, tags, priority, byte_start, byte_end, encoding_lossy, is_continuation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET body=excluded.body, tags=excluded.tags",
                params![
                    chunk.id,
                    chunk.file_id,
                    chunk.path,
                    chunk.span_id,
                    chunk.body,
                    chunk.lang,
                    tags_joined,
                    priority_label(chunk.priority),
                    chunk.byte_start as i64,
                    chunk.byte_end as i64,
                    chunk.encoding_lossy as i64,
                    chunk.is_continuation as i64,
                ],
            )?;
            conn.execute(
                "INSERT INTO chunks_fts (rowid, chunk_id, body, tags)
                 SELECT (SELECT COALESCE(MAX(rowid), 0) + 1 FROM chunks_fts), ?1, ?2, ?3
                 WHERE NOT EXISTS (SELECT 1 FROM chunks_fts WHERE chunk_id = ?1)",
                params![chunk.id, chunk.body, tags_joined],
            )?;
            Ok(())
        })
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, file_id, path, span_id, body, lang, tags, priority, byte_start, byte_end, encoding_lossy, is_continuation
             FROM chunks WHERE id = ?1",
            params![chunk_id],
            row_to_chunk,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_chunks_for_file(&self, file_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, file_id, path, span_id, body, lang, tags, priority, byte_start, byte_end, encoding_lossy, is_continuation
             FROM chunks WHERE file_id = ?1 ORDER BY byte_start",
        )?;
        let rows = stmt.query_map(params![file_id], row_to_chunk)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn delete_chunks_for_file(&self, file_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM chunks WHERE file_id = ?1")?;
        let ids: Vec<String> =
            stmt.query_map(params![file_id], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?;
        for id in &ids {
            conn.execute("DELETE FROM chunks_fts WHERE chunk_id = ?1", params![id])?;
        }
        conn.execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id])?;
        Ok(ids)
    }

    /// Chunks with no persisted vector under `identity` — the "pending
    /// embeddings" queue §4.3 says degraded-mode indexing leaves behind.
    /// `pampax cache warm` re-embeds exactly this set once the embedder is
    /// reachable again, without re-chunking or re-scanning the repo.
    pub fn find_chunks_missing_vector(&self, identity: &EmbedderIdentity) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, file_id, path, span_id, body, lang, tags, priority, byte_start, byte_end, encoding_lossy, is_continuation
             FROM chunks WHERE id NOT IN (SELECT chunk_id FROM vectors WHERE embedder_key = ?1)",
        )?;
        let rows = stmt.query_map(params![identity.key()], row_to_chunk)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Lexical search over `chunks_fts`, ranked by blending SQLite's native
    /// `bm25()` rank with `grep_relevance_score`'s IDF-weighted coverage
    /// scoring (filename/definition-file/position bonuses the raw FTS rank
    /// doesn't see). `FtsHit::rank` keeps the bm25 convention — lower is more
    /// relevant — so callers that only compare ranks don't need to change.
    pub fn fts_search(&self, query: &str, filters: &ScopeFilters, limit: usize, offset: usize) -> Result<Vec<FtsHit>> {
        let conn = self.conn.lock().unwrap();
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let terms: Vec<String> = query
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        // Fetch `limit + offset` candidates from SQLite's bm25 ordering, then
        // re-rank the whole window with grep relevance before paginating --
        // the relevance reranker can reorder within the window, so offset
        // has to apply after reranking rather than as a SQL OFFSET.
        let fetch = (limit + offset) as i64;
        let mut stmt = conn.prepare(
            "SELECT c.chunk_id, bm25(chunks_fts) AS rank, ch.path, ch.body, ch.lang
             FROM chunks_fts c
             JOIN chunks ch ON ch.id = c.chunk_id
             WHERE chunks_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sanitized, fetch], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?, r.get::<_, String>(2)?, r.get::<_, String>(3)?, r.get::<_, String>(4)?))
        })?;
        let raw: Vec<(String, f64, String, String, String)> = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let hits = rerank_with_grep_relevance(raw, &terms);
        let filtered = apply_scope_filters(&conn, hits, filters)?;
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }

    // -----------------------------------------------------------------
    // Vectors
    // -----------------------------------------------------------------

    pub fn store_vector(&self, chunk_id: &str, identity: &EmbedderIdentity, vector: &[f32]) -> Result<()> {
        let key = identity.key();
        let bytes = f32_to_bytes(vector);
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO vectors (chunk_id, embedder_key, dim, data) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(chunk_id, embedder_key) DO UPDATE SET data=excluded.data",
                params![chunk_id, key, identity.dim as i64, bytes],
            )
        })?;
        let mut cache = self.vectors.write().unwrap();
        let entries = cache.by_embedder.entry(key).or_default();
        entries.retain(|(id, _)| id != chunk_id);
        entries.push((chunk_id.to_string(), vector.to_vec()));
        Ok(())
    }

    pub fn has_vector(&self, chunk_id: &str, identity: &EmbedderIdentity) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE chunk_id = ?1 AND embedder_key = ?2",
            params![chunk_id, identity.key()],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Brute-force cosine top-k over the in-memory vector cache for one
    /// embedder identity. Sufficient for repo-scale corpora (tens of
    /// thousands of chunks); an `hnsw_rs` index can be layered on later
    /// without changing this signature.
    pub fn vector_search(
        &self,
        query_vector: &[f32],
        identity: &EmbedderIdentity,
        filters: &ScopeFilters,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let cache = self.vectors.read().unwrap();
        let Some(entries) = cache.by_embedder.get(&identity.key()) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<VectorHit> = entries
            .iter()
            .map(|(id, v)| VectorHit { chunk_id: id.clone(), score: cosine(query_vector, v) })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(1) * 4);
        drop(cache);
        let conn = self.conn.lock().unwrap();
        let hits: Vec<FtsHit> =
            scored.iter().map(|h| FtsHit { chunk_id: h.chunk_id.clone(), rank: h.score as f64 }).collect();
        let filtered = apply_scope_filters(&conn, hits, filters)?;
        let keep: std::collections::HashSet<String> = filtered.into_iter().map(|h| h.chunk_id).collect();
        scored.retain(|h| keep.contains(&h.chunk_id));
        scored.truncate(limit);
        Ok(scored)
    }

    // -----------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------

    pub fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO edges (source_span, target_span, kind, confidence) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(source_span, target_span, kind) DO UPDATE SET confidence=excluded.confidence",
                params![edge.source_span, edge.target_span, edge.kind.label(), edge.confidence],
            )
        })?;
        Ok(())
    }

    pub fn get_edges_from(&self, span_id: &str) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT source_span, target_span, kind, confidence FROM edges WHERE source_span = ?1",
        )?;
        let rows = stmt.query_map(params![span_id], row_to_edge)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_edges_to(&self, span_id: &str) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT source_span, target_span, kind, confidence FROM edges WHERE target_span = ?1",
        )?;
        let rows = stmt.query_map(params![span_id], row_to_edge)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // -----------------------------------------------------------------
    // Memories
    // -----------------------------------------------------------------

    pub fn upsert_memory(&self, memory: &Memory) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO memories (id, scope, kind, key, value, weight, expires_at, provenance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET value=excluded.value, weight=excluded.weight, expires_at=excluded.expires_at",
                params![
                    memory.id,
                    scope_label(memory.scope),
                    kind_label(memory.kind),
                    memory.key,
                    memory.value,
                    memory.weight,
                    memory.expires_at,
                    memory.provenance.to_string(),
                    memory.created_at,
                ],
            )
        })?;
        Ok(())
    }

    pub fn delete_memory(&self, id: &str) -> Result<()> {
        self.with_retry(|conn| conn.execute("DELETE FROM memories WHERE id = ?1", params![id]))?;
        Ok(())
    }

    pub fn find_memories(
        &self,
        scope: Option<MemoryScope>,
        kind: Option<MemoryKind>,
        key: Option<&str>,
        now: i64,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT id, scope, kind, key, value, weight, expires_at, provenance, created_at
             FROM memories WHERE (expires_at IS NULL OR expires_at > ?1)",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];
        if let Some(s) = scope {
            sql.push_str(" AND scope = ?");
            args.push(Box::new(scope_label(s).to_string()));
        }
        if let Some(k) = kind {
            sql.push_str(" AND kind = ?");
            args.push(Box::new(kind_label(k).to_string()));
        }
        if let Some(k) = key {
            sql.push_str(" AND key = ?");
            args.push(Box::new(k.to_string()));
        }
        sql.push_str(" ORDER BY weight DESC, created_at DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn prune_expired_memories(&self, now: i64) -> Result<usize> {
        self.with_retry(|conn| conn.execute("DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1", params![now]))
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------
    // Interactions
    // -----------------------------------------------------------------

    pub fn record_interaction(&self, interaction: &crate::types::Interaction) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO interactions (id, query, intent, bundle_signature, tokens_used, satisfied, time_to_fix_ms, timestamp, correlation_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET satisfied=excluded.satisfied, time_to_fix_ms=excluded.time_to_fix_ms",
                params![
                    interaction.id,
                    interaction.query,
                    interaction.intent,
                    interaction.bundle_signature,
                    interaction.tokens_used as i64,
                    interaction.satisfied,
                    interaction.time_to_fix_ms.map(|v| v as i64),
                    interaction.timestamp,
                    interaction.correlation_id,
                ],
            )
        })?;
        Ok(())
    }

    pub fn find_recent_interactions(&self, since: i64, limit: usize) -> Result<Vec<crate::types::Interaction>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, query, intent, bundle_signature, tokens_used, satisfied, time_to_fix_ms, timestamp, correlation_id
             FROM interactions WHERE timestamp >= ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since, limit as i64], row_to_interaction)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn find_interaction_by_signature(&self, signature: &str) -> Result<Option<crate::types::Interaction>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, query, intent, bundle_signature, tokens_used, satisfied, time_to_fix_ms, timestamp, correlation_id
             FROM interactions WHERE bundle_signature = ?1 ORDER BY timestamp DESC LIMIT 1",
            params![signature],
            row_to_interaction,
        )
        .optional()
        .map_err(Into::into)
    }

    // -----------------------------------------------------------------
    // Packing profiles / context packs
    // -----------------------------------------------------------------

    pub fn save_packing_profile(&self, repo: &str, model: &str, definition: &serde_json::Value) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO packing_profiles (repo, model, definition) VALUES (?1, ?2, ?3)
                 ON CONFLICT(repo, model) DO UPDATE SET definition=excluded.definition",
                params![repo, model, definition.to_string()],
            )
        })?;
        Ok(())
    }

    pub fn load_packing_profile(&self, repo: &str, model: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT definition FROM packing_profiles WHERE repo = ?1 AND model = ?2",
                params![repo, model],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub fn save_context_pack(&self, pack: &crate::types::ContextPack) -> Result<()> {
        let definition = serde_json::to_string(pack).map_err(|e| PampaxError::Internal { message: e.to_string() })?;
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO context_packs (name, definition) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET definition=excluded.definition",
                params![pack.name, definition],
            )
        })?;
        Ok(())
    }

    pub fn load_context_pack(&self, name: &str) -> Result<Option<crate::types::ContextPack>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row("SELECT definition FROM context_packs WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    // -----------------------------------------------------------------
    // Meta / schema version
    // -----------------------------------------------------------------

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                params![key, value],
            )
        })?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------

    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let start = Instant::now();
        let conn = self.conn.lock().unwrap();
        let orphan_vectors: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vectors v WHERE NOT EXISTS (SELECT 1 FROM chunks c WHERE c.id = v.chunk_id)",
            [],
            |r| r.get(0),
        )?;
        let orphan_edges: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges e WHERE NOT EXISTS (SELECT 1 FROM spans s WHERE s.id = e.source_span)
               OR NOT EXISTS (SELECT 1 FROM spans s WHERE s.id = e.target_span)",
            [],
            |r| r.get(0),
        )?;
        let orphan_chunks: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks c WHERE NOT EXISTS (SELECT 1 FROM files f WHERE f.id = c.file_id)",
            [],
            |r| r.get(0),
        )?;
        Ok(IntegrityReport {
            orphan_vectors: orphan_vectors as usize,
            orphan_edges: orphan_edges as usize,
            orphan_chunks: orphan_chunks as usize,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn file_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

/// Adapts `Storage` to `graph::EdgeSource` so `graph::traverse` can walk the
/// persisted edge table instead of an in-memory map, per the module's own
/// design note that traversal should work "against anything implementing
/// EdgeSource."
impl crate::graph::EdgeSource for Storage {
    fn edges_from(&self, span_id: &str) -> Vec<Edge> {
        self.get_edges_from(span_id).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn row_to_span(r: &rusqlite::Row) -> rusqlite::Result<Span> {
    let kind_str: String = r.get(3)?;
    Ok(Span {
        id: r.get(0)?,
        file_id: r.get(1)?,
        name: r.get(2)?,
        kind: parse_span_kind(&kind_str),
        parent_span_id: r.get(4)?,
        signature: r.get(5)?,
        byte_start: r.get::<_, i64>(6)? as usize,
        byte_end: r.get::<_, i64>(7)? as usize,
        line_start: r.get::<_, i64>(8)? as usize,
        line_end: r.get::<_, i64>(9)? as usize,
    })
}

fn row_to_chunk(r: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let tags: String = r.get(6)?;
    let priority: String = r.get(7)?;
    Ok(Chunk {
        id: r.get(0)?,
        file_id: r.get(1)?,
        path: r.get(2)?,
        span_id: r.get(3)?,
        body: r.get(4)?,
        lang: r.get(5)?,
        tags: tags.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
        priority: parse_priority(&priority),
        byte_start: r.get::<_, i64>(8)? as usize,
        byte_end: r.get::<_, i64>(9)? as usize,
        encoding_lossy: r.get::<_, i64>(10)? != 0,
        is_continuation: r.get::<_, i64>(11)? != 0,
    })
}

fn row_to_edge(r: &rusqlite::Row) -> rusqlite::Result<Edge> {
    let kind_str: String = r.get(2)?;
    Ok(Edge {
        source_span: r.get(0)?,
        target_span: r.get(1)?,
        kind: EdgeKind::parse(&kind_str).unwrap_or(EdgeKind::Reference),
        confidence: r.get(3)?,
    })
}

fn row_to_memory(r: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let scope: String = r.get(1)?;
    let kind: String = r.get(2)?;
    let provenance: String = r.get(7)?;
    Ok(Memory {
        id: r.get(0)?,
        scope: parse_scope(&scope),
        kind: parse_kind(&kind),
        key: r.get(3)?,
        value: r.get(4)?,
        weight: r.get(5)?,
        expires_at: r.get(6)?,
        provenance: serde_json::from_str(&provenance).unwrap_or(serde_json::Value::Null),
        created_at: r.get(8)?,
    })
}

fn row_to_interaction(r: &rusqlite::Row) -> rusqlite::Result<crate::types::Interaction> {
    Ok(crate::types::Interaction {
        id: r.get(0)?,
        query: r.get(1)?,
        intent: r.get(2)?,
        bundle_signature: r.get(3)?,
        tokens_used: r.get::<_, i64>(4)? as usize,
        satisfied: r.get(5)?,
        time_to_fix_ms: r.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        timestamp: r.get(7)?,
        correlation_id: r.get(8)?,
    })
}

fn apply_scope_filters(conn: &Connection, hits: Vec<FtsHit>, filters: &ScopeFilters) -> rusqlite::Result<Vec<FtsHit>> {
    if filters.path_glob.is_empty() && filters.lang.is_empty() && filters.tags.is_empty() && filters.exclude.is_empty() {
        return Ok(hits);
    }
    let mut kept = Vec::with_capacity(hits.len());
    for hit in hits {
        let (path, lang, tags): (String, String, String) = conn.query_row(
            "SELECT path, lang, tags FROM chunks WHERE id = ?1",
            params![hit.chunk_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        if !filters.lang.is_empty() && !filters.lang.iter().any(|l| l == &lang) {
            continue;
        }
        if !filters.path_glob.is_empty() && !filters.path_glob.iter().any(|g| glob_match(g, &path)) {
            continue;
        }
        if filters.exclude.iter().any(|g| glob_match(g, &path)) {
            continue;
        }
        if !filters.tags.is_empty() {
            let tag_set: Vec<&str> = tags.split(',').collect();
            if !filters.tags.iter().any(|t| tag_set.contains(&t.as_str())) {
                continue;
            }
        }
        kept.push(hit);
    }
    Ok(kept)
}

/// Minimal glob matcher supporting `*` segments, enough for path/exclude
/// filters without pulling in a dedicated glob crate for a single use site.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return candidate.starts_with(prefix);
    }
    if let Some(stripped) = pattern.strip_prefix('*') {
        return candidate.ends_with(stripped);
    }
    candidate.contains(pattern)
}

/// Blend SQLite's bm25 rank with `grep_relevance_score`'s IDF/coverage
/// scoring. IDF per term is computed locally from the hit set's document
/// frequency (terms present in fewer of the returned chunks score higher),
/// which is cheap and needs no extra corpus-wide query.
fn rerank_with_grep_relevance(
    raw: Vec<(String, f64, String, String, String)>,
    terms: &[String],
) -> Vec<FtsHit> {
    if terms.is_empty() || raw.is_empty() {
        return raw.into_iter().map(|(chunk_id, rank, ..)| FtsHit { chunk_id, rank }).collect();
    }
    let n = raw.len() as f64;
    let doc_freq: Vec<usize> = terms
        .iter()
        .map(|t| raw.iter().filter(|(_, _, _, body, _)| body.to_lowercase().contains(t.as_str())).count())
        .collect();

    let mut scored: Vec<FtsHit> = raw
        .iter()
        .map(|(chunk_id, bm25_rank, path, body, lang)| {
            let body_lower = body.to_lowercase();
            let filename_lower = path.to_lowercase();
            let lines: Vec<&str> = body.lines().collect();
            let total_lines = lines.len().max(1);
            let match_count: usize = terms.iter().map(|t| body_lower.matches(t.as_str()).count()).sum();
            let terms_matched = terms.iter().filter(|t| body_lower.contains(t.as_str())).count();
            let first_match_line = lines
                .iter()
                .position(|line| {
                    let line_lower = line.to_lowercase();
                    terms.iter().any(|t| line_lower.contains(t.as_str()))
                })
                .unwrap_or(total_lines);
            let idf_weights: Vec<f64> =
                doc_freq.iter().map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0).collect();
            let ext = lang.as_str();
            let grep_score = crate::types::grep_relevance_score(
                match_count,
                total_lines,
                &filename_lower,
                ext,
                terms,
                terms_matched,
                first_match_line,
                &idf_weights,
            );
            // Combine: bm25 rank is already a decent lexical signal on its
            // own; grep_score's bonuses nudge ties (filename hits,
            // definition files, match density) without overriding a clearly
            // better bm25 match. Negated so lower-is-better holds.
            FtsHit { chunk_id: chunk_id.clone(), rank: bm25_rank - grep_score }
        })
        .collect();
    scored.sort_by(|a, b| a.rank.partial_cmp(&b.rank).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

fn sanitize_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() || c == '_' { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().map(|w| format!("{w}*")).collect::<Vec<_>>().join(" OR ")
}

fn f32_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32(bytes: &[u8], dim: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dim);
    for chunk in bytes.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    out
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for i in 0..a.len() {
        dot += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn priority_label(p: PriorityClass) -> &'static str {
    match p {
        PriorityClass::Code => "code",
        PriorityClass::Tests => "tests",
        PriorityClass::Comments => "comments",
        PriorityClass::Examples => "examples",
        PriorityClass::Config => "config",
        PriorityClass::Docs => "docs",
    }
}

fn parse_priority(s: &str) -> PriorityClass {
    match s {
        "tests" => PriorityClass::Tests,
        "comments" => PriorityClass::Comments,
        "examples" => PriorityClass::Examples,
        "config" => PriorityClass::Config,
        "docs" => PriorityClass::Docs,
        _ => PriorityClass::Code,
    }
}

fn parse_span_kind(s: &str) -> SpanKind {
    match s {
        "class" => SpanKind::Class,
        "function" => SpanKind::Function,
        "method" => SpanKind::Method,
        "constructor" => SpanKind::Constructor,
        "field" => SpanKind::Field,
        "enum" => SpanKind::Enum,
        "mixin" => SpanKind::Mixin,
        "extension" => SpanKind::Extension,
        "comment" => SpanKind::Comment,
        _ => SpanKind::Module,
    }
}

fn scope_label(s: MemoryScope) -> &'static str {
    match s {
        MemoryScope::Repo => "repo",
        MemoryScope::Workspace => "workspace",
        MemoryScope::Global => "global",
    }
}

fn parse_scope(s: &str) -> MemoryScope {
    match s {
        "workspace" => MemoryScope::Workspace,
        "global" => MemoryScope::Global,
        _ => MemoryScope::Repo,
    }
}

fn kind_label(k: MemoryKind) -> &'static str {
    match k {
        MemoryKind::Fact => "fact",
        MemoryKind::Gotcha => "gotcha",
        MemoryKind::Decision => "decision",
        MemoryKind::Plan => "plan",
        MemoryKind::Rule => "rule",
        MemoryKind::NameAlias => "name_alias",
        MemoryKind::Insight => "insight",
        MemoryKind::Exemplar => "exemplar",
    }
}

fn parse_kind(s: &str) -> MemoryKind {
    match s {
        "gotcha" => MemoryKind::Gotcha,
        "decision" => MemoryKind::Decision,
        "plan" => MemoryKind::Plan,
        "rule" => MemoryKind::Rule,
        "name_alias" => MemoryKind::NameAlias,
        "insight" => MemoryKind::Insight,
        "exemplar" => MemoryKind::Exemplar,
        _ => MemoryKind::Fact,
    }
}

// Re-exported so callers can build `EmbedderIdentity`/`Arc<Storage>` without
// a second import line.
pub type SharedStorage = Arc<Storage>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeKind as TypeEdgeKind, SpanKind};

    fn sample_span(id: &str, file_id: i64) -> Span {
        Span {
            id: id.to_string(),
            file_id,
            name: "greet".into(),
            kind: SpanKind::Function,
            parent_span_id: None,
            signature: Some("fn greet()".into()),
            byte_start: 0,
            byte_end: 20,
            line_start: 1,
            line_end: 3,
        }
    }

    #[test]
    fn repo_fingerprint_changes_when_a_file_content_hash_changes() {
        let storage = Storage::open_in_memory().unwrap();
        storage.upsert_file("src/lib.rs", "abc", "rust", 100, 1, 1024 * 1024).unwrap();
        let before = storage.repo_fingerprint().unwrap();
        storage.upsert_file("src/lib.rs", "def", "rust", 110, 2, 1024 * 1024).unwrap();
        let after = storage.repo_fingerprint().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn repo_fingerprint_is_stable_for_an_unchanged_store() {
        let storage = Storage::open_in_memory().unwrap();
        storage.upsert_file("src/lib.rs", "abc", "rust", 100, 1, 1024 * 1024).unwrap();
        storage.upsert_file("src/main.rs", "xyz", "rust", 50, 1, 1024 * 1024).unwrap();
        assert_eq!(storage.repo_fingerprint().unwrap(), storage.repo_fingerprint().unwrap());
    }

    #[test]
    fn schema_version_defaults_to_current_on_a_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path(), &StorageConfig::default()).unwrap();
        let (stored, current) = storage.schema_version().unwrap();
        assert_eq!(stored, current);
        assert_eq!(stored, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn find_chunks_missing_vector_excludes_embedded_chunks() {
        let storage = Storage::open_in_memory().unwrap();
        let file_id = storage.upsert_file("src/lib.rs", "abc", "rust", 100, 1, 1024 * 1024).unwrap();
        storage.replace_spans(file_id, &[sample_span("span1", file_id)]).unwrap();
        let chunk = Chunk {
            id: "c1".into(),
            file_id,
            path: "src/lib.rs".into(),
            span_id: Some("span1".into()),
            body: "fn greet() {}".into(),
            lang: "rust".into(),
            tags: vec![],
            priority: PriorityClass::Code,
            byte_start: 0,
            byte_end: 13,
            encoding_lossy: false,
            is_continuation: false,
        };
        storage.store_chunk(&chunk).unwrap();
        let identity = EmbedderIdentity { provider: "local".into(), model: "m".into(), dim: 2 };
        let pending = storage.find_chunks_missing_vector(&identity).unwrap();
        assert_eq!(pending.len(), 1);
        storage.store_vector("c1", &identity, &[0.1, 0.2]).unwrap();
        let pending = storage.find_chunks_missing_vector(&identity).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn upsert_file_rejects_oversized_content() {
        let storage = Storage::open_in_memory().unwrap();
        let err = storage.upsert_file("src/big.rs", "abc", "rust", 5000, 1, 1024).unwrap_err();
        assert_eq!(err.kind(), "file_too_large");
    }

    #[test]
    fn upsert_file_is_idempotent_on_path() {
        let storage = Storage::open_in_memory().unwrap();
        let id1 = storage.upsert_file("src/lib.rs", "abc", "rust", 100, 1, 1024 * 1024).unwrap();
        let id2 = storage.upsert_file("src/lib.rs", "def", "rust", 120, 2, 1024 * 1024).unwrap();
        assert_eq!(id1, id2);
        let file = storage.get_file("src/lib.rs").unwrap().unwrap();
        assert_eq!(file.content_hash, "def");
    }

    #[test]
    fn chunk_round_trips_through_fts() {
        let storage = Storage::open_in_memory().unwrap();
        let file_id = storage.upsert_file("src/lib.rs", "abc", "rust", 100, 1, 1024 * 1024).unwrap();
        storage.replace_spans(file_id, &[sample_span("span1", file_id)]).unwrap();
        let chunk = Chunk {
            id: "chunk1".into(),
            file_id,
            path: "src/lib.rs".into(),
            span_id: Some("span1".into()),
            body: "fn greet() { println!(\"hi\"); }".into(),
            lang: "rust".into(),
            tags: vec!["lib".into()],
            priority: PriorityClass::Code,
            byte_start: 0,
            byte_end: 20,
            encoding_lossy: false,
            is_continuation: false,
        };
        storage.store_chunk(&chunk).unwrap();
        let hits = storage.fts_search("greet", &ScopeFilters::default(), 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "chunk1");
    }

    #[test]
    fn fts_search_ranks_filename_match_above_incidental_mention() {
        let storage = Storage::open_in_memory().unwrap();
        let file_a = storage.upsert_file("src/retriever.rs", "a", "rust", 100, 1, 1024 * 1024).unwrap();
        let file_b = storage.upsert_file("src/unrelated.rs", "b", "rust", 100, 1, 1024 * 1024).unwrap();
        storage.replace_spans(file_a, &[sample_span("span-a", file_a)]).unwrap();
        storage.replace_spans(file_b, &[sample_span("span-b", file_b)]).unwrap();
        let make_chunk = |id: &str, file_id: i64, path: &str, span_id: &str, body: &str| Chunk {
            id: id.into(),
            file_id,
            path: path.into(),
            span_id: Some(span_id.into()),
            body: body.into(),
            lang: "rust".into(),
            tags: vec![],
            priority: PriorityClass::Code,
            byte_start: 0,
            byte_end: body.len(),
            encoding_lossy: false,
            is_continuation: false,
        };
        storage
            .store_chunk(&make_chunk(
                "retriever-chunk",
                file_a,
                "src/retriever.rs",
                "span-a",
                "pub fn retrieve(query: &str) { /* retriever retriever retriever */ }",
            ))
            .unwrap();
        storage
            .store_chunk(&make_chunk(
                "unrelated-chunk",
                file_b,
                "src/unrelated.rs",
                "span-b",
                "// mentions a retriever once in passing",
            ))
            .unwrap();

        let hits = storage.fts_search("retriever", &ScopeFilters::default(), 10, 0).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "retriever-chunk");
    }

    #[test]
    fn vector_search_ranks_by_cosine_similarity() {
        let storage = Storage::open_in_memory().unwrap();
        let identity = EmbedderIdentity { provider: "local".into(), model: "test".into(), dim: 2 };
        storage.store_vector("a", &identity, &[1.0, 0.0]).unwrap();
        storage.store_vector("b", &identity, &[0.0, 1.0]).unwrap();
        let hits = storage.vector_search(&[0.9, 0.1], &identity, &ScopeFilters::default(), 2).unwrap();
        assert_eq!(hits[0].chunk_id, "a");
    }

    #[test]
    fn edge_source_adapter_returns_stored_edges() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_edge(&Edge { source_span: "a".into(), target_span: "b".into(), kind: TypeEdgeKind::Call, confidence: 0.9 })
            .unwrap();
        let edges = crate::graph::EdgeSource::edges_from(&storage, "a");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_span, "b");
    }

    #[test]
    fn integrity_check_finds_orphan_vector() {
        let storage = Storage::open_in_memory().unwrap();
        let identity = EmbedderIdentity { provider: "local".into(), model: "test".into(), dim: 2 };
        storage.store_vector("ghost", &identity, &[1.0, 0.0]).unwrap();
        let report = storage.integrity_check().unwrap();
        assert_eq!(report.orphan_vectors, 1);
    }
}

//! AST → Span → Chunk pipeline.
//!
//! Walks `ast.rs`'s per-file symbol table into `types::Span`s, then packs
//! spans into size-bounded `types::Chunk`s with a content-addressed id.
//! Falls back to fixed-size line windows for languages `ast.rs` doesn't
//! parse. Reuses `scan.rs`'s word-splitting for tag mining and a
//! brace/indent language-family classification for deciding when a
//! declaration is "oversized" enough to need a continuation chunk.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

#[cfg(feature = "treesitter")]
use crate::ast::{FileAst, SymbolKind};
use crate::types::{Chunk, PriorityClass, Span, SpanKind};

/// Target chunk size band, in estimated tokens (chars/4). Below
/// `MIN_CHUNK_TOKENS` a leaf span is packed together with its following
/// siblings (see `pack_small_siblings`); above `MAX_CHUNK_TOKENS` a
/// declaration is split into a primary (signature) chunk plus one or more
/// continuation chunks.
pub const MIN_CHUNK_TOKENS: usize = 20;
pub const MAX_CHUNK_TOKENS: usize = 400;
const CHARS_PER_TOKEN: usize = 4;
const MAX_CHUNK_CHARS: usize = MAX_CHUNK_TOKENS * CHARS_PER_TOKEN;

/// Line-window fallback parameters for languages with no tree-sitter grammar.
const FALLBACK_WINDOW_LINES: usize = 50;
const FALLBACK_OVERLAP_LINES: usize = 5;

/// One parsed `(Span, Chunk)` pair plus whatever parent span it was split
/// from, so the caller can thread `parent_span_id` across primary/continuation
/// pairs before persisting.
pub struct ChunkedSpan {
    pub span: Span,
    pub chunk: Chunk,
}

/// Chunk a single file's content into spans + chunks.
///
/// `file_id` must already be persisted (storage assigns ids on
/// `upsert_file`); `path` is the repo-relative path used for tag mining and
/// chunk-id hashing; `lang` is the detected language tag (e.g. `"rust"`).
#[must_use]
pub fn chunk_file(file_id: i64, path: &str, content: &str, ext: &str, lang: &str) -> Vec<ChunkedSpan> {
    let priority = PriorityClass::classify(path, lang);
    let path_tags = tags_from_path(path);

    #[cfg(feature = "treesitter")]
    {
        if let Some(ast) = crate::ast::parse_file(content, ext) {
            if !ast.symbols.is_empty() {
                return chunk_from_ast(file_id, path, content, lang, priority, &path_tags, &ast);
            }
        }
    }
    #[cfg(not(feature = "treesitter"))]
    {
        let _ = ext;
    }

    chunk_by_line_windows(file_id, path, content, lang, priority, &path_tags)
}

// ---------------------------------------------------------------------------
// AST-driven chunking
// ---------------------------------------------------------------------------

#[cfg(feature = "treesitter")]
fn chunk_from_ast(
    file_id: i64,
    path: &str,
    content: &str,
    lang: &str,
    priority: PriorityClass,
    path_tags: &[String],
    ast: &FileAst,
) -> Vec<ChunkedSpan> {
    let line_offsets = build_line_offsets(content);
    let mut out = Vec::with_capacity(ast.symbols.len());

    // Map each AST symbol index to the span id of its persisted span, so
    // child symbols (methods) can reference their parent (class/impl).
    let mut span_ids: Vec<String> = Vec::with_capacity(ast.symbols.len());
    // Symbols any other symbol points to as a parent can't be merged away --
    // their span id is load-bearing for the child's `parent_span_id`.
    let has_children: Vec<bool> = {
        let mut flags = vec![false; ast.symbols.len()];
        for symbol in &ast.symbols {
            if let Some(p) = symbol.parent_idx {
                flags[p] = true;
            }
        }
        flags
    };
    let mut mergeable = Vec::with_capacity(ast.symbols.len());

    for (idx, symbol) in ast.symbols.iter().enumerate() {
        let byte_start = line_offsets.line_start_byte(symbol.start_line);
        let byte_end = line_offsets.line_end_byte(symbol.end_line, content.len());
        let body = safe_slice(content, byte_start, byte_end);

        let span_kind = span_kind_for(symbol.kind);
        let parent_span_id = symbol.parent_idx.and_then(|p| span_ids.get(p).cloned());
        let span_id = span_id_for(path, byte_start, byte_end, &body);
        span_ids.push(span_id.clone());

        let span = Span {
            id: span_id.clone(),
            file_id,
            name: symbol.name.clone(),
            kind: span_kind,
            parent_span_id: parent_span_id.clone(),
            signature: Some(symbol.signature.clone()),
            byte_start,
            byte_end,
            line_start: symbol.start_line,
            line_end: symbol.end_line,
        };

        let mut tags = path_tags.to_vec();
        tags.extend(tags_from_identifier(&symbol.name));
        tags.extend(doc_annotation_tags(&body));

        if body.len() <= MAX_CHUNK_CHARS {
            let chunk = Chunk {
                id: span_id.clone(),
                file_id,
                path: path.to_string(),
                span_id: Some(span_id.clone()),
                body,
                lang: lang.to_string(),
                tags,
                priority,
                byte_start,
                byte_end,
                encoding_lossy: false,
                is_continuation: false,
            };
            mergeable.push(!has_children[idx]);
            out.push(ChunkedSpan { span, chunk });
        } else {
            let pieces = split_oversized(file_id, path, lang, priority, &tags, &span, &body);
            mergeable.extend(std::iter::repeat(false).take(pieces.len()));
            out.extend(pieces);
        }
    }

    pack_small_siblings(file_id, path, lang, out, &mergeable)
}

/// Pack runs of small sibling spans up together so each emitted chunk's
/// token estimate lands in `[MIN_CHUNK_TOKENS, MAX_CHUNK_TOKENS]` instead of
/// leaving single small declarations (a handful of consts, short helpers)
/// as their own chunk. Only merges adjacent leaf spans sharing a parent --
/// a span any child points to as `parent_span_id` is left untouched.
#[cfg(feature = "treesitter")]
fn pack_small_siblings(
    file_id: i64,
    path: &str,
    lang: &str,
    items: Vec<ChunkedSpan>,
    mergeable: &[bool],
) -> Vec<ChunkedSpan> {
    let mut out: Vec<ChunkedSpan> = Vec::with_capacity(items.len());
    let mut out_mergeable: Vec<bool> = Vec::with_capacity(items.len());

    for (item, &can_merge) in items.into_iter().zip(mergeable.iter()) {
        let estimated_tokens = item.chunk.body.len() / CHARS_PER_TOKEN;
        if can_merge && !item.chunk.is_continuation {
            if let (Some(prev), Some(&prev_merge)) = (out.last(), out_mergeable.last()) {
                let prev_tokens = prev.chunk.body.len() / CHARS_PER_TOKEN;
                let same_parent = prev.span.parent_span_id == item.span.parent_span_id;
                let combined_chars = prev.chunk.body.len() + item.chunk.body.len() + 2;
                if prev_merge && same_parent && prev_tokens < MIN_CHUNK_TOKENS && combined_chars <= MAX_CHUNK_CHARS {
                    let merged_small = estimated_tokens < MIN_CHUNK_TOKENS;
                    let prev = out.pop().unwrap();
                    out.push(merge_chunked_spans(file_id, path, lang, prev, item));
                    out_mergeable.pop();
                    out_mergeable.push(merged_small);
                    continue;
                }
            }
        }
        out.push(item);
        out_mergeable.push(can_merge && estimated_tokens < MIN_CHUNK_TOKENS);
    }

    out
}

/// Combine two sibling spans/chunks into one, concatenating bodies with a
/// blank line and unioning tags. The merged span's id is content-addressed
/// over the combined byte range, same as any other span.
#[cfg(feature = "treesitter")]
fn merge_chunked_spans(file_id: i64, path: &str, lang: &str, a: ChunkedSpan, b: ChunkedSpan) -> ChunkedSpan {
    let byte_start = a.span.byte_start.min(b.span.byte_start);
    let byte_end = a.span.byte_end.max(b.span.byte_end);
    let body = format!("{}\n\n{}", a.chunk.body, b.chunk.body);
    let span_id = span_id_for(path, byte_start, byte_end, &body);
    let name = format!("{}+{}", a.span.name, b.span.name);

    let mut tags = a.chunk.tags;
    tags.extend(b.chunk.tags);
    tags.sort();
    tags.dedup();

    let span = Span {
        id: span_id.clone(),
        file_id,
        name,
        kind: a.span.kind,
        parent_span_id: a.span.parent_span_id,
        signature: a.span.signature,
        byte_start,
        byte_end,
        line_start: a.span.line_start.min(b.span.line_start),
        line_end: a.span.line_end.max(b.span.line_end),
    };
    let chunk = Chunk {
        id: span_id.clone(),
        file_id,
        path: path.to_string(),
        span_id: Some(span_id),
        body,
        lang: lang.to_string(),
        tags,
        priority: a.chunk.priority,
        byte_start,
        byte_end,
        encoding_lossy: a.chunk.encoding_lossy || b.chunk.encoding_lossy,
        is_continuation: false,
    };
    ChunkedSpan { span, chunk }
}

#[cfg(feature = "treesitter")]
fn span_kind_for(kind: SymbolKind) -> SpanKind {
    match kind {
        SymbolKind::Function => SpanKind::Function,
        SymbolKind::Method => SpanKind::Method,
        SymbolKind::Class | SymbolKind::Struct | SymbolKind::Interface => SpanKind::Class,
        SymbolKind::Enum => SpanKind::Enum,
        SymbolKind::Trait | SymbolKind::Impl => SpanKind::Extension,
        SymbolKind::TypeAlias => SpanKind::Field,
        SymbolKind::Constant => SpanKind::Field,
    }
}

/// Split an oversized declaration into a primary chunk (signature + opening
/// lines up to the budget) and one or more continuation chunks covering the
/// remainder, each tagged `is_continuation` and carrying the primary span's
/// id as `span_id` so the assembler can reunite them on promotion.
fn split_oversized(
    file_id: i64,
    path: &str,
    lang: &str,
    priority: PriorityClass,
    tags: &[String],
    span: &Span,
    body: &str,
) -> Vec<ChunkedSpan> {
    let mut out = Vec::new();
    let bytes = body.as_bytes();
    let mut offset = 0usize;
    let mut first = true;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        let take = remaining.min(MAX_CHUNK_CHARS);
        let mut end = offset + take;
        // Don't split mid-codepoint.
        while end < bytes.len() && !body.is_char_boundary(end) {
            end -= 1;
        }
        let piece = &body[offset..end];
        let byte_start = span.byte_start + offset;
        let byte_end = span.byte_start + end;
        let chunk_id = span_id_for(path, byte_start, byte_end, piece);

        out.push(ChunkedSpan {
            span: Span {
                id: if first { span.id.clone() } else { chunk_id.clone() },
                file_id,
                name: span.name.clone(),
                kind: span.kind,
                parent_span_id: span.parent_span_id.clone(),
                signature: if first { span.signature.clone() } else { None },
                byte_start,
                byte_end,
                line_start: span.line_start,
                line_end: span.line_end,
            },
            chunk: Chunk {
                id: chunk_id,
                file_id,
                path: path.to_string(),
                span_id: Some(span.id.clone()),
                body: piece.to_string(),
                lang: lang.to_string(),
                tags: tags.to_vec(),
                priority,
                byte_start,
                byte_end,
                encoding_lossy: false,
                is_continuation: !first,
            },
        });

        offset = end;
        first = false;
    }

    out
}

// ---------------------------------------------------------------------------
// Line-window fallback (unsupported languages / parse failure)
// ---------------------------------------------------------------------------

fn chunk_by_line_windows(
    file_id: i64,
    path: &str,
    content: &str,
    lang: &str,
    priority: PriorityClass,
    path_tags: &[String],
) -> Vec<ChunkedSpan> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let line_offsets = build_line_offsets(content);
    let mut out = Vec::new();
    let stride = FALLBACK_WINDOW_LINES - FALLBACK_OVERLAP_LINES;
    let mut start_line = 1usize;

    while start_line <= lines.len() {
        let end_line = (start_line + FALLBACK_WINDOW_LINES - 1).min(lines.len());
        let byte_start = line_offsets.line_start_byte(start_line);
        let byte_end = line_offsets.line_end_byte(end_line, content.len());
        let body = safe_slice(content, byte_start, byte_end);
        let span_id = span_id_for(path, byte_start, byte_end, &body);

        let span = Span {
            id: span_id.clone(),
            file_id,
            name: format!("{path}:{start_line}-{end_line}"),
            kind: SpanKind::Module,
            parent_span_id: None,
            signature: None,
            byte_start,
            byte_end,
            line_start: start_line,
            line_end: end_line,
        };

        let chunk = Chunk {
            id: span_id.clone(),
            file_id,
            path: path.to_string(),
            span_id: Some(span_id.clone()),
            body,
            lang: lang.to_string(),
            tags: path_tags.to_vec(),
            priority,
            byte_start,
            byte_end,
            encoding_lossy: false,
            is_continuation: false,
        };
        out.push(ChunkedSpan { span, chunk });

        if end_line == lines.len() {
            break;
        }
        start_line += stride;
    }

    out
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct LineOffsets {
    /// Byte offset of the start of each 1-based line; `starts[0]` is unused.
    starts: Vec<usize>,
}

impl LineOffsets {
    fn line_start_byte(&self, line: usize) -> usize {
        self.starts.get(line).copied().unwrap_or_else(|| *self.starts.last().unwrap_or(&0))
    }

    fn line_end_byte(&self, line: usize, total_len: usize) -> usize {
        self.starts.get(line + 1).copied().unwrap_or(total_len)
    }
}

fn build_line_offsets(content: &str) -> LineOffsets {
    let mut starts = vec![0usize, 0usize];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    LineOffsets { starts }
}

fn safe_slice(content: &str, start: usize, end: usize) -> String {
    let end = end.min(content.len());
    let start = start.min(end);
    content.get(start..end).unwrap_or("").trim_end().to_string()
}

/// Stable chunk id: `SHA-256(path:byteStart-byteEnd:body)`, hex-encoded.
fn span_id_for(path: &str, byte_start: usize, byte_end: usize, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b":");
    hasher.update(byte_start.to_string().as_bytes());
    hasher.update(b"-");
    hasher.update(byte_end.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Mine tags from a repo-relative path: each directory/file segment,
/// CamelCase/snake_case split, grounded in `scan.rs::describe()`.
fn tags_from_path(path: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for segment in path.split(['/', '.']) {
        if segment.len() < 2 {
            continue;
        }
        tags.extend(tags_from_identifier(segment));
    }
    tags.sort();
    tags.dedup();
    tags
}

fn tags_from_identifier(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c.to_ascii_lowercase());
        prev_lower = c.is_lowercase();
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.into_iter().filter(|w| w.len() > 1).collect()
}

fn annotation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@pampa-(?:tags|intent):\s*([^\n]+)").unwrap())
}

/// Extract `@pampa-tags:` / `@pampa-intent:` doc-comment annotations
/// as comma/space-separated tags.
fn doc_annotation_tags(body: &str) -> Vec<String> {
    let re = annotation_regex();
    let mut tags = Vec::new();
    for cap in re.captures_iter(body) {
        let list = &cap[1];
        for tag in list.split([',', ' ']) {
            let tag = tag.trim();
            if !tag.is_empty() {
                tags.push(tag.to_lowercase());
            }
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_window_fallback_covers_whole_file() {
        let content = (1..=120).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunk_by_line_windows(1, "unknown.xyz", &content, "unknown", PriorityClass::Code, &[]);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks.first().unwrap().span.line_start, 1);
        assert_eq!(chunks.last().unwrap().span.line_end, 120);
    }

    #[test]
    fn chunk_id_is_stable_for_identical_input() {
        let a = span_id_for("src/lib.rs", 0, 10, "fn main() {}");
        let b = span_id_for("src/lib.rs", 0, 10, "fn main() {}");
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_id_changes_with_body() {
        let a = span_id_for("src/lib.rs", 0, 10, "fn main() {}");
        let b = span_id_for("src/lib.rs", 0, 10, "fn main() { }");
        assert_ne!(a, b);
    }

    #[test]
    fn tags_from_identifier_splits_camel_and_snake_case() {
        assert_eq!(tags_from_identifier("parseFileAst"), vec!["parse", "file", "ast"]);
        assert_eq!(tags_from_identifier("build_code_graph"), vec!["build", "code", "graph"]);
    }

    #[test]
    fn doc_annotation_tags_are_extracted() {
        let body = "/// @pampa-tags: auth, session\nfn login() {}";
        assert_eq!(doc_annotation_tags(body), vec!["auth", "session"]);
    }

    #[cfg(feature = "treesitter")]
    fn leaf_span(name: &str, parent: Option<&str>, body: &str, start: usize) -> ChunkedSpan {
        let byte_start = start;
        let byte_end = start + body.len();
        let span_id = span_id_for("src/consts.rs", byte_start, byte_end, body);
        let span = Span {
            id: span_id.clone(),
            file_id: 1,
            name: name.to_string(),
            kind: SpanKind::Field,
            parent_span_id: parent.map(str::to_string),
            signature: Some(body.to_string()),
            byte_start,
            byte_end,
            line_start: 1,
            line_end: 1,
        };
        let chunk = Chunk {
            id: span_id.clone(),
            file_id: 1,
            path: "src/consts.rs".into(),
            span_id: Some(span_id),
            body: body.to_string(),
            lang: "rust".into(),
            tags: vec![],
            priority: PriorityClass::Code,
            byte_start,
            byte_end,
            encoding_lossy: false,
            is_continuation: false,
        };
        ChunkedSpan { span, chunk }
    }

    #[test]
    #[cfg(feature = "treesitter")]
    fn small_sibling_consts_are_packed_up_to_the_min_token_band() {
        let a = leaf_span("A", None, "const A: u8 = 1;", 0);
        let b = leaf_span("B", None, "const B: u8 = 2;", 20);
        let c = leaf_span("C", None, "const C: u8 = 3;", 40);
        let items = vec![a, b, c];
        let mergeable = vec![true, true, true];
        let packed = pack_small_siblings(1, "src/consts.rs", "rust", items, &mergeable);
        assert!(packed.len() < 3, "small adjacent consts should have been merged");
        assert!(packed[0].chunk.body.contains("const A"));
        assert!(packed[0].chunk.body.contains("const B"));
    }

    #[test]
    #[cfg(feature = "treesitter")]
    fn a_span_with_children_is_never_merged_away() {
        let parent = leaf_span("Impl", None, "impl Foo {}", 0);
        let sibling = leaf_span("bar", None, "fn bar() {}", 20);
        let items = vec![parent, sibling];
        // mergeable[0] = false because another symbol points to it as a parent.
        let mergeable = vec![false, true];
        let packed = pack_small_siblings(1, "src/lib.rs", "rust", items, &mergeable);
        assert_eq!(packed.len(), 2);
    }

    #[test]
    fn oversized_span_splits_into_primary_and_continuation() {
        let huge_body = "x".repeat(MAX_CHUNK_TOKENS * CHARS_PER_TOKEN * 3);
        let span = Span {
            id: "parent".into(),
            file_id: 1,
            name: "huge_fn".into(),
            kind: SpanKind::Function,
            parent_span_id: None,
            signature: Some("fn huge_fn()".into()),
            byte_start: 0,
            byte_end: huge_body.len(),
            line_start: 1,
            line_end: 500,
        };
        let pieces = split_oversized(1, "src/lib.rs", "rust", PriorityClass::Code, &[], &span, &huge_body);
        assert!(pieces.len() > 1);
        assert!(!pieces[0].chunk.is_continuation);
        assert!(pieces[1].chunk.is_continuation);
    }
}

//! Repository file walking and multi-language import resolution — the
//! discovery half of the indexing pipeline. Produces the `ScannedFile` list
//! and `ImportGraph` that `indexer.rs` turns into chunks, and that
//! `ast.rs`/`graph.rs` use to resolve cross-file call/type edges.

use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Maximum file size (in bytes) that will be read into memory during a scan.
pub const MAX_FILE_READ: usize = 1024 * 1024;

/// Runtime configuration for scanning. Loaded from `pampax.toml` or defaults.
#[derive(Clone)]
pub struct ScanConfig {
    pub root: PathBuf,
    /// Directories to scan (relative to root). Empty = scan root itself.
    pub scan_dirs: Vec<String>,
    /// Directory names to skip during walk.
    pub skip_dirs: HashSet<String>,
    /// File extensions to include. Empty = all text files.
    pub extensions: HashSet<String>,
    /// Directory names to collapse/strip from category paths.
    pub noise_dirs: HashSet<String>,
}

impl ScanConfig {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            scan_dirs: Vec::new(),
            extensions: HashSet::new(),
            skip_dirs: [
                ".git",
                "node_modules",
                "__pycache__",
                "target",
                "dist",
                "build",
                ".next",
                "vendor",
                ".pampax",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            noise_dirs: ["Private", "Public", "Internal", "Source", "Src", "Include", "src", "lib"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Build a `ScanConfig` from the loaded `[indexer]` config section.
    pub fn from_indexer_config(root: PathBuf, cfg: &crate::config::IndexerConfig) -> Self {
        let mut sc = Self::new(root);
        sc.skip_dirs = cfg.exclude.iter().cloned().collect();
        if !cfg.include.is_empty() {
            sc.extensions = cfg
                .include
                .iter()
                .filter_map(|p| p.rsplit_once('.').map(|(_, e)| e.to_string()))
                .collect();
        }
        sc
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("."))
    }
}

/// A single file within a category, carrying its path, description, and size.
#[derive(Clone, serde::Serialize)]
pub struct FileEntry {
    pub path: String,
    pub desc: String,
    pub size: u64,
}

/// Dependency entry for a module, split into public and private (dev) dependencies.
#[derive(Clone, serde::Serialize, Default)]
pub struct DepEntry {
    pub public: Vec<String>,
    pub private: Vec<String>,
    #[serde(rename = "categoryPath")]
    pub category_path: String,
}

/// Metadata for a file discovered during the directory scan.
#[derive(Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub desc: String,
    pub ext: String,
}

/// Bidirectional import/include graph mapping files to their dependencies
/// and dependents, consumed by `graph.rs`'s symbol resolver.
pub struct ImportGraph {
    /// file -> files it imports (resolved to rel_paths)
    pub imports: BTreeMap<String, Vec<String>>,
    /// file -> files that import it
    pub imported_by: BTreeMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Descriptions and categories
// ---------------------------------------------------------------------------

/// Generate a human-readable description for a file by splitting its stem into words and appending a language hint.
pub fn describe(rel_path: &str) -> String {
    let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);

    // CamelCase word splitting
    let mut words = String::new();
    let chars: Vec<char> = stem.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 {
            let prev = chars[i - 1];
            if (prev.is_lowercase() && c.is_uppercase())
                || (i + 1 < chars.len()
                    && prev.is_uppercase()
                    && c.is_uppercase()
                    && chars[i + 1].is_lowercase())
            {
                words.push(' ');
            }
        }
        if c == '_' || c == '-' {
            words.push(' ');
        } else {
            words.push(c);
        }
    }
    let words = words.trim().to_string();

    let ext = rel_path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    let hint = match ext {
        // Headers
        "h" | "hpp" | "hxx" => "header",
        // Implementations
        "cpp" | "cxx" | "cc" | "c" => "impl",
        // Shaders
        "usf" | "ush" | "hlsl" | "glsl" | "vert" | "frag" | "comp" | "wgsl" => "shader",
        // Config
        "ini" | "cfg" | "conf" | "toml" | "yaml" | "yml" | "json" | "xml" => "config",
        // Scripts
        "py" | "rb" | "lua" | "sh" | "bash" | "zsh" | "ps1" | "psm1" | "psd1" | "bat"
        | "cmd" => "script",
        // C# source
        "cs" => "source",
        // Build
        "csproj" | "sln" | "cmake" | "make" | "gradle" | "props" | "targets" => "build",
        // Web source
        "js" | "ts" | "jsx" | "tsx" | "mjs" | "cjs" => "source",
        // Style
        "css" | "scss" | "less" | "sass" => "style",
        // Template
        "html" | "htm" | "vue" | "svelte" => "template",
        // Primary languages
        "rs" | "go" | "java" | "kt" | "scala" | "swift" => "source",
        // Docs
        "md" | "rst" | "txt" | "adoc" => "doc",
        _ => "",
    };
    if hint.is_empty() {
        words
    } else {
        format!("{words} ({hint})")
    }
}

/// Derive a category path (breadcrumb trail) from a file's directory, stripping noise dirs and scan prefixes.
pub fn get_category_path(rel_path: &str, config: &ScanConfig) -> Vec<String> {
    let mut parts: Vec<&str> = rel_path.split('/').collect();

    // Strip any matching scan_dirs prefix
    for scan_dir in &config.scan_dirs {
        let prefix_parts: Vec<&str> = scan_dir.split('/').collect();
        if parts.len() > prefix_parts.len()
            && parts[..prefix_parts.len()] == prefix_parts[..]
        {
            parts = parts[prefix_parts.len()..].to_vec();
            break;
        }
    }

    // Remove the filename
    if !parts.is_empty() {
        parts.pop();
    }

    // Filter out noise directories
    let filtered: Vec<String> = parts
        .into_iter()
        .filter(|p| !config.noise_dirs.contains(*p))
        .map(|s| s.to_string())
        .collect();

    if filtered.is_empty() {
        vec!["Other".to_string()]
    } else if filtered.len() > 5 {
        filtered[..5].to_vec()
    } else {
        filtered
    }
}

// ---------------------------------------------------------------------------
// Binary file detection
// ---------------------------------------------------------------------------

/// Check if a file appears to be text by reading the first 8KB and looking for null bytes.
fn is_text_file(path: &Path) -> bool {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut buf = [0u8; 8192];
    let n = match std::io::Read::read(&mut file, &mut buf) {
        Ok(n) => n,
        Err(_) => return false,
    };
    !buf[..n].contains(&0)
}

// ---------------------------------------------------------------------------
// Parallel file walking helper
// ---------------------------------------------------------------------------

/// Collect files matching an extension filter using parallel directory walk.
fn walk_files_parallel(
    project_root: &Path,
    scan_dirs: &[String],
    skip_dirs: &HashSet<String>,
    ext_filter: Option<&HashSet<String>>,
) -> Vec<(std::path::PathBuf, String)> {
    let results: Mutex<Vec<(std::path::PathBuf, String)>> = Mutex::new(Vec::new());

    for scan_dir in scan_dirs {
        let dir = project_root.join(scan_dir);
        if !dir.exists() {
            eprintln!("  Skipping {scan_dir} (not found)");
            continue;
        }

        let skip = skip_dirs.clone();
        WalkBuilder::new(&dir)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .threads(rayon::current_num_threads().min(12))
            .filter_entry(move |entry| {
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    let name = entry.file_name().to_string_lossy();
                    return !skip.contains(name.as_ref());
                }
                true
            })
            .build_parallel()
            .run(|| {
                Box::new(|entry| {
                    let entry = match entry {
                        Ok(e) => e,
                        Err(_) => return ignore::WalkState::Continue,
                    };
                    if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                        return ignore::WalkState::Continue;
                    }

                    let abs_path = entry.path().to_path_buf();
                    let ext_str = abs_path
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("");

                    if let Some(exts) = ext_filter {
                        if !exts.contains(ext_str) {
                            return ignore::WalkState::Continue;
                        }
                    }

                    let rel_path = abs_path
                        .strip_prefix(project_root)
                        .unwrap_or(&abs_path)
                        .to_string_lossy()
                        .replace('\\', "/");

                    results.lock().unwrap().push((abs_path, rel_path));
                    ignore::WalkState::Continue
                })
            });
    }

    results.into_inner().unwrap()
}

// ---------------------------------------------------------------------------
// File scanning
// ---------------------------------------------------------------------------

/// Walk the project directory tree and return all discovered files plus a category-keyed manifest.
pub fn scan_files(config: &ScanConfig) -> (Vec<ScannedFile>, BTreeMap<String, Vec<FileEntry>>) {
    // If scan_dirs is empty, scan root itself
    let scan_dirs: Vec<String> = if config.scan_dirs.is_empty() {
        vec![".".to_string()]
    } else {
        config.scan_dirs.clone()
    };

    // Extension filter: None means scan all (with text check)
    let ext_filter: Option<HashSet<String>> = if config.extensions.is_empty() {
        None
    } else {
        Some(config.extensions.clone())
    };

    // Parallel walk
    let raw_files = walk_files_parallel(
        &config.root,
        &scan_dirs,
        &config.skip_dirs,
        ext_filter.as_ref(),
    );

    // If no extension filter, apply binary file check
    let raw_files: Vec<(std::path::PathBuf, String)> = if ext_filter.is_none() {
        raw_files
            .into_par_iter()
            .filter(|(abs_path, _)| is_text_file(abs_path))
            .collect()
    } else {
        raw_files
    };

    // Process in parallel with rayon
    let processed: Vec<(ScannedFile, String, FileEntry)> = raw_files
        .par_iter()
        .map(|(abs_path, rel_path)| {
            let size = fs::metadata(abs_path).map(|m| m.len()).unwrap_or(0);
            let desc = describe(rel_path);
            let cat_parts = get_category_path(rel_path, config);
            let cat_key = cat_parts.join(" > ");
            let ext = abs_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string();

            let scanned = ScannedFile {
                rel_path: rel_path.clone(),
                abs_path: abs_path.clone(),
                desc: desc.clone(),
                ext,
            };
            let entry = FileEntry {
                path: rel_path.clone(),
                desc,
                size,
            };
            (scanned, cat_key, entry)
        })
        .collect();

    let mut all_files = Vec::with_capacity(processed.len());
    let mut category_files: BTreeMap<String, Vec<FileEntry>> = BTreeMap::new();

    for (scanned, cat_key, entry) in processed {
        category_files.entry(cat_key).or_default().push(entry);
        all_files.push(scanned);
    }

    for files in category_files.values_mut() {
        files.sort_by(|a, b| a.path.cmp(&b.path));
    }

    (all_files, category_files)
}

// ---------------------------------------------------------------------------
// Import graph — multi-language import/include resolution
// ---------------------------------------------------------------------------

/// Extension families for import pattern matching
fn import_exts_cpp() -> HashSet<&'static str> {
    ["h", "cpp", "c", "cc", "cxx", "hpp", "hxx", "usf", "ush", "hlsl"]
        .iter()
        .copied()
        .collect()
}

fn import_exts_python() -> HashSet<&'static str> {
    ["py"].iter().copied().collect()
}

fn import_exts_js() -> HashSet<&'static str> {
    ["js", "ts", "jsx", "tsx", "mjs", "cjs"]
        .iter()
        .copied()
        .collect()
}

fn import_exts_rust() -> HashSet<&'static str> {
    ["rs"].iter().copied().collect()
}

fn import_exts_go() -> HashSet<&'static str> {
    ["go"].iter().copied().collect()
}

fn import_exts_csharp() -> HashSet<&'static str> {
    ["cs"].iter().copied().collect()
}

fn import_exts_powershell() -> HashSet<&'static str> {
    ["ps1", "psm1", "psd1"].iter().copied().collect()
}

/// Parse import/include directives across all files and build a bidirectional import graph.
pub fn scan_imports(all_files: &[ScannedFile]) -> ImportGraph {
    let cpp_exts = import_exts_cpp();
    let py_exts = import_exts_python();
    let js_exts = import_exts_js();
    let rust_exts = import_exts_rust();
    let go_exts = import_exts_go();
    let cs_exts = import_exts_csharp();
    let ps_exts = import_exts_powershell();

    // Regex patterns for each language family
    let include_re = regex::Regex::new(r#"#include\s+"([^"]+)""#).unwrap();
    let py_import_re =
        regex::Regex::new(r#"(?m)(?:from\s+([\w.]+)\s+import|^import\s+([\w.]+))"#).unwrap();
    let js_import_re =
        regex::Regex::new(r#"(?:from\s+['"]([^'"]+)['"]|require\s*\(\s*['"]([^'"]+)['"]\s*\))"#)
            .unwrap();
    let rust_import_re =
        regex::Regex::new(r#"(?:use\s+(?:crate|super)::([\w]+)|mod\s+([\w]+)\s*;)"#).unwrap();
    let go_import_re = regex::Regex::new(r#"import\s+(?:\(\s*)?(?:"([^"]+)")"#).unwrap();
    let cs_using_re = regex::Regex::new(r#"(?m)^using\s+(?:static\s+)?([\w.]+)\s*;"#).unwrap();
    // PowerShell: dot-source (. .\file.ps1) and Import-Module
    let ps_dotsource_re = regex::Regex::new(r#"(?m)\.\s+['".]?\.?[\\/]?([^\s'"]+\.ps[md]?1)"#).unwrap();
    let ps_import_re = regex::Regex::new(r#"(?mi)Import-Module\s+['".]?\.?[\\/]?([^\s'";\)]+)"#).unwrap();
    let cs_namespace_re =
        regex::Regex::new(r#"(?m)^(?:namespace\s+([\w.]+))"#).unwrap();

    // Build a lookup: filename (without ext) → Vec<rel_path> for resolving imports
    let mut filename_to_paths: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut filename_ext_to_paths: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for f in all_files {
        let full_filename = f.rel_path.rsplit('/').next().unwrap_or(&f.rel_path);
        filename_ext_to_paths
            .entry(full_filename.to_string())
            .or_default()
            .push(f.rel_path.clone());

        let stem = full_filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(full_filename);
        filename_to_paths
            .entry(stem.to_string())
            .or_default()
            .push(f.rel_path.clone());
    }

    // Build namespace → files index for C# resolution
    let namespace_to_files: BTreeMap<String, Vec<String>> = {
        let mut ns_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let cs_files: Vec<&ScannedFile> = all_files
            .iter()
            .filter(|f| cs_exts.contains(f.ext.as_str()))
            .collect();
        let ns_pairs: Vec<(String, String)> = cs_files
            .par_iter()
            .filter_map(|f| {
                let content = fs::read_to_string(&f.abs_path).ok()?;
                let ns = cs_namespace_re
                    .captures(&content)
                    .and_then(|cap| cap.get(1))
                    .map(|m| m.as_str().to_string())?;
                Some((ns, f.rel_path.clone()))
            })
            .collect();
        for (ns, path) in ns_pairs {
            ns_map.entry(ns).or_default().push(path);
        }
        ns_map
    };

    // Resolve an import string to a file path
    let resolve_import = |import_str: &str| -> Option<String> {
        // Try exact filename match first (for C/C++ includes)
        let filename = import_str.rsplit('/').next().unwrap_or(import_str);
        if let Some(candidates) = filename_ext_to_paths.get(filename) {
            if candidates.len() == 1 {
                return Some(candidates[0].clone());
            }
            // Multiple files with same name — pick the one whose path ends with the import
            let best = candidates
                .iter()
                .find(|c| c.ends_with(import_str))
                .or_else(|| candidates.first());
            if let Some(b) = best {
                return Some(b.clone());
            }
        }

        // Try matching the last component of a dotted/slashed path to filename stems
        let last_component = import_str
            .rsplit(&['.', '/'][..])
            .next()
            .unwrap_or(import_str);
        if let Some(candidates) = filename_to_paths.get(last_component) {
            if candidates.len() == 1 {
                return Some(candidates[0].clone());
            }
            return candidates.first().cloned();
        }

        None
    };

    // Parse imports in parallel
    let pairs: Vec<(String, Vec<String>)> = all_files
        .par_iter()
        .filter_map(|f| {
            let ext = f.ext.as_str();
            let has_patterns = cpp_exts.contains(ext)
                || py_exts.contains(ext)
                || js_exts.contains(ext)
                || rust_exts.contains(ext)
                || go_exts.contains(ext)
                || cs_exts.contains(ext)
                || ps_exts.contains(ext);
            if !has_patterns {
                return None;
            }

            let content = fs::read_to_string(&f.abs_path).ok()?;
            let mut resolved = Vec::new();

            if cpp_exts.contains(ext) {
                for cap in include_re.captures_iter(&content) {
                    if let Some(path) = resolve_import(&cap[1]) {
                        resolved.push(path);
                    }
                }
            }

            if py_exts.contains(ext) {
                for cap in py_import_re.captures_iter(&content) {
                    let import_str = cap
                        .get(1)
                        .or_else(|| cap.get(2))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    if !import_str.is_empty() {
                        if let Some(path) = resolve_import(import_str) {
                            resolved.push(path);
                        }
                    }
                }
            }

            if js_exts.contains(ext) {
                for cap in js_import_re.captures_iter(&content) {
                    let import_str = cap
                        .get(1)
                        .or_else(|| cap.get(2))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    if !import_str.is_empty() && !import_str.starts_with('.') {
                        // Skip relative imports for now, they need path resolution
                        if let Some(path) = resolve_import(import_str) {
                            resolved.push(path);
                        }
                    } else if !import_str.is_empty() {
                        // Relative import — try resolving the last component
                        if let Some(path) = resolve_import(import_str) {
                            resolved.push(path);
                        }
                    }
                }
            }

            if rust_exts.contains(ext) {
                for cap in rust_import_re.captures_iter(&content) {
                    let import_str = cap
                        .get(1)
                        .or_else(|| cap.get(2))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    if !import_str.is_empty() {
                        if let Some(path) = resolve_import(import_str) {
                            resolved.push(path);
                        }
                    }
                }
            }

            if go_exts.contains(ext) {
                for cap in go_import_re.captures_iter(&content) {
                    if let Some(m) = cap.get(1) {
                        if let Some(path) = resolve_import(m.as_str()) {
                            resolved.push(path);
                        }
                    }
                }
            }

            if cs_exts.contains(ext) {
                for cap in cs_using_re.captures_iter(&content) {
                    let ns = &cap[1];
                    // Skip System/Microsoft framework namespaces
                    if ns.starts_with("System") || ns.starts_with("Microsoft") {
                        continue;
                    }
                    // Try exact namespace match first
                    if let Some(files) = namespace_to_files.get(ns) {
                        for file in files {
                            if file != &f.rel_path {
                                resolved.push(file.clone());
                            }
                        }
                        continue;
                    }
                    // Try prefix match: using Foo.Bar matches namespace Foo.Bar.* files
                    let prefix = format!("{}.", ns);
                    for (full_ns, files) in namespace_to_files.iter() {
                        if full_ns.starts_with(&prefix) || full_ns == ns {
                            for file in files {
                                if file != &f.rel_path {
                                    resolved.push(file.clone());
                                }
                            }
                        }
                    }
                    // Fallback: resolve by last component (filename-based)
                    if let Some(path) = resolve_import(ns) {
                        if path != f.rel_path {
                            resolved.push(path);
                        }
                    }
                }
            }

            if ps_exts.contains(ext) {
                // Dot-source: . .\helpers.ps1, . "$PSScriptRoot\utils.ps1"
                for cap in ps_dotsource_re.captures_iter(&content) {
                    if let Some(path) = resolve_import(&cap[1]) {
                        resolved.push(path);
                    }
                }
                // Import-Module .\MyModule or Import-Module MyModule
                for cap in ps_import_re.captures_iter(&content) {
                    if let Some(path) = resolve_import(&cap[1]) {
                        resolved.push(path);
                    }
                }
            }

            if resolved.is_empty() {
                None
            } else {
                resolved.sort();
                resolved.dedup();
                Some((f.rel_path.clone(), resolved))
            }
        })
        .collect();

    // Build bidirectional graph
    let mut imports: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut imported_by: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (file, deps) in pairs {
        for dep in &deps {
            imported_by
                .entry(dep.clone())
                .or_default()
                .push(file.clone());
        }
        imports.insert(file, deps);
    }

    // Sort imported_by lists for consistent output
    for list in imported_by.values_mut() {
        list.sort();
    }

    ImportGraph {
        imports,
        imported_by,
    }
}

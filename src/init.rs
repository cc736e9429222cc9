//! Ecosystem detection backing `pampax config --init`.
//!
//! Covers the languages `ast.rs`'s tree-sitter grammars actually
//! understand: Rust, TypeScript/JavaScript, Python, Go, C/C++, Java.
//! Workspace-member resolution (reading `Cargo.toml`/`package.json`/
//! `pyproject.toml`/`go.work` for monorepo layout) turns "there's a
//! Cargo.toml here" into a sensible default `include` glob list.

use std::collections::BTreeSet;
use std::path::Path;

use crate::config::PampaxConfig;
use crate::error::{PampaxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ecosystem {
    Rust,
    Node,
    Python,
    Go,
    Cpp,
    Java,
}

impl Ecosystem {
    fn label(self) -> &'static str {
        match self {
            Self::Rust => "Rust",
            Self::Node => "Node.js/TypeScript",
            Self::Python => "Python",
            Self::Go => "Go",
            Self::Cpp => "C/C++",
            Self::Java => "Java",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["rs"],
            Self::Node => &["ts", "tsx", "js", "jsx"],
            Self::Python => &["py", "pyi"],
            Self::Go => &["go"],
            Self::Cpp => &["h", "hpp", "cpp", "c", "cc"],
            Self::Java => &["java"],
        }
    }
}

/// Result of scanning a repo root for known ecosystem markers.
#[derive(Debug, Clone, Default)]
pub struct DetectedProject {
    ecosystems: Vec<&'static str>,
    pub scan_dirs: Vec<String>,
    pub extensions: Vec<String>,
    pub skip_dirs: Vec<String>,
    pub workspace_info: Option<String>,
}

impl DetectedProject {
    #[must_use]
    pub fn ecosystem_labels(&self) -> &[&'static str] {
        &self.ecosystems
    }
}

/// "temporal-runtime/temporal-ecs" -> "temporal-runtime", "packages/*" -> "packages".
fn top_level_dir(pattern: &str) -> Option<&str> {
    let clean = pattern.trim_end_matches("/*").trim_end_matches("/**").trim_end_matches('/');
    let top = clean.split('/').next()?;
    (!top.is_empty() && top != ".").then_some(top)
}

fn fallback_dirs(root: &Path, candidates: &[&str]) -> Vec<String> {
    candidates.iter().filter(|d| root.join(d).is_dir()).map(|d| d.to_string()).collect()
}

fn resolve_rust_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    let Ok(content) = std::fs::read_to_string(root.join("Cargo.toml")) else {
        return (fallback_dirs(root, &["src", "crates"]), None);
    };
    let Ok(table) = content.parse::<toml::Table>() else {
        return (fallback_dirs(root, &["src", "crates"]), None);
    };

    if let Some(members) = table.get("workspace").and_then(|w| w.get("members")).and_then(|m| m.as_array()) {
        let mut dirs = BTreeSet::new();
        let mut count = 0;
        for member in members.iter().filter_map(|m| m.as_str()) {
            count += 1;
            if let Some(top) = top_level_dir(member) {
                if root.join(top).is_dir() {
                    dirs.insert(top.to_string());
                }
            }
        }
        if root.join("src").is_dir() {
            dirs.insert("src".to_string());
        }
        if !dirs.is_empty() {
            return (dirs.into_iter().collect(), Some(format!("{count} workspace members")));
        }
    }
    (fallback_dirs(root, &["src", "crates"]), None)
}

fn resolve_node_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    let Ok(content) = std::fs::read_to_string(root.join("package.json")) else {
        return (fallback_dirs(root, &["src", "lib", "app"]), None);
    };
    let Ok(data) = serde_json::from_str::<serde_json::Value>(&content) else {
        return (fallback_dirs(root, &["src", "lib", "app"]), None);
    };

    let patterns: Vec<&str> = if let Some(arr) = data.get("workspaces").and_then(|v| v.as_array()) {
        arr.iter().filter_map(|v| v.as_str()).collect()
    } else if let Some(arr) = data.get("workspaces").and_then(|v| v.get("packages")).and_then(|v| v.as_array()) {
        arr.iter().filter_map(|v| v.as_str()).collect()
    } else {
        return (fallback_dirs(root, &["src", "lib", "app"]), None);
    };

    let mut dirs = BTreeSet::new();
    for pattern in &patterns {
        if let Some(top) = top_level_dir(pattern) {
            if root.join(top).is_dir() {
                dirs.insert(top.to_string());
            }
        }
    }
    if root.join("src").is_dir() {
        dirs.insert("src".to_string());
    }
    if dirs.is_empty() {
        return (fallback_dirs(root, &["src", "lib", "app"]), None);
    }
    let info = format!("{} workspace package globs", patterns.len());
    (dirs.into_iter().collect(), Some(info))
}

fn resolve_go_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    if let Ok(content) = std::fs::read_to_string(root.join("go.work")) {
        let mut dirs = BTreeSet::new();
        let mut in_use_block = false;
        for line in content.lines() {
            let trimmed = line.trim();
            match trimmed {
                "use (" => {
                    in_use_block = true;
                    continue;
                }
                ")" => {
                    in_use_block = false;
                    continue;
                }
                _ => {}
            }
            let path = trimmed.strip_prefix("use ").unwrap_or(trimmed);
            if (in_use_block || trimmed.starts_with("use ")) && !path.is_empty() {
                let path = path.trim().trim_start_matches("./");
                if let Some(top) = top_level_dir(path) {
                    if root.join(top).is_dir() {
                        dirs.insert(top.to_string());
                    }
                }
            }
        }
        if !dirs.is_empty() {
            return (dirs.into_iter().collect(), Some(format!("go.work with {} modules", dirs.len())));
        }
    }
    (fallback_dirs(root, &["cmd", "pkg", "internal", "api", "src"]), None)
}

fn resolve_python_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    if let Ok(content) = std::fs::read_to_string(root.join("pyproject.toml")) {
        if let Ok(table) = content.parse::<toml::Table>() {
            if let Some(members) = table
                .get("tool")
                .and_then(|v| v.get("uv"))
                .and_then(|v| v.get("workspace"))
                .and_then(|v| v.get("members"))
                .and_then(|v| v.as_array())
            {
                let mut dirs = BTreeSet::new();
                for member in members.iter().filter_map(|m| m.as_str()) {
                    if let Some(top) = top_level_dir(member) {
                        if root.join(top).is_dir() {
                            dirs.insert(top.to_string());
                        }
                    }
                }
                if !dirs.is_empty() {
                    return (dirs.into_iter().collect(), Some(format!("{} uv workspace members", dirs.len())));
                }
            }
        }
    }
    (fallback_dirs(root, &["src", "lib", "app"]), None)
}

fn detect_skip_dirs(root: &Path) -> Vec<String> {
    const CANDIDATES: &[&str] = &[
        "target", "dist", "build", "out", ".next", ".nuxt", ".output",
        "node_modules", "vendor", ".venv", "venv", "__pycache__",
        "generated", "gen", ".generated",
    ];
    CANDIDATES.iter().filter(|d| root.join(d).is_dir()).map(|d| d.to_string()).collect()
}

/// Scan `root` for known ecosystem markers and derive a starting set of scan
/// directories, file extensions, and skip directories. Missing markers are
/// simply absent from the result — this never fails, it just returns an
/// empty detection for an unrecognized layout.
#[must_use]
pub fn detect(root: &Path) -> DetectedProject {
    let mut project = DetectedProject::default();
    let mut scan_dirs = BTreeSet::new();
    let mut extensions = BTreeSet::new();

    let mut add = |eco: Ecosystem, dirs: Vec<String>, info: Option<String>| {
        project.ecosystems.push(eco.label());
        scan_dirs.extend(dirs);
        extensions.extend(eco.extensions().iter().map(|s| s.to_string()));
        if project.workspace_info.is_none() {
            project.workspace_info = info;
        }
    };

    if root.join("Cargo.toml").exists() {
        let (dirs, info) = resolve_rust_workspace(root);
        add(Ecosystem::Rust, dirs, info);
    }
    if root.join("package.json").exists() {
        let (dirs, info) = resolve_node_workspace(root);
        add(Ecosystem::Node, dirs, info);
    }
    if root.join("go.mod").exists() || root.join("go.work").exists() {
        let (dirs, info) = resolve_go_workspace(root);
        add(Ecosystem::Go, dirs, info);
    }
    if root.join("pyproject.toml").exists() || root.join("setup.py").exists() || root.join("setup.cfg").exists() {
        let (dirs, info) = resolve_python_workspace(root);
        add(Ecosystem::Python, dirs, info);
    }
    if root.join("CMakeLists.txt").exists() || root.join("Makefile").exists() {
        add(Ecosystem::Cpp, fallback_dirs(root, &["src", "include", "lib"]), None);
    }
    if root.join("pom.xml").exists() || root.join("build.gradle").exists() || root.join("build.gradle.kts").exists() {
        add(Ecosystem::Java, fallback_dirs(root, &["src/main/java", "src"]), None);
    }

    project.scan_dirs = scan_dirs.into_iter().collect();
    project.extensions = extensions.into_iter().collect();
    project.skip_dirs = detect_skip_dirs(root);
    project
}

/// Generate a starter `pampax.toml` from detection and write it to
/// `repo/pampax.toml`, refusing to clobber an existing one. Returns the path
/// written. This is `pampax config --init`'s entry point.
pub fn write_starter_config(repo: &Path) -> Result<std::path::PathBuf> {
    let target = repo.join("pampax.toml");
    if target.exists() {
        return Err(PampaxError::Config {
            message: format!("{} already exists; remove it first to regenerate", target.display()),
        });
    }

    let project = detect(repo);
    let mut config = PampaxConfig::default();
    if !project.skip_dirs.is_empty() {
        let mut exclude = config.indexer.exclude.clone();
        for dir in &project.skip_dirs {
            if !exclude.contains(dir) {
                exclude.push(dir.clone());
            }
        }
        config.indexer.exclude = exclude;
    }
    if !project.scan_dirs.is_empty() {
        config.indexer.include = project.scan_dirs.iter().map(|d| format!("{d}/**")).collect();
    }

    let mut rendered = toml::to_string_pretty(&config)
        .map_err(|e| PampaxError::Config { message: format!("failed to render starter config: {e}") })?;

    if !project.ecosystem_labels().is_empty() {
        let header = format!(
            "# Detected: {}{}\n\n",
            project.ecosystem_labels().join(", "),
            project.workspace_info.as_deref().map(|i| format!(" ({i})")).unwrap_or_default(),
        );
        rendered = header + &rendered;
    }

    std::fs::write(&target, rendered)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rust_crate_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let project = detect(dir.path());
        assert_eq!(project.ecosystem_labels(), &["Rust"]);
        assert!(project.extensions.contains(&"rs".to_string()));
    }

    #[test]
    fn detects_mixed_rust_and_node_monorepo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let project = detect(dir.path());
        assert!(project.ecosystem_labels().contains(&"Rust"));
        assert!(project.ecosystem_labels().contains(&"Node.js/TypeScript"));
    }

    #[test]
    fn unrecognized_layout_detects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let project = detect(dir.path());
        assert!(project.ecosystem_labels().is_empty());
    }

    #[test]
    fn write_starter_config_refuses_to_clobber_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pampax.toml"), "").unwrap();
        assert!(write_starter_config(dir.path()).is_err());
    }

    #[test]
    fn write_starter_config_includes_detected_scan_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let path = write_starter_config(dir.path()).unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("src/**"));
    }
}

//! TOML configuration loading with `PAMPAX_`-prefixed environment overrides.
//!
//! Loads a single TOML document, overlays `PAMPAX_`-prefixed environment
//! variables on top (round-tripping through a generic `toml::Value` rather
//! than hand-writing a match arm per field), and organizes the result into
//! sections: `[logging] [metrics] [cache] [performance] [indexer] [storage]
//! [features] [security]`.

use crate::error::{PampaxError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "text" | "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "text".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Sampling rate for high-frequency metrics.
    pub default_sample_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, default_sample_rate: 0.1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_days: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_days: 7, max_entries: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_embeddings: usize,
    pub embedding_batch_size: usize,
    pub default_deadline_ms: u64,
    /// RSS ceiling (MB) the `memory` health check warns/fails against.
    pub memory_ceiling_mb: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { max_concurrent_embeddings: 8, embedding_batch_size: 32, default_deadline_ms: 30_000, memory_ceiling_mb: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_bytes: u64,
    pub provider: String,
    pub model: String,
    pub embedding_dim: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: default_exclude_dirs(),
            max_file_bytes: 1024 * 1024,
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            embedding_dim: 384,
        }
    }
}

fn default_exclude_dirs() -> Vec<String> {
    [".git", "node_modules", "vendor", "dist", "build", "target", ".pampax"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
    pub busy_retry_max_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: ".pampax/pampax.sqlite".into(),
            busy_timeout_ms: 5000,
            busy_retry_max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub reranker: String, // "off" | "transformers" | "api"
    pub hybrid: bool,
    pub bm25: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self { reranker: "off".into(), hybrid: true, bm25: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub encrypt_chunk_bodies: bool,
    pub encryption_key_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { encrypt_chunk_bodies: false, encryption_key_env: "PAMPAX_ENCRYPTION_KEY".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PampaxConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub cache: CacheConfig,
    pub performance: PerformanceConfig,
    pub indexer: IndexerConfig,
    pub storage: StorageConfig,
    pub features: FeaturesConfig,
    pub security: SecurityConfig,
}

impl PampaxConfig {
    /// Load from `repo/pampax.toml` or `repo/.pampax/pampax.toml` (first wins),
    /// falling back to defaults if neither exists, then apply `PAMPAX_*` env
    /// overrides.
    pub fn load(repo: &Path) -> Result<Self> {
        let candidates =
            [repo.join("pampax.toml"), repo.join(".pampax").join("pampax.toml")];

        let mut cfg = match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?, path)?,
            None => PampaxConfig::default(),
        };

        cfg.apply_env_overrides(std::env::vars());
        Ok(cfg)
    }

    fn from_toml_str(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| PampaxError::Config {
            message: format!("invalid config at {}: {e}", path.display()),
        })
    }

    /// Apply `PAMPAX_SECTION_KEY=value` overrides onto an already-loaded
    /// config, by round-tripping through a `toml::Value` so nested keys
    /// (joined by `_`) can be set without hand-writing a match arm per field.
    fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        let mut value = toml::Value::try_from(&*self).expect("config always serializes");
        for (key, raw) in vars {
            let Some(rest) = key.strip_prefix("PAMPAX_") else { continue };
            let parts: Vec<&str> = rest.to_lowercase().split('_').collect();
            if parts.len() < 2 {
                continue;
            }
            set_nested(&mut value, &parts, &raw);
        }
        if let Ok(updated) = value.try_into() {
            *self = updated;
        }
    }
}

/// Walk a dotted path of table keys, setting the final key to a value parsed
/// from `raw` (bool/int/float/string, in that preference order).
fn set_nested(root: &mut toml::Value, path: &[&str], raw: &str) {
    let Some((last, prefix)) = path.split_last() else { return };
    let mut cursor = root;
    for key in prefix {
        let table = match cursor {
            toml::Value::Table(t) => t,
            _ => return,
        };
        cursor = table.entry(key.to_string()).or_insert_with(|| toml::Value::Table(Default::default()));
    }
    if let toml::Value::Table(table) = cursor {
        table.insert(last.to_string(), parse_scalar(raw));
    }
}

fn parse_scalar(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        toml::Value::Float(f)
    } else {
        toml::Value::String(raw.to_string())
    }
}

/// `.pampax/` directory for a repo root, creating it if absent.
pub fn pampax_dir(repo: &Path) -> PathBuf {
    repo.join(".pampax")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PampaxConfig::default();
        assert_eq!(cfg.cache.ttl_days, 7);
        assert_eq!(cfg.performance.max_concurrent_embeddings, 8);
        assert!(cfg.indexer.exclude.contains(&"node_modules".to_string()));
    }

    #[test]
    fn env_override_sets_nested_scalar() {
        let mut cfg = PampaxConfig::default();
        cfg.apply_env_overrides(
            [("PAMPAX_LOGGING_LEVEL".to_string(), "debug".to_string())].into_iter(),
        );
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn env_override_ignores_unprefixed_vars() {
        let mut cfg = PampaxConfig::default();
        let before = cfg.cache.ttl_days;
        cfg.apply_env_overrides([("PATH".to_string(), "/usr/bin".to_string())].into_iter());
        assert_eq!(cfg.cache.ttl_days, before);
    }
}

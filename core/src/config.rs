//! Configuration types and the fallback-chain loader: explicit path →
//! project-local `.atlas.yml` → user config dir → built-in defaults.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the coordinator binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub cache: CacheConfig,
    pub backup: BackupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            cache: CacheConfig::default(),
            backup: BackupConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration, preferring (in order): an explicit path, a
    /// project-local `.atlas.yml`, a user config dir file, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".atlas.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("atlas").join("atlas.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).context("failed to read config file")?;
        let mut config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        config.apply_env_overrides();
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// A handful of values are operationally supplied by the environment
    /// even when a config file is present.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("ATLAS_STORAGE_DIR") {
            self.storage.base_dir = dir;
        }
        if let Ok(name) = std::env::var("ATLAS_STORAGE_NAME") {
            self.storage.name = name;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "base-dir")]
    pub base_dir: String,
    pub name: String,
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,
    #[serde(rename = "busy-timeout-ms")]
    pub busy_timeout_ms: u64,
    #[serde(rename = "checkpoint-interval-ms")]
    pub checkpoint_interval_ms: u64,
    #[serde(rename = "mmap-size-bytes")]
    pub mmap_size_bytes: i64,
    #[serde(rename = "page-size")]
    pub page_size: u32,
    #[serde(rename = "case-sensitive-paths")]
    pub case_sensitive_paths: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            base_dir: ".atlas".to_string(),
            name: "atlas".to_string(),
            max_retries: 3,
            retry_delay_ms: 1000,
            busy_timeout_ms: 5000,
            checkpoint_interval_ms: 300_000,
            mmap_size_bytes: 30 * 1024 * 1024 * 1024,
            page_size: 4096,
            case_sensitive_paths: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    #[serde(rename = "max-memory-bytes")]
    pub max_memory_bytes: u64,
    #[serde(rename = "max-path-depth")]
    pub max_path_depth: usize,
    #[serde(rename = "max-children-per-parent")]
    pub max_children_per_parent: usize,
    #[serde(rename = "max-dependencies-per-task")]
    pub max_dependencies_per_task: usize,
    #[serde(rename = "max-metadata-bytes")]
    pub max_metadata_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
            max_path_depth: crate::domain::task::MAX_PATH_DEPTH,
            max_children_per_parent: 1000,
            max_dependencies_per_task: 50,
            max_metadata_bytes: 32 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "cache-size")]
    pub cache_size: usize,
    #[serde(rename = "max-cache-memory-bytes")]
    pub max_cache_memory_bytes: u64,
    #[serde(rename = "base-ttl-secs")]
    pub base_ttl_secs: u64,
    #[serde(rename = "max-ttl-secs")]
    pub max_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_size: 2000,
            max_cache_memory_bytes: 512 * 1024 * 1024,
            base_ttl_secs: 900,
            max_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub schedule: String,
    #[serde(rename = "retention-days")]
    pub retention_days: u32,
    #[serde(rename = "max-count")]
    pub max_count: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            enabled: false,
            schedule: "0 0 * * *".to_string(),
            retention_days: 7,
            max_count: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.max_retries, 3);
        assert_eq!(config.limits.max_path_depth, 10);
        assert_eq!(config.cache.cache_size, 2000);
        assert!(!config.backup.enabled);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = r#"
storage:
  name: myproject
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.storage.name, "myproject");
        assert_eq!(config.storage.base_dir, ".atlas");
        assert_eq!(config.limits.max_dependencies_per_task, 50);
    }
}

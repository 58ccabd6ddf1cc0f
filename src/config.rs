use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::EntityType;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_scene_extensions")]
    pub scene_extensions: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub skip_existing: bool,
    /// Reject malformed cphate counters instead of zero-filling them.
    #[serde(default)]
    pub strict_decode: bool,
    #[serde(default = "default_phase_barrier")]
    pub phase_barrier: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub queues: QueueConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            scene_extensions: default_scene_extensions(),
            exclude_globs: default_exclude_globs(),
            skip_existing: false,
            strict_decode: false,
            phase_barrier: default_phase_barrier(),
            cache_ttl_secs: default_cache_ttl_secs(),
            queues: QueueConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_scene_extensions() -> Vec<String> {
    vec![".gltf".to_string()]
}
fn default_exclude_globs() -> Vec<String> {
    vec!["**/.git/**".to_string()]
}
fn default_phase_barrier() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    60
}

/// Bounded capacity of each per-type queue.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_neurons_capacity")]
    pub neurons: usize,
    #[serde(default = "default_large_capacity")]
    pub contacts: usize,
    #[serde(default = "default_large_capacity")]
    pub synapses: usize,
    #[serde(default = "default_singleton_capacity")]
    pub cphate: usize,
    #[serde(default = "default_singleton_capacity")]
    pub nerve_ring: usize,
    #[serde(default = "default_singleton_capacity")]
    pub scale: usize,
    #[serde(default = "default_promoters_capacity")]
    pub promoters: usize,
    #[serde(default = "default_dev_stages_capacity")]
    pub dev_stages: usize,
    #[serde(default = "default_large_capacity")]
    pub meta: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            neurons: default_neurons_capacity(),
            contacts: default_large_capacity(),
            synapses: default_large_capacity(),
            cphate: default_singleton_capacity(),
            nerve_ring: default_singleton_capacity(),
            scale: default_singleton_capacity(),
            promoters: default_promoters_capacity(),
            dev_stages: default_dev_stages_capacity(),
            meta: default_large_capacity(),
        }
    }
}

fn default_neurons_capacity() -> usize {
    10_000
}
fn default_large_capacity() -> usize {
    100_000
}
fn default_singleton_capacity() -> usize {
    20
}
fn default_promoters_capacity() -> usize {
    500
}
fn default_dev_stages_capacity() -> usize {
    100
}

impl QueueConfig {
    pub fn capacity(&self, entity_type: EntityType) -> usize {
        match entity_type {
            EntityType::Neurons => self.neurons,
            EntityType::Contacts => self.contacts,
            EntityType::Synapses => self.synapses,
            EntityType::Cphate => self.cphate,
            EntityType::NerveRing => self.nerve_ring,
            EntityType::Scale => self.scale,
            EntityType::Promoters => self.promoters,
            EntityType::DevStages => self.dev_stages,
            EntityType::Meta => self.meta,
        }
    }
}

impl Config {
    /// Defaults used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/neuroscan.sqlite"),
                max_connections: default_max_connections(),
                busy_timeout_secs: default_busy_timeout_secs(),
            },
            ingest: IngestConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load the config file if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }

    if config.ingest.scene_extensions.is_empty() {
        anyhow::bail!("ingest.scene_extensions must list at least one extension");
    }
    if let Some(ext) = config
        .ingest
        .scene_extensions
        .iter()
        .find(|e| e.trim_start_matches('.').is_empty())
    {
        anyhow::bail!("ingest.scene_extensions contains an empty extension: '{}'", ext);
    }

    for entity_type in EntityType::ALL {
        if config.ingest.queues.capacity(entity_type) == 0 {
            anyhow::bail!("ingest.queues.{} must be >= 1", entity_type);
        }
    }

    for pattern in &config.ingest.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid exclude glob: '{}'", pattern))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(content: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("neuroscan.toml");
        fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let (_tmp, path) = write_config("[db]\npath = \"./data/x.sqlite\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.db.max_connections, 5);
        assert_eq!(config.ingest.scene_extensions, vec![".gltf"]);
        assert!(config.ingest.phase_barrier);
        assert!(!config.ingest.skip_existing);
        assert_eq!(config.ingest.queues.capacity(EntityType::Neurons), 10_000);
        assert_eq!(config.ingest.queues.capacity(EntityType::Cphate), 20);
        assert_eq!(config.ingest.queues.capacity(EntityType::Meta), 100_000);
        assert!(config.ingest.workers >= 1);
    }

    #[test]
    fn overrides_are_read() {
        let (_tmp, path) = write_config(
            r#"
[db]
path = "db.sqlite"
busy_timeout_secs = 5

[ingest]
workers = 3
scene_extensions = [".gltf", ".glb"]
phase_barrier = false

[ingest.queues]
contacts = 7
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.db.busy_timeout_secs, 5);
        assert_eq!(config.ingest.workers, 3);
        assert_eq!(config.ingest.scene_extensions.len(), 2);
        assert!(!config.ingest.phase_barrier);
        assert_eq!(config.ingest.queues.contacts, 7);
        assert_eq!(config.ingest.queues.synapses, 100_000);
    }

    #[test]
    fn zero_workers_rejected() {
        let (_tmp, path) = write_config("[db]\npath = \"a\"\n[ingest]\nworkers = 0\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("ingest.workers"));
    }

    #[test]
    fn zero_capacity_rejected() {
        let (_tmp, path) =
            write_config("[db]\npath = \"a\"\n[ingest.queues]\nnerve_ring = 0\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("nerveRing"));
    }

    #[test]
    fn empty_extension_rejected() {
        let (_tmp, path) =
            write_config("[db]\npath = \"a\"\n[ingest]\nscene_extensions = [\".\"]\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_minimal() {
        let tmp = TempDir::new().unwrap();
        let config = load_or_minimal(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.db.path, PathBuf::from("./data/neuroscan.sqlite"));
    }
}

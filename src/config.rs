use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DeepSearchConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub model: ModelConfig,
    pub retrieval: RetrievalConfig,
    pub evidence: EvidenceConfig,
    pub search: SearchConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    /// Ollama endpoint. Only `127.0.0.1` is accepted.
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Adapter names, in the order they are registered with the dispatcher.
    pub adapters: Vec<String>,
    pub adapter_timeout_ms: u64,
    pub fetch_deadline_ms: u64,
    /// Minimum spacing between two calls to the same adapter.
    pub min_interval_ms: u64,
    pub max_results_per_adapter: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EvidenceConfig {
    pub max_items_per_run: usize,
    pub context_top_k: usize,
    pub confidence_weight: f64,
    pub length_weight: f64,
    pub recency_weight: f64,
    pub length_saturation_chars: usize,
    pub recency_half_life_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub max_depth: usize,
    pub run_deadline_secs: u64,
    pub step_timeout_secs: u64,
    /// Slice of the run deadline held back for the forced final answer.
    pub final_answer_reserve_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub short_term_threshold: usize,
    pub long_term_capacity: usize,
    pub excerpt_chars: usize,
    pub summary_max_chars: usize,
    pub reinforce_boost: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_data_dir()
            .join("deepsearch.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".into(),
            model: "qwen2.5:3b".into(),
            temperature: 0.2,
            request_timeout_secs: 60,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            adapters: vec!["duckduckgo".into(), "wikipedia".into(), "scrape".into()],
            adapter_timeout_ms: 8_000,
            fetch_deadline_ms: 10_000,
            min_interval_ms: 1_000,
            max_results_per_adapter: 3,
        }
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_items_per_run: 48,
            context_top_k: 6,
            confidence_weight: 0.7,
            length_weight: 0.2,
            recency_weight: 0.1,
            length_saturation_chars: 600,
            recency_half_life_secs: 3_600,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            run_deadline_secs: 120,
            step_timeout_secs: 45,
            final_answer_reserve_secs: 30,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_threshold: 12,
            long_term_capacity: 500,
            excerpt_chars: 1_200,
            summary_max_chars: 4_000,
            reinforce_boost: 0.1,
        }
    }
}

impl RetrievalConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_millis(self.fetch_deadline_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl SearchConfig {
    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// The reserve never exceeds the run deadline itself.
    pub fn final_answer_reserve(&self) -> Duration {
        Duration::from_secs(self.final_answer_reserve_secs.min(self.run_deadline_secs))
    }
}

/// Returns `~/.deepsearch/`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".deepsearch")
}

/// Returns the default config file path: `~/.deepsearch/config.toml`
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

impl DeepSearchConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            DeepSearchConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (DEEPSEARCH_DB, DEEPSEARCH_LOG_LEVEL, DEEPSEARCH_MODEL, DEEPSEARCH_OLLAMA_URL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DEEPSEARCH_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("DEEPSEARCH_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("DEEPSEARCH_MODEL") {
            self.model.model = val;
        }
        if let Ok(val) = std::env::var("DEEPSEARCH_OLLAMA_URL") {
            self.model.base_url = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

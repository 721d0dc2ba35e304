//! Configuration management
//!
//! Storage locations and the thresholds used by the ledger, the adaptive
//! engine and the integration layer. Loaded from TOML; every field has a
//! default so a partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub adaptation: AdaptationConfig,
    #[serde(default)]
    pub integration: IntegrationConfig,
}

/// Where everything lives on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root that change targets (`knowledge/...`, `config/...`) are relative to
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Knowledge tree directory name under the project root
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,
    /// Ledger, graph snapshots, proposals, backups
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_knowledge_dir() -> String {
    "knowledge".to_string()
}

fn default_state_dir() -> PathBuf {
    data_dir().unwrap_or_else(|_| PathBuf::from(".self-improve"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            knowledge_dir: default_knowledge_dir(),
            state_dir: default_state_dir(),
        }
    }
}

impl StorageConfig {
    /// Storage rooted entirely under one directory (used by tests and `--root`)
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            project_root: root.to_path_buf(),
            knowledge_dir: default_knowledge_dir(),
            state_dir: root.join(".self-improve"),
        }
    }

    pub fn knowledge_root(&self) -> PathBuf {
        self.project_root.join(&self.knowledge_dir)
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.state_dir.join("ledger")
    }

    pub fn knowledge_graph_path(&self) -> PathBuf {
        self.state_dir.join("graphs").join("knowledge_graph.json")
    }

    pub fn memory_graph_path(&self) -> PathBuf {
        self.state_dir.join("graphs").join("memory_graph.json")
    }

    pub fn proposals_path(&self) -> PathBuf {
        self.state_dir.join("proposed_changes.json")
    }

    pub fn adaptation_history_path(&self) -> PathBuf {
        self.state_dir.join("adaptation_history.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }
}

/// Trend analysis thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Total tasks required before any trend is reported
    #[serde(default = "default_min_tasks")]
    pub min_tasks_for_analysis: u64,
    /// Tasks a single worker needs before it gets a trend
    #[serde(default = "default_min_worker_tasks")]
    pub min_worker_tasks: u64,
    /// Most recent executions considered per worker
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Upper bound for the sliding success-rate window
    #[serde(default = "default_max_window")]
    pub max_window: usize,
    /// |slope| above which a worker trend counts as improving/declining
    #[serde(default = "default_worker_slope")]
    pub worker_slope_threshold: f64,
    /// |slope| above which the system trend counts as improving/declining
    #[serde(default = "default_system_slope")]
    pub system_slope_threshold: f64,
}

fn default_min_tasks() -> u64 {
    100
}

fn default_min_worker_tasks() -> u64 {
    10
}

fn default_history_window() -> usize {
    100
}

fn default_max_window() -> usize {
    10
}

fn default_worker_slope() -> f64 {
    0.01
}

fn default_system_slope() -> f64 {
    0.005
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_tasks_for_analysis: default_min_tasks(),
            min_worker_tasks: default_min_worker_tasks(),
            history_window: default_history_window(),
            max_window: default_max_window(),
            worker_slope_threshold: default_worker_slope(),
            system_slope_threshold: default_system_slope(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationConfig {
    /// Recommendations at or above this confidence are applied
    #[serde(default = "default_auto_apply")]
    pub auto_apply_threshold: f64,
}

fn default_auto_apply() -> f64 {
    0.8
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            auto_apply_threshold: default_auto_apply(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Successful results shorter than this are not turned into knowledge
    #[serde(default = "default_min_result_len")]
    pub min_result_length: usize,
    /// Score multiplier for memory-graph hits in combined search
    #[serde(default = "default_memory_boost")]
    pub memory_score_boost: f64,
    /// Memory hits that get one hop of related memories pulled in
    #[serde(default = "default_expand_top")]
    pub expand_top_memories: usize,
}

fn default_min_result_len() -> usize {
    50
}

fn default_memory_boost() -> f64 {
    1.2
}

fn default_expand_top() -> usize {
    3
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            min_result_length: default_min_result_len(),
            memory_score_boost: default_memory_boost(),
            expand_top_memories: default_expand_top(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "self-improve", "self-improve")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "self-improve", "self-improve")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.analysis.min_tasks_for_analysis, 100);
        assert_eq!(config.analysis.max_window, 10);
        assert_eq!(config.adaptation.auto_apply_threshold, 0.8);
        assert_eq!(config.integration.memory_score_boost, 1.2);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[adaptation]\nauto_apply_threshold = 0.5\n").unwrap();
        assert_eq!(config.adaptation.auto_apply_threshold, 0.5);
        assert_eq!(config.analysis.min_worker_tasks, 10);
        assert_eq!(config.storage.knowledge_dir, "knowledge");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.storage = StorageConfig::rooted_at(dir.path());
        config.analysis.min_tasks_for_analysis = 42;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.analysis.min_tasks_for_analysis, 42);
        assert_eq!(loaded.storage.knowledge_root(), dir.path().join("knowledge"));
    }

    #[test]
    fn test_rooted_storage_paths() {
        let storage = StorageConfig::rooted_at(Path::new("/tmp/x"));
        assert_eq!(storage.ledger_dir(), PathBuf::from("/tmp/x/.self-improve/ledger"));
        assert!(storage.memory_graph_path().ends_with("graphs/memory_graph.json"));
    }
}

//! Application configuration for Vigil.
//!
//! User config lives at `~/.vigil/vigil.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "vigil.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".vigil";

// ---------------------------------------------------------------------------
// Config structs (matching vigil.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Batch processing defaults.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Workflow matcher tuning.
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// Ticket tracker connection settings.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Content-dedup index settings.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Workflow definition source.
    #[serde(default)]
    pub workflows: WorkflowsConfig,

    /// Content discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum tickets pulled per batch run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Worker pool size.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Keep processing remaining tickets after a per-ticket failure.
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            continue_on_error: default_true(),
        }
    }
}

fn default_batch_size() -> usize {
    25
}
fn default_max_concurrency() -> usize {
    4
}
fn default_true() -> bool {
    true
}

/// `[matcher]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum confidence required for an automatic assignment.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Candidates within this confidence delta of the leader are tied.
    #[serde(default = "default_tie_margin")]
    pub tie_margin: f64,

    /// Weight of the label-overlap signal when a semantic scorer is present.
    #[serde(default = "default_label_weight")]
    pub label_weight: f64,

    /// Weight of the content-keyword signal when a semantic scorer is present.
    #[serde(default = "default_content_weight")]
    pub content_weight: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            tie_margin: default_tie_margin(),
            label_weight: default_label_weight(),
            content_weight: default_content_weight(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.5
}
fn default_tie_margin() -> f64 {
    0.05
}
fn default_label_weight() -> f64 {
    0.6
}
fn default_content_weight() -> f64 {
    0.4
}

/// `[tracker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base URL of the tracker REST API.
    #[serde(default = "default_tracker_base_url")]
    pub base_url: String,

    /// `owner/repo` the tickets live in.
    #[serde(default)]
    pub repo: String,

    /// Name of the env var holding the API token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Minimum ms between tracker API calls (shared across workers).
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Longest a worker blocks on the rate limiter before the call fails
    /// as transient.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Retry attempts for transient API errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracker_base_url(),
            repo: String::new(),
            token_env: default_token_env(),
            rate_limit_ms: default_rate_limit_ms(),
            max_wait_ms: default_max_wait_ms(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_tracker_base_url() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "VIGIL_TRACKER_TOKEN".into()
}
fn default_rate_limit_ms() -> u64 {
    250
}
fn default_max_wait_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}

/// `[dedup]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Fingerprints older than this many days are evictable.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Oldest entries beyond this count are evicted.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Snapshot file path. Empty = in-memory only.
    #[serde(default)]
    pub index_path: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            max_entries: default_max_entries(),
            index_path: String::new(),
        }
    }
}

fn default_retention_days() -> i64 {
    90
}
fn default_max_entries() -> usize {
    10_000
}

/// `[workflows]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowsConfig {
    /// Directory holding `*.yaml` workflow definitions.
    #[serde(default = "default_workflows_dir")]
    pub dir: String,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            dir: default_workflows_dir(),
        }
    }
}

fn default_workflows_dir() -> String {
    "workflows".into()
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Search API endpoint.
    #[serde(default)]
    pub endpoint: String,

    /// Monitored queries, each with the topic labels stamped on new tickets.
    #[serde(default)]
    pub monitors: Vec<MonitorEntry>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            monitors: Vec::new(),
        }
    }
}

/// `[[discovery.monitors]]` entry — one monitored query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEntry {
    /// Search query string.
    pub query: String,
    /// Topic labels added to every ticket this monitor files
    /// (the discovery-state label is always added on top).
    #[serde(default)]
    pub labels: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.vigil/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| VigilError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.vigil/vigil.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| VigilError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| VigilError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| VigilError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| VigilError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| VigilError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the tracker token env var is set and non-empty.
pub fn validate_tracker_token(config: &AppConfig) -> Result<()> {
    let var_name = &config.tracker.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(VigilError::config(format!(
            "tracker token not found. Set the {var_name} environment variable."
        ))),
    }
}

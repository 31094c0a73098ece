//! Bootstrap configuration and root folder resolution
//!
//! Bootstrap settings come from a TOML file; everything the engine tunes at
//! runtime lives in the database `settings` table.
//!
//! Root folder priority:
//! 1. Command-line argument (highest priority)
//! 2. `NIGHTRATE_ROOT_FOLDER` environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "NIGHTRATE_ROOT_FOLDER";

/// Environment variable pointing at an explicit TOML file
pub const CONFIG_PATH_ENV: &str = "NIGHTRATE_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "nightrate.db";

/// Bootstrap configuration loaded from TOML
///
/// Every section is optional; a missing file or section falls back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the database and model artifacts
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub demand_worker: DemandWorkerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Health endpoint binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Chat-completions vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmVendor {
    #[default]
    Perplexity,
    OpenAi,
}

impl std::fmt::Display for LlmVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmVendor::Perplexity => write!(f, "perplexity"),
            LlmVendor::OpenAi => write!(f, "openai"),
        }
    }
}

/// LLM adjustment layer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmVendor,

    /// Model name; vendor default when absent
    #[serde(default)]
    pub model: Option<String>,

    /// Endpoint override (tests, proxies)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key (lowest priority source, see engine config resolution)
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Demand model worker process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandWorkerConfig {
    /// Worker executable (path or name on PATH)
    #[serde(default = "default_worker_command")]
    pub command: PathBuf,

    /// Artifact directory; `<root>/models` when absent
    #[serde(default)]
    pub models_dir: Option<PathBuf>,

    /// Maximum queued requests before new ones are rejected
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Worker is stopped after this long without requests
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for DemandWorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            models_dir: None,
            queue_capacity: default_queue_capacity(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Auto-pricing scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum subjects priced concurrently per tick
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5790
}

fn default_worker_command() -> PathBuf {
    PathBuf::from("nightrate-demand-worker")
}

fn default_queue_capacity() -> usize {
    64
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    8
}

fn default_true() -> bool {
    true
}

/// Compiled platform defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/nightrate (or /var/lib/nightrate for system-wide)
            dirs::data_local_dir()
                .map(|d| d.join("nightrate"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/nightrate"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("nightrate"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/nightrate"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("nightrate"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\nightrate"))
        } else {
            PathBuf::from("./nightrate_data")
        };

        Self {
            root_folder,
            log_level: default_log_level(),
        }
    }
}

/// Resolves the root folder from CLI, environment, TOML and defaults
pub struct RootFolderResolver<'a> {
    cli_arg: Option<PathBuf>,
    toml: Option<&'a TomlConfig>,
}

impl<'a> RootFolderResolver<'a> {
    pub fn new(cli_arg: Option<PathBuf>, toml: Option<&'a TomlConfig>) -> Self {
        Self { cli_arg, toml }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.toml.and_then(|t| t.root_folder.clone()) {
            return path;
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout on first run
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    /// Default demand model artifact directory
    pub fn models_path(&self) -> PathBuf {
        self.root_folder.join("models")
    }
}

/// Locate the TOML file to read
///
/// Order: explicit path, `NIGHTRATE_CONFIG`, user config dir, `/etc/nightrate`.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("nightrate").join("nightrate.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/nightrate/nightrate.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the TOML config, degrading to defaults when missing or invalid
pub fn load_or_default(explicit: Option<&Path>) -> TomlConfig {
    match locate_config_file(explicit) {
        Some(path) => match load_toml_config(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{}; using defaults", e);
                TomlConfig::default()
            }
        },
        None => {
            warn!("No config file found; using defaults");
            TomlConfig::default()
        }
    }
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`STEMDECK_ROOT_FOLDER`, then `STEMDECK_ROOT`)
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts start-up: a warning is logged
//! and compiled defaults are used instead.

use crate::events::BusConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Primary environment variable for the root folder
pub const ROOT_FOLDER_ENV: &str = "STEMDECK_ROOT_FOLDER";

/// Alternative environment variable for the root folder
pub const ROOT_ENV: &str = "STEMDECK_ROOT";

/// Project directories live here, under the root folder
pub const LIBRARY_DIR: &str = "library";

/// Transient uploads and downloads live here, under the root folder
pub const UPLOADS_DIR: &str = "uploads";

/// Built-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime. The service must restart
/// to pick up changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding `library/` and `uploads/`
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            host: default_host(),
            port: default_port(),
            logging: LoggingConfig::default(),
            pipeline: PipelineConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Execution pipeline and progress bus tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Jobs allowed to hold the shared inference permit at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How long a finished job's channel stays subscribable
    #[serde(default = "default_channel_close_grace_ms")]
    pub channel_close_grace_ms: u64,

    /// Events held for a channel that has not seen its first subscriber yet
    #[serde(default = "default_pending_event_buffer")]
    pub pending_event_buffer: usize,

    /// Per-channel broadcast ring size once subscribers are attached
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Bounded queue between the inference engine and event translation
    #[serde(default = "default_engine_progress_buffer")]
    pub engine_progress_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            channel_close_grace_ms: default_channel_close_grace_ms(),
            pending_event_buffer: default_pending_event_buffer(),
            channel_capacity: default_channel_capacity(),
            engine_progress_buffer: default_engine_progress_buffer(),
        }
    }
}

impl PipelineConfig {
    /// ProgressBus settings derived from this section
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            channel_capacity: self.channel_capacity,
            pending_capacity: self.pending_event_buffer,
            close_grace: Duration::from_millis(self.channel_close_grace_ms),
        }
    }
}

/// External separation engine invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Separator executable (looked up on PATH when not absolute)
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Output container for produced stems
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Where model checkpoints are cached (engine default when unset)
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            output_format: default_output_format(),
            model_dir: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5730
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_channel_close_grace_ms() -> u64 {
    5000
}

fn default_pending_event_buffer() -> usize {
    64
}

fn default_channel_capacity() -> usize {
    256
}

fn default_engine_progress_buffer() -> usize {
    32
}

fn default_engine_command() -> String {
    "audio-separator".to_string()
}

fn default_output_format() -> String {
    "flac".to_string()
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\stemdeck
        dirs::data_local_dir()
            .map(|d| d.join("stemdeck"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\stemdeck"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/stemdeck
        dirs::data_dir()
            .map(|d| d.join("stemdeck"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/stemdeck"))
    } else {
        // ~/.local/share/stemdeck
        dirs::data_local_dir()
            .map(|d| d.join("stemdeck"))
            .unwrap_or_else(|| PathBuf::from("./stemdeck_data"))
    }
}

/// Default TOML location for a service, e.g. `~/.config/stemdeck/stemdeck-sep.toml`
pub fn default_config_path(service_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stemdeck").join(format!("{}.toml", service_name)))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load TOML config, falling back to defaults on any failure
pub fn load_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        warn!("No config file location available, using compiled defaults");
        return TomlConfig::default();
    };

    if !path.exists() {
        warn!(
            "Config file not found at {}, using compiled defaults",
            path.display()
        );
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{}; using compiled defaults", e);
            TomlConfig::default()
        }
    }
}

/// Write TOML config atomically (temp file + rename)
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

/// Resolves the root folder for a service
pub struct RootFolderResolver {
    service_name: String,
    cli_override: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            cli_override: None,
            toml_root: None,
        }
    }

    /// Command-line value (highest priority)
    pub fn with_cli_override(mut self, path: Option<PathBuf>) -> Self {
        self.cli_override = path;
        self
    }

    /// TOML `root_folder` (below environment variables)
    pub fn with_toml_config(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_override {
            info!(service = %self.service_name, "Root folder from command line: {}", path.display());
            return path.clone();
        }

        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    info!(service = %self.service_name, "Root folder from {}: {}", var, value);
                    return PathBuf::from(value);
                }
            }
        }

        if let Some(path) = &self.toml_root {
            info!(service = %self.service_name, "Root folder from TOML: {}", path.display());
            return path.clone();
        }

        let fallback = CompiledDefaults::for_current_platform().root_folder;
        info!(service = %self.service_name, "Root folder from compiled default: {}", fallback.display());
        fallback
    }
}

/// Creates the root folder layout on first start
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        for dir in [self.root.clone(), self.library_path(), self.uploads_path()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn library_path(&self) -> PathBuf {
        self.root.join(LIBRARY_DIR)
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. When a log file is
/// configured, output goes there instead of stderr.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| Error::Logging(format!("Invalid log level '{}': {}", logging.level, e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    };

    result.map_err(|e| Error::Logging(format!("Tracing already initialized: {}", e)))
}

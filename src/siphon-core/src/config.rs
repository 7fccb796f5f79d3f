use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

/// Default size of a single relay read, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            runtime: RuntimeConfig::default(),
            source: SourceSettings::default(),
            relay: RelayConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_stdout_enabled")]
    pub stdout: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: default_stdout_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Where the embedded interpreter lives and which library it hosts.
///
/// Applied once, the first time the interpreter is started in this process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Interpreter home directory (`PYTHONHOME`). `None` keeps the default.
    #[serde(default)]
    pub python_home: Option<PathBuf>,
    /// Extra directories appended to the interpreter search path.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    /// Module providing the session constructor.
    #[serde(default = "default_module")]
    pub module: String,
    /// Callable attribute of `module` that builds a session.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python_home: None,
            search_paths: Vec::new(),
            module: default_module(),
            entry_point: default_entry_point(),
        }
    }
}

/// Per-source settings, mirroring what the host's property panel stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSettings {
    #[serde(default)]
    pub url: String,
    /// Preferred definition (quality) name.
    #[serde(default = "default_definition")]
    pub definition: String,
    #[serde(default)]
    pub hw_decode: bool,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    /// Ring buffer size in MiB; 0 leaves the library default.
    #[serde(default = "default_ringbuffer_size_mb")]
    pub ringbuffer_size_mb: i64,
    #[serde(default = "default_hls_live_edge")]
    pub hls_live_edge: i64,
    #[serde(default = "default_hls_segment_threads")]
    pub hls_segment_threads: i64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: f64,
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    /// Free-form JSON object of extra named options.
    #[serde(default = "default_custom_options")]
    pub custom_options: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            definition: default_definition(),
            hw_decode: false,
            http_proxy: String::new(),
            https_proxy: String::new(),
            ringbuffer_size_mb: default_ringbuffer_size_mb(),
            hls_live_edge: default_hls_live_edge(),
            hls_segment_threads: default_hls_segment_threads(),
            http_timeout_secs: default_http_timeout_secs(),
            ffmpeg_path: None,
            custom_options: default_custom_options(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum bytes requested from the stream per read.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overrides the platform pipe prefix.
    #[serde(default)]
    pub pipe_prefix: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            pipe_prefix: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("runtime.{field} must not be empty")]
    EmptyRuntimeField { field: &'static str },
    #[error("relay.chunk_size must be greater than zero")]
    ZeroChunkSize,
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.runtime.module.trim().is_empty() {
            return Err(ValidationError::EmptyRuntimeField { field: "module" });
        }
        if self.runtime.entry_point.trim().is_empty() {
            return Err(ValidationError::EmptyRuntimeField {
                field: "entry_point",
            });
        }
        if self.relay.chunk_size == 0 {
            return Err(ValidationError::ZeroChunkSize);
        }
        Ok(())
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stdout_enabled() -> bool {
    true
}

fn default_module() -> String {
    "streamlink".to_string()
}

fn default_entry_point() -> String {
    "Streamlink".to_string()
}

fn default_definition() -> String {
    "best".to_string()
}

fn default_ringbuffer_size_mb() -> i64 {
    16
}

fn default_hls_live_edge() -> i64 {
    8
}

fn default_hls_segment_threads() -> i64 {
    3
}

fn default_http_timeout_secs() -> f64 {
    5.0
}

fn default_custom_options() -> String {
    "{}".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

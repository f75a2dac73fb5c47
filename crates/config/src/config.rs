//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Source scanning configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Directories scanned for incoming files
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    /// File extensions picked up by the scanner (case-insensitive, with leading dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Files smaller than this are skipped at discovery time
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
    /// Seconds a file's size must stay unchanged before it is registered
    #[serde(default = "default_stability_window_secs")]
    pub stability_window_secs: u64,
    /// Seconds between scans in watch mode
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_extensions() -> Vec<String> {
    vec![".wav".to_string(), ".json".to_string()]
}

fn default_min_bytes() -> u64 {
    1
}

fn default_stability_window_secs() -> u64 {
    2
}

fn default_scan_interval_secs() -> u64 {
    300
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            extensions: default_extensions(),
            min_bytes: default_min_bytes(),
            stability_window_secs: default_stability_window_secs(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

/// Per-stage implementation selection
///
/// Each field holds the implementation type name resolved at stage startup.
/// An empty string selects the built-in default for that stage.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StagesConfig {
    #[serde(default)]
    pub standardize: String,
    #[serde(default)]
    pub enrich: String,
    #[serde(default)]
    pub convert: String,
}

/// Transcoding subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    /// Conversion arguments inserted between the input and output bindings
    #[serde(default = "default_conversion_args")]
    pub conversion_args: Vec<String>,
    /// Explicit path to the transcoder executable ("" = resolve from PATH)
    #[serde(default)]
    pub executable_path: String,
    /// Wall-clock timeout for one transcode invocation
    #[serde(default = "default_transcode_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_conversion_args() -> Vec<String> {
    vec![
        "-codec:a".to_string(),
        "libmp3lame".to_string(),
        "-qscale:a".to_string(),
        "2".to_string(),
    ]
}

fn default_transcode_timeout_secs() -> u64 {
    300
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            conversion_args: default_conversion_args(),
            executable_path: String::new(),
            timeout_secs: default_transcode_timeout_secs(),
        }
    }
}

/// Metrics server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Local port for the metrics HTTP endpoint (0 = disabled)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_metrics_port() -> u16 {
    7878
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
        }
    }
}

/// Durable state configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateConfig {
    /// Directory holding registration ledger records
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
    /// Directory processed files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Identity of this processor instance, recorded on every admission
    #[serde(default = "default_processor_id")]
    pub processor_id: String,
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("/var/lib/mediaflow/ledger")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/var/lib/mediaflow/out")
}

fn default_processor_id() -> String {
    "mediaflow".to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ledger_dir: default_ledger_dir(),
            output_dir: default_output_dir(),
            processor_id: default_processor_id(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MEDIAFLOW_SOURCE_ROOTS -> source.roots (colon-separated paths)
    /// - MEDIAFLOW_SCAN_INTERVAL_SECS -> source.scan_interval_secs
    /// - MEDIAFLOW_TRANSCODE_EXECUTABLE -> transcode.executable_path
    /// - MEDIAFLOW_TRANSCODE_TIMEOUT_SECS -> transcode.timeout_secs
    /// - MEDIAFLOW_METRICS_PORT -> server.metrics_port
    /// - MEDIAFLOW_LEDGER_DIR -> state.ledger_dir
    /// - MEDIAFLOW_OUTPUT_DIR -> state.output_dir
    /// - MEDIAFLOW_PROCESSOR_ID -> state.processor_id
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MEDIAFLOW_SOURCE_ROOTS") {
            let roots: Vec<PathBuf> = val
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            if !roots.is_empty() {
                self.source.roots = roots;
            }
        }

        if let Ok(val) = env::var("MEDIAFLOW_SCAN_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.source.scan_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("MEDIAFLOW_TRANSCODE_EXECUTABLE") {
            if !val.is_empty() {
                self.transcode.executable_path = val;
            }
        }

        if let Ok(val) = env::var("MEDIAFLOW_TRANSCODE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.transcode.timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("MEDIAFLOW_METRICS_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.metrics_port = port;
            }
        }

        if let Ok(val) = env::var("MEDIAFLOW_LEDGER_DIR") {
            if !val.is_empty() {
                self.state.ledger_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MEDIAFLOW_OUTPUT_DIR") {
            if !val.is_empty() {
                self.state.output_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MEDIAFLOW_PROCESSOR_ID") {
            if !val.is_empty() {
                self.state.processor_id = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

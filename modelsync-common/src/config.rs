//! Configuration loading and data directory resolution
//!
//! Two-tier configuration:
//! 1. **TOML Bootstrap**: database path, port, upstream endpoints, sanity
//!    envelope (static, bootstrap only)
//! 2. **Database Runtime**: runtime-tunable settings from the `settings`
//!    table (handled by the hub crate)
//!
//! Resolution priority for bootstrap values:
//! 1. Command-line arguments
//! 2. Environment variables (`MODELSYNC_DATABASE`, `MODELSYNC_API_KEY`)
//! 3. TOML configuration file
//! 4. OS-dependent compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime. The service must restart
/// to pick up changes to the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (relative or absolute)
    ///
    /// If not specified, resolves to `modelsync.db` under the OS data
    /// directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream source endpoints and credentials
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Per-field sanity envelope for anomaly rejection
    ///
    /// Empty list in the file falls back to the built-in rules.
    #[serde(default = "default_sanity_rules")]
    pub sanity: Vec<SanityRule>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Upstream source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// JSON API endpoint returning the model envelope
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// HTML page used by the scrape path
    #[serde(default = "default_page_url")]
    pub page_url: String,

    /// API key sent as `x-api-key` (optional; env and database override)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

/// One field's sanity envelope for anomaly rejection
///
/// A candidate numeric value is rejected when it leaves the absolute range
/// or jumps more than `max_ratio` times away from the existing verified
/// value, unless a same-pass observation from another source lands within
/// `corroboration_tolerance` (relative) of the candidate.
///
/// Stored as JSON in the `settings` table for runtime tuning, hence the
/// Serialize derive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityRule {
    /// Field name the rule applies to ("output_speed")
    pub field: String,

    /// Maximum allowed ratio between candidate and existing value
    ///
    /// Checked in both directions: `existing / max_ratio ..= existing *
    /// max_ratio`. None disables the ratio check.
    #[serde(default)]
    pub max_ratio: Option<f64>,

    /// Absolute lower bound (inclusive)
    #[serde(default)]
    pub min: Option<f64>,

    /// Absolute upper bound (inclusive)
    #[serde(default)]
    pub max: Option<f64>,

    /// Relative tolerance for same-pass corroboration
    #[serde(default = "default_corroboration_tolerance")]
    pub corroboration_tolerance: f64,
}

impl SanityRule {
    /// True when `value` is inside the rule's absolute bounds
    pub fn within_bounds(&self, value: f64) -> bool {
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return false;
            }
        }
        true
    }

    /// True when `candidate` is within the allowed ratio of `existing`
    ///
    /// With no ratio configured, or no meaningful existing value, the check
    /// passes.
    pub fn within_ratio(&self, candidate: f64, existing: f64) -> bool {
        let Some(max_ratio) = self.max_ratio else {
            return true;
        };
        if existing <= 0.0 || candidate <= 0.0 {
            return true;
        }
        let ratio = if candidate > existing {
            candidate / existing
        } else {
            existing / candidate
        };
        ratio <= max_ratio
    }

    /// True when `a` and `b` agree within the corroboration tolerance
    pub fn corroborates(&self, a: f64, b: f64) -> bool {
        let scale = a.abs().max(b.abs());
        if scale == 0.0 {
            return true;
        }
        (a - b).abs() / scale <= self.corroboration_tolerance
    }
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_url() -> String {
    "https://artificialanalysis.ai/api/models".to_string()
}

fn default_page_url() -> String {
    "https://artificialanalysis.ai/models".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_corroboration_tolerance() -> f64 {
    0.25
}

/// Built-in sanity rules applied when the TOML file carries none
pub fn default_sanity_rules() -> Vec<SanityRule> {
    vec![
        SanityRule {
            field: "output_speed".to_string(),
            max_ratio: Some(4.0),
            min: Some(0.0),
            max: Some(5000.0),
            corroboration_tolerance: default_corroboration_tolerance(),
        },
        SanityRule {
            field: "intelligence_score".to_string(),
            max_ratio: None,
            min: Some(0.0),
            max: Some(100.0),
            corroboration_tolerance: default_corroboration_tolerance(),
        },
    ]
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            upstream: UpstreamConfig::default(),
            sanity: default_sanity_rules(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            page_url: default_page_url(),
            api_key: None,
            timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

impl TomlConfig {
    /// Load bootstrap configuration
    ///
    /// With an explicit path the file must exist and parse. With none, the
    /// platform config locations are probed and a missing file falls back
    /// to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_file() {
                Ok(path) => Self::from_file(&path),
                Err(_) => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        let mut config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        if config.sanity.is_empty() {
            config.sanity = default_sanity_rules();
        }
        tracing::info!("Loaded TOML configuration from {:?}", path);
        Ok(config)
    }
}

/// Get default configuration file path for the platform
fn default_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/modelsync/modelsync.toml first, then /etc/modelsync/
        let user_config = dirs::config_dir().map(|d| d.join("modelsync").join("modelsync.toml"));
        let system_config = PathBuf::from("/etc/modelsync/modelsync.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("modelsync").join("modelsync.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// Get OS-dependent default data directory
pub fn get_default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/modelsync (or /var/lib/modelsync system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("modelsync"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/modelsync"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("modelsync"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/modelsync"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("modelsync"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\modelsync"))
    } else {
        PathBuf::from("./modelsync_data")
    }
}

/// Database path resolution following the bootstrap priority order:
/// 1. Command-line argument (highest priority)
/// 2. `MODELSYNC_DATABASE` environment variable
/// 3. TOML config file
/// 4. `modelsync.db` under the OS data directory (fallback)
pub fn resolve_database_path(cli_arg: Option<&str>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var("MODELSYNC_DATABASE") {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    get_default_data_dir().join("modelsync.db")
}

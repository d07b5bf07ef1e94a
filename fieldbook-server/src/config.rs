//! Server configuration resolution
//!
//! Priority order, highest first:
//! 1. Command-line argument
//! 2. Environment variable (`FIELDBOOK_DATA_DIR`, `FIELDBOOK_PORT`)
//! 3. TOML config file (`<config dir>/fieldbook/config.toml`)
//! 4. Compiled default

use crate::redact::RedactionConfig;
use fieldbook_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 5890;
/// Default decision wait before a synthesized skip, in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 300.0;
/// Preview rows embedded in a table card's payload
pub const DEFAULT_PREVIEW_ROWS: usize = 20;

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub port: u16,
    pub redaction: RedactionConfig,
    pub default_timeout_secs: f64,
    pub preview_rows: usize,
}

impl Config {
    pub fn studies_dir(&self) -> PathBuf {
        self.data_dir.join("studies")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join("api_token")
    }
}

/// On-disk TOML schema; every field optional so a partial file still loads
#[derive(Debug, Default, Deserialize)]
pub struct TomlConfig {
    pub data_dir: Option<PathBuf>,
    pub port: Option<u16>,
    pub default_timeout_secs: Option<f64>,
    pub preview_rows: Option<usize>,
    #[serde(default)]
    pub redaction: TomlRedaction,
}

#[derive(Debug, Default, Deserialize)]
pub struct TomlRedaction {
    pub enabled: Option<bool>,
    pub max_rows: Option<usize>,
    pub hash_identifiers: Option<bool>,
}

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fieldbook").join("config.toml"))
}

fn load_toml() -> Result<TomlConfig> {
    let Some(path) = config_file_path() else {
        return Ok(TomlConfig::default());
    };
    if !path.exists() {
        return Ok(TomlConfig::default());
    }
    let text = std::fs::read_to_string(&path)?;
    toml::from_str(&text).map_err(|e| {
        Error::Config(format!("failed to parse {}: {}", path.display(), e))
    })
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("fieldbook"))
        .unwrap_or_else(|| PathBuf::from(".fieldbook"))
}

/// Resolve the effective configuration
///
/// Missing config files degrade to defaults with a warning rather than
/// refusing to start.
pub fn resolve(cli_data_dir: Option<PathBuf>, cli_port: Option<u16>) -> Result<Config> {
    let toml_config = match load_toml() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring unreadable config file: {}", e);
            TomlConfig::default()
        }
    };

    let data_dir = cli_data_dir
        .or_else(|| std::env::var("FIELDBOOK_DATA_DIR").ok().map(PathBuf::from))
        .or(toml_config.data_dir)
        .unwrap_or_else(default_data_dir);

    let port = match cli_port {
        Some(port) => port,
        None => match std::env::var("FIELDBOOK_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid FIELDBOOK_PORT '{}'", raw)))?,
            Err(_) => toml_config.port.unwrap_or(DEFAULT_PORT),
        },
    };

    let defaults = RedactionConfig::default();
    let redaction = RedactionConfig {
        enabled: toml_config.redaction.enabled.unwrap_or(defaults.enabled),
        max_rows: toml_config.redaction.max_rows.unwrap_or(defaults.max_rows),
        hash_identifiers: toml_config
            .redaction
            .hash_identifiers
            .unwrap_or(defaults.hash_identifiers),
    };

    Ok(Config {
        data_dir,
        port,
        redaction,
        default_timeout_secs: toml_config
            .default_timeout_secs
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
        preview_rows: toml_config.preview_rows.unwrap_or(DEFAULT_PREVIEW_ROWS),
    })
}

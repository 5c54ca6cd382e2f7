/// Service configuration loader - parses gaugeview.toml
///
/// Separates upstream endpoints, fetch limits, and display defaults from
/// code. Every section is optional; anything left out falls back to the
/// production values below.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::ingest::ahps::MissingFieldPolicy;
use crate::timezone::DisplayZone;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "gaugeview.toml";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidOverride { key: &'static str, value: String },
}

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub endpoints: Endpoints,
    pub fetch: FetchConfig,
    pub display: DisplayConfig,
    pub ahps: AhpsConfig,
    pub logging: LoggingConfig,
}

/// Base URLs for every upstream the pipeline reads.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Endpoints {
    pub usgs_iv: String,
    pub usgs_dv: String,
    pub usgs_waterml: String,
    pub ahps_hydrograph: String,
    pub nwm_forecast: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            usgs_iv: "http://nwis.waterdata.usgs.gov/usa/nwis/uv/".to_string(),
            usgs_dv: "http://nwis.waterdata.usgs.gov/usa/nwis/dv/".to_string(),
            usgs_waterml: "http://nwis.waterservices.usgs.gov/nwis/iv/".to_string(),
            ahps_hydrograph: "http://water.weather.gov/ahps2/hydrograph_to_xml.php".to_string(),
            nwm_forecast: "https://apps.hydroshare.org/apps/nwm-forecasts/api/GetWaterML/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on a single upstream request; a timeout counts as unreachable.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            timeout_secs: 30,
            user_agent: format!("gaugeview_service/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub default_zone: DisplayZone,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AhpsConfig {
    pub missing_field_policy: MissingFieldPolicy,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "gaugeview_service=debug".
    pub level: String,
    /// Append log lines to this file instead of stderr.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str, origin: &str) -> Result<ServiceConfig, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: origin.to_string(),
        source,
    })
}

/// Loads configuration from a file. A missing file yields defaults; an
/// unreadable or malformed one is an error.
pub fn load_config_from(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Ok(ServiceConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    parse_config(&contents, &display)
}

/// Loads `.env`, then the file named by `GAUGEVIEW_CONFIG` (or
/// `gaugeview.toml`), then applies environment overrides.
pub fn load_config() -> Result<ServiceConfig, ConfigError> {
    dotenv::dotenv().ok();

    let path = std::env::var("GAUGEVIEW_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = load_config_from(Path::new(&path))?;
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Applies `GAUGEVIEW_*` overrides using the supplied lookup.
///
/// Taking the lookup as a closure keeps tests away from process-wide
/// environment mutation.
pub fn apply_overrides<F>(config: &mut ServiceConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("GAUGEVIEW_FETCH_TIMEOUT_SECS") {
        config.fetch.timeout_secs = value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
            key: "GAUGEVIEW_FETCH_TIMEOUT_SECS",
            value: value.clone(),
        })?;
    }
    if let Some(value) = lookup("GAUGEVIEW_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Some(value) = lookup("GAUGEVIEW_DEFAULT_ZONE") {
        config.display.default_zone =
            DisplayZone::from_selection(Some(value.as_str())).map_err(|_| ConfigError::InvalidOverride {
                key: "GAUGEVIEW_DEFAULT_ZONE",
                value: value.clone(),
            })?;
    }
    Ok(())
}

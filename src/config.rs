use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::NarrascopeError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub defaults: Option<AnalysisDefaults>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisDefaults {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub target_narrative: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub timeout_secs: u64,
    pub default_start_date: Option<String>,
    pub default_end_date: Option<String>,
    pub default_threshold: Option<f64>,
    pub default_target_narrative: Option<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_start_date: None,
            default_end_date: None,
            default_threshold: None,
            default_target_narrative: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Read `narrascope.json` from an explicit path or the working
    /// directory. With no explicit path, a missing file resolves to
    /// defaults rather than an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, NarrascopeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("narrascope.json"),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(NarrascopeError::ConfigRead(config_path));
            }
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| NarrascopeError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| NarrascopeError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        let defaults = config.defaults.unwrap_or(AnalysisDefaults {
            start_date: None,
            end_date: None,
            threshold: None,
            target_narrative: None,
        });
        ResolvedConfig {
            api_base_url: config
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            auth_token: config.auth_token,
            timeout_secs: config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            default_start_date: defaults.start_date,
            default_end_date: defaults.end_date,
            default_threshold: defaults.threshold,
            default_target_narrative: defaults.target_narrative,
        }
    }
}

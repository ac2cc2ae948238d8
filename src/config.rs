use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::generation::types::GenerationConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub rotation: LoggingRotation,
    #[serde(default = "default_stderr_warn_enabled")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_logging_filter(),
            dir: default_logging_dir(),
            rotation: LoggingRotation::default(),
            stderr_warn_enabled: default_stderr_warn_enabled(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoggingRotation {
    #[default]
    Daily,
    Hourly,
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        let config: Config =
            serde_json::from_value(config_value).context("failed to deserialize config")?;
        Ok(config)
    }
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_stderr_warn_enabled() -> bool {
    true
}

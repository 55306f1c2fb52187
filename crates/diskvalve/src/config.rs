use cmd_executor::{ExecLimits, SessionConfig};
use selftest::StaticCapabilities;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) executor: ExecLimits,
    #[serde(default)]
    pub(crate) session: SessionConfig,
    #[serde(default)]
    pub(crate) smartctl: SmartctlConfig,
    #[serde(default)]
    pub(crate) capabilities: StaticCapabilities,
}

impl Config {
    pub(crate) fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct SmartctlConfig {
    pub(crate) binary: String,
    pub(crate) extra_args: Vec<String>,
}

impl Default for SmartctlConfig {
    fn default() -> Self {
        Self {
            binary: "smartctl".to_string(),
            extra_args: Vec::new(),
        }
    }
}

//! Configuration management for the SpikeStream CLI

use serde::{Deserialize, Serialize};
use spikestream_runtime::SimulationConfig;
use std::path::{Path, PathBuf};

use crate::error::{CliError, CliResult};

/// Global CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Default logging filter, used when `RUST_LOG` is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Simulation overrides applied on top of the store's global parameters
    pub simulation: SimulationConfig,

    /// User preferences
    pub preferences: UserPreferences,
}

/// Presentation preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    /// Show progress bars
    pub show_progress: bool,

    /// Print results as JSON instead of text
    pub json_output: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            show_progress: true,
            json_output: false,
        }
    }
}

impl CliConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load_from_file(path: &Path) -> CliResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self =
                toml::from_str(&content).map_err(|e| CliError::config(format!("Invalid config file: {}", e)))?;
            config
                .simulation
                .validate()
                .map_err(|e| CliError::config(format!("Invalid simulation section: {}", e)))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> CliResult<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| CliError::config("Could not determine config directory"))?;
        Ok(config_dir.join("spikestream").join("config.toml"))
    }

    /// Load from `path`, or from the default location when none is given
    pub fn resolve(path: Option<&Path>) -> CliResult<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_config_path() {
                Ok(path) => Self::load_from_file(&path),
                Err(_) => Ok(Self::default()),
            },
        }
    }
}

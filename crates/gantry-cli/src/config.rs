//! CLI configuration management.

use anyhow::{Context, Result, anyhow, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration, stored in `~/.config/gantry/config.yaml`.
///
/// Every field can be overridden per invocation by a flag or its `GANTRY_*`
/// environment variable. Tokens are never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    /// Branch assumed when a trigger gives none.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Root for run-scoped artifacts.
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
    /// Root for per-job scratch directories.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Compress stored artifacts with zstd.
    #[serde(default = "default_true")]
    pub compress_artifacts: bool,
    /// Base URL of the GitHub REST API.
    #[serde(default)]
    pub github_api_url: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            artifacts_dir: None,
            scratch_dir: None,
            compress_artifacts: true,
            github_api_url: None,
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl CliConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "gantry", "gantry")
            .ok_or_else(|| anyhow!("could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Directory artifacts land in when neither flag nor config names one.
    pub fn artifacts_root(&self, workspace: &Path) -> PathBuf {
        self.artifacts_dir
            .clone()
            .unwrap_or_else(|| workspace.join(".gantry").join("artifacts"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "default_branch" => self.default_branch = value.to_string(),
            "artifacts_dir" => self.artifacts_dir = optional_path(value),
            "scratch_dir" => self.scratch_dir = optional_path(value),
            "compress_artifacts" => {
                self.compress_artifacts = value
                    .parse()
                    .map_err(|_| anyhow!("expected true or false, got '{}'", value))?;
            }
            "github_api_url" => {
                self.github_api_url = (!value.is_empty()).then(|| value.to_string());
            }
            "log_format" => {
                self.log_format = LogFormat::from_str(value, true)
                    .map_err(|_| anyhow!("invalid log format: {}", value))?;
            }
            _ => bail!("unknown config key: {}", key),
        }
        Ok(())
    }
}

fn optional_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

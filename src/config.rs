use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::log::LogLevel;
use crate::orchestration::{FailurePolicy, FlowStrategy};
use crate::{sflog_debug, Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub strategy: FlowStrategy,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_true")]
    pub include_optional_sections: bool,
    pub max_section_size: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
    pub snapshot_file: Option<String>,
    /// Overrides `SPECFLOW_LOG` / `SPECFLOW_DEBUG` when set.
    pub log_level: Option<LogLevel>,
    pub log_file: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: FlowStrategy::default(),
            failure_policy: FailurePolicy::default(),
            include_optional_sections: true,
            max_section_size: None,
            dry_run: false,
            snapshot_file: None,
            log_level: None,
            log_file: None,
        }
    }
}

impl Config {
    pub fn specflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".specflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::specflow_dir()?.join("specflow.toml"))
    }

    /// Where snapshots for a project live: the configured override, or
    /// `<project_root>/.specflow/snapshots.json`.
    pub fn snapshot_path(&self, project_root: &Path) -> PathBuf {
        match &self.snapshot_file {
            Some(file) => {
                let expanded = expand_tilde(file);
                if expanded.is_absolute() {
                    expanded
                } else {
                    project_root.join(expanded)
                }
            }
            None => project_root.join(".specflow").join("snapshots.json"),
        }
    }

    /// Log file: the configured override with `~` expanded, or
    /// `~/.specflow/specflow.log`.
    pub fn log_path(&self) -> Result<PathBuf> {
        match &self.log_file {
            Some(file) => Ok(expand_tilde(file)),
            None => Ok(Self::specflow_dir()?.join("specflow.log")),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        sflog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            sflog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        sflog_debug!(
            "Config loaded: strategy={:?}, failure_policy={:?}, max_section_size={:?}, dry_run={}",
            config.strategy,
            config.failure_policy,
            config.max_section_size,
            config.dry_run
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::specflow_dir()?;
        if !dir.exists() {
            sflog_debug!("Creating specflow directory");
            fs::create_dir_all(&dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        sflog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

//! Runtime configuration
//!
//! Read from `<config dir>/demonstra/config.toml` (or an explicit path);
//! a missing file means defaults. `DEMONSTRA_DB` and
//! `DEMONSTRA_TIMEOUT_SECS` override the file.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const APP_DIR: &str = "demonstra";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database file; `None` means `~/.demonstra/data.db`
    pub database_path: Option<PathBuf>,
    /// Rows per insert batch when persisting a run
    pub batch_size: usize,
    /// Wall-clock limit of one extraction run; 0 disables it
    pub timeout_secs: u64,
    /// Warnings returned with an extraction summary
    pub max_warnings: usize,
    /// Statement-total code used as the BP vertical-analysis base
    pub bp_total_code: String,
    /// Statement-total code used as the DRE vertical-analysis base
    pub dre_total_code: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            batch_size: 500,
            timeout_secs: 300,
            max_warnings: 50,
            bp_total_code: "1".to_string(),
            dre_total_code: "3".to_string(),
        }
    }
}

impl Config {
    /// Load from an explicit file, or from the default location when present
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file found; using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(db) = std::env::var("DEMONSTRA_DB") {
            if !db.trim().is_empty() {
                self.database_path = Some(PathBuf::from(db));
            }
        }
        if let Ok(secs) = std::env::var("DEMONSTRA_TIMEOUT_SECS") {
            self.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid DEMONSTRA_TIMEOUT_SECS: {}", secs))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be at least 1"));
        }
        if self.bp_total_code.trim().is_empty() || self.dre_total_code.trim().is_empty() {
            return Err(anyhow!("statement total codes cannot be empty"));
        }
        if self.max_warnings == 0 {
            warn!("max_warnings is 0; extraction summaries will carry no warnings");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dir_spec::config_home().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

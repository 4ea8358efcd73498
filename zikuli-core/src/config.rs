//! Process-wide defaults, loaded from a TOML file in the user config
//! directory.
//!
//! `Region` itself carries no config dependency -- a `Region` is built
//! with explicit values (see [`crate::region::Region::new`]). `Config`
//! exists for the CLI and other embedders that want a single place to
//! set the process-scope `FindFailedResponse` default (§3) and the
//! auto-wait/poll-interval values a freshly-constructed `Region` should
//! start from, without threading them through every call site.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::region::FindFailedResponse;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Process-wide defaults for newly-constructed `Region`s and the global
/// `FindFailedResponse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_similarity")]
    pub default_similarity: f64,

    #[serde(default = "default_auto_wait_timeout_secs")]
    pub auto_wait_timeout_secs: f64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,

    #[serde(default = "default_find_failed_policy")]
    pub find_failed_policy: FindFailedResponse,
}

fn default_similarity() -> f64 {
    crate::region::DEFAULT_SIMILARITY
}

fn default_auto_wait_timeout_secs() -> f64 {
    crate::region::DEFAULT_AUTO_WAIT_TIMEOUT.as_secs_f64()
}

fn default_poll_interval_secs() -> f64 {
    crate::region::DEFAULT_POLL_INTERVAL.as_secs_f64()
}

fn default_find_failed_policy() -> FindFailedResponse {
    FindFailedResponse::Abort
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_similarity: default_similarity(),
            auto_wait_timeout_secs: default_auto_wait_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            find_failed_policy: default_find_failed_policy(),
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("zikuli")
            .join("config.toml")
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn load_or_create() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if path.exists() {
            Self::load()
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_commented_toml())?;
        Ok(())
    }

    fn to_commented_toml(&self) -> String {
        let mut s = String::new();
        s.push_str("# zikuli configuration\n");
        s.push_str("#\n");
        s.push_str("# Default Pattern similarity floor, 0.0-1.0\n");
        s.push_str(&format!("default_similarity = {}\n", self.default_similarity));
        s.push_str("# Region.find/wait budget in seconds when no explicit timeout is given\n");
        s.push_str(&format!("auto_wait_timeout_secs = {}\n", self.auto_wait_timeout_secs));
        s.push_str("# Delay between successive capture-and-match attempts inside wait/exists\n");
        s.push_str(&format!("poll_interval_secs = {}\n", self.poll_interval_secs));
        s.push_str("# What find/wait/click-with-target do on no match: abort, skip, retry, handle\n");
        s.push_str(&format!("find_failed_policy = \"{}\"\n", self.find_failed_policy));
        s
    }

    /// Human-readable summary for `zikuli config show`-style output.
    pub fn display(&self) -> String {
        self.to_commented_toml()
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "default_similarity" => {
                self.default_similarity = value.parse().map_err(|_| format!("invalid similarity: {value}"))?;
            }
            "auto_wait_timeout_secs" => {
                self.auto_wait_timeout_secs = value.parse().map_err(|_| format!("invalid timeout: {value}"))?;
            }
            "poll_interval_secs" => {
                self.poll_interval_secs = value.parse().map_err(|_| format!("invalid interval: {value}"))?;
            }
            "find_failed_policy" => {
                self.find_failed_policy = value.parse::<FindFailedResponse>()?;
            }
            _ => return Err(format!("unknown config key: {key}")),
        }
        Ok(())
    }

    pub fn auto_wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.auto_wait_timeout_secs.max(0.0))
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.poll_interval_secs.max(0.0))
    }
}

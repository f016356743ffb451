//! Watchdog Config - policy timings and route host settings as TOML values
//!
//! Every section implements `Default` with the constants from
//! [`super::defaults`], so a missing file or missing key keeps the stock
//! behavior: inactivity policy on, unconditional policy off.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Stop/start behavior shared by every policy
    #[serde(default)]
    pub restart: RestartConfig,

    /// Periodic forced restarts
    #[serde(default)]
    pub unconditional: UnconditionalConfig,

    /// Restarts of routes that stopped receiving messages
    #[serde(default)]
    pub inactivity: InactivityConfig,

    /// Routes hosted by the binary
    #[serde(default)]
    pub host: HostConfig,
}

impl WatchdogConfig {
    /// Load configuration using the standard search order:
    /// 1. `$ROUTE_WATCHDOG_CONFIG`
    /// 2. `./watchdog.toml`
    /// 3. Built-in defaults
    ///
    /// A file that cannot be read or parsed is skipped with a warning. The
    /// result is not validated.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded watchdog config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded watchdog config from ./{}", defaults::CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load from a specific TOML file path.
    ///
    /// Not validated: the caller applies any overrides first and then calls
    /// [`validate`](Self::validate).
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys are logged as warnings.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))
    }

    /// Replace `[host]` feed settings with command-line values, where given.
    #[must_use]
    pub fn with_feed_overrides(mut self, feed_interval_ms: Option<u64>, feed_messages: Option<u32>) -> Self {
        if let Some(ms) = feed_interval_ms {
            self.host.feed_interval_ms = ms;
        }
        if let Some(count) = feed_messages {
            self.host.feed_messages = count;
        }
        self
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every value, collecting all problems before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.restart.stop_timeout_ms == 0 {
            errors.push("restart.stop_timeout_ms must be > 0".to_string());
        }
        if self.unconditional.interval_ms == 0 {
            errors.push("unconditional.interval_ms must be > 0".to_string());
        }
        if self.inactivity.check_interval_ms == 0 {
            errors.push("inactivity.check_interval_ms must be > 0".to_string());
        }
        if self.inactivity.inactivity_timeout_ms == 0 {
            errors.push("inactivity.inactivity_timeout_ms must be > 0".to_string());
        }
        if !self.unconditional.enabled && !self.inactivity.enabled {
            errors.push("at least one of unconditional.enabled or inactivity.enabled must be true".to_string());
        }

        if self.inactivity.enabled
            && self.inactivity.inactivity_timeout_ms < self.inactivity.check_interval_ms
        {
            warn!(
                timeout_ms = self.inactivity.inactivity_timeout_ms,
                check_interval_ms = self.inactivity.check_interval_ms,
                "inactivity_timeout_ms is shorter than check_interval_ms; routes are judged at check granularity"
            );
        }

        let host = &self.host;
        if host.routes.is_empty() {
            errors.push("host.routes must name at least one route".to_string());
        }
        let mut seen = HashSet::new();
        for route in &host.routes {
            if route.trim().is_empty() {
                errors.push("host.routes contains an empty route id".to_string());
            } else if !seen.insert(route.as_str()) {
                errors.push(format!("host.routes contains duplicate route id '{route}'"));
            }
        }
        if host.feed_messages > 0 && host.feed_interval_ms == 0 {
            errors.push("host.feed_interval_ms must be > 0 when host.feed_messages > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// How long a restart waits for the route to stop before giving up (fatal)
    pub stop_timeout_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: defaults::STOP_ROUTE_TIMEOUT_MS,
        }
    }
}

impl RestartConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnconditionalConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for UnconditionalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: defaults::RESTART_INTERVAL_MS,
        }
    }
}

impl UnconditionalConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InactivityConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
    pub inactivity_timeout_ms: u64,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: defaults::CHECK_INTERVAL_MS,
            inactivity_timeout_ms: defaults::INACTIVITY_TIMEOUT_MS,
        }
    }
}

impl InactivityConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Route ids hosted in-process; every enabled policy is attached to each
    pub routes: Vec<String>,
    /// Delay between demo messages per route
    pub feed_interval_ms: u64,
    /// Demo messages per route before the producer goes quiet (0 = none)
    pub feed_messages: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            routes: vec![defaults::DEFAULT_ROUTE_ID.to_string()],
            feed_interval_ms: defaults::FEED_INTERVAL_MS,
            feed_messages: defaults::FEED_MESSAGES,
        }
    }
}

impl HostConfig {
    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }
}

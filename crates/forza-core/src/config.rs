//! Configuration resolution for forza.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (`--config`, else `~/.config/forza/forza.toml` when present)
//! 3. Environment variables (`FORZA_*`)
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete forza configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub supervisor: SupervisorConfig,
    pub plugins: PluginsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            supervisor: SupervisorConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

/// Child supervision timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long to wait for the child's pipes to reach end-of-stream after it
    /// exits. Output still in flight afterwards is dropped. `0` drops it
    /// immediately.
    pub drain_timeout_ms: u64,
    /// How long to wait for a killed child to be reaped during shutdown.
    pub kill_timeout_ms: u64,
}

impl SupervisorConfig {
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub const fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 250,
            kill_timeout_ms: 5_000,
        }
    }
}

/// Per-plugin settings for the bundled plugin set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub heartbeat: PeriodicPluginConfig,
    pub load_average: PeriodicPluginConfig,
    pub memory: PeriodicPluginConfig,
    pub processes: PeriodicPluginConfig,
    pub process: ToggleConfig,
    pub logs: ToggleConfig,
    pub ipc: ToggleConfig,
}

/// Settings for a plugin driven by a timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicPluginConfig {
    pub enabled: bool,
    /// Overrides the plugin's built-in interval.
    pub interval_ms: Option<u64>,
}

impl PeriodicPluginConfig {
    pub fn interval_or(&self, default: Duration) -> Duration {
        self.interval_ms
            .filter(|ms| *ms > 0)
            .map_or(default, Duration::from_millis)
    }
}

impl Default for PeriodicPluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToggleConfig {
    pub enabled: bool,
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit path must exist; the default location is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the default config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .map(|p| p.join("forza").join("forza.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        dirs::config_dir().map(|p| p.join("forza").join("forza.toml"))
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    Ok(toml::from_str(&content)?)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("FORZA_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = var("FORZA_DRAIN_TIMEOUT_MS") {
        if let Ok(n) = val.parse() {
            config.supervisor.drain_timeout_ms = n;
        }
    }
    if let Some(val) = var("FORZA_KILL_TIMEOUT_MS") {
        if let Ok(n) = val.parse() {
            config.supervisor.kill_timeout_ms = n;
        }
    }
}

//! Process-wide options shared with every plugin.

use forza_core::{Config, ConnectParams};

/// Resolved agent options: CLI arguments layered over the config file.
///
/// Built once at startup and handed to plugins behind an `Arc`; nothing
/// mutates it afterwards.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub host: String,
    pub port: u16,
    pub hostname: String,
    pub app_user: Option<String>,
    pub app_name: Option<String>,
    /// Workload command line. Empty means no child is spawned.
    pub command: Vec<String>,
    pub config: Config,
}

impl AgentOptions {
    pub fn new(host: impl Into<String>, port: u16, hostname: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            hostname: hostname.into(),
            app_user: None,
            app_name: None,
            command: Vec::new(),
            config: Config::default(),
        }
    }

    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn has_workload(&self) -> bool {
        !self.command.is_empty()
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            hostname: self.hostname.clone(),
            app_user: self.app_user.clone(),
            app_name: self.app_name.clone(),
        }
    }
}

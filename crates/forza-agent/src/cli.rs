//! Command-line interface.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::options::AgentOptions;

/// Exit code for a missing `--host` or `--port`.
pub const EXIT_MISSING_ENDPOINT: u8 = 2;
/// Exit code for a port outside `1..=65535`.
pub const EXIT_BAD_PORT: u8 = 3;
/// Exit code when no hostname was given and none could be detected.
pub const EXIT_NO_HOSTNAME: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "forza")]
#[command(
    version,
    about = "forza - supervise a process and report its telemetry",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Args {
    /// Monitoring endpoint host
    #[arg(short = 'h', long, env = "FORZA_HOST")]
    pub host: Option<String>,

    /// Monitoring endpoint port (1-65535)
    #[arg(short = 'p', long, env = "FORZA_PORT", allow_negative_numbers = true)]
    pub port: Option<i64>,

    /// Host name reported with every metric (default: this machine's)
    #[arg(long, env = "FORZA_HOSTNAME")]
    pub hostname: Option<String>,

    /// Application user reported with every metric
    #[arg(long, env = "FORZA_APP_USER")]
    pub app_user: Option<String>,

    /// Application name reported with every metric
    #[arg(long, env = "FORZA_APP_NAME")]
    pub app_name: Option<String>,

    /// Config file (default: ~/.config/forza/forza.toml when present)
    #[arg(long, env = "FORZA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug"); overrides the config file
    #[arg(long, env = "FORZA_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "FORZA_LOG_JSON")]
    pub log_json: bool,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Command to supervise, with its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Argument problems detected before anything is started.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Host and port required")]
    MissingEndpoint,

    #[error("Port has to be between 1 and 65535, got {0}")]
    PortOutOfRange(i64),

    #[error("Failed to get a host name, provide one explicitly with --hostname")]
    NoHostname,
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::MissingEndpoint => EXIT_MISSING_ENDPOINT,
            Self::PortOutOfRange(_) => EXIT_BAD_PORT,
            Self::NoHostname => EXIT_NO_HOSTNAME,
        }
    }
}

impl Args {
    /// Validate the endpoint and build agent options (config not applied).
    ///
    /// `local_hostname` is consulted only when `--hostname` is absent.
    pub fn into_options(
        self,
        local_hostname: impl FnOnce() -> Option<String>,
    ) -> Result<AgentOptions, CliError> {
        let (Some(host), Some(port)) = (self.host, self.port) else {
            return Err(CliError::MissingEndpoint);
        };
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or(CliError::PortOutOfRange(port))?;
        let hostname = match self.hostname {
            Some(name) => name,
            None => local_hostname().ok_or(CliError::NoHostname)?,
        };

        let mut options = AgentOptions::new(host, port, hostname).with_command(self.command);
        options.app_user = self.app_user;
        options.app_name = self.app_name;
        Ok(options)
    }
}

/// This machine's host name, if it can be read.
pub fn local_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

//! `forza` binary

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use forza_agent::cli::{self, Args};
use forza_agent::shutdown::SignalListener;
use forza_agent::{Agent, AgentOutcome, PluginRegistry, plugins};
use forza_core::TcpConnector;
use forza_core::tracing_init::{default_filter, init_tracing};

#[tokio::main(flavor = "current_thread")]
#[allow(clippy::print_stderr)]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("forza: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::print_stderr)]
async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config_path = args.config.clone();
    let log_level = args.log_level.clone();
    let log_json = args.log_json;

    let mut options = match args.into_options(cli::local_hostname) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    let mut config = forza_core::config::load_config(config_path.as_deref())
        .context("Failed to load configuration")?;
    if let Some(level) = log_level {
        config.log_level = level;
    }
    init_tracing(&default_filter(&config.log_level), log_json);
    options = options.with_config(config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %options.host,
        port = options.port,
        hostname = %options.hostname,
        command = ?options.command,
        "Starting forza"
    );

    let signals = SignalListener::install().context("Failed to install signal handlers")?;
    let registry = PluginRegistry::with_plugins(plugins::bundled(&options.config));
    let agent = Agent::new(options, registry);
    let outcome = agent.run(&TcpConnector::new(), signals.recv()).await;

    match &outcome {
        AgentOutcome::ConnectFailed(e) => eprintln!("forza: {e}"),
        AgentOutcome::ChildExited(exit) => {
            info!(status = ?exit.status, signal = ?exit.signal, "Exiting after workload exit");
        }
        AgentOutcome::Signalled { signal, .. } => info!(%signal, "Exiting after signal"),
    }
    Ok(ExitCode::from(outcome.exit_code()))
}

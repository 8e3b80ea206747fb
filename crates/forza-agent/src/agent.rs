//! The agent event loop.
//!
//! One task owns the plugin registry, the workload and the connection, and
//! processes one event at a time: either something from the workload (output
//! or exit) or a shutdown signal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use forza_core::{Connection, Connector};
use tracing::{info, warn};

use crate::gate::{ConnectionGate, GateError};
use crate::options::AgentOptions;
use crate::plugin::PluginRegistry;
use crate::shutdown::{ShutdownController, ShutdownSignal, ShutdownState};
use crate::supervisor::{ChildSupervisor, ExitInfo};

/// How a run ended.
#[derive(Debug)]
pub enum AgentOutcome {
    /// The monitoring endpoint could not be reached; nothing was started.
    /// The failure is reported on stderr, the exit itself is normal.
    ConnectFailed(GateError),
    /// The workload exited on its own.
    ChildExited(ExitInfo),
    /// A signal stopped the agent. `child` is the workload's exit if one was
    /// running and got reaped in time.
    Signalled {
        signal: ShutdownSignal,
        child: Option<ExitInfo>,
    },
}

impl AgentOutcome {
    /// Process exit code for this outcome.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ChildExited(_) | Self::ConnectFailed(_) => 0,
            Self::Signalled { .. } => 1,
        }
    }
}

pub struct Agent {
    options: Arc<AgentOptions>,
    registry: PluginRegistry,
    supervisor: ChildSupervisor,
    shutdown: ShutdownController,
    kill_timeout: Duration,
}

impl Agent {
    pub fn new(options: AgentOptions, registry: PluginRegistry) -> Self {
        let supervisor = ChildSupervisor::new(options.config.supervisor.drain_timeout());
        let kill_timeout = options.config.supervisor.kill_timeout();
        Self {
            options: Arc::new(options),
            registry,
            supervisor,
            shutdown: ShutdownController::new(),
            kill_timeout,
        }
    }

    pub const fn shutdown_state(&self) -> ShutdownState {
        self.shutdown.state()
    }

    /// Run until the workload exits or `shutdown` resolves.
    ///
    /// Without a workload (none given, or the launch failed) only a signal
    /// ends the run. A signal during the connection attempt abandons it.
    pub async fn run<C, S>(mut self, connector: &C, shutdown: S) -> AgentOutcome
    where
        C: Connector,
        S: Future<Output = ShutdownSignal>,
    {
        tokio::pin!(shutdown);
        let gate = ConnectionGate::new(connector, Arc::clone(&self.options));
        let opened = tokio::select! {
            opened = gate.open(&mut self.registry, &mut self.supervisor) => opened,
            signal = &mut shutdown => {
                info!(%signal, "Signal received while connecting");
                self.shutdown.begin(signal);
                self.shutdown.finish();
                return AgentOutcome::Signalled { signal, child: None };
            }
        };
        let mut connection = match opened {
            Ok(outcome) => outcome.connection,
            Err(e) => {
                self.shutdown.finish();
                return AgentOutcome::ConnectFailed(e);
            }
        };
        connection.set_close_timeout(self.kill_timeout);
        if let Some(switch) = self.supervisor.kill_switch() {
            self.shutdown.arm(switch);
        }

        loop {
            tokio::select! {
                Some(event) = self.supervisor.next_event() => {
                    if let Some(exit) = self.supervisor.handle_event(event, &mut self.registry) {
                        self.complete_child(exit, &mut connection).await;
                        self.shutdown.finish();
                        return AgentOutcome::ChildExited(exit);
                    }
                }
                signal = &mut shutdown => {
                    return self.terminate(signal, &mut connection).await;
                }
            }
        }
    }

    async fn terminate(
        &mut self,
        signal: ShutdownSignal,
        connection: &mut Connection,
    ) -> AgentOutcome {
        self.shutdown.begin(signal);

        let mut child = None;
        if self.supervisor.is_live() {
            self.shutdown.kill_child();
            child = self
                .supervisor
                .wait_exit(self.kill_timeout, &mut self.registry)
                .await;
            if child.is_none() {
                warn!(
                    pid = ?self.supervisor.pid(),
                    timeout_ms = self.kill_timeout.as_millis(),
                    "Workload not reaped before kill timeout"
                );
            }
        }

        match child {
            Some(exit) => self.complete_child(exit, connection).await,
            None => {
                connection.close().await;
                self.supervisor.release();
            }
        }
        self.shutdown.finish();
        AgentOutcome::Signalled { signal, child }
    }

    /// Exit sequence for the workload: remaining output, exit hooks,
    /// connection close, handle release.
    async fn complete_child(&mut self, exit: ExitInfo, connection: &mut Connection) {
        self.supervisor.drain(&mut self.registry).await;
        self.registry.dispatch_exit(&exit);
        connection.close().await;
        if let Some(handle) = self.supervisor.release() {
            info!(pid = handle.pid, code = ?exit.code(), "Workload finished");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use forza_core::{ConnectParams, TransportError};

    use crate::plugin::Plugin;
    use crate::plugin::test_support::Recorder;

    struct Hanging;

    impl Connector for Hanging {
        fn connect(
            &self,
            _params: &ConnectParams,
        ) -> impl Future<Output = Result<Connection, TransportError>> + Send {
            std::future::pending()
        }
    }

    #[tokio::test]
    async fn signal_abandons_pending_connect() {
        let (rec, log) = Recorder::new("rec");
        let options = AgentOptions::new("192.0.2.1", 9, "h").with_command(["true"]);
        let registry = PluginRegistry::with_plugins([Box::new(rec) as Box<dyn Plugin>]);
        let agent = Agent::new(options, registry);
        let shutdown = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ShutdownSignal::Interrupt
        };

        let outcome = tokio::time::timeout(Duration::from_secs(3), agent.run(&Hanging, shutdown))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            AgentOutcome::Signalled {
                signal: ShutdownSignal::Interrupt,
                child: None
            }
        ));
        assert_eq!(outcome.exit_code(), 1);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn exit_codes() {
        let exited = AgentOutcome::ChildExited(ExitInfo {
            status: Some(7),
            signal: None,
        });
        let signalled = AgentOutcome::Signalled {
            signal: ShutdownSignal::Terminate,
            child: None,
        };
        assert_eq!(exited.exit_code(), 0);
        assert_eq!(signalled.exit_code(), 1);
        let refused = AgentOutcome::ConnectFailed(GateError::Connect(TransportError::Connect {
            addr: "127.0.0.1:1".into(),
            source: std::io::ErrorKind::ConnectionRefused.into(),
        }));
        assert_eq!(refused.exit_code(), 0);
    }
}

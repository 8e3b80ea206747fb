//! Connection gate: nothing is activated or launched until the monitoring
//! endpoint accepted the connection.

use std::sync::Arc;

use forza_core::{Connection, Connector, Metric, TransportError};
use tracing::{error, info, warn};

use crate::options::AgentOptions;
use crate::plugin::{InitReport, PluginContext, PluginRegistry};
use crate::supervisor::{ChildHandle, ChildSupervisor};

/// Service name of the metric announcing a started agent.
pub const START_SERVICE: &str = "forza.start";

/// What the gate produced once the connection was up.
#[derive(Debug)]
pub struct GateOutcome {
    pub connection: Connection,
    pub init: InitReport,
    /// The spawned workload, if a command was given and the launch worked.
    pub child: Option<ChildHandle>,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Connect(#[from] TransportError),
}

pub struct ConnectionGate<'a, C> {
    connector: &'a C,
    options: Arc<AgentOptions>,
}

impl<'a, C: Connector> ConnectionGate<'a, C> {
    pub const fn new(connector: &'a C, options: Arc<AgentOptions>) -> Self {
        Self { connector, options }
    }

    /// Connect, then activate plugins, announce the start and launch the
    /// workload if there is one.
    ///
    /// On connection failure no plugin is initialised and nothing is spawned.
    /// A failed launch is logged and leaves the connection open.
    pub async fn open(
        self,
        registry: &mut PluginRegistry,
        supervisor: &mut ChildSupervisor,
    ) -> Result<GateOutcome, GateError> {
        let params = self.options.connect_params();
        let connection = match self.connector.connect(&params).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(
                    host = %params.host,
                    port = params.port,
                    error = %e,
                    "Connection failed"
                );
                return Err(e.into());
            }
        };
        info!(host = %params.host, port = params.port, "Connected to monitoring endpoint");

        let ctx = PluginContext {
            options: Arc::clone(&self.options),
            metrics: connection.sender(),
        };
        let init = registry.init_all(&ctx);

        connection.send(Metric::new(START_SERVICE, 1.0));
        notify_ready();

        let child = if self.options.has_workload() {
            let command = self.options.command.as_slice();
            match supervisor.spawn(command, std::env::vars_os(), registry) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("spawn: {e}");
                    None
                }
            }
        } else {
            info!("No command given, running plugins only");
            None
        };

        Ok(GateOutcome {
            connection,
            init,
            child,
        })
    }
}

/// Tell systemd the agent is up. Unsets `NOTIFY_SOCKET` so the workload does
/// not inherit it.
fn notify_ready() {
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %e, "Failed to notify systemd");
    }
}

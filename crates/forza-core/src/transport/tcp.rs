//! TCP transport: one JSON metric per line.

use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{ConnectParams, Connection, Connector, TransportError};

/// Connects to the monitoring endpoint over plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub const fn new() -> Self {
        Self
    }
}

impl Connector for TcpConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Connection, TransportError> {
        let addr = format!("{}:{}", params.host, params.port);
        debug!(%addr, "Connecting to monitoring endpoint");
        let stream = TcpStream::connect((params.host.as_str(), params.port))
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        info!(%addr, hostname = %params.hostname, "Connected to monitoring endpoint");
        Ok(Connection::spawn(stream, params))
    }
}

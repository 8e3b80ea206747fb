//! Monitoring transport.
//!
//! The agent consumes three primitives: `connect`, `send` and `close`.
//! [`Connector`] performs the handshake and yields a [`Connection`]; every
//! emission goes through a cloneable [`MetricSender`]; [`Connection::close`]
//! flushes what is queued, within a bound, and releases the link.

mod connection;
mod tcp;

use std::future::Future;

pub use connection::{Connection, DEFAULT_CLOSE_TIMEOUT, MetricSender, QUEUE_CAPACITY};
pub use tcp::TcpConnector;

/// Parameters of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    /// Host name reported with every metric.
    pub hostname: String,
    pub app_user: Option<String>,
    pub app_name: Option<String>,
}

/// Opens connections to the monitoring endpoint.
///
/// Exactly one result is produced per attempt. There is no local timeout:
/// failure is whatever the underlying transport reports.
pub trait Connector {
    fn connect(
        &self,
        params: &ConnectParams,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send;
}

/// Errors from the monitoring transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

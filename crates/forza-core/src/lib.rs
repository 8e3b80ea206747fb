//! `forza` Core Library
//!
//! Shared functionality for the `forza` supervisor agent:
//! - `Metric` value type and its NDJSON wire encoding
//! - Monitoring transport (connect / send / close)
//! - Layered configuration resolution
//! - Common error types and tracing setup

pub mod config;
pub mod error;
pub mod metric;
pub mod tracing_init;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use metric::Metric;
pub use transport::{
    ConnectParams, Connection, Connector, MetricSender, TcpConnector, TransportError,
};

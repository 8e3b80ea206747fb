//! Connection to the monitoring endpoint.
//!
//! A single writer task owns the byte stream. Metrics reach it through a
//! bounded queue; `send` never waits and drops the metric when the queue is
//! full. `close` stops the writer after the queue has been drained, or
//! abandons it once the close timeout elapses.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::ConnectParams;
use crate::metric::{self, AppMeta, Metric, WireMetric};

/// Metrics queued ahead of the writer before new ones are dropped.
pub const QUEUE_CAPACITY: usize = 1024;

/// Default bound on flushing queued metrics in [`Connection::close`].
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Host and app identity stamped on each metric.
#[derive(Debug)]
struct Origin {
    host: String,
    app: AppMeta,
}

/// Fire-and-forget handle for emitting metrics.
#[derive(Debug, Clone)]
pub struct MetricSender {
    tx: mpsc::Sender<WireMetric>,
    origin: Arc<Origin>,
}

impl MetricSender {
    /// Create a sender whose metrics land in the returned receiver instead of
    /// a socket. Used for in-process consumers.
    pub fn channel(params: &ConnectParams) -> (Self, mpsc::Receiver<WireMetric>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let origin = Arc::new(Origin {
            host: params.hostname.clone(),
            app: AppMeta {
                user: params.app_user.clone(),
                name: params.app_name.clone(),
            },
        });
        (Self { tx, origin }, rx)
    }

    /// Queue one metric. No delivery acknowledgement; the metric is dropped
    /// when the queue is full or the connection is closed.
    pub fn send(&self, metric: Metric) {
        let wire = WireMetric {
            host: self.origin.host.clone(),
            metric,
            app: self.origin.app.clone(),
            time: metric::now_millis(),
        };
        match self.tx.try_send(wire) {
            Ok(()) => {}
            Err(TrySendError::Full(wire)) => {
                trace!(service = %wire.metric.service, "Send queue full, dropping metric");
            }
            Err(TrySendError::Closed(wire)) => {
                trace!(service = %wire.metric.service, "Connection closed, dropping metric");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open link to the monitoring endpoint.
pub struct Connection {
    sender: MetricSender,
    shutdown_tx: watch::Sender<bool>,
    writer: Option<JoinHandle<()>>,
    close_timeout: Duration,
}

impl Connection {
    /// Start the writer task over an already-established byte stream.
    pub fn spawn<W>(stream: W, params: &ConnectParams) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, rx) = MetricSender::channel(params);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let writer = tokio::spawn(write_loop(stream, rx, shutdown_rx));
        Self {
            sender,
            shutdown_tx,
            writer: Some(writer),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Bound how long [`close`](Self::close) waits for the endpoint to take
    /// queued metrics.
    pub const fn set_close_timeout(&mut self, timeout: Duration) {
        self.close_timeout = timeout;
    }

    /// A handle plugins can keep for the lifetime of the run.
    pub fn sender(&self) -> MetricSender {
        self.sender.clone()
    }

    /// Convenience for `self.sender().send(metric)`.
    pub fn send(&self, metric: Metric) {
        self.sender.send(metric);
    }

    pub const fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Flush queued metrics and release the link. Calling it again is a no-op.
    ///
    /// An endpoint that stops reading gets `close_timeout` to catch up; after
    /// that the writer is aborted and whatever is still queued is lost.
    pub async fn close(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(self.close_timeout, &mut writer).await {
            Ok(Ok(())) => debug!("Monitoring connection closed"),
            Ok(Err(e)) => warn!(error = %e, "Connection writer task failed"),
            Err(_) => {
                writer.abort();
                warn!(
                    timeout_ms = self.close_timeout.as_millis(),
                    "Monitoring endpoint stopped reading, abandoning queued metrics"
                );
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.sender.origin.host)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.writer.is_some() {
            let _ = self.shutdown_tx.send(true);
        }
    }
}

async fn write_loop<W>(
    mut stream: W,
    mut rx: mpsc::Receiver<WireMetric>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            maybe = rx.recv() => {
                let Some(wire) = maybe else { break };
                if !write_metric(&mut stream, &wire).await {
                    return;
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    // Anything queued before close still goes out.
    rx.close();
    while let Ok(wire) = rx.try_recv() {
        if !write_metric(&mut stream, &wire).await {
            return;
        }
    }
    if let Err(e) = stream.flush().await {
        debug!(error = %e, "Flush on close failed");
    }
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Shutdown on close failed");
    }
}

/// Returns false once the stream is unusable.
async fn write_metric<W>(stream: &mut W, wire: &WireMetric) -> bool
where
    W: AsyncWrite + Unpin,
{
    let line = match metric::encode_line(wire) {
        Ok(line) => line,
        Err(e) => {
            warn!(service = %wire.metric.service, error = %e, "Failed to encode metric");
            return true;
        }
    };
    if let Err(e) = stream.write_all(&line).await {
        warn!(error = %e, "Write to monitoring endpoint failed, dropping further metrics");
        return false;
    }
    true
}

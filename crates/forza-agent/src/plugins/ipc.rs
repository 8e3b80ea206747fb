use forza_core::{Metric, MetricSender};
use tracing::{debug, warn};

use crate::demux::Chunk;
use crate::plugin::{Plugin, PluginContext};
use crate::supervisor::ExitInfo;

/// Longest partial line kept while waiting for its newline.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Reassembles newline-terminated lines from arbitrary chunks.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `bytes` and return every line completed by them, without the
    /// trailing newline.
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        if self.pending.len() > MAX_LINE_LEN {
            warn!(len = self.pending.len(), "IPC line too long, discarding");
            self.pending.clear();
        }
        lines
    }

    fn take_rest(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

/// Forwards metrics the workload writes to the IPC channel, one JSON object
/// per line. Malformed lines are logged and skipped.
#[derive(Debug, Default)]
pub struct IpcForwarder {
    metrics: Option<MetricSender>,
    lines: LineBuffer,
}

impl IpcForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    fn forward(&self, line: &[u8]) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        match serde_json::from_slice::<Metric>(line) {
            Ok(metric) => {
                debug!(service = %metric.service, "Forwarding IPC metric");
                if let Some(metrics) = &self.metrics {
                    metrics.send(metric);
                }
            }
            Err(e) => warn!(
                error = %e,
                line = %String::from_utf8_lossy(line),
                "Skipping malformed IPC line"
            ),
        }
    }
}

impl Plugin for IpcForwarder {
    fn name(&self) -> &'static str {
        "ipc"
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.metrics = Some(ctx.metrics.clone());
        Ok(())
    }

    fn on_ipc_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        for line in self.lines.push(chunk.as_bytes()) {
            self.forward(&line);
        }
        Ok(())
    }

    fn on_process_exit(&mut self, _exit: &ExitInfo) -> anyhow::Result<()> {
        let rest = self.lines.take_rest();
        self.forward(&rest);
        Ok(())
    }
}

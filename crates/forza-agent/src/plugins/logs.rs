use forza_core::{Metric, MetricSender};

use crate::demux::Chunk;
use crate::plugin::{Plugin, PluginContext};

/// Forwards the workload's output as `logs.stdout` / `logs.stderr` metrics.
///
/// The chunk text goes in the description and the byte count is the value.
#[derive(Debug, Default)]
pub struct LogForwarder {
    metrics: Option<MetricSender>,
}

impl LogForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::cast_precision_loss)]
    fn forward(&self, service: &'static str, chunk: &Chunk) {
        if let Some(metrics) = &self.metrics {
            metrics.send(
                Metric::new(service, chunk.len() as f64)
                    .with_description(chunk.to_string_lossy()),
            );
        }
    }
}

impl Plugin for LogForwarder {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.metrics = Some(ctx.metrics.clone());
        Ok(())
    }

    fn on_stdout_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        self.forward("logs.stdout", chunk);
        Ok(())
    }

    fn on_stderr_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        self.forward("logs.stderr", chunk);
        Ok(())
    }
}

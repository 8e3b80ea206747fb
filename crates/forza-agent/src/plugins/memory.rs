use std::time::Duration;

use forza_core::{Metric, MetricSender};
use sysinfo::System;
use tracing::debug;

use super::ticker::Ticker;
use crate::plugin::{Plugin, PluginContext};
use crate::supervisor::ExitInfo;

pub(super) const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// Emits `memory`: the used fraction of physical memory.
#[derive(Debug)]
pub struct Memory {
    interval: Duration,
    ticker: Ticker,
}

impl Memory {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticker: Ticker::default(),
        }
    }
}

/// `used / total`, or `None` when the total is unknown.
#[allow(clippy::cast_precision_loss)]
fn used_fraction(used: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| used as f64 / total as f64)
}

fn send(system: &mut System, metrics: &MetricSender) {
    system.refresh_memory();
    match used_fraction(system.used_memory(), system.total_memory()) {
        Some(fraction) => metrics.send(Metric::new("memory", fraction)),
        None => debug!("Total memory unknown, skipping memory metric"),
    }
}

impl Plugin for Memory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let metrics = ctx.metrics.clone();
        let mut system = System::new();
        self.ticker
            .start(self.interval, move || send(&mut system, &metrics));
        Ok(())
    }

    fn on_process_exit(&mut self, _exit: &ExitInfo) -> anyhow::Result<()> {
        self.ticker.stop();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plugin::test_support::context_with_metrics;

    #[test]
    fn fraction_of_total() {
        assert_eq!(used_fraction(1, 4), Some(0.25));
        assert_eq!(used_fraction(5, 0), None);
    }

    #[tokio::test]
    async fn reports_fraction_between_zero_and_one() {
        let (ctx, mut rx) = context_with_metrics();
        let mut plugin = Memory::new(Duration::from_secs(60));
        plugin.init(&ctx).unwrap();

        let wire = rx.recv().await.unwrap();
        assert_eq!(wire.metric.service, "memory");
        assert!((0.0..=1.0).contains(&wire.metric.metric));
    }
}

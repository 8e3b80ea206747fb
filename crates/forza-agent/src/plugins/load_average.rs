use std::time::Duration;

use forza_core::{Metric, MetricSender};
use sysinfo::System;

use super::ticker::Ticker;
use crate::plugin::{Plugin, PluginContext};
use crate::supervisor::ExitInfo;

pub(super) const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// Emits the 1, 5 and 15 minute load averages.
#[derive(Debug)]
pub struct LoadAverage {
    interval: Duration,
    ticker: Ticker,
}

impl LoadAverage {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticker: Ticker::default(),
        }
    }
}

fn send(metrics: &MetricSender) {
    let load = System::load_average();
    metrics.send(Metric::new("load-average.1", load.one));
    metrics.send(Metric::new("load-average.5", load.five));
    metrics.send(Metric::new("load-average.15", load.fifteen));
}

impl Plugin for LoadAverage {
    fn name(&self) -> &'static str {
        "load-average"
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let metrics = ctx.metrics.clone();
        self.ticker.start(self.interval, move || send(&metrics));
        Ok(())
    }

    fn on_process_exit(&mut self, _exit: &ExitInfo) -> anyhow::Result<()> {
        self.ticker.stop();
        Ok(())
    }
}

use std::time::Duration;

use forza_core::Metric;

use super::ticker::Ticker;
use crate::plugin::{Plugin, PluginContext};
use crate::supervisor::ExitInfo;

pub(super) const DEFAULT_INTERVAL: Duration = Duration::from_millis(4000);

/// Emits `heartbeat` = 1 on a fixed interval, with the interval as ttl.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    ticker: Ticker,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticker: Ticker::default(),
        }
    }
}

impl Plugin for Heartbeat {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let metrics = ctx.metrics.clone();
        let ttl = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        self.ticker.start(self.interval, move || {
            metrics.send(Metric::new("heartbeat", 1.0).with_ttl(ttl));
        });
        Ok(())
    }

    fn on_process_exit(&mut self, _exit: &ExitInfo) -> anyhow::Result<()> {
        self.ticker.stop();
        Ok(())
    }
}

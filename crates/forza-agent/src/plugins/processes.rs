use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use forza_core::{Metric, MetricSender};
use tracing::warn;

use super::ticker::Ticker;
use crate::plugin::{Plugin, PluginContext};
use crate::supervisor::ExitInfo;

pub(super) const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

const PROC_STAT: &str = "/proc/stat";

/// Process counters from `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStat {
    /// Forks since boot.
    pub processes: u64,
    pub procs_running: u64,
    pub procs_blocked: u64,
}

/// Parse the process counters out of `/proc/stat` content.
///
/// Returns `None` unless all three counters are present.
pub fn parse_proc_stat(content: &str) -> Option<ProcStat> {
    let mut processes = None;
    let mut running = None;
    let mut blocked = None;
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let slot = match fields.next() {
            Some("processes") => &mut processes,
            Some("procs_running") => &mut running,
            Some("procs_blocked") => &mut blocked,
            _ => continue,
        };
        *slot = fields.next().and_then(|v| v.parse::<u64>().ok());
    }
    Some(ProcStat {
        processes: processes?,
        procs_running: running?,
        procs_blocked: blocked?,
    })
}

fn read_proc_stat(path: &Path) -> anyhow::Result<ProcStat> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_proc_stat(&content)
        .with_context(|| format!("no process counters in {}", path.display()))
}

#[allow(clippy::cast_precision_loss)]
fn send(path: &Path, metrics: &MetricSender) {
    match read_proc_stat(path) {
        Ok(stat) => {
            metrics.send(Metric::new("processes", stat.processes as f64));
            metrics.send(Metric::new("processes.running", stat.procs_running as f64));
            metrics.send(Metric::new("processes.blocked", stat.procs_blocked as f64));
        }
        Err(e) => warn!(error = %e, "Failed to sample process counters"),
    }
}

/// Emits process counters. Only works where `/proc/stat` is readable; init
/// fails elsewhere.
#[derive(Debug)]
pub struct Processes {
    interval: Duration,
    source: PathBuf,
    ticker: Ticker,
}

impl Processes {
    pub fn new(interval: Duration) -> Self {
        Self::with_source(interval, PROC_STAT)
    }

    /// Read counters from `source` instead of `/proc/stat`.
    pub fn with_source(interval: Duration, source: impl Into<PathBuf>) -> Self {
        Self {
            interval,
            source: source.into(),
            ticker: Ticker::default(),
        }
    }
}

impl Plugin for Processes {
    fn name(&self) -> &'static str {
        "processes"
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        read_proc_stat(&self.source)?;
        let metrics = ctx.metrics.clone();
        let source = self.source.clone();
        self.ticker.start(self.interval, move || send(&source, &metrics));
        Ok(())
    }

    fn on_process_exit(&mut self, _exit: &ExitInfo) -> anyhow::Result<()> {
        self.ticker.stop();
        Ok(())
    }
}

use anyhow::Context;
use forza_core::{Metric, MetricSender};

use crate::demux::ChannelKind;
use crate::plugin::{Plugin, PluginContext};
use crate::supervisor::{ChildHandle, ExitInfo, LaunchOptions};

/// Environment variable telling the workload which descriptor is the IPC
/// channel.
pub const IPC_FD_ENV: &str = "FORZA_IPC_FD";

/// Reports the workload's lifecycle: `process.spawn` with its pid and
/// `process.exit` with its exit code (128 + signal when killed).
#[derive(Debug, Default)]
pub struct ProcessReporter {
    metrics: Option<MetricSender>,
}

impl ProcessReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn metrics(&self) -> anyhow::Result<&MetricSender> {
        self.metrics.as_ref().context("plugin used before init")
    }
}

impl Plugin for ProcessReporter {
    fn name(&self) -> &'static str {
        "process"
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.metrics = Some(ctx.metrics.clone());
        Ok(())
    }

    fn on_spawn_options(&mut self, options: &mut LaunchOptions) -> anyhow::Result<()> {
        options.set_env(IPC_FD_ENV, ChannelKind::Ipc.fd().to_string());
        Ok(())
    }

    fn on_process_spawned(
        &mut self,
        child: &ChildHandle,
        _options: &LaunchOptions,
    ) -> anyhow::Result<()> {
        self.metrics()?
            .send(Metric::new("process.spawn", f64::from(child.pid)));
        Ok(())
    }

    fn on_process_exit(&mut self, exit: &ExitInfo) -> anyhow::Result<()> {
        let mut metric = Metric::new("process.exit", exit.code().map_or(-1.0, f64::from));
        if let Some(signal) = exit.signal {
            metric = metric.with_description(format!("killed by signal {signal}"));
        }
        self.metrics()?.send(metric);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::ffi::OsStr;

    use super::*;
    use crate::plugin::test_support::context_with_metrics;

    #[test]
    fn advertises_ipc_fd() {
        let mut plugin = ProcessReporter::new();
        let mut options =
            LaunchOptions::from_command_line(&["true"], std::iter::empty::<(&str, &str)>())
                .unwrap();
        plugin.on_spawn_options(&mut options).unwrap();
        assert_eq!(options.env_var(IPC_FD_ENV), Some(OsStr::new("3")));
    }

    #[test]
    fn reports_spawn_and_exit() {
        let (ctx, mut rx) = context_with_metrics();
        let mut plugin = ProcessReporter::new();
        plugin.init(&ctx).unwrap();

        let options =
            LaunchOptions::from_command_line(&["true"], std::iter::empty::<(&str, &str)>())
                .unwrap();
        let child = ChildHandle {
            pid: 4242,
            exit: None,
        };
        plugin.on_process_spawned(&child, &options).unwrap();
        plugin
            .on_process_exit(&ExitInfo {
                status: None,
                signal: Some(9),
            })
            .unwrap();

        let spawn = rx.try_recv().unwrap();
        assert_eq!(spawn.metric.service, "process.spawn");
        assert!((spawn.metric.metric - 4242.0).abs() < f64::EPSILON);
        let exit = rx.try_recv().unwrap();
        assert_eq!(exit.metric.service, "process.exit");
        assert!((exit.metric.metric - 137.0).abs() < f64::EPSILON);
        assert_eq!(exit.metric.description.as_deref(), Some("killed by signal 9"));
    }

    #[test]
    fn hooks_before_init_fail() {
        let mut plugin = ProcessReporter::new();
        let err = plugin
            .on_process_exit(&ExitInfo {
                status: Some(0),
                signal: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("before init"));
    }
}

//! Plugins shipped with the agent.
//!
//! [`bundled`] returns them in their fixed registration order, leaving out the
//! ones disabled in config.

mod heartbeat;
mod ipc;
mod load_average;
mod logs;
mod memory;
mod process;
mod processes;
mod ticker;

use forza_core::Config;

use crate::plugin::Plugin;

pub use heartbeat::Heartbeat;
pub use ipc::IpcForwarder;
pub use load_average::LoadAverage;
pub use logs::LogForwarder;
pub use memory::Memory;
pub use process::ProcessReporter;
pub use processes::{ProcStat, Processes, parse_proc_stat};

/// Build the enabled bundled plugins, in registration order.
pub fn bundled(config: &Config) -> Vec<Box<dyn Plugin>> {
    let cfg = &config.plugins;
    let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();
    if cfg.heartbeat.enabled {
        plugins.push(Box::new(Heartbeat::new(
            cfg.heartbeat.interval_or(heartbeat::DEFAULT_INTERVAL),
        )));
    }
    if cfg.load_average.enabled {
        plugins.push(Box::new(LoadAverage::new(
            cfg.load_average.interval_or(load_average::DEFAULT_INTERVAL),
        )));
    }
    if cfg.memory.enabled {
        plugins.push(Box::new(Memory::new(
            cfg.memory.interval_or(memory::DEFAULT_INTERVAL),
        )));
    }
    if cfg.processes.enabled {
        plugins.push(Box::new(Processes::new(
            cfg.processes.interval_or(processes::DEFAULT_INTERVAL),
        )));
    }
    if cfg.process.enabled {
        plugins.push(Box::new(ProcessReporter::new()));
    }
    if cfg.logs.enabled {
        plugins.push(Box::new(LogForwarder::new()));
    }
    if cfg.ipc.enabled {
        plugins.push(Box::new(IpcForwarder::new()));
    }
    plugins
}

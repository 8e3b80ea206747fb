//! `forza` agent
//!
//! Connects to a monitoring endpoint, supervises at most one workload and
//! lets a fixed set of plugins observe it:
//! - connection gate: plugins and the workload start only once connected
//! - child supervisor: fd 1 and 2 captured, fd 3 reserved for IPC
//! - stream demultiplexer: output chunks fanned out to plugin hooks
//! - shutdown controller: the workload is always signalled before exit

pub mod agent;
pub mod cli;
pub mod demux;
pub mod gate;
pub mod options;
pub mod plugin;
pub mod plugins;
pub mod shutdown;
pub mod supervisor;

pub use agent::{Agent, AgentOutcome};
pub use options::AgentOptions;
pub use plugin::{Plugin, PluginContext, PluginRegistry};

//! Plugin contract and registry.
//!
//! A plugin is a compile-time-known extension that implements any subset of
//! the lifecycle and data hooks below. Every hook has a no-op default, so a
//! plugin only overrides what it is interested in.

mod registry;

use std::sync::Arc;

use forza_core::MetricSender;

use crate::demux::Chunk;
use crate::options::AgentOptions;
use crate::supervisor::{ChildHandle, ExitInfo, LaunchOptions};

pub use registry::{InitReport, PluginRegistry, SlotState};

/// What a plugin receives during initialisation.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Shared, read-only process options.
    pub options: Arc<AgentOptions>,
    /// Emission handle for the open monitoring connection.
    pub metrics: MetricSender,
}

/// Hook interface implemented by every plugin.
///
/// Hooks run on the agent loop and must return promptly. Errors and panics
/// are caught per plugin and logged; they never stop the loop.
pub trait Plugin: Send {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// One-time setup. An error disqualifies the plugin for the rest of the
    /// run: none of its other hooks will be called.
    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called before the workload is launched; may rewrite its options.
    fn on_spawn_options(&mut self, options: &mut LaunchOptions) -> anyhow::Result<()> {
        let _ = options;
        Ok(())
    }

    /// Called once the workload is running, with the final launch options.
    fn on_process_spawned(
        &mut self,
        child: &ChildHandle,
        options: &LaunchOptions,
    ) -> anyhow::Result<()> {
        let _ = (child, options);
        Ok(())
    }

    /// Called exactly once when the workload exits.
    fn on_process_exit(&mut self, exit: &ExitInfo) -> anyhow::Result<()> {
        let _ = exit;
        Ok(())
    }

    fn on_stdout_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        let _ = chunk;
        Ok(())
    }

    fn on_stderr_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        let _ = chunk;
        Ok(())
    }

    fn on_ipc_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        let _ = chunk;
        Ok(())
    }
}

/// Errors raised while dispatching to a plugin.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin {name} failed in {hook}: {source}")]
    Hook {
        name: &'static str,
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin {name} panicked in {hook}: {message}")]
    Panicked {
        name: &'static str,
        hook: &'static str,
        message: String,
    },
}

impl PluginError {
    pub const fn plugin(&self) -> &'static str {
        match self {
            Self::Hook { name, .. } | Self::Panicked { name, .. } => name,
        }
    }
}

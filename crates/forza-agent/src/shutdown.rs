//! Shutdown controller and signal handling.

use std::fmt;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info};

use crate::supervisor::KillSwitch;

/// Where the agent is in its shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Termination request received by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// SIGINT and SIGTERM handlers, installed up front so a signal arriving
/// before the loop starts waiting is not lost.
#[derive(Debug)]
pub struct SignalListener {
    interrupt: Signal,
    terminate: Signal,
}

impl SignalListener {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolve on the first SIGINT or SIGTERM.
    pub async fn recv(mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.interrupt.recv() => {
                info!("Received Ctrl+C shutdown signal");
                ShutdownSignal::Interrupt
            }
            _ = self.terminate.recv() => {
                info!("Received SIGTERM shutdown signal");
                ShutdownSignal::Terminate
            }
        }
    }
}

/// Tracks the shutdown state and guarantees the workload is signalled before
/// the agent goes away.
///
/// The cleanup routine runs from [`finish`](Self::finish) and again from
/// `Drop`; it is idempotent.
#[derive(Debug)]
pub struct ShutdownController {
    state: ShutdownState,
    reason: Option<ShutdownSignal>,
    child: Option<KillSwitch>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub const fn new() -> Self {
        Self {
            state: ShutdownState::Running,
            reason: None,
            child: None,
        }
    }

    pub const fn state(&self) -> ShutdownState {
        self.state
    }

    pub const fn reason(&self) -> Option<ShutdownSignal> {
        self.reason
    }

    /// Register the workload to be killed on cleanup.
    pub fn arm(&mut self, child: KillSwitch) {
        self.child = Some(child);
    }

    /// Enter `ShuttingDown` for `signal`. Returns `false` if shutdown had
    /// already begun.
    pub fn begin(&mut self, signal: ShutdownSignal) -> bool {
        if self.state != ShutdownState::Running {
            debug!(%signal, state = ?self.state, "Shutdown already in progress");
            return false;
        }
        info!(%signal, "Shutting down");
        self.state = ShutdownState::ShuttingDown;
        self.reason = Some(signal);
        true
    }

    /// Kill the workload if it is still running.
    pub fn kill_child(&self) -> bool {
        self.child.as_ref().is_some_and(KillSwitch::fire)
    }

    /// Cleanup routine: kill a live workload, then mark the agent terminated.
    pub fn finish(&mut self) {
        if self.state == ShutdownState::Terminated {
            return;
        }
        if let Some(child) = self.child.take() {
            child.fire();
        }
        self.state = ShutdownState::Terminated;
        debug!(reason = ?self.reason, "Shutdown complete");
    }
}

impl Drop for ShutdownController {
    fn drop(&mut self) {
        self.finish();
    }
}

//! Child supervisor: launches the workload, owns its handle and turns its
//! output and exit into events for the agent loop.

mod launch;

use std::ffi::OsString;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::demux::{ChannelKind, Demultiplexer, ReadOutcome, spawn_reader};
use crate::plugin::PluginRegistry;

pub use launch::LaunchOptions;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How the workload ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit status when the child exited normally.
    pub status: Option<i32>,
    /// Terminating signal when the child was killed.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Shell-style code: the exit status, or 128 + signal.
    pub fn code(&self) -> Option<i32> {
        self.status.or_else(|| self.signal.map(|s| 128 + s))
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            status: status.code(),
            signal: status.signal(),
        }
    }
}

/// Identity of the running workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildHandle {
    pub pid: u32,
    /// Filled in once the child has been reaped.
    pub exit: Option<ExitInfo>,
}

/// Everything the supervisor's background tasks report to the loop.
#[derive(Debug)]
pub enum SupervisorEvent {
    Read(ChannelKind, ReadOutcome),
    Exited(ExitInfo),
}

/// Sends SIGKILL to the workload unless it has already been reaped.
///
/// Cloneable so the shutdown controller can hold one independently of the
/// supervisor.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    pid: u32,
    reaped: Arc<AtomicBool>,
}

impl KillSwitch {
    pub fn is_live(&self) -> bool {
        !self.reaped.load(Ordering::Acquire)
    }

    /// Returns `true` if a signal was delivered.
    pub fn fire(&self) -> bool {
        if !self.is_live() {
            return false;
        }
        let Ok(raw) = i32::try_from(self.pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => {
                info!(pid = self.pid, "Sent SIGKILL to workload");
                true
            }
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Failed to kill workload");
                false
            }
        }
    }
}

struct RunningChild {
    handle: ChildHandle,
    kill_switch: KillSwitch,
    readers: Vec<JoinHandle<()>>,
    waiter: JoinHandle<()>,
}

/// Owns the (at most one) workload for the lifetime of the agent.
pub struct ChildSupervisor {
    events_tx: mpsc::Sender<SupervisorEvent>,
    events_rx: mpsc::Receiver<SupervisorEvent>,
    demux: Demultiplexer,
    child: Option<RunningChild>,
    spawned: bool,
    drain_timeout: Duration,
}

impl std::fmt::Debug for ChildSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSupervisor")
            .field("child", &self.child.as_ref().map(|c| &c.handle))
            .field("spawned", &self.spawned)
            .field("demux", &self.demux)
            .finish_non_exhaustive()
    }
}

impl ChildSupervisor {
    pub fn new(drain_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events_tx,
            events_rx,
            demux: Demultiplexer::new(),
            child: None,
            spawned: false,
            drain_timeout,
        }
    }

    /// Launch the workload.
    ///
    /// Active plugins may rewrite the launch options first; once the child
    /// runs they are told about it, then reads on fds 1, 2 and 3 start. On
    /// failure nothing is running and no exit hook will ever fire.
    pub fn spawn<S, I>(
        &mut self,
        command: &[S],
        base_env: I,
        registry: &mut PluginRegistry,
    ) -> Result<ChildHandle, SupervisorError>
    where
        S: AsRef<std::ffi::OsStr>,
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        if self.spawned {
            return Err(SupervisorError::AlreadySpawned);
        }
        let mut options = LaunchOptions::from_command_line(command, base_env)?;
        registry.dispatch_spawn_options(&mut options);

        let (ipc_reader, ipc_writer) = std::io::pipe().map_err(SupervisorError::Pipe)?;
        let ipc_writer = OwnedFd::from(ipc_writer);
        let ipc_reader = pipe::Receiver::from_file(File::from(OwnedFd::from(ipc_reader)))
            .map_err(SupervisorError::Pipe)?;

        let mut child = options
            .command(&ipc_writer)
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed {
                program: options.display_command(),
                source,
            })?;
        // Only the child may hold the write end, or fd 3 never reaches EOF.
        drop(ipc_writer);

        let Some(pid) = child.id() else {
            return Err(SupervisorError::SpawnFailed {
                program: options.display_command(),
                source: std::io::Error::other("child exited before its pid was read"),
            });
        };
        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::MissingPipe(ChannelKind::Stdout))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::MissingPipe(ChannelKind::Stderr))?;
        self.spawned = true;

        let handle = ChildHandle { pid, exit: None };
        info!(pid, command = %options.display_command(), "Spawned workload");
        registry.dispatch_spawned(&handle, &options);
        drop(options);

        let readers = vec![
            spawn_reader(ChannelKind::Stdout, stdout, self.events_tx.clone()),
            spawn_reader(ChannelKind::Stderr, stderr, self.events_tx.clone()),
            spawn_reader(ChannelKind::Ipc, ipc_reader, self.events_tx.clone()),
        ];

        let reaped = Arc::new(AtomicBool::new(false));
        let events = self.events_tx.clone();
        let waiter_reaped = Arc::clone(&reaped);
        let waiter = tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    warn!(pid, error = %e, "Failed to wait for workload");
                    ExitInfo {
                        status: None,
                        signal: None,
                    }
                }
            };
            waiter_reaped.store(true, Ordering::Release);
            if events.send(SupervisorEvent::Exited(exit)).await.is_err() {
                debug!(pid, "Agent loop gone before workload exit was reported");
            }
        });

        self.child = Some(RunningChild {
            handle: handle.clone(),
            kill_switch: KillSwitch { pid, reaped },
            readers,
            waiter,
        });
        Ok(handle)
    }

    /// Wait for the next event from the workload's tasks.
    ///
    /// Pends forever when there is no workload. Cancel safe.
    pub async fn next_event(&mut self) -> Option<SupervisorEvent> {
        self.events_rx.recv().await
    }

    /// Apply one event. Returns the exit info when the workload has exited.
    pub fn handle_event(
        &mut self,
        event: SupervisorEvent,
        registry: &mut PluginRegistry,
    ) -> Option<ExitInfo> {
        match event {
            SupervisorEvent::Read(kind, outcome) => {
                if self.child.is_some() {
                    self.demux.deliver(registry, kind, outcome);
                }
                None
            }
            SupervisorEvent::Exited(exit) => {
                let child = self.child.as_mut()?;
                if child.handle.exit.is_some() {
                    return None;
                }
                child.handle.exit = Some(exit);
                info!(
                    pid = child.handle.pid,
                    status = ?exit.status,
                    signal = ?exit.signal,
                    "Workload exited"
                );
                Some(exit)
            }
        }
    }

    /// Deliver output still in flight after exit, until every channel hits
    /// end-of-stream or the drain window closes. The rest is discarded.
    pub async fn drain(&mut self, registry: &mut PluginRegistry) {
        if self.child.is_none() {
            return;
        }
        let deadline = Instant::now() + self.drain_timeout;
        while !self.demux.all_closed() {
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(SupervisorEvent::Read(kind, outcome))) => {
                    self.demux.deliver(registry, kind, outcome);
                }
                Ok(Some(SupervisorEvent::Exited(_))) => {}
                Ok(None) | Err(_) => break,
            }
        }
        if !self.demux.all_closed() {
            debug!(
                stdout = self.demux.is_open(ChannelKind::Stdout),
                stderr = self.demux.is_open(ChannelKind::Stderr),
                ipc = self.demux.is_open(ChannelKind::Ipc),
                "Drain window elapsed with channels still open, dropping remaining output"
            );
        }
    }

    /// Wait up to `timeout` for the workload to be reaped, servicing reads
    /// meanwhile.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
        registry: &mut PluginRegistry,
    ) -> Option<ExitInfo> {
        let child = self.child.as_ref()?;
        if let Some(exit) = child.handle.exit {
            return Some(exit);
        }
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => {
                    if let Some(exit) = self.handle_event(event, registry) {
                        return Some(exit);
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Stop all background tasks and drop the child handle. No event is
    /// serviced afterwards.
    pub fn release(&mut self) -> Option<ChildHandle> {
        let child = self.child.take()?;
        for reader in &child.readers {
            reader.abort();
        }
        if child.handle.exit.is_none() {
            child.waiter.abort();
        }
        debug!(pid = child.handle.pid, "Released workload handle");
        Some(child.handle)
    }

    pub fn kill_switch(&self) -> Option<KillSwitch> {
        self.child.as_ref().map(|c| c.kill_switch.clone())
    }

    /// SIGKILL the workload if it is still running.
    pub fn kill(&self) -> bool {
        self.child
            .as_ref()
            .is_some_and(|c| c.handle.exit.is_none() && c.kill_switch.fire())
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    pub fn is_live(&self) -> bool {
        self.child
            .as_ref()
            .is_some_and(|c| c.handle.exit.is_none() && c.kill_switch.is_live())
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.handle.pid)
    }
}

/// Errors from launching the workload.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("No command given")]
    EmptyCommand,

    #[error("A workload has already been spawned")]
    AlreadySpawned,

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set up IPC pipe: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("Workload {0} was not captured")]
    MissingPipe(ChannelKind),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plugin::test_support::{Recorder, context};

    fn registry_with_recorder() -> (PluginRegistry, crate::plugin::test_support::Log) {
        let (rec, log) = Recorder::new("rec");
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(rec));
        registry.init_all(&context());
        (registry, log)
    }

    async fn run_to_exit(
        supervisor: &mut ChildSupervisor,
        registry: &mut PluginRegistry,
    ) -> ExitInfo {
        loop {
            let event = supervisor.next_event().await.unwrap();
            if let Some(exit) = supervisor.handle_event(event, registry) {
                supervisor.drain(registry).await;
                return exit;
            }
        }
    }

    fn stdout_text(log: &crate::plugin::test_support::Log) -> String {
        log.entries()
            .iter()
            .filter_map(|e| e.strip_prefix("rec:stdout:"))
            .collect()
    }

    #[test]
    fn exit_info_code() {
        let normal = ExitInfo {
            status: Some(3),
            signal: None,
        };
        let killed = ExitInfo {
            status: None,
            signal: Some(9),
        };
        assert_eq!(normal.code(), Some(3));
        assert_eq!(killed.code(), Some(137));
    }

    #[tokio::test]
    async fn echo_output_reaches_stdout_hook() {
        let (mut registry, log) = registry_with_recorder();
        let mut supervisor = ChildSupervisor::new(Duration::from_secs(2));

        supervisor
            .spawn(&["echo", "hello"], std::env::vars_os(), &mut registry)
            .unwrap();
        let exit = run_to_exit(&mut supervisor, &mut registry).await;

        assert_eq!(
            exit,
            ExitInfo {
                status: Some(0),
                signal: None
            }
        );
        assert_eq!(stdout_text(&log), "hello\n");
        let entries = log.entries();
        assert_eq!(entries[1], "rec:spawn_options");
        assert_eq!(entries[2], "rec:spawned");
    }

    #[tokio::test]
    async fn fd3_is_the_ipc_channel() {
        let (mut registry, log) = registry_with_recorder();
        let mut supervisor = ChildSupervisor::new(Duration::from_secs(2));

        supervisor
            .spawn(
                &["sh", "-c", "printf '{\"service\":\"x\"}' >&3"],
                std::env::vars_os(),
                &mut registry,
            )
            .unwrap();
        run_to_exit(&mut supervisor, &mut registry).await;

        assert!(log.entries().contains(&"rec:ipc:{\"service\":\"x\"}".to_string()));
    }

    #[tokio::test]
    async fn missing_program_fails_without_handle() {
        let (mut registry, _log) = registry_with_recorder();
        let mut supervisor = ChildSupervisor::new(Duration::ZERO);

        let err = supervisor
            .spawn(
                &["/nonexistent/forza-test-binary"],
                std::env::vars_os(),
                &mut registry,
            )
            .unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
        assert!(!supervisor.has_child());
    }

    #[tokio::test]
    async fn failed_launch_does_not_use_up_the_slot() {
        let (mut registry, log) = registry_with_recorder();
        let mut supervisor = ChildSupervisor::new(Duration::from_secs(2));

        supervisor
            .spawn(
                &["/nonexistent/forza-test-binary"],
                std::env::vars_os(),
                &mut registry,
            )
            .unwrap_err();
        supervisor
            .spawn(&["echo", "again"], std::env::vars_os(), &mut registry)
            .unwrap();
        let exit = run_to_exit(&mut supervisor, &mut registry).await;

        assert_eq!(exit.status, Some(0));
        assert_eq!(stdout_text(&log), "again\n");
    }

    #[tokio::test]
    async fn second_spawn_is_rejected() {
        let (mut registry, _log) = registry_with_recorder();
        let mut supervisor = ChildSupervisor::new(Duration::ZERO);

        supervisor
            .spawn(&["true"], std::env::vars_os(), &mut registry)
            .unwrap();
        let err = supervisor
            .spawn(&["true"], std::env::vars_os(), &mut registry)
            .unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadySpawned));
        run_to_exit(&mut supervisor, &mut registry).await;
    }

    #[tokio::test]
    async fn kill_reports_signal() {
        let (mut registry, _log) = registry_with_recorder();
        let mut supervisor = ChildSupervisor::new(Duration::ZERO);

        supervisor
            .spawn(&["sleep", "30"], std::env::vars_os(), &mut registry)
            .unwrap();
        assert!(supervisor.is_live());
        assert!(supervisor.kill());

        let exit = supervisor
            .wait_exit(Duration::from_secs(5), &mut registry)
            .await
            .unwrap();
        assert_eq!(exit.signal, Some(libc::SIGKILL));
        assert!(!supervisor.is_live());
        assert!(!supervisor.kill());
        assert!(supervisor.release().is_some());
    }
}

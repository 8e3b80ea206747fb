//! Shared fixtures for agent integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::ffi::OsString;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use forza_agent::demux::Chunk;
use forza_agent::supervisor::{ChildHandle, ExitInfo, LaunchOptions};
use forza_agent::{Plugin, PluginContext};
use forza_core::metric::WireMetric;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Shared, ordered record of hook calls across plugins.
#[derive(Debug, Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries of `plugin`, with the `plugin:` prefix stripped.
    pub fn of(&self, plugin: &str) -> Vec<String> {
        let prefix = format!("{plugin}:");
        self.entries()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(ToString::to_string))
            .collect()
    }

    /// Concatenated stdout seen by `plugin`.
    pub fn stdout(&self, plugin: &str) -> String {
        self.of(plugin)
            .iter()
            .filter_map(|e| e.strip_prefix("stdout:"))
            .collect()
    }

    pub fn spawned_pid(&self, plugin: &str) -> Option<i32> {
        self.of(plugin)
            .iter()
            .find_map(|e| e.strip_prefix("spawned:").map(|pid| pid.parse().unwrap()))
    }
}

/// Plugin that records every hook call into a [`Log`].
pub struct Recorder {
    pub name: &'static str,
    pub log: Log,
    pub fail_init: bool,
    pub set_env: Vec<(OsString, OsString)>,
}

impl Recorder {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
            fail_init: false,
            set_env: Vec::new(),
        }
    }

    fn record(&self, what: impl std::fmt::Display) {
        self.log.push(format!("{}:{what}", self.name));
    }
}

impl Plugin for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        self.record("init");
        if self.fail_init {
            anyhow::bail!("init refused");
        }
        Ok(())
    }

    fn on_spawn_options(&mut self, options: &mut LaunchOptions) -> anyhow::Result<()> {
        self.record("spawn_options");
        for (k, v) in &self.set_env {
            options.set_env(k.clone(), v.clone());
        }
        Ok(())
    }

    fn on_process_spawned(
        &mut self,
        child: &ChildHandle,
        _options: &LaunchOptions,
    ) -> anyhow::Result<()> {
        self.record(format_args!("spawned:{}", child.pid));
        Ok(())
    }

    fn on_process_exit(&mut self, exit: &ExitInfo) -> anyhow::Result<()> {
        self.record(format_args!("exit:{:?}:{:?}", exit.status, exit.signal));
        Ok(())
    }

    fn on_stdout_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        assert_eq!(chunk.as_bytes_with_nul().last(), Some(&0));
        self.record(format_args!("stdout:{}", chunk.to_string_lossy()));
        Ok(())
    }

    fn on_stderr_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        self.record(format_args!("stderr:{}", chunk.to_string_lossy()));
        Ok(())
    }

    fn on_ipc_data(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        self.record(format_args!("ipc:{}", chunk.to_string_lossy()));
        Ok(())
    }
}

/// A local NDJSON monitoring endpoint.
pub struct Endpoint {
    pub addr: SocketAddr,
    metrics: mpsc::UnboundedReceiver<WireMetric>,
}

impl Endpoint {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, metrics) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stream).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let wire: WireMetric = serde_json::from_str(&line).unwrap();
                        if tx.send(wire).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        Self { addr, metrics }
    }

    /// Every metric received so far.
    pub fn received(&mut self) -> Vec<WireMetric> {
        let mut out = Vec::new();
        while let Ok(wire) = self.metrics.try_recv() {
            out.push(wire);
        }
        out
    }

    /// Wait for the next metric named `service`.
    pub async fn expect(&mut self, service: &str) -> WireMetric {
        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                let wire = self.metrics.recv().await.unwrap();
                if wire.metric.service == service {
                    return wire;
                }
            }
        })
        .await
        .unwrap()
    }
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// An endpoint that accepts connections and never reads from them.
pub async fn stalled_endpoint() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

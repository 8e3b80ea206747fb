//! Stream demultiplexer for the workload's output channels.
//!
//! One reader task per channel turns raw reads into owned [`Chunk`]s and
//! forwards them to the agent loop. The loop hands each chunk to
//! [`Demultiplexer::deliver`], which fans it out to every active plugin's
//! matching hook. Order is preserved within a channel only.

use std::borrow::Cow;
use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::plugin::PluginRegistry;
use crate::supervisor::SupervisorEvent;

const READ_BUF_SIZE: usize = 64 * 1024;

/// The three channels read from the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Stdout,
    Stderr,
    Ipc,
}

impl ChannelKind {
    pub const ALL: [Self; 3] = [Self::Stdout, Self::Stderr, Self::Ipc];

    /// File descriptor number the channel occupies in the child.
    pub const fn fd(self) -> i32 {
        match self {
            Self::Stdout => 1,
            Self::Stderr => 2,
            Self::Ipc => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Ipc => "ipc",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Stdout => 0,
            Self::Stderr => 1,
            Self::Ipc => 2,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned copy of one read: the bytes followed by a single NUL.
///
/// The allocation is exactly `len + 1` bytes and never aliases the reader's
/// buffer. Plugins get a shared reference; the chunk is dropped once the
/// last hook returns.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    buf: Box<[u8]>,
}

impl Chunk {
    pub fn copy_from(bytes: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.extend_from_slice(bytes);
        buf.push(0);
        Self {
            buf: buf.into_boxed_slice(),
        }
    }

    /// The received bytes, without the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len()]
    }

    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.len())
            .field("data", &self.to_string_lossy())
            .finish()
    }
}

/// Result of one read completion on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Chunk),
    Eof,
}

/// Start reading `reader` until end-of-stream, forwarding every completion.
///
/// A read error ends the channel the same way end-of-stream does.
pub fn spawn_reader<R>(
    kind: ChannelKind,
    mut reader: R,
    events: mpsc::Sender<SupervisorEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let outcome = match reader.read(&mut buf).await {
                Ok(0) => ReadOutcome::Eof,
                Ok(n) => ReadOutcome::Data(Chunk::copy_from(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(channel = %kind, error = %e, "Read failed, closing channel");
                    ReadOutcome::Eof
                }
            };
            let done = outcome == ReadOutcome::Eof;
            if events
                .send(SupervisorEvent::Read(kind, outcome))
                .await
                .is_err()
            {
                trace!(channel = %kind, "Agent loop gone, stopping reader");
                break;
            }
            if done {
                break;
            }
        }
    })
}

/// Fans read completions out to plugins and tracks which channels are open.
#[derive(Debug)]
pub struct Demultiplexer {
    open: [bool; 3],
    delivered: [u64; 3],
}

impl Default for Demultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demultiplexer {
    pub const fn new() -> Self {
        Self {
            open: [true; 3],
            delivered: [0; 3],
        }
    }

    /// Handle one completion for `kind`.
    ///
    /// End-of-stream is not reported to plugins; the channel is just marked
    /// closed.
    pub fn deliver(
        &mut self,
        registry: &mut PluginRegistry,
        kind: ChannelKind,
        outcome: ReadOutcome,
    ) {
        let i = kind.index();
        match outcome {
            ReadOutcome::Eof => {
                if self.open[i] {
                    debug!(
                        channel = %kind,
                        bytes = self.delivered[i],
                        "Channel reached end-of-stream"
                    );
                }
                self.open[i] = false;
            }
            ReadOutcome::Data(chunk) => {
                if !self.open[i] {
                    trace!(channel = %kind, "Data after end-of-stream ignored");
                    return;
                }
                self.delivered[i] += chunk.len() as u64;
                registry.dispatch_data(kind, &chunk);
            }
        }
    }

    pub const fn is_open(&self, kind: ChannelKind) -> bool {
        self.open[kind.index()]
    }

    pub fn all_closed(&self) -> bool {
        self.open.iter().all(|open| !open)
    }

    /// Total bytes fanned out on `kind` so far.
    pub const fn delivered(&self, kind: ChannelKind) -> u64 {
        self.delivered[kind.index()]
    }
}

//! Structured lifecycle events from a running test process.
//!
//! Test processes report progress out of band: the runner opens an
//! [`EventChannel`] (a Unix socket in a private temporary directory), passes
//! its path to the child through an environment variable, and the child's
//! output handler writes one JSON record per line:
//!
//! ```json
//! {"event": "file:end", "args": [{"name": "spec/foo_spec.lua", "duration": 12.3}]}
//! {"event": "failure:it", "args": [{"name": "does a thing"}]}
//! ```
//!
//! The channel lives exactly as long as one child. [`EventChannel::close`]
//! drains what is still in flight; dropping the channel without closing it
//! tears everything down immediately.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SOCKET_NAME: &str = "events.sock";

/// One record from the event stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LifecycleEvent {
    pub event: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// What the runner makes of an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    /// An assertion failure or error was reported.
    Failure,
    /// The test file finished; `duration` is its measured run time in seconds.
    FileEnd { duration: Option<f64> },
    /// Anything the runner does not track.
    Other,
}

impl LifecycleEvent {
    pub fn new(event: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// Classifies the event.
    ///
    /// `failure` and `error`, and their `:`-qualified forms such as
    /// `failure:it` or `error:describe`, are failures.
    pub fn kind(&self) -> EventKind {
        let base = self.event.split(':').next().unwrap_or_default();
        match (base, self.event.as_str()) {
            ("failure" | "error", _) => EventKind::Failure,
            (_, "file:end") => EventKind::FileEnd {
                duration: self.args.first().and_then(|arg| number(&arg["duration"])),
            },
            _ => EventKind::Other,
        }
    }
}

fn number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A process-local socket receiving [`LifecycleEvent`]s.
///
/// Any number of connections are accepted while the channel is open; events
/// from all of them are merged in arrival order.
pub struct EventChannel {
    path: PathBuf,
    receiver: mpsc::UnboundedReceiver<LifecycleEvent>,
    shutdown: CancellationToken,
    acceptor: Option<JoinHandle<()>>,
    // Dropped last: removes the socket and its directory.
    _dir: tempfile::TempDir,
}

impl EventChannel {
    /// Creates the socket and starts accepting connections.
    ///
    /// Must be called within a Tokio runtime. `drain_timeout` bounds how long
    /// [`close`](Self::close) waits for open connections to finish.
    pub fn open(drain_timeout: Duration) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("test-scheduler-")
            .tempdir()?;
        let path = dir.path().join(SOCKET_NAME);
        let listener = UnixListener::bind(&path)?;
        debug!(?path, "event channel: listening");

        let (sender, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let acceptor = tokio::spawn(accept_loop(
            listener,
            sender,
            shutdown.clone(),
            drain_timeout,
        ));

        Ok(Self {
            path,
            receiver,
            shutdown,
            acceptor: Some(acceptor),
            _dir: dir,
        })
    }

    /// Path of the socket, handed to the child process.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the next event.
    ///
    /// Pending until an event arrives; never yields `None` while the channel
    /// is open.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.receiver.recv().await
    }

    /// Stops accepting connections and returns the events still in flight.
    ///
    /// Connections already open are read until they close or the drain
    /// timeout passes, whichever comes first. The socket is removed when this
    /// returns.
    pub async fn close(mut self) -> Vec<LifecycleEvent> {
        self.shutdown.cancel();
        if let Some(acceptor) = self.acceptor.take()
            && let Err(e) = acceptor.await
        {
            warn!("Event channel acceptor failed: {}", e);
        }

        let mut remaining = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            remaining.push(event);
        }
        debug!(path = ?self.path, drained = remaining.len(), "event channel: closed");
        remaining
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    sender: mpsc::UnboundedSender<LifecycleEvent>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) {
    let mut readers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    readers.spawn(read_events(stream, sender.clone()));
                }
                Err(e) => warn!("Failed to accept event connection: {}", e),
            },
        }
    }

    // Connections the child made just before exiting may still sit in the
    // backlog; accept them without waiting on the reactor.
    match listener.into_std() {
        Ok(listener) => {
            while let Ok((stream, _)) = listener.accept() {
                match adopt(stream) {
                    Ok(stream) => {
                        readers.spawn(read_events(stream, sender.clone()));
                    }
                    Err(e) => warn!("Failed to adopt event connection: {}", e),
                }
            }
        }
        Err(e) => warn!("Failed to drain pending event connections: {}", e),
    }
    drop(sender);

    let drained = tokio::time::timeout(drain_timeout, async {
        while readers.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} event connections still open after {:?}; closing them",
            readers.len(),
            drain_timeout
        );
        readers.shutdown().await;
    }
}

fn adopt(stream: std::os::unix::net::UnixStream) -> io::Result<UnixStream> {
    stream.set_nonblocking(true)?;
    UnixStream::from_std(stream)
}

async fn read_events(stream: UnixStream, sender: mpsc::UnboundedSender<LifecycleEvent>) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<LifecycleEvent>(line) {
                    Ok(event) => {
                        debug!(event = %event.event, "event channel: received");
                        if sender.send(event).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed event {:?}: {}", line, e),
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read event connection: {}", e);
                return;
            }
        }
    }
}

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

use super::frame::Frame;
use super::registry::ConnectionRegistry;
use crate::errors::SinkError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Catching up from the event log; broadcasts are held back.
    Replaying,
    /// Receives broadcasts and heartbeats directly.
    Live,
    /// Sink released; every write fails.
    Closed,
}

/// Result of draining the replay buffer.
pub(crate) enum Pending {
    Batch(Vec<Frame>),
    /// Buffer was empty and the connection is now live.
    Live,
    Closed,
}

enum SinkState {
    Replaying {
        tx: Sender<Bytes>,
        pending: Vec<Frame>,
    },
    Live {
        tx: Sender<Bytes>,
    },
    Closed,
}

impl SinkState {
    fn phase(&self) -> Phase {
        match self {
            SinkState::Replaying { .. } => Phase::Replaying,
            SinkState::Live { .. } => Phase::Live,
            SinkState::Closed => Phase::Closed,
        }
    }
}

/// One live client stream.
///
/// The sink is a bounded queue drained by the transport. Writes from the
/// broadcast and heartbeat paths never wait: a full queue counts as a failed
/// write.
pub struct Connection {
    id: ConnectionId,
    user_id: String,
    channels: Vec<String>,
    state: Mutex<SinkState>,
    replay_limit: usize,
    frames_sent: AtomicU64,
}

impl Connection {
    /// Create a connection and the receiving end of its sink.
    pub(crate) fn new(
        user_id: impl Into<String>,
        channels: Vec<String>,
        buffer_size: usize,
        replay_limit: Option<usize>,
    ) -> (Arc<Self>, Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let state = match replay_limit {
            Some(_) => SinkState::Replaying {
                tx,
                pending: Vec::new(),
            },
            None => SinkState::Live { tx },
        };

        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            user_id: user_id.into(),
            channels,
            state: Mutex::new(state),
            replay_limit: replay_limit.unwrap_or(0),
            frames_sent: AtomicU64::new(0),
        });
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Channels this connection is authorized for and attached to.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase()
    }

    pub fn is_alive(&self) -> bool {
        self.phase() != Phase::Closed
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Deliver a broadcast frame. While replaying the frame is held back
    /// until the replay completes.
    pub(crate) fn deliver(&self, frame: &Frame) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        match &mut *state {
            SinkState::Replaying { pending, .. } => {
                if pending.len() >= self.replay_limit {
                    return Err(SinkError::Full);
                }
                pending.push(frame.clone());
                Ok(())
            }
            SinkState::Live { tx } => self.try_write(tx, frame),
            SinkState::Closed => Err(SinkError::Closed),
        }
    }

    /// Write a keep-alive frame. Returns `Ok(false)` when the connection is
    /// still replaying and was skipped.
    pub(crate) fn keepalive(&self, frame: &Frame) -> Result<bool, SinkError> {
        let state = self.state.lock();
        match &*state {
            SinkState::Replaying { .. } => Ok(false),
            SinkState::Live { tx } => self.try_write(tx, frame).map(|_| true),
            SinkState::Closed => Err(SinkError::Closed),
        }
    }

    /// Write directly to the sink regardless of phase. Used for the stream
    /// preamble before anything else can be queued.
    pub(crate) fn write_now(&self, frame: &Frame) -> Result<(), SinkError> {
        let state = self.state.lock();
        match &*state {
            SinkState::Replaying { tx, .. } | SinkState::Live { tx } => self.try_write(tx, frame),
            SinkState::Closed => Err(SinkError::Closed),
        }
    }

    fn try_write(&self, tx: &Sender<Bytes>, frame: &Frame) -> Result<(), SinkError> {
        match tx.try_send(frame.bytes()) {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(SinkError::Full),
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    /// Sender used by the replay task. Only available while replaying.
    pub(crate) fn replay_sender(&self) -> Option<Sender<Bytes>> {
        match &*self.state.lock() {
            SinkState::Replaying { tx, .. } => Some(tx.clone()),
            _ => None,
        }
    }

    /// Take buffered broadcasts. When the buffer is already empty the
    /// connection switches to live under the same lock, so no broadcast can
    /// slip between the last flush and going live.
    pub(crate) fn drain_pending(&self) -> Pending {
        let mut state = self.state.lock();
        match &mut *state {
            SinkState::Replaying { pending, .. } if !pending.is_empty() => {
                Pending::Batch(std::mem::take(pending))
            }
            SinkState::Replaying { tx, .. } => {
                let tx = tx.clone();
                *state = SinkState::Live { tx };
                Pending::Live
            }
            SinkState::Live { .. } => Pending::Live,
            SinkState::Closed => Pending::Closed,
        }
    }

    pub(crate) fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Release the sink. Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, SinkState::Closed) {
            return false;
        }
        *state = SinkState::Closed;
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("channels", &self.channels)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Byte stream handed to the transport.
///
/// Dropping it (the client went away) evicts the connection from the
/// registry.
pub struct ConnectionStream {
    receiver: Receiver<Bytes>,
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionStream {
    pub(crate) fn new(
        receiver: Receiver<Bytes>,
        connection: Arc<Connection>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            receiver,
            connection,
            registry,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Stream for ConnectionStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.receiver).poll_recv(cx) {
            Poll::Ready(Some(bytes)) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ConnectionStream {
    fn drop(&mut self) {
        if self.registry.evict(&self.connection) {
            tracing::debug!(
                connection_id = %self.connection.id(),
                user_id = %self.connection.user_id(),
                "Transport closed, connection removed"
            );
        }
    }
}

//! Connection handles for the relay router.
//!
//! A [`ConnectionHandle`] represents one live transport session from the
//! router's point of view: an ordered, bounded, non-blocking outbound queue
//! plus close signalling. The transport side owns the paired receiver and
//! pumps it into the socket; the router only ever calls [`try_send`].
//!
//! [`try_send`]: ConnectionHandle::try_send

use relay_protocol::Envelope;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Atomic counter backing connection IDs. IDs are never reused while the
/// process is alive.
static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque unique identifier for a connection, assigned at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors from a non-blocking send.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The bounded outbound queue is full. The connection is too slow to
    /// keep up and should be scheduled for close.
    #[error("Outbound queue full")]
    QueueFull,

    /// The connection has already closed.
    #[error("Connection closed")]
    Closed,
}

/// One-shot hook invoked when a connection transitions to closed.
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// Handle to one live transport session.
///
/// The handle is cheap to share (`Arc`) and all of its operations are
/// non-blocking: `try_send` pushes onto a bounded queue, `close` flips a
/// flag and fires the close hook. A handle never transitions from closed
/// back to open.
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Envelope>,
    closed: watch::Sender<bool>,
    on_close: Mutex<Option<CloseHook>>,
}

impl ConnectionHandle {
    /// Create a handle with a bounded outbound queue of `queue_capacity`.
    ///
    /// Returns the shared handle and the receiving end of the queue, which
    /// the transport writer task drains into the socket.
    #[must_use]
    pub fn new(queue_capacity: usize) -> (std::sync::Arc<Self>, mpsc::Receiver<Envelope>) {
        let (outbound, rx) = mpsc::channel(queue_capacity);
        let (closed, _) = watch::channel(false);
        let handle = std::sync::Arc::new(Self {
            id: ConnectionId::next(),
            outbound,
            closed,
            on_close: Mutex::new(None),
        });
        (handle, rx)
    }

    /// Get this connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Check whether the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Queue an envelope for delivery without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::QueueFull`] when the bounded queue is at
    /// capacity and [`SendError::Closed`] when the connection is gone.
    /// A failed send does not close the connection by itself; the caller
    /// decides (fan-out schedules the connection for close).
    pub fn try_send(&self, envelope: Envelope) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.outbound.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Register the one-shot close hook.
    ///
    /// The hook fires exactly once when the connection transitions to
    /// closed, regardless of cause. If the connection is already closed the
    /// hook runs immediately. Registering a second hook replaces the first.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        let mut slot = self.on_close.lock().unwrap_or_else(|e| e.into_inner());
        if *self.closed.borrow() {
            drop(slot);
            hook();
        } else {
            *slot = Some(Box::new(hook));
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// The first call flips the closed flag (waking the transport writer
    /// task via [`closed_signal`]) and fires the close hook; subsequent
    /// calls are no-ops.
    ///
    /// [`closed_signal`]: ConnectionHandle::closed_signal
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return; // already closed
        }
        debug!(connection = %self.id, "Connection closed");
        let hook = self
            .on_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Get a watch receiver that observes the closed flag.
    ///
    /// The transport writer task selects on this to stop pumping the
    /// outbound queue as soon as the connection closes.
    #[must_use]
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

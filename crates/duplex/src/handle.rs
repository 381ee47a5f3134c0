//! # Channel Endpoints
//!
//! A `Handle` is one end of an in-process duplex channel built from a pair of
//! tokio unbounded mpsc channels. Messages written on one end appear on the
//! other end's inbox in order.
//!
//! ## Ownership
//!
//! - A Handle is moved, never cloned. Whoever holds it owns the inbox.
//! - The write half can be shared through `Sender`, but there is exactly one
//!   underlying `mpsc::UnboundedSender` per endpoint, parked in a shared slot.
//!   Closing empties the slot, so the peer's inbox drains and then reports
//!   closure no matter how many `Sender` clones exist.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::Error;
use crate::error::Result;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Strong type for endpoint identifiers. Only used for diagnostics.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl HandleId {
    fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// The unit of transfer: opaque bytes plus any endpoints moving with them.
#[derive(Debug, Default)]
pub struct Message {
    pub payload: Vec<u8>,
    pub handles: Vec<Handle>,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            handles: Vec::new(),
        }
    }

    /// Attaches an endpoint; ownership moves to whoever reads the message.
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handles.push(handle);
        self
    }
}

type Slot = Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The shareable write half of an endpoint.
#[derive(Clone)]
pub struct Sender {
    id: HandleId,
    slot: Slot,
}

impl Sender {
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Queues a message for the peer.
    ///
    /// Never waits. Returns `Closed` after a local close and `PeerClosed` once
    /// the other endpoint has gone away.
    pub fn send(&self, message: Message) -> Result<()> {
        let guard = lock(&self.slot);
        let tx = guard.as_ref().ok_or(Error::Closed)?;
        tx.send(message).map_err(|_| Error::PeerClosed)
    }

    /// Drops the write side. The peer sees closure after draining.
    /// Returns false if the endpoint was already closed.
    pub fn close(&self) -> bool {
        let taken = lock(&self.slot).take();
        if taken.is_some() {
            tracing::debug!(handle = %self.id, "endpoint closed");
        }
        taken.is_some()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.slot).is_none()
    }

    /// True when both senders write through the same endpoint.
    pub fn same_channel(&self, other: &Sender) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One endpoint of a duplex channel.
pub struct Handle {
    sender: Sender,
    rx: mpsc::UnboundedReceiver<Message>,
}

/// Creates a pair of mutually connected endpoints.
///
/// Messages sent on `a` are received by `b` and vice versa.
pub fn open_pair() -> (Handle, Handle) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    let a = Handle {
        sender: Sender {
            id: HandleId::next(),
            slot: Arc::new(Mutex::new(Some(tx_a))),
        },
        rx: rx_b,
    };

    let b = Handle {
        sender: Sender {
            id: HandleId::next(),
            slot: Arc::new(Mutex::new(Some(tx_b))),
        },
        rx: rx_a,
    };

    tracing::debug!(a = %a.id(), b = %b.id(), "opened handle pair");
    (a, b)
}

impl Handle {
    pub fn id(&self) -> HandleId {
        self.sender.id
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.sender.send(message)
    }

    /// Returns a shareable write half of this endpoint.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Waits for the next inbound message.
    ///
    /// Buffered messages are still delivered after the peer closes; once they
    /// are exhausted this returns `PeerClosed`.
    pub async fn read(&mut self) -> Result<Message> {
        self.rx.recv().await.ok_or(Error::PeerClosed)
    }

    /// Reads a message if one is already queued.
    pub fn try_read(&mut self) -> Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::PeerClosed),
        }
    }

    /// True once the peer has closed its write half.
    ///
    /// Messages it sent earlier may still be buffered here.
    pub fn is_peer_closed(&self) -> bool {
        self.rx.is_closed()
    }

    /// Closes both directions of this endpoint.
    pub fn close(self) {
        self.sender.close();
    }

    pub(crate) fn into_parts(self) -> (Sender, mpsc::UnboundedReceiver<Message>) {
        (self.sender, self.rx)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.sender.id).finish()
    }
}

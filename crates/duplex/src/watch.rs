//! # Handle Watching
//!
//! Turns an endpoint into a stream of callbacks. `Handle::watch` consumes the
//! Handle, so an endpoint can have at most one active handler, and spawns a
//! pump task that feeds inbound messages to that handler one at a time.
//!
//! ## Invariants
//!
//! - Messages reach the handler in the order the peer sent them.
//! - `on_disconnect` runs at most once, and never after `Watcher::stop`.
//! - When delivery ends on its own (peer closure or a rejected message) the
//!   endpoint is closed in both directions.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::task::JoinHandle;

use crate::error::Error;
use crate::error::Result;
use crate::handle::Handle;
use crate::handle::HandleId;
use crate::handle::Message;

/// Receives the inbound traffic of one watched endpoint.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one inbound message.
    ///
    /// Returning `Err` rejects the message: the channel is closed and no
    /// further messages are delivered.
    async fn on_message(&self, message: Message) -> Result<()>;

    /// Called once when delivery ends for a reason other than a local stop:
    /// `PeerClosed` or the `Rejected` error returned by `on_message`.
    async fn on_disconnect(&self, _reason: Error) {}
}

/// A handler that accepts and discards everything.
pub struct Discard;

#[async_trait::async_trait]
impl MessageHandler for Discard {
    async fn on_message(&self, _message: Message) -> Result<()> {
        Ok(())
    }
}

/// Owner of a running pump task.
pub struct Watcher {
    id: HandleId,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Stops delivery without notifying the handler. Idempotent.
    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Lets the pump run to completion on its own, `on_disconnect` included.
    /// Later calls to `stop` do nothing.
    pub fn detach(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(task);
    }

    pub fn is_stopped(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|task| task.is_finished())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Handle {
    /// Binds this endpoint to `handler` and starts delivering messages.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch(self, handler: Arc<dyn MessageHandler>) -> Watcher {
        let id = self.id();
        let (sender, mut rx) = self.into_parts();

        let task = tokio::spawn(async move {
            let reason = loop {
                let Some(message) = rx.recv().await else {
                    tracing::debug!(handle = %id, "peer closed, stopping pump");
                    break Error::PeerClosed;
                };

                if let Err(e) = handler.on_message(message).await {
                    tracing::warn!(handle = %id, error = %e, "handler rejected message, closing");
                    break match e {
                        Error::Rejected(_) => e,
                        other => Error::Rejected(other.to_string()),
                    };
                }
            };

            // Release both halves before notifying so the peer's writes fail fast.
            sender.close();
            drop(rx);
            handler.on_disconnect(reason).await;
        });

        Watcher {
            id,
            task: Mutex::new(Some(task)),
        }
    }
}

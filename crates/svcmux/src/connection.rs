//! # Connections
//!
//! A Connection is a Handle bound to a local delegate, plus the write half
//! proxies use to reach the peer. It is the unit of lifecycle: closing it
//! closes the channel and stops delivery to the delegate.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use duplex::Discard;
use duplex::Handle;
use duplex::HandleId;
use duplex::MessageHandler;
use duplex::Sender;
use duplex::Watcher;

/// A bound channel endpoint.
pub struct Connection {
    remote: Sender,
    watcher: Watcher,
    closed: AtomicBool,
}

impl Connection {
    /// Binds `handle` to `delegate`. Without a delegate inbound messages are
    /// dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(handle: Handle, delegate: Option<Arc<dyn MessageHandler>>) -> Self {
        let remote = handle.sender();
        let delegate = delegate.unwrap_or_else(|| Arc::new(Discard));
        let watcher = handle.watch(delegate);

        Self {
            remote,
            watcher,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> HandleId {
        self.remote.id()
    }

    /// The write half, for building proxies.
    pub fn remote(&self) -> Sender {
        self.remote.clone()
    }

    /// Closes the channel and detaches the delegate. Repeat calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.remote.close();
        self.watcher.stop();
    }

    /// Gives up the connection without stopping delivery. The pump finishes
    /// by itself and still reports the disconnect to the delegate.
    pub fn detach(self) {
        self.watcher.detach();
    }

    /// True once closed locally, or once the channel shut down underneath us.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.remote.is_closed()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use duplex::Message;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Vec<u8>>);

    #[async_trait::async_trait]
    impl MessageHandler for Forward {
        async fn on_message(&self, message: Message) -> duplex::Result<()> {
            let _ = self.0.send(message.payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delegate_receives_and_remote_sends() {
        let (near, mut far) = duplex::open_pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::create(near, Some(Arc::new(Forward(tx))));

        far.send(Message::new("in")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"in");

        conn.remote().send(Message::new("out")).unwrap();
        assert_eq!(far.read().await.unwrap().payload, b"out");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_visible_to_peer() {
        let (near, mut far) = duplex::open_pair();
        let conn = Connection::create(near, None);
        let proxy = conn.remote();

        conn.close();
        conn.close();

        assert!(conn.is_closed());
        assert_eq!(proxy.send(Message::new("late")).unwrap_err(), duplex::Error::Closed);
        assert_eq!(far.read().await.unwrap_err(), duplex::Error::PeerClosed);
    }

    #[tokio::test]
    async fn test_drop_closes() {
        let (near, mut far) = duplex::open_pair();
        let proxy = {
            let conn = Connection::create(near, None);
            conn.remote()
        };
        assert!(proxy.is_closed());
        assert_eq!(far.read().await.unwrap_err(), duplex::Error::PeerClosed);
    }

    #[tokio::test]
    async fn test_detach_lets_delegate_see_disconnect() {
        struct Notify(mpsc::UnboundedSender<duplex::Error>);

        #[async_trait::async_trait]
        impl MessageHandler for Notify {
            async fn on_message(&self, _message: Message) -> duplex::Result<()> {
                Ok(())
            }

            async fn on_disconnect(&self, reason: duplex::Error) {
                let _ = self.0.send(reason);
            }
        }

        let (near, far) = duplex::open_pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::create(near, Some(Arc::new(Notify(tx))));

        far.close();
        conn.detach();

        assert_eq!(rx.recv().await.unwrap(), duplex::Error::PeerClosed);
    }

    #[tokio::test]
    async fn test_without_delegate_drops_inbound() {
        let (near, far) = duplex::open_pair();
        let conn = Connection::create(near, None);

        far.send(Message::new("ignored")).unwrap();
        tokio::task::yield_now().await;
        assert!(!conn.is_closed());
    }
}

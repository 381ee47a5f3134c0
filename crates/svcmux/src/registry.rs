//! # Provider Registry
//!
//! Per-channel bookkeeping of what this side serves:
//!
//! - registered providers, each with the connections spawned from it;
//! - connect requests that arrived before their provider, in arrival order.
//!
//! ## Invariants
//!
//! - At most one provider per service name.
//! - A name never has both a provider and pending requests: registering
//!   drains the queue.

use std::collections::HashMap;
use std::collections::VecDeque;

use duplex::Handle;
use duplex::HandleId;

use crate::connection::Connection;
use crate::interface::ServiceFactory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A provider is already registered under this name.
    DuplicateProvider(String),
    /// Too many requests are already waiting for this name.
    PendingFull { service_name: String, limit: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateProvider(name) => write!(f, "Service '{}' is already provided", name),
            Self::PendingFull { service_name, limit } => {
                write!(f, "Pending queue for '{}' is full ({} requests)", service_name, limit)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A registered factory and the connections it has served.
pub struct Provider {
    factory: ServiceFactory,
    connections: Vec<Connection>,
}

impl Provider {
    pub fn factory(&self) -> ServiceFactory {
        self.factory.clone()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }
}

pub struct ProviderRegistry {
    providers: HashMap<String, Provider>,
    pending: HashMap<String, VecDeque<Handle>>,
    pending_limit: usize,
}

impl ProviderRegistry {
    pub fn new(pending_limit: usize) -> Self {
        Self {
            providers: HashMap::new(),
            pending: HashMap::new(),
            pending_limit,
        }
    }

    /// Registers `factory` under `name` and hands back every request that was
    /// waiting for it, oldest first.
    pub fn register(&mut self, name: &str, factory: ServiceFactory) -> Result<VecDeque<Handle>> {
        if self.providers.contains_key(name) {
            return Err(Error::DuplicateProvider(name.to_string()));
        }

        self.providers.insert(name.to_string(), Provider {
            factory,
            connections: Vec::new(),
        });

        Ok(self.pending.remove(name).unwrap_or_default())
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers.get(name)
    }

    /// Parks a request until a provider for `name` registers.
    ///
    /// Requests whose consumer already hung up are dropped first and do not
    /// count against the limit. When the queue is still full the handle is
    /// closed, which the requester observes as a dead channel. Returns the
    /// new queue length.
    pub fn enqueue(&mut self, name: &str, handle: Handle) -> Result<usize> {
        let queue = self.pending.entry(name.to_string()).or_default();
        queue.retain(|parked| !parked.is_peer_closed());
        if queue.len() >= self.pending_limit {
            handle.close();
            return Err(Error::PendingFull {
                service_name: name.to_string(),
                limit: self.pending_limit,
            });
        }
        queue.push_back(handle);
        Ok(queue.len())
    }

    /// Records a connection served by the provider for `name`.
    ///
    /// Gives the connection back if that provider is gone.
    pub fn attach(&mut self, name: &str, connection: Connection) -> std::result::Result<(), Connection> {
        match self.providers.get_mut(name) {
            Some(provider) => {
                provider.connections.push(connection);
                Ok(())
            }
            None => Err(connection),
        }
    }

    /// Forgets a served connection, closing it. Returns whether it was found.
    pub fn detach(&mut self, name: &str, id: HandleId) -> bool {
        let Some(provider) = self.providers.get_mut(name) else {
            return false;
        };
        let Some(index) = provider.connections.iter().position(|c| c.id() == id) else {
            return false;
        };
        provider.connections.remove(index).close();
        true
    }

    pub fn pending_count(&self, name: &str) -> usize {
        self.pending.get(name).map_or(0, VecDeque::len)
    }

    pub fn has_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    pub fn connection_count(&self, name: &str) -> Option<usize> {
        self.providers.get(name).map(|p| p.connections.len())
    }

    /// Closes every served connection and every unresolved request.
    pub fn close(&mut self) {
        for (_, provider) in self.providers.drain() {
            for connection in provider.connections {
                connection.close();
            }
        }
        for (_, queue) in self.pending.drain() {
            for handle in queue {
                handle.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use duplex::Discard;
    use duplex::MessageHandler;

    use super::*;

    fn factory() -> ServiceFactory {
        Arc::new(|_remote| Arc::new(Discard) as Arc<dyn MessageHandler>)
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let mut registry = ProviderRegistry::new(4);
        registry.register("svc", factory()).unwrap();

        let err = registry.register("svc", factory()).err().unwrap();
        assert_eq!(err, Error::DuplicateProvider("svc".into()));
        assert_eq!(registry.connection_count("svc"), Some(0));
    }

    #[test]
    fn test_register_drains_in_arrival_order() {
        let mut registry = ProviderRegistry::new(4);
        let (_a_near, a) = duplex::open_pair();
        let (_b_near, b) = duplex::open_pair();
        let (a_id, b_id) = (a.id(), b.id());

        assert_eq!(registry.enqueue("late", a).unwrap(), 1);
        assert_eq!(registry.enqueue("late", b).unwrap(), 2);
        assert!(registry.has_pending("late"));

        let drained = registry.register("late", factory()).unwrap();
        let ids: Vec<_> = drained.iter().map(Handle::id).collect();
        assert_eq!(ids, vec![a_id, b_id]);
        assert!(!registry.has_pending("late"));
        assert_eq!(registry.pending_count("late"), 0);
    }

    #[test]
    fn test_enqueue_respects_limit() {
        let mut registry = ProviderRegistry::new(1);
        let (_keep, first) = duplex::open_pair();
        let (mut refused_near, refused) = duplex::open_pair();

        registry.enqueue("svc", first).unwrap();
        let err = registry.enqueue("svc", refused).unwrap_err();

        assert_eq!(err, Error::PendingFull { service_name: "svc".into(), limit: 1 });
        assert_eq!(registry.pending_count("svc"), 1);
        assert_eq!(refused_near.try_read().unwrap_err(), duplex::Error::PeerClosed);
    }

    #[test]
    fn test_enqueue_skips_dead_requests() {
        let mut registry = ProviderRegistry::new(1);
        let (gone, dead) = duplex::open_pair();
        let (mut live_near, live) = duplex::open_pair();
        let live_id = live.id();

        registry.enqueue("svc", dead).unwrap();
        gone.close();

        assert_eq!(registry.enqueue("svc", live).unwrap(), 1);
        assert!(live_near.try_read().unwrap().is_none());

        let drained = registry.register("svc", factory()).unwrap();
        let ids: Vec<_> = drained.iter().map(Handle::id).collect();
        assert_eq!(ids, vec![live_id]);
    }

    #[test]
    fn test_close_releases_pending() {
        let mut registry = ProviderRegistry::new(4);
        let (mut near, far) = duplex::open_pair();
        registry.enqueue("svc", far).unwrap();

        registry.close();
        assert_eq!(registry.pending_count("svc"), 0);
        assert_eq!(near.try_read().unwrap_err(), duplex::Error::PeerClosed);
    }

    #[tokio::test]
    async fn test_attach_and_detach() {
        let mut registry = ProviderRegistry::new(4);
        registry.register("svc", factory()).unwrap();

        let (_peer, handle) = duplex::open_pair();
        let conn = Connection::create(handle, None);
        let id = conn.id();

        registry.attach("svc", conn).unwrap();
        assert_eq!(registry.connection_count("svc"), Some(1));
        assert_eq!(registry.get("svc").unwrap().connections()[0].id(), id);

        assert!(registry.detach("svc", id));
        assert!(!registry.detach("svc", id));
        assert_eq!(registry.connection_count("svc"), Some(0));

        let (_peer, handle) = duplex::open_pair();
        let orphan = Connection::create(handle, None);
        assert!(registry.attach("missing", orphan).is_err());
    }
}

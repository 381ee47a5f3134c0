//! # Service Provider
//!
//! The multiplexer on one end of a control channel. Both ends are symmetric:
//! either side may offer services and either side may ask for them.
//!
//! ## Protocol
//!
//! - **Connect**: the consumer opens a fresh channel, keeps one end, and sends
//!   the other over the control channel together with the service name.
//! - **Accept**: the receiving side binds the incoming end to a new
//!   implementation from the named provider, or parks it until that provider
//!   registers.
//! - **Close**: tears down the control channel and everything bound through it.
//!
//! ## Invariants
//!
//! - At most one live outgoing connection per service name. Repeat requests
//!   reuse it without touching the control channel.
//! - Parked requests are served in arrival order once their provider appears.
//! - Once closed, always closed. Every operation except `close` then fails.
//! - The state lock is never held across an await point or while running a
//!   service factory.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;

use duplex::Discard;
use duplex::Handle;
use duplex::HandleId;
use duplex::Message;
use duplex::MessageHandler;

use crate::config::Config;
use crate::connection::Connection;
use crate::control;
use crate::control::ControlRequest;
use crate::interface::Interface;
use crate::interface::ServiceFactory;
use crate::registry::ProviderRegistry;

#[derive(Debug)]
pub enum Error {
    /// The provider was closed; it cannot connect or serve anymore.
    Closed,
    /// A provider for this service name is already registered.
    DuplicateProvider(String),
    /// A control message could not be built.
    Control(control::Error),
    /// The control channel refused the request.
    Transport(duplex::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Service provider is closed"),
            Self::DuplicateProvider(name) => write!(f, "Service '{}' is already provided", name),
            Self::Control(e) => write!(f, "Control error: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Control(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<control::Error> for Error {
    fn from(e: control::Error) -> Self {
        Self::Control(e)
    }
}

impl From<duplex::Error> for Error {
    fn from(e: duplex::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Routes named connect requests over one control channel.
///
/// Cloning is cheap and yields the same provider. Dropping the last clone
/// closes it.
#[derive(Clone)]
pub struct ServiceProvider {
    inner: Arc<Inner>,
}

struct Inner {
    id: HandleId,
    config: Config,
    /// `None` once closed.
    state: Mutex<Option<State>>,
}

struct State {
    control: Connection,
    outgoing: HashMap<String, Connection>,
    registry: ProviderRegistry,
}

/// Where a bound connection is recorded, so it can be forgotten when its
/// channel dies.
enum Slot {
    Outgoing { service_name: String, id: HandleId },
    Served { service_name: String, id: HandleId },
}

impl ServiceProvider {
    /// Wraps a control channel endpoint with the default configuration.
    pub fn new(control: Handle) -> Self {
        Self::with_config(control, Config::default())
    }

    /// Wraps a control channel endpoint.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_config(control: Handle, config: Config) -> Self {
        let id = control.id();
        let inner = Arc::new(Inner {
            id,
            config,
            state: Mutex::new(None),
        });

        // Hold the lock while the pump starts so the first control message
        // cannot observe the provider before its state exists.
        {
            let mut guard = inner.lock();
            let handler = Arc::new(ControlHandler {
                owner: Arc::downgrade(&inner),
            });
            *guard = Some(State {
                control: Connection::create(control, Some(handler)),
                outgoing: HashMap::new(),
                registry: ProviderRegistry::new(inner.config.pending_limit),
            });
        }

        tracing::debug!(provider = %id, "service provider active");
        Self { inner }
    }

    /// Identifies this provider by its control endpoint.
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// True when both values refer to the same provider.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers the implementation factory for `I`.
    ///
    /// Requests for `I::NAME` that arrived earlier are bound right away, oldest
    /// first. Fails if the provider is closed or `I::NAME` is taken.
    pub fn provide_service<I, F>(&self, factory: F) -> Result<&Self>
    where
        I: Interface,
        F: Fn(duplex::Sender) -> Arc<dyn MessageHandler> + Send + Sync + 'static,
    {
        let factory: ServiceFactory = Arc::new(factory);

        let drained = {
            let mut guard = self.inner.lock();
            let state = guard.as_mut().ok_or(Error::Closed)?;
            state
                .registry
                .register(I::NAME, factory.clone())
                .map_err(|_| Error::DuplicateProvider(I::NAME.to_string()))?
        };

        tracing::debug!(
            provider = %self.inner.id,
            service = I::NAME,
            drained = drained.len(),
            "service provided"
        );

        for handle in drained {
            self.inner.bind(I::NAME, &factory, handle);
        }

        Ok(self)
    }

    /// Connects to the peer's implementation of `I`.
    ///
    /// The proxy is usable immediately; calls queue on the channel until the
    /// peer binds it. `client` receives whatever the service sends back.
    /// Repeat calls for the same name share one channel, and their `client`
    /// is ignored.
    pub fn connect_to_service<I: Interface>(
        &self,
        client: Option<Arc<dyn MessageHandler>>,
    ) -> Result<I::Proxy> {
        let mut guard = self.inner.lock();
        let state = guard.as_mut().ok_or(Error::Closed)?;

        if let Some(existing) = state.outgoing.get(I::NAME) {
            if !existing.is_closed() {
                return Ok(I::proxy(existing.remote()));
            }
        }

        let (near, far) = duplex::open_pair();
        let request = ControlRequest::connect(I::NAME, far).into_message()?;
        state.control.remote().send(request)?;

        let delegate = Tracked {
            delegate: client.unwrap_or_else(|| Arc::new(Discard)),
            owner: Arc::downgrade(&self.inner),
            slot: Slot::Outgoing {
                service_name: I::NAME.to_string(),
                id: near.id(),
            },
        };
        let connection = Connection::create(near, Some(Arc::new(delegate)));
        let proxy = I::proxy(connection.remote());

        tracing::debug!(
            provider = %self.inner.id,
            service = I::NAME,
            handle = %connection.id(),
            "connect request sent"
        );

        if let Some(stale) = state.outgoing.insert(I::NAME.to_string(), connection) {
            stale.close();
        }

        Ok(proxy)
    }

    /// Closes the control channel, every outgoing connection, every served
    /// connection and every parked request. Repeat calls do nothing.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Number of requests parked for `service_name`.
    pub fn pending_requests(&self, service_name: &str) -> usize {
        self.inner
            .lock()
            .as_ref()
            .map_or(0, |state| state.registry.pending_count(service_name))
    }

    /// Whether any request is parked for `service_name`.
    pub fn has_pending(&self, service_name: &str) -> bool {
        self.inner
            .lock()
            .as_ref()
            .is_some_and(|state| state.registry.has_pending(service_name))
    }

    /// Live connections served for `service_name`, or `None` if nothing is
    /// registered under that name.
    pub fn provider_connections(&self, service_name: &str) -> Option<usize> {
        self.inner
            .lock()
            .as_ref()
            .and_then(|state| state.registry.connection_count(service_name))
    }

    /// Number of memoized outgoing connections.
    pub fn outgoing_connections(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, |state| state.outgoing.len())
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Option<State>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles a connect request from the peer.
    fn accept(self: &Arc<Self>, service_name: String, handle: Handle) {
        let factory = {
            let mut guard = self.lock();
            let Some(state) = guard.as_mut() else {
                handle.close();
                return;
            };

            match state.registry.get(&service_name) {
                Some(provider) => provider.factory(),
                None => {
                    match state.registry.enqueue(&service_name, handle) {
                        Ok(queued) => tracing::debug!(
                            provider = %self.id,
                            service = %service_name,
                            queued,
                            "no provider yet, request parked"
                        ),
                        Err(e) => tracing::warn!(
                            provider = %self.id,
                            service = %service_name,
                            error = %e,
                            "request refused"
                        ),
                    }
                    return;
                }
            }
        };

        self.bind(&service_name, &factory, handle);
    }

    /// Binds an incoming channel to a fresh implementation.
    fn bind(self: &Arc<Self>, service_name: &str, factory: &ServiceFactory, handle: Handle) {
        let id = handle.id();
        let implementation = factory(handle.sender());
        let delegate = Tracked {
            delegate: implementation,
            owner: Arc::downgrade(self),
            slot: Slot::Served {
                service_name: service_name.to_string(),
                id,
            },
        };
        let connection = Connection::create(handle, Some(Arc::new(delegate)));

        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            connection.close();
            return;
        };

        // The peer may already have hung up. The pump is then shutting down
        // on its own and must be left to notify the implementation.
        if connection.is_closed() {
            connection.detach();
            return;
        }

        match state.registry.attach(service_name, connection) {
            Ok(()) => tracing::debug!(provider = %self.id, service = %service_name, handle = %id, "service bound"),
            Err(orphan) => orphan.close(),
        }
    }

    /// Drops the bookkeeping for a connection whose channel died.
    fn forget(&self, slot: &Slot) {
        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else { return };

        match slot {
            Slot::Served { service_name, id } => {
                if state.registry.detach(service_name, *id) {
                    tracing::debug!(provider = %self.id, service = %service_name, handle = %id, "served connection dropped");
                }
            }
            Slot::Outgoing { service_name, id } => {
                let current = state.outgoing.get(service_name).is_some_and(|c| c.id() == *id);
                if current {
                    if let Some(connection) = state.outgoing.remove(service_name) {
                        connection.close();
                    }
                    tracing::debug!(provider = %self.id, service = %service_name, handle = %id, "outgoing connection dropped");
                }
            }
        }
    }

    fn close(&self) {
        let Some(mut state) = self.lock().take() else { return };

        state.control.close();
        let outgoing = state.outgoing.len();
        for (_, connection) in state.outgoing.drain() {
            connection.close();
        }
        state.registry.close();

        tracing::info!(provider = %self.id, outgoing, "service provider closed");
    }
}

/// Delivers control messages to the owning provider.
struct ControlHandler {
    owner: Weak<Inner>,
}

#[async_trait::async_trait]
impl MessageHandler for ControlHandler {
    async fn on_message(&self, message: Message) -> duplex::Result<()> {
        let request = ControlRequest::from_message(message)
            .map_err(|e| duplex::Error::Rejected(e.to_string()))?;

        match request {
            ControlRequest::Connect { service_name, handle } => match self.owner.upgrade() {
                Some(owner) => owner.accept(service_name, handle),
                None => handle.close(),
            },
        }

        Ok(())
    }

    async fn on_disconnect(&self, reason: duplex::Error) {
        let Some(owner) = self.owner.upgrade() else { return };
        tracing::info!(provider = %owner.id, reason = %reason, "control channel lost");
        owner.close();
    }
}

/// Wraps a delegate so the provider learns when its channel dies.
struct Tracked {
    delegate: Arc<dyn MessageHandler>,
    owner: Weak<Inner>,
    slot: Slot,
}

#[async_trait::async_trait]
impl MessageHandler for Tracked {
    async fn on_message(&self, message: Message) -> duplex::Result<()> {
        self.delegate.on_message(message).await
    }

    async fn on_disconnect(&self, reason: duplex::Error) {
        self.delegate.on_disconnect(reason).await;
        if let Some(owner) = self.owner.upgrade() {
            owner.forget(&self.slot);
        }
    }
}

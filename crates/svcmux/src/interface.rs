//! # Service Interfaces
//!
//! The broker routes opaque channels by name. What travels over a channel once
//! it is bound is the business of per-interface stub and proxy code, which
//! plugs in here.
//!
//! - An `Interface` names a service and knows how to wrap a channel's write
//!   half into a typed proxy.
//! - A service implementation is a `duplex::MessageHandler` built by a
//!   `ServiceFactory` for every consumer that connects.
//!
//! Nothing here checks that both ends agree on the shape of an interface.

use std::sync::Arc;

use duplex::MessageHandler;
use duplex::Sender;

/// A named, typed service contract.
///
/// ```ignore
/// struct Echo;
///
/// impl Interface for Echo {
///     const NAME: &'static str = "demo.Echo";
///     type Proxy = EchoProxy;
///
///     fn proxy(remote: Sender) -> EchoProxy {
///         EchoProxy { remote }
///     }
/// }
/// ```
pub trait Interface: 'static {
    /// Routing key. Unique within one ServiceProvider.
    const NAME: &'static str;

    /// The consumer-side handle used to issue outgoing calls.
    type Proxy;

    /// Wraps the write half of a freshly bound channel.
    fn proxy(remote: Sender) -> Self::Proxy;
}

/// Builds one service implementation per incoming connection.
///
/// The argument is the write half back to the consumer, used for callbacks.
pub type ServiceFactory = Arc<dyn Fn(Sender) -> Arc<dyn MessageHandler> + Send + Sync>;

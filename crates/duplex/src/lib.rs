//! # Duplex
//!
//! In-process duplex message channels.
//!
//! ## Philosophy
//!
//! - **Opaque**: A channel moves bytes and endpoints. It knows nothing about
//!   services, names, or interfaces.
//! - **Single Owner**: An endpoint is a value. Moving it into a message moves
//!   the channel to whoever reads that message.
//! - **Asynchronous Failure**: Opening a pair never fails. Closure is observed
//!   by the peer on its next read or write.

pub mod error;
pub mod handle;
pub mod watch;

pub use error::Error;
pub use error::Result;
pub use handle::Handle;
pub use handle::HandleId;
pub use handle::Message;
pub use handle::Sender;
pub use handle::open_pair;
pub use watch::Discard;
pub use watch::MessageHandler;
pub use watch::Watcher;

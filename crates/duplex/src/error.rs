//! # Error Definitions
//!
//! Failures observable on a single channel endpoint.

/// Channel-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// This endpoint was closed locally; it can no longer send.
    Closed,
    /// The other endpoint is gone and no buffered messages remain.
    PeerClosed,
    /// A handler refused an inbound message; the channel was shut down.
    Rejected(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Endpoint is closed"),
            Self::PeerClosed => write!(f, "Peer endpoint closed"),
            Self::Rejected(reason) => write!(f, "Message rejected: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

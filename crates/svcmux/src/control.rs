//! # Control Plane Messages
//!
//! Everything a ServiceProvider says to its peer over the control channel.
//! The payload is a JSON-encoded tagged enum; endpoints ride alongside in the
//! message's handle list.
//!
//! ## Wire Contract
//!
//! - `{"type":"connect","service_name":"<name>"}` with exactly one attached
//!   handle: the far end of a new channel for `<name>`.
//! - Sent only from connector to connectee. One request per message.

use duplex::Handle;
use duplex::Message;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug)]
pub enum Error {
    /// The payload is not a known control message.
    Malformed(String),
    /// The message carried the wrong number of handles.
    HandleCount { expected: usize, found: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed control message: {}", msg),
            Self::HandleCount { expected, found } => {
                write!(f, "Control message expects {} handle(s), found {}", expected, found)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The payload half of a control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Connect { service_name: String },
}

/// A decoded control message with its endpoint.
#[derive(Debug)]
pub enum ControlRequest {
    Connect { service_name: String, handle: Handle },
}

impl ControlRequest {
    /// Builds a connect request handing `handle` to the peer.
    pub fn connect(service_name: impl Into<String>, handle: Handle) -> Self {
        Self::Connect {
            service_name: service_name.into(),
            handle,
        }
    }

    pub fn into_message(self) -> Result<Message> {
        match self {
            Self::Connect { service_name, handle } => {
                let payload = serde_json::to_vec(&ControlMessage::Connect { service_name })?;
                Ok(Message::new(payload).with_handle(handle))
            }
        }
    }

    pub fn from_message(message: Message) -> Result<Self> {
        let Message { payload, mut handles } = message;
        match serde_json::from_slice::<ControlMessage>(&payload)? {
            ControlMessage::Connect { service_name } => {
                if handles.len() != 1 {
                    return Err(Error::HandleCount { expected: 1, found: handles.len() });
                }
                let handle = handles.pop().ok_or(Error::HandleCount { expected: 1, found: 0 })?;
                Ok(Self::Connect { service_name, handle })
            }
        }
    }
}

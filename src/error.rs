//! Error types shared by the registry, codec and router.

use thiserror::Error;

use crate::model::connection::ConnectionId;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The inbound frame is not a `{"operation", "payload"}` object.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The payload does not match the shape expected for its operation.
    #[error("malformed {operation} payload: {source}")]
    MalformedPayload {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Session {0} doesn't exist.")]
    RoomNotFound(String),

    /// Every generated key collided with a live room.
    #[error("no free room key after {attempts} attempts")]
    KeySpaceExhausted { attempts: usize },

    #[error("connection {0} is not open")]
    SendFailure(ConnectionId),
}

impl RelayError {
    /// Text placed in the `Error` envelope sent back to the peer, if this
    /// error is one the peer is told about.
    pub fn peer_message(&self) -> Option<String> {
        match self {
            RelayError::MalformedEnvelope(_) | RelayError::MalformedPayload { .. } => {
                Some(format!("Malformed message: {self}"))
            }
            RelayError::RoomNotFound(_) | RelayError::KeySpaceExhausted { .. } => {
                Some(self.to_string())
            }
            RelayError::SendFailure(_) => None,
        }
    }
}

//! Wire envelopes exchanged with peers
//!
//! Every frame is a JSON object `{"operation": <tag>, "payload": <string>}`.
//! The payload of join and relay operations is itself a JSON document,
//! encoded as a string inside the envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{RelayError, Result};
use crate::model::room::Side;

/// The closed set of operation tags the broker understands or emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateRoom,
    CreatedRoom,
    JoinRoom,
    JoinedRoom,
    StreamerOffer,
    ReceiverAnswer,
    StreamerIceData,
    ReceiverIceData,
    Error,
}

impl Operation {
    pub const RELAYS: [Operation; 4] = [
        Operation::StreamerOffer,
        Operation::ReceiverAnswer,
        Operation::StreamerIceData,
        Operation::ReceiverIceData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateRoom => "CreateRoom",
            Operation::CreatedRoom => "CreatedRoom",
            Operation::JoinRoom => "JoinRoom",
            Operation::JoinedRoom => "JoinedRoom",
            Operation::StreamerOffer => "StreamerOffer",
            Operation::ReceiverAnswer => "ReceiverAnswer",
            Operation::StreamerIceData => "StreamerIceData",
            Operation::ReceiverIceData => "ReceiverIceData",
            Operation::Error => "Error",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Operation> {
        let op = match tag {
            "CreateRoom" => Operation::CreateRoom,
            "CreatedRoom" => Operation::CreatedRoom,
            "JoinRoom" => Operation::JoinRoom,
            "JoinedRoom" => Operation::JoinedRoom,
            "StreamerOffer" => Operation::StreamerOffer,
            "ReceiverAnswer" => Operation::ReceiverAnswer,
            "StreamerIceData" => Operation::StreamerIceData,
            "ReceiverIceData" => Operation::ReceiverIceData,
            "Error" => Operation::Error,
            _ => return None,
        };
        Some(op)
    }

    /// The room side a relay operation is forwarded to. Relays reuse their
    /// own tag on the way out.
    pub fn relay_target(&self) -> Option<Side> {
        match self {
            Operation::StreamerOffer | Operation::StreamerIceData => Some(Side::Receiver),
            Operation::ReceiverAnswer | Operation::ReceiverIceData => Some(Side::Streamer),
            _ => None,
        }
    }
}

/// The outer message shape exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    pub operation: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    pub fn new(operation: Operation, payload: impl Into<String>) -> Envelope {
        Envelope {
            operation: operation.as_str().to_string(),
            payload: payload.into(),
        }
    }

    pub fn decode(text: &str) -> Result<Envelope> {
        serde_json::from_str(text).map_err(RelayError::MalformedEnvelope)
    }

    pub fn encode(&self) -> String {
        serde_json::json!({
            "operation": self.operation,
            "payload": self.payload,
        })
        .to_string()
    }

    /// Decodes the payload as the sub-shape expected by `operation`.
    pub fn decode_payload<T: DeserializeOwned>(&self, operation: Operation) -> Result<T> {
        serde_json::from_str(&self.payload).map_err(|source| RelayError::MalformedPayload {
            operation: operation.as_str(),
            source,
        })
    }
}

/// Payload of `JoinRoom`: the room to join and the name shown to the streamer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub key: String,
    pub username: String,
}

/// Payload of the relay operations. `data` is forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPayload {
    pub key: String,
    pub data: String,
}

/// An inbound message, decoded once and matched exhaustively by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    CreateRoom,
    JoinRoom(JoinPayload),
    Relay {
        op: Operation,
        target: Side,
        payload: RelayPayload,
    },
    /// Any tag peers are not expected to send, including the broker's own
    /// outbound-only tags.
    Unknown(String),
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Inbound> {
        Inbound::from_envelope(Envelope::decode(text)?)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Inbound> {
        let inbound = match Operation::from_tag(&envelope.operation) {
            Some(Operation::CreateRoom) => Inbound::CreateRoom,
            Some(Operation::JoinRoom) => {
                Inbound::JoinRoom(envelope.decode_payload(Operation::JoinRoom)?)
            }
            Some(op) => match op.relay_target() {
                Some(target) => Inbound::Relay {
                    op,
                    target,
                    payload: envelope.decode_payload(op)?,
                },
                None => Inbound::Unknown(envelope.operation),
            },
            None => Inbound::Unknown(envelope.operation),
        };
        Ok(inbound)
    }
}

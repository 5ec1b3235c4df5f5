//! Routing state machine
//!
//! Decides, for each inbound frame, what happens to the session registry and
//! which connection (if any) receives a response. Also reacts to connection
//! lifecycle notifications from the transport.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::model::connection::ConnectionId;
use crate::model::envelope::{Envelope, Inbound, JoinPayload, Operation, RelayPayload};
use crate::model::room::Side;
use crate::registry::SessionRegistry;

/// Outbound half of the transport: delivers a text frame to one connection.
pub trait Outbound: Send + Sync {
    /// Fails with [`RelayError::SendFailure`] when `to` is not open.
    fn send(&self, to: ConnectionId, frame: String) -> Result<()>;
}

pub struct Router<O> {
    registry: Arc<SessionRegistry>,
    outbound: Arc<O>,
}

impl<O: Outbound> Router<O> {
    pub fn new(registry: Arc<SessionRegistry>, outbound: Arc<O>) -> Router<O> {
        Router { registry, outbound }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn outbound(&self) -> &Arc<O> {
        &self.outbound
    }

    pub fn on_connect(&self, conn: ConnectionId) {
        debug!(%conn, "Connected");
    }

    /// Tears down every room the connection took part in. The counterpart is
    /// not told; it notices when its own connection stops progressing.
    pub fn on_disconnect(&self, conn: ConnectionId) {
        for room in self.registry.remove_all_involving(conn) {
            info!(
                key = %room.key(),
                %conn,
                age_secs = room.age().num_seconds(),
                "Room closed"
            );
        }
    }

    /// Handles one inbound text frame from `sender`.
    ///
    /// Decode failures and unknown keys are answered with an `Error` envelope
    /// to the sender. Only a failed send escapes, aborting this one frame.
    pub fn handle_frame(&self, sender: ConnectionId, text: &str) -> Result<()> {
        let outcome = Inbound::decode(text).and_then(|inbound| self.dispatch(sender, inbound));

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => match err.peer_message() {
                Some(message) => {
                    warn!(%sender, error = %err, "Rejecting message");
                    self.send(sender, Operation::Error, message)
                }
                None => Err(err),
            },
        }
    }

    pub fn dispatch(&self, sender: ConnectionId, inbound: Inbound) -> Result<()> {
        match inbound {
            Inbound::CreateRoom => self.create_room(sender),
            Inbound::JoinRoom(join) => self.join_room(sender, join),
            Inbound::Relay { op, target, payload } => self.relay(sender, op, target, payload),
            Inbound::Unknown(tag) => {
                debug!(%sender, operation = %tag, "Ignoring unknown operation");
                Ok(())
            }
        }
    }

    fn create_room(&self, sender: ConnectionId) -> Result<()> {
        let room = self.registry.create_room(sender)?;
        info!(key = %room.key(), streamer = %sender, "Room created");

        self.send(sender, Operation::CreatedRoom, room.key())
    }

    fn join_room(&self, sender: ConnectionId, join: JoinPayload) -> Result<()> {
        let outcome = self.registry.join_room(&join.key, sender)?;
        if let Some(previous) = outcome.replaced {
            warn!(key = %join.key, %previous, receiver = %sender, "Receiver replaced by a second join");
        }
        info!(key = %join.key, receiver = %sender, username = %join.username, "Room joined");

        self.send(outcome.room.streamer(), Operation::JoinedRoom, join.username)
    }

    fn relay(
        &self,
        sender: ConnectionId,
        op: Operation,
        target: Side,
        relay: RelayPayload,
    ) -> Result<()> {
        let room = self
            .registry
            .lookup(&relay.key)
            .ok_or_else(|| RelayError::RoomNotFound(relay.key.clone()))?;

        let Some(target) = room.side(target) else {
            warn!(key = %relay.key, %sender, operation = op.as_str(), "No receiver has joined yet, dropping");
            return Ok(());
        };

        debug!(key = %relay.key, from = %sender, to = %target, operation = op.as_str(), "Relaying");
        self.send(target, op, relay.data)
    }

    fn send(&self, to: ConnectionId, op: Operation, payload: impl Into<String>) -> Result<()> {
        self.outbound.send(to, Envelope::new(op, payload).encode())
    }
}

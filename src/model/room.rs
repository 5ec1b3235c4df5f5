//! Rendezvous rooms
//!
//! A room pairs the connection that created it (the streamer) with at most
//! one connection that joined it (the receiver) under a short shared key.

use chrono::{DateTime, Utc};

use crate::model::connection::ConnectionId;

/// One rendezvous session between a streamer and a receiver.
///
/// Rooms handed out by the registry are snapshots: a caller never observes a
/// half-updated room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// The key peers use to find this room
    pub(crate) key: String,
    /// The connection that created the room
    pub(crate) streamer: ConnectionId,
    /// The connection that joined the room, once one has
    pub(crate) receiver: Option<ConnectionId>,
    /// When the room was created
    pub(crate) created_at: DateTime<Utc>,
}

/// The side of a room a relayed message is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Streamer,
    Receiver,
}

impl Room {
    pub fn new(key: String, streamer: ConnectionId) -> Room {
        Room {
            key,
            streamer,
            receiver: None,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn streamer(&self) -> ConnectionId {
        self.streamer
    }

    pub fn receiver(&self) -> Option<ConnectionId> {
        self.receiver
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether `conn` takes part in this room on either side.
    pub fn involves(&self, conn: ConnectionId) -> bool {
        self.streamer == conn || self.receiver == Some(conn)
    }

    /// Resolves the connection on the given side.
    ///
    /// # Returns
    ///
    /// * `Some(ConnectionId)` - The streamer, or the receiver once one joined
    /// * `None` - The receiver side of a room nobody has joined yet
    pub fn side(&self, side: Side) -> Option<ConnectionId> {
        match side {
            Side::Streamer => Some(self.streamer),
            Side::Receiver => self.receiver,
        }
    }

    /// Time since the room was created, for teardown logs.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_room_has_no_receiver() {
        let streamer = ConnectionId::next();
        let room = Room::new("1234".into(), streamer);

        assert_eq!(room.side(Side::Streamer), Some(streamer));
        assert_eq!(room.side(Side::Receiver), None);
        assert!(room.involves(streamer));
    }

    #[test]
    fn involves_checks_both_sides() {
        let streamer = ConnectionId::next();
        let receiver = ConnectionId::next();
        let stranger = ConnectionId::next();
        let mut room = Room::new("42".into(), streamer);
        room.receiver = Some(receiver);

        assert!(room.involves(receiver));
        assert!(!room.involves(stranger));
        assert_eq!(room.side(Side::Receiver), Some(receiver));
    }
}

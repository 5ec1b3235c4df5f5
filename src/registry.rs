//! Session registry
//!
//! Process-wide map from room key to [`Room`], shared by every connection
//! handler. All mutations go through the map's shard locks, so a lookup sees
//! either a whole room or no room, and no lock is held once a call returns.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::key;
use crate::model::connection::ConnectionId;
use crate::model::room::Room;

pub const DEFAULT_KEY_ATTEMPTS: usize = 32;

type KeySource = Box<dyn Fn() -> String + Send + Sync>;

pub struct SessionRegistry {
    rooms: DashMap<String, Room>,
    generate: KeySource,
    key_attempts: usize,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The room after the join
    pub room: Room,
    /// A different receiver that was displaced by this join
    pub replaced: Option<ConnectionId>,
}

/// Counts exposed on the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub rooms: usize,
    pub waiting: usize,
    pub paired: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry::new(DEFAULT_KEY_ATTEMPTS)
    }
}

impl SessionRegistry {
    pub fn new(key_attempts: usize) -> SessionRegistry {
        SessionRegistry::with_key_source(key_attempts, key::generate)
    }

    /// Builds a registry drawing keys from `generate` instead of the CSPRNG.
    pub fn with_key_source<F>(key_attempts: usize, generate: F) -> SessionRegistry
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        SessionRegistry {
            rooms: DashMap::new(),
            generate: Box::new(generate),
            key_attempts: key_attempts.max(1),
        }
    }

    /// Creates a room owned by `streamer` under a fresh key.
    ///
    /// A key is only ever claimed while vacant; a collision with a live room
    /// draws a new key, up to the configured number of attempts.
    pub fn create_room(&self, streamer: ConnectionId) -> Result<Room> {
        for _ in 0..self.key_attempts {
            match self.rooms.entry((self.generate)()) {
                Entry::Occupied(taken) => {
                    debug!(key = %taken.key(), "Room key already live, drawing another");
                }
                Entry::Vacant(slot) => {
                    let room = Room::new(slot.key().clone(), streamer);
                    slot.insert(room.clone());
                    return Ok(room);
                }
            }
        }

        Err(RelayError::KeySpaceExhausted {
            attempts: self.key_attempts,
        })
    }

    pub fn lookup(&self, key: &str) -> Option<Room> {
        self.rooms.get(key).map(|room| room.value().clone())
    }

    /// Sets the receiver of the room under `key`.
    ///
    /// A later join overwrites an earlier receiver; the displaced connection
    /// is reported in [`JoinOutcome::replaced`].
    pub fn join_room(&self, key: &str, receiver: ConnectionId) -> Result<JoinOutcome> {
        let mut room = self
            .rooms
            .get_mut(key)
            .ok_or_else(|| RelayError::RoomNotFound(key.to_string()))?;

        let replaced = room
            .receiver
            .replace(receiver)
            .filter(|previous| *previous != receiver);

        Ok(JoinOutcome {
            room: room.value().clone(),
            replaced,
        })
    }

    /// Removes every room `conn` takes part in and returns them.
    pub fn remove_all_involving(&self, conn: ConnectionId) -> Vec<Room> {
        let mut removed = vec![];
        self.rooms.retain(|_, room| {
            if room.involves(conn) {
                removed.push(room.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// A copy of every live room. Each room is internally consistent; the
    /// set as a whole may interleave with concurrent changes.
    pub fn snapshot(&self) -> Vec<Room> {
        self.rooms.iter().map(|room| room.value().clone()).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        self.snapshot()
            .iter()
            .fold(RegistryStats::default(), |mut stats, room| {
                stats.rooms += 1;
                match room.receiver() {
                    Some(_) => stats.paired += 1,
                    None => stats.waiting += 1,
                }
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn create_then_lookup() {
        let registry = SessionRegistry::default();
        let streamer = ConnectionId::next();

        let room = registry.create_room(streamer).unwrap();
        let found = registry.lookup(room.key()).unwrap();

        assert_eq!(found.streamer(), streamer);
        assert_eq!(found.receiver(), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn join_sets_receiver() {
        let registry = SessionRegistry::default();
        let streamer = ConnectionId::next();
        let receiver = ConnectionId::next();
        let room = registry.create_room(streamer).unwrap();

        let outcome = registry.join_room(room.key(), receiver).unwrap();

        assert_eq!(outcome.replaced, None);
        assert_eq!(outcome.room.receiver(), Some(receiver));
        assert_eq!(
            registry.lookup(room.key()).unwrap().receiver(),
            Some(receiver)
        );
    }

    #[test]
    fn join_unknown_key_fails() {
        let registry = SessionRegistry::default();
        let err = registry.join_room("9999", ConnectionId::next()).unwrap_err();
        assert!(matches!(err, RelayError::RoomNotFound(key) if key == "9999"));
        assert!(registry.is_empty());
    }

    #[test]
    fn second_join_overwrites_and_reports_the_displaced_receiver() {
        let registry = SessionRegistry::default();
        let room = registry.create_room(ConnectionId::next()).unwrap();
        let first = ConnectionId::next();
        let second = ConnectionId::next();

        registry.join_room(room.key(), first).unwrap();
        let outcome = registry.join_room(room.key(), second).unwrap();

        assert_eq!(outcome.replaced, Some(first));
        assert_eq!(outcome.room.receiver(), Some(second));

        // Rejoining with the same connection displaces nobody.
        let outcome = registry.join_room(room.key(), second).unwrap();
        assert_eq!(outcome.replaced, None);
    }

    #[test]
    fn colliding_key_is_redrawn_not_overwritten() {
        let keys = ["1111", "1111", "2222"];
        let calls = AtomicUsize::new(0);
        let registry = SessionRegistry::with_key_source(4, move || {
            keys[calls.fetch_add(1, Ordering::SeqCst) % keys.len()].to_string()
        });
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        let first = registry.create_room(a).unwrap();
        let second = registry.create_room(b).unwrap();

        assert_eq!(first.key(), "1111");
        assert_eq!(second.key(), "2222");
        assert_eq!(registry.lookup("1111").unwrap().streamer(), a);
    }

    #[test]
    fn exhausted_key_space_is_an_error() {
        let registry = SessionRegistry::with_key_source(3, || "5".to_string());
        let owner = ConnectionId::next();
        registry.create_room(owner).unwrap();

        let err = registry.create_room(ConnectionId::next()).unwrap_err();

        assert!(matches!(err, RelayError::KeySpaceExhausted { attempts: 3 }));
        assert_eq!(registry.lookup("5").unwrap().streamer(), owner);
    }

    #[test]
    fn removal_only_touches_rooms_of_the_connection() {
        let registry = SessionRegistry::default();
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        let c = ConnectionId::next();

        let owned = registry.create_room(a).unwrap();
        let joined = registry.create_room(c).unwrap();
        registry.join_room(joined.key(), a).unwrap();
        let unrelated = registry.create_room(b).unwrap();

        let removed = registry.remove_all_involving(a);

        assert_eq!(removed.len(), 2);
        assert!(registry.lookup(owned.key()).is_none());
        assert!(registry.lookup(joined.key()).is_none());
        assert_eq!(registry.lookup(unrelated.key()).unwrap().streamer(), b);
    }

    #[test]
    fn stats_split_waiting_and_paired() {
        let registry = SessionRegistry::default();
        let paired = registry.create_room(ConnectionId::next()).unwrap();
        registry.create_room(ConnectionId::next()).unwrap();
        registry
            .join_room(paired.key(), ConnectionId::next())
            .unwrap();

        let stats = registry.stats();

        assert_eq!(
            stats,
            RegistryStats {
                rooms: 2,
                waiting: 1,
                paired: 1,
            }
        );
    }

    #[test]
    fn concurrent_creations_get_distinct_keys() {
        let registry = Arc::new(SessionRegistry::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            registry
                                .create_room(ConnectionId::next())
                                .unwrap()
                                .key()
                                .to_string()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                assert!(seen.insert(key), "key handed out twice");
            }
        }
        assert_eq!(registry.len(), 400);
    }

    #[test]
    fn concurrent_teardown_leaves_unrelated_rooms() {
        let registry = Arc::new(SessionRegistry::default());
        let keepers: Vec<_> = (0..20)
            .map(|_| registry.create_room(ConnectionId::next()).unwrap())
            .collect();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let conn = ConnectionId::next();
                        let room = registry.create_room(conn).unwrap();
                        registry.join_room(room.key(), ConnectionId::next()).unwrap();
                        registry.remove_all_involving(conn);
                        assert!(registry.lookup(room.key()).is_none());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), keepers.len());
        for room in keepers {
            assert_eq!(registry.lookup(room.key()), Some(room));
        }
    }

    proptest! {
        #[test]
        fn live_keys_stay_pairwise_distinct(creators in 1usize..200) {
            let registry = SessionRegistry::default();
            let mut keys = HashSet::new();
            for _ in 0..creators {
                let room = registry.create_room(ConnectionId::next()).unwrap();
                prop_assert!(keys.insert(room.key().to_string()));
            }
            prop_assert_eq!(registry.len(), creators);
        }
    }
}

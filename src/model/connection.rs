use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle identifying one live transport connection.
///
/// Handles are never reused within a process, so a stale handle held by a
/// room can never be confused with a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> ConnectionId {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        ConnectionId(ID_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Deref for ConnectionId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

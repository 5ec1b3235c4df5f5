//! Rendezvous and relay broker for two-party WebRTC signaling.
//!
//! A streamer creates a room and receives a short key, a receiver joins with
//! that key, and from then on the broker forwards their offers, answers and
//! ICE candidates to each other without looking inside them.

pub mod config;
pub mod error;
pub mod key;
pub mod model;
pub mod registry;
pub mod router;
pub mod server;
pub mod util;

//! Data models for the rendezvous broker
//!
//! This module contains the connection handles, rooms and wire envelopes
//! shared by the registry, the router and the transport.

pub mod connection;
pub mod envelope;
pub mod room;

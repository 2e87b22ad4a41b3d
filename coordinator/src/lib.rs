//! The GoConnect coordination server.
//!
//! Serves the daemon-facing HTTP API: device registration, heartbeats,
//! config pulls, the device-authorization login flow and network
//! management. State lives in the in-memory stores from
//! `goconnect-coordinator-store`; a production deployment would back
//! the same contracts with a relational store.

mod auth;
mod devices;
mod error;
mod networks;
mod signaling;
mod state;

pub use state::{router, AppState};

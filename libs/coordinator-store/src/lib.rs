//! Coordinator state stores (C10): authoritative peer and network
//! records, with soft-delete semantics throughout. In-memory reference
//! implementations guarded by one `RwLock` each; a writer only ever
//! holds the lock across the map mutation itself, matching the
//! coordinator's single-writer assumption.

mod network;
mod peer;

pub use network::{InMemoryNetworkStore, NetworkStore, NewNetwork};
pub use peer::{InMemoryPeerStore, PeerStore};

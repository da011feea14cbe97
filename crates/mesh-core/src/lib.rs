//! mesh-core: protocol logic for a gossip mesh.
//!
//! This crate provides the runtime-free core of the mesh:
//! - Shuffle-based membership (periodic randomized view exchange)
//! - Epidemic flood broadcast with per-message deduplication
//! - The wire message set and its big-endian codec
//! - The client-facing event surface
//!
//! Everything here is synchronous: engines consume inputs and return action
//! lists, and the caller (see `mesh-daemon`) performs the I/O.

pub mod config;
pub mod events;
pub mod flood;
pub mod peer_addr;
pub mod protocol;
pub mod shuffle;

pub use config::{ConfigError, MeshConfig};
pub use events::{EventBus, MeshEvent, Subscription};
pub use flood::{FloodAction, FloodEngine};
pub use peer_addr::{PeerAddr, PeerAddrError};
pub use protocol::{GossipEnvelope, MessageId, ShuffleExchange, WireMessage};
pub use shuffle::{ShuffleAction, ShuffleEngine, View};

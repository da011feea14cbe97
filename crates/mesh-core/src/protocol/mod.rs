//! Wire protocol for node-to-node traffic.
//!
//! - [`wire`] holds the big-endian codec primitives
//! - [`messages`] holds the tagged message set and its layout

pub mod messages;
pub mod wire;

pub use messages::{GossipEnvelope, MessageId, ShuffleExchange, WireMessage};
pub use wire::{WireError, WireReader, WireWriter};

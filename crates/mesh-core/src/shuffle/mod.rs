//! Shuffle-based membership (peer sampling).
//!
//! Maintains a best-effort, eventually-connected partial view of the mesh.
//!
//! # Protocol Overview
//!
//! **View exchange:**
//! 1. Every `shuffle_interval`, pick one connected peer at random
//! 2. Send it a random sample of the view (plus our own address)
//! 3. The receiver replies with a symmetric sample over the same connection
//! 4. Both sides open connections to every sampled address they don't know
//!
//! **View repair:**
//! - Connection up → peer joins the view (PeerUp on net-new entries)
//! - Connection down → peer leaves the view (PeerDown, idempotent)
//! - Connect failure → attempt is forgotten; the next round re-discovers
//!
//! There is no retry and no failure detector: redundancy in the sampling
//! repairs the view under churn.

pub mod engine;
pub mod view;

pub use engine::{ShuffleAction, ShuffleEngine};
pub use view::View;

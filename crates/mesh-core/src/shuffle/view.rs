//! Partial view of the mesh.
//!
//! The view is the core data structure for shuffle-based membership. It
//! tracks two disjoint sets:
//! - `active`: peers we hold a live outbound connection to
//! - `pending`: peers with a connect attempt in flight
//!
//! An address enters `pending` only through an explicit connect attempt and
//! leaves it exactly once: promoted into `active` on connection success, or
//! discarded on failure.

use crate::PeerAddr;
use rand::seq::{IndexedRandom, SliceRandom};
use std::collections::BTreeSet;

/// Membership view with connect-in-flight tracking.
///
/// Invariant: `active ∩ pending = ∅` after every operation.
#[derive(Debug, Clone)]
pub struct View {
    /// Our own listen address; never a member of either set
    local: PeerAddr,
    /// Peers we are connected to
    active: BTreeSet<PeerAddr>,
    /// Peers we are trying to connect to
    pending: BTreeSet<PeerAddr>,
}

impl View {
    pub fn new(local: PeerAddr) -> Self {
        Self {
            local,
            active: BTreeSet::new(),
            pending: BTreeSet::new(),
        }
    }

    pub fn local(&self) -> PeerAddr {
        self.local
    }

    /// Whether an address is already tracked in either set (or is us).
    pub fn knows(&self, addr: PeerAddr) -> bool {
        addr == self.local || self.active.contains(&addr) || self.pending.contains(&addr)
    }

    /// Record a connect attempt.
    ///
    /// Returns false (and does nothing) for ourselves, for active peers, and
    /// for addresses already in flight.
    pub fn begin_connect(&mut self, addr: PeerAddr) -> bool {
        if self.knows(addr) {
            return false;
        }
        self.pending.insert(addr)
    }

    /// Promote a peer into the active set after its connection came up.
    ///
    /// Returns true if this is a net-new member. Re-promoting an existing
    /// member is a no-op.
    pub fn promote(&mut self, addr: PeerAddr) -> bool {
        self.pending.remove(&addr);
        if addr == self.local {
            return false;
        }
        self.active.insert(addr)
    }

    /// Remove a peer from the active set. Removal is idempotent; removing an
    /// address that was never active returns false but is not an error.
    pub fn remove_active(&mut self, addr: PeerAddr) -> bool {
        self.active.remove(&addr)
    }

    /// Drop a failed connect attempt.
    pub fn discard_pending(&mut self, addr: PeerAddr) -> bool {
        self.pending.remove(&addr)
    }

    pub fn contains(&self, addr: PeerAddr) -> bool {
        self.active.contains(&addr)
    }

    pub fn is_pending(&self, addr: PeerAddr) -> bool {
        self.pending.contains(&addr)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active(&self) -> impl Iterator<Item = PeerAddr> + '_ {
        self.active.iter().copied()
    }

    /// Snapshot of the active set, for notifications and observers.
    pub fn active_set(&self) -> BTreeSet<PeerAddr> {
        self.active.clone()
    }

    /// Pick one active peer uniformly at random.
    pub fn random_active(&self) -> Option<PeerAddr> {
        let members: Vec<_> = self.active.iter().copied().collect();
        members.choose(&mut rand::rng()).copied()
    }

    /// Uniform random subset of the active set, excluding one address.
    ///
    /// Returns at most `k` peers; fewer when the set is small. Never blocks,
    /// never errors.
    pub fn sample_excluding(&self, k: usize, exclude: PeerAddr) -> Vec<PeerAddr> {
        let mut candidates: Vec<_> = self
            .active
            .iter()
            .copied()
            .filter(|a| *a != exclude)
            .collect();
        candidates.shuffle(&mut rand::rng());
        candidates.truncate(k);
        candidates
    }
}

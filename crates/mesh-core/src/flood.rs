//! Epidemic flood broadcast.
//!
//! Delivers each uniquely-identified message to every reachable peer with
//! high probability, exactly once at the application boundary. Duplicate
//! arrival is expected and absorbed by the seen set, not by the transport.
//!
//! The engine keeps its own mirror of reachable peers, fed exclusively by
//! PeerUp/PeerDown notifications from the membership layer — it never reads
//! the membership view directly.
//!
//! The seen set grows without bound for the process lifetime: there is no
//! eviction, because forgetting an id would re-deliver the message. At target
//! scale this is an accepted cost; operators of long-lived large meshes will
//! want an eviction policy here first.

use crate::protocol::{GossipEnvelope, MessageId};
use crate::PeerAddr;
use rand::seq::SliceRandom;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// What the caller must do after feeding the engine an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloodAction {
    /// Hand the payload to the application, exactly once per message id.
    Deliver {
        payload: Vec<u8>,
        /// The peer the envelope arrived from (ourselves for local origin)
        from: PeerAddr,
        /// Hops travelled when it reached us (0 = local origin)
        hops: u32,
    },
    /// Relay the envelope to one peer.
    Forward {
        to: PeerAddr,
        envelope: GossipEnvelope,
    },
}

/// Flood engine: dedup set, peer mirror, and fan-out relay planning.
pub struct FloodEngine {
    local: PeerAddr,
    /// Mirror of the reachable peer set, per membership notifications
    peers: BTreeSet<PeerAddr>,
    /// Ids already processed; never evicted
    seen: HashSet<MessageId>,
    fanout: usize,
}

impl FloodEngine {
    pub fn new(local: PeerAddr, fanout: usize) -> Self {
        Self {
            local,
            peers: BTreeSet::new(),
            seen: HashSet::new(),
            fanout,
        }
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerAddr> + '_ {
        self.peers.iter().copied()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Originate a broadcast: fresh random id, hop count 0, processed exactly
    /// as if it had arrived from ourselves.
    pub fn broadcast(&mut self, payload: Vec<u8>) -> Vec<FloodAction> {
        let envelope = GossipEnvelope::new(MessageId::random(), 0, payload);
        self.accept(envelope, self.local)
    }

    /// An envelope arrived from a peer.
    pub fn on_gossip(&mut self, envelope: GossipEnvelope, from: PeerAddr) -> Vec<FloodAction> {
        self.accept(envelope, from)
    }

    /// The single processing path for local and remote envelopes.
    fn accept(&mut self, envelope: GossipEnvelope, from: PeerAddr) -> Vec<FloodAction> {
        if !self.seen.insert(envelope.id) {
            debug!(id = %envelope.id, %from, "duplicate envelope, dropped");
            return Vec::new();
        }

        let mut actions = vec![FloodAction::Deliver {
            payload: envelope.payload.clone(),
            from,
            hops: envelope.hops,
        }];

        let relayed = envelope.next_hop();
        let mut targets: Vec<_> = self.peers.iter().copied().filter(|p| *p != from).collect();
        targets.shuffle(&mut rand::rng());
        targets.truncate(self.fanout);

        debug!(
            id = %relayed.id,
            hops = relayed.hops,
            targets = targets.len(),
            "relaying envelope"
        );
        actions.extend(
            targets
                .into_iter()
                .map(|to| FloodAction::Forward {
                    to,
                    envelope: relayed.clone(),
                }),
        );
        actions
    }

    /// Membership notification: a peer became reachable.
    pub fn on_peer_up(&mut self, peer: PeerAddr) {
        self.peers.insert(peer);
        info!(%peer, view = ?self.peers, "peer up");
    }

    /// Membership notification: a peer is gone. Harmless for addresses we
    /// never mirrored.
    pub fn on_peer_down(&mut self, peer: PeerAddr) {
        self.peers.remove(&peer);
        info!(%peer, view = ?self.peers, "peer down");
    }
}

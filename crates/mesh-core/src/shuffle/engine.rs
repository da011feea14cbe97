//! Shuffle protocol engine.
//!
//! Drives periodic randomized view exchange over a [`View`]. The engine is a
//! synchronous state machine: every input returns the list of actions the
//! caller must perform. The caller is responsible for:
//! - calling `on_timer()` at the configured interval
//! - feeding in shuffle traffic and connection events
//! - executing the returned actions (sends, connects, notifications)
//!
//! View repair is driven entirely by connection events, never by shuffle
//! acknowledgement, so bootstrap-discovered and shuffle-discovered peers are
//! handled uniformly. Failed connects are dropped silently; churn is repaired
//! by the next shuffle round.

use super::view::View;
use crate::config::MeshConfig;
use crate::protocol::ShuffleExchange;
use crate::PeerAddr;
use tracing::debug;

/// What the caller must do after feeding the engine an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShuffleAction {
    /// Send a shuffle sample to a random target (one-shot, loss tolerated).
    SendShuffle {
        target: PeerAddr,
        exchange: ShuffleExchange,
    },
    /// Send the symmetric reply back over the connection that carried the
    /// request.
    SendReply {
        target: PeerAddr,
        exchange: ShuffleExchange,
    },
    /// Open an outbound connection to a newly learned peer.
    Connect { peer: PeerAddr },
    /// Notify subscribers that a peer entered the view.
    PeerUp { peer: PeerAddr },
    /// Notify subscribers that a peer left the view.
    PeerDown { peer: PeerAddr },
}

/// Membership engine: a view plus the shuffle rules that repair it.
pub struct ShuffleEngine {
    view: View,
    sample_size: usize,
    contact: Option<PeerAddr>,
    next_exchange_id: u32,
}

impl ShuffleEngine {
    pub fn new(local: PeerAddr, config: &MeshConfig) -> Self {
        Self {
            view: View::new(local),
            sample_size: config.sample_size,
            contact: config.contact,
            next_exchange_id: 0,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Startup: connect to the bootstrap contact, if one is configured.
    pub fn bootstrap(&mut self) -> Vec<ShuffleAction> {
        let mut actions = Vec::new();
        if let Some(contact) = self.contact
            && self.view.begin_connect(contact)
        {
            actions.push(ShuffleAction::Connect { peer: contact });
        }
        actions
    }

    /// Periodic shuffle: offer a random sample of our view (plus ourselves)
    /// to one random member.
    pub fn on_timer(&mut self) -> Vec<ShuffleAction> {
        debug!(size = self.view.len(), view = ?self.view.active_set(), "shuffle round");

        let Some(target) = self.view.random_active() else {
            return Vec::new();
        };

        let mut sample = self.view.sample_excluding(self.sample_size, target);
        sample.push(self.view.local());
        let exchange_id = self.next_exchange_id;
        self.next_exchange_id += 1;

        vec![ShuffleAction::SendShuffle {
            target,
            exchange: ShuffleExchange::new(exchange_id, sample),
        }]
    }

    /// A peer offered us a sample: reply symmetrically, then chase every
    /// address we have never seen.
    pub fn on_shuffle(&mut self, from: PeerAddr, exchange: ShuffleExchange) -> Vec<ShuffleAction> {
        debug!(%from, exchange_id = exchange.exchange_id, "received shuffle");

        let mut sample = self.view.sample_excluding(self.sample_size, from);
        sample.push(self.view.local());

        let mut actions = vec![ShuffleAction::SendReply {
            target: from,
            exchange: ShuffleExchange::new(exchange.exchange_id, sample),
        }];
        actions.extend(self.connect_unknown(&exchange.sample));
        actions
    }

    /// The reply half of a round: chase unknown addresses, nothing more.
    pub fn on_shuffle_reply(
        &mut self,
        from: PeerAddr,
        exchange: ShuffleExchange,
    ) -> Vec<ShuffleAction> {
        debug!(%from, exchange_id = exchange.exchange_id, "received shuffle reply");
        self.connect_unknown(&exchange.sample)
    }

    /// Outbound connection established: the peer becomes a member.
    pub fn on_connection_up(&mut self, peer: PeerAddr) -> Vec<ShuffleAction> {
        if self.view.promote(peer) {
            vec![ShuffleAction::PeerUp { peer }]
        } else {
            Vec::new()
        }
    }

    /// Outbound connection lost: remove and notify. Removal is idempotent and
    /// notifies even for addresses that never made it into the view, so
    /// subscribers can reconcile their mirrors unconditionally.
    pub fn on_connection_down(&mut self, peer: PeerAddr) -> Vec<ShuffleAction> {
        self.view.remove_active(peer);
        vec![ShuffleAction::PeerDown { peer }]
    }

    /// Outbound connect attempt failed: forget it. No retry, no notification.
    pub fn on_connection_failed(&mut self, peer: PeerAddr) -> Vec<ShuffleAction> {
        self.view.discard_pending(peer);
        Vec::new()
    }

    fn connect_unknown(&mut self, sample: &[PeerAddr]) -> Vec<ShuffleAction> {
        sample
            .iter()
            .copied()
            .filter(|&addr| self.view.begin_connect(addr))
            .map(|peer| ShuffleAction::Connect { peer })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> PeerAddr {
        "10.0.0.1:8000".parse().unwrap()
    }

    fn peer_a() -> PeerAddr {
        "10.0.0.2:8000".parse().unwrap()
    }

    fn peer_b() -> PeerAddr {
        "10.0.0.3:8000".parse().unwrap()
    }

    fn peer_c() -> PeerAddr {
        "10.0.0.4:8000".parse().unwrap()
    }

    fn engine() -> ShuffleEngine {
        ShuffleEngine::new(local(), &MeshConfig::default())
    }

    fn engine_with_contact(contact: PeerAddr) -> ShuffleEngine {
        let config = MeshConfig {
            contact: Some(contact),
            ..Default::default()
        };
        ShuffleEngine::new(local(), &config)
    }

    /// Drive a connection all the way into the view.
    fn connect(engine: &mut ShuffleEngine, peer: PeerAddr) {
        engine.on_connection_up(peer);
    }

    // ==================== Bootstrap ====================

    #[test]
    fn test_bootstrap_connects_to_contact() {
        let mut engine = engine_with_contact(peer_a());
        let actions = engine.bootstrap();
        assert_eq!(actions, vec![ShuffleAction::Connect { peer: peer_a() }]);
        assert!(engine.view().is_pending(peer_a()));
    }

    #[test]
    fn test_bootstrap_without_contact() {
        let mut engine = engine();
        assert!(engine.bootstrap().is_empty());
    }

    // ==================== Timer ====================

    #[test]
    fn test_timer_with_empty_view_is_quiet() {
        let mut engine = engine();
        assert!(engine.on_timer().is_empty());
    }

    #[test]
    fn test_timer_sends_shuffle_to_member() {
        let mut engine = engine();
        connect(&mut engine, peer_a());

        let actions = engine.on_timer();
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ShuffleAction::SendShuffle { target, exchange } => {
                assert_eq!(*target, peer_a());
                // Only other member is the target itself, so the sample is
                // just us
                assert_eq!(exchange.sample, vec![local()]);
            }
            other => panic!("expected SendShuffle, got {other:?}"),
        }
    }

    #[test]
    fn test_timer_sample_excludes_target_includes_self() {
        let mut engine = engine();
        for peer in [peer_a(), peer_b(), peer_c()] {
            connect(&mut engine, peer);
        }

        for _ in 0..20 {
            let actions = engine.on_timer();
            let ShuffleAction::SendShuffle { target, exchange } = &actions[0] else {
                panic!("expected SendShuffle");
            };
            assert!(!exchange.sample.contains(target));
            assert!(exchange.sample.contains(&local()));
            // sample_size members at most, plus ourselves
            assert!(exchange.sample.len() <= MeshConfig::default().sample_size + 1);
        }
    }

    #[test]
    fn test_exchange_ids_are_sequential() {
        let mut engine = engine();
        connect(&mut engine, peer_a());

        let ids: Vec<u32> = (0..3)
            .map(|_| match &engine.on_timer()[0] {
                ShuffleAction::SendShuffle { exchange, .. } => exchange.exchange_id,
                other => panic!("expected SendShuffle, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    // ==================== Shuffle handling ====================

    #[test]
    fn test_shuffle_reply_is_symmetric() {
        let mut engine = engine();
        connect(&mut engine, peer_a());
        connect(&mut engine, peer_b());

        let actions = engine.on_shuffle(peer_a(), ShuffleExchange::new(9, vec![]));
        let ShuffleAction::SendReply { target, exchange } = &actions[0] else {
            panic!("expected SendReply");
        };
        assert_eq!(*target, peer_a());
        assert_eq!(exchange.exchange_id, 9);
        assert!(!exchange.sample.contains(&peer_a()));
        assert!(exchange.sample.contains(&local()));
    }

    #[test]
    fn test_shuffle_from_single_peer_view_replies_only_self() {
        // sample_size 3 requested from a node with one member: the reply
        // carries at most ourselves, and the call neither blocks nor errors
        let mut engine = engine();
        connect(&mut engine, peer_a());

        let actions = engine.on_shuffle(peer_a(), ShuffleExchange::new(0, vec![]));
        let ShuffleAction::SendReply { exchange, .. } = &actions[0] else {
            panic!("expected SendReply");
        };
        assert_eq!(exchange.sample, vec![local()]);
    }

    #[test]
    fn test_shuffle_chases_unknown_addresses() {
        let mut engine = engine();
        connect(&mut engine, peer_a());

        let offered = ShuffleExchange::new(0, vec![local(), peer_a(), peer_b(), peer_c()]);
        let actions = engine.on_shuffle(peer_a(), offered);

        // One reply, then connects for the two genuinely new addresses
        let connects: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ShuffleAction::Connect { peer } => Some(*peer),
                _ => None,
            })
            .collect();
        assert_eq!(connects, vec![peer_b(), peer_c()]);
        assert!(engine.view().is_pending(peer_b()));
        assert!(engine.view().is_pending(peer_c()));
    }

    #[test]
    fn test_reply_chases_unknown_but_never_replies_again() {
        let mut engine = engine();
        connect(&mut engine, peer_a());

        let actions = engine.on_shuffle_reply(peer_a(), ShuffleExchange::new(0, vec![peer_b()]));
        assert_eq!(actions, vec![ShuffleAction::Connect { peer: peer_b() }]);
    }

    #[test]
    fn test_pending_address_not_chased_twice() {
        let mut engine = engine();
        connect(&mut engine, peer_a());

        engine.on_shuffle_reply(peer_a(), ShuffleExchange::new(0, vec![peer_b()]));
        let actions = engine.on_shuffle_reply(peer_a(), ShuffleExchange::new(1, vec![peer_b()]));
        assert!(actions.is_empty());
    }

    // ==================== Connection lifecycle ====================

    #[test]
    fn test_connection_up_emits_peer_up_once() {
        let mut engine = engine();
        engine.view.begin_connect(peer_a());

        let actions = engine.on_connection_up(peer_a());
        assert_eq!(actions, vec![ShuffleAction::PeerUp { peer: peer_a() }]);

        // A second up for the same peer is a no-op
        assert!(engine.on_connection_up(peer_a()).is_empty());
    }

    #[test]
    fn test_no_second_peer_up_without_peer_down() {
        let mut engine = engine();

        assert_eq!(engine.on_connection_up(peer_a()).len(), 1);
        assert!(engine.on_connection_up(peer_a()).is_empty());

        engine.on_connection_down(peer_a());
        assert_eq!(engine.on_connection_up(peer_a()).len(), 1);
    }

    #[test]
    fn test_connection_down_always_notifies() {
        let mut engine = engine();
        connect(&mut engine, peer_a());

        assert_eq!(
            engine.on_connection_down(peer_a()),
            vec![ShuffleAction::PeerDown { peer: peer_a() }]
        );
        assert!(!engine.view().contains(peer_a()));
    }

    #[test]
    fn test_connection_down_for_never_added_peer_notifies_once() {
        let mut engine = engine();
        let actions = engine.on_connection_down(peer_b());
        assert_eq!(actions, vec![ShuffleAction::PeerDown { peer: peer_b() }]);
    }

    #[test]
    fn test_connection_failed_is_silent() {
        let mut engine = engine_with_contact(peer_a());
        engine.bootstrap();

        let actions = engine.on_connection_failed(peer_a());
        assert!(actions.is_empty());
        assert!(!engine.view().is_pending(peer_a()));
        assert!(!engine.view().contains(peer_a()));
    }

    #[test]
    fn test_failed_contact_can_be_rediscovered() {
        let mut engine = engine_with_contact(peer_a());
        engine.bootstrap();
        engine.on_connection_failed(peer_a());

        // The next shuffle naming the contact chases it again
        connect(&mut engine, peer_b());
        let actions = engine.on_shuffle_reply(peer_b(), ShuffleExchange::new(0, vec![peer_a()]));
        assert_eq!(actions, vec![ShuffleAction::Connect { peer: peer_a() }]);
    }

    // ==================== Invariants ====================

    #[test]
    fn test_view_sets_disjoint_through_protocol_sequence() {
        let mut engine = engine_with_contact(peer_a());
        engine.bootstrap();
        engine.on_connection_up(peer_a());
        engine.on_shuffle(peer_a(), ShuffleExchange::new(0, vec![peer_b(), peer_c()]));
        engine.on_connection_up(peer_b());
        engine.on_connection_failed(peer_c());
        engine.on_connection_down(peer_a());
        engine.on_shuffle_reply(peer_b(), ShuffleExchange::new(1, vec![peer_a()]));

        let view = engine.view();
        for addr in view.active() {
            assert!(!view.is_pending(addr));
        }
    }
}

//! Membership service task.
//!
//! Owns the shuffle engine and the shuffle timer, reacts to connection events
//! and shuffle traffic, and publishes view changes three ways:
//! - `MeshEvent`s on the event bus for clients
//! - `PeerEvent`s over a channel for the dissemination service's mirror
//! - a `watch` snapshot of the active set for observers and tests
//!
//! It also publishes the one-time channel binding that hands the
//! dissemination service the shared transport.

use crate::transport::{Direction, TransportEvent, TransportHandle};
use mesh_core::{MeshConfig, MeshEvent, PeerAddr, ShuffleAction, ShuffleEngine, WireMessage};
use mesh_core::events::EventBus;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};

/// View-change notification mirrored to the dissemination service.
///
/// Delivered in emission order (per-sender FIFO); carries copies, never
/// references into membership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Up(PeerAddr),
    Down(PeerAddr),
}

/// One-time binding of the shared transport, published by membership and
/// consumed by dissemination at startup.
pub struct ChannelBinding {
    pub local: PeerAddr,
    pub transport: TransportHandle,
}

pub struct MembershipService {
    local: PeerAddr,
    config: MeshConfig,
    engine: ShuffleEngine,
    transport: TransportHandle,
    events: Arc<EventBus>,
    peers_tx: mpsc::UnboundedSender<PeerEvent>,
    view_tx: watch::Sender<BTreeSet<PeerAddr>>,
}

impl MembershipService {
    pub fn new(
        local: PeerAddr,
        config: MeshConfig,
        transport: TransportHandle,
        events: Arc<EventBus>,
        peers_tx: mpsc::UnboundedSender<PeerEvent>,
        view_tx: watch::Sender<BTreeSet<PeerAddr>>,
    ) -> Self {
        let engine = ShuffleEngine::new(local, &config);
        Self {
            local,
            config,
            engine,
            transport,
            events,
            peers_tx,
            view_tx,
        }
    }

    /// Run the service until the transport event stream ends.
    ///
    /// `binding_tx` receives the channel binding exactly once, before any
    /// traffic is processed.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<TransportEvent>,
        binding_tx: oneshot::Sender<ChannelBinding>,
    ) {
        // Publish the shared channel before anything else happens on it
        let _ = binding_tx.send(ChannelBinding {
            local: self.local,
            transport: self.transport.clone(),
        });
        self.events.emit(MeshEvent::ChannelReady { local: self.local });

        let actions = self.engine.bootstrap();
        self.apply(actions, Direction::Outgoing);

        let period = self.config.shuffle_interval;
        let mut shuffle_timer = interval_at(Instant::now() + period, period);
        shuffle_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shuffle_timer.tick() => {
                    let actions = self.engine.on_timer();
                    self.apply(actions, Direction::Outgoing);
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.on_transport_event(event);
                }
            }
        }
        debug!("membership service stopped");
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::OutUp(peer) => {
                debug!(%peer, "connection to peer is up");
                let actions = self.engine.on_connection_up(peer);
                self.apply(actions, Direction::Outgoing);
            }
            TransportEvent::OutDown(peer) => {
                debug!(%peer, "connection to peer is down");
                let actions = self.engine.on_connection_down(peer);
                self.apply(actions, Direction::Outgoing);
            }
            TransportEvent::OutFailed(peer) => {
                debug!(%peer, "connection to peer failed");
                let actions = self.engine.on_connection_failed(peer);
                self.apply(actions, Direction::Outgoing);
            }
            TransportEvent::InUp(peer) => trace!(%peer, "connection from peer is up"),
            TransportEvent::InDown(peer) => trace!(%peer, "connection from peer is down"),
            TransportEvent::Message { from, direction, msg } => match msg {
                WireMessage::Shuffle(exchange) => {
                    let actions = self.engine.on_shuffle(from, exchange);
                    // The reply must travel back over the connection that
                    // carried the request
                    self.apply(actions, direction);
                }
                WireMessage::ShuffleReply(exchange) => {
                    let actions = self.engine.on_shuffle_reply(from, exchange);
                    self.apply(actions, direction);
                }
                other => debug!(from = %from, kind = other.kind(), "unexpected message, ignored"),
            },
            TransportEvent::SendFailed { to, kind } => {
                error!(peer = %to, kind, "message send failed");
            }
        }
    }

    fn apply(&mut self, actions: Vec<ShuffleAction>, reply_direction: Direction) {
        for action in actions {
            match action {
                ShuffleAction::SendShuffle { target, exchange } => {
                    self.transport
                        .send(target, Direction::Outgoing, WireMessage::Shuffle(exchange));
                }
                ShuffleAction::SendReply { target, exchange } => {
                    self.transport
                        .send(target, reply_direction, WireMessage::ShuffleReply(exchange));
                }
                ShuffleAction::Connect { peer } => {
                    self.transport.dial(peer);
                }
                ShuffleAction::PeerUp { peer } => {
                    info!(%peer, "added to membership");
                    self.publish_view();
                    let _ = self.peers_tx.send(PeerEvent::Up(peer));
                    self.events.emit(MeshEvent::PeerUp { peer });
                }
                ShuffleAction::PeerDown { peer } => {
                    info!(%peer, "removed from membership");
                    self.publish_view();
                    let _ = self.peers_tx.send(PeerEvent::Down(peer));
                    self.events.emit(MeshEvent::PeerDown { peer });
                }
            }
        }
    }

    fn publish_view(&self) {
        let _ = self.view_tx.send(self.engine.view().active_set());
    }
}

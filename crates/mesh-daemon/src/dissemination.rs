//! Dissemination service task.
//!
//! Owns the flood engine. Waits for the one-time channel binding from the
//! membership service, then loops over its three inputs: inbound gossip,
//! peer notifications, and broadcast submissions. It never reads the
//! membership view — the engine's mirror is fed only by `PeerEvent`s.

use crate::membership::{ChannelBinding, PeerEvent};
use crate::transport::Direction;
use mesh_core::events::EventBus;
use mesh_core::{FloodAction, FloodEngine, GossipEnvelope, MeshEvent, PeerAddr, WireMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Inputs routed to the dissemination service.
#[derive(Debug)]
pub enum DisseminationInput {
    /// An envelope arrived from a peer.
    Gossip {
        from: PeerAddr,
        envelope: GossipEnvelope,
    },
    /// A client submitted a payload for broadcast (fire-and-forget).
    Broadcast(Vec<u8>),
}

pub struct DisseminationService {
    fanout: usize,
    events: Arc<EventBus>,
}

impl DisseminationService {
    pub fn new(fanout: usize, events: Arc<EventBus>) -> Self {
        Self { fanout, events }
    }

    pub async fn run(
        self,
        binding_rx: oneshot::Receiver<ChannelBinding>,
        mut input_rx: mpsc::UnboundedReceiver<DisseminationInput>,
        mut peers_rx: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        // Nothing can be delivered or relayed before the shared channel exists
        let Ok(binding) = binding_rx.await else {
            return;
        };
        debug!(local = %binding.local, "channel bound");

        let mut engine = FloodEngine::new(binding.local, self.fanout);
        let transport = binding.transport;

        loop {
            let actions = tokio::select! {
                input = input_rx.recv() => {
                    match input {
                        Some(DisseminationInput::Gossip { from, envelope }) => {
                            engine.on_gossip(envelope, from)
                        }
                        Some(DisseminationInput::Broadcast(payload)) => engine.broadcast(payload),
                        None => break,
                    }
                }
                peer_event = peers_rx.recv() => {
                    match peer_event {
                        Some(PeerEvent::Up(peer)) => engine.on_peer_up(peer),
                        Some(PeerEvent::Down(peer)) => engine.on_peer_down(peer),
                        None => break,
                    }
                    Vec::new()
                }
            };

            for action in actions {
                match action {
                    FloodAction::Deliver { payload, from, hops } => {
                        self.events.emit(MeshEvent::Delivered { payload, from, hops });
                    }
                    FloodAction::Forward { to, envelope } => {
                        // A lost relay is tolerated: redundancy substitutes
                        // for retry
                        transport.send(to, Direction::Outgoing, WireMessage::Gossip(envelope));
                    }
                }
            }
        }
        debug!("dissemination service stopped");
    }
}

//! Node wiring.
//!
//! `Mesh::start` binds the listener, spawns the transport, the router and the
//! two service tasks, and hands back a [`MeshHandle`]. The router is the only
//! piece that sees every transport event: it dispatches each one, strictly in
//! order, to the service that owns it — shuffle traffic and connection events
//! to membership, gossip to dissemination.

use crate::dissemination::{DisseminationInput, DisseminationService};
use crate::membership::{MembershipService, PeerEvent};
use crate::transport::{Transport, TransportEvent};
use anyhow::{Context, Result};
use mesh_core::events::{EventBus, Subscription};
use mesh_core::{MeshConfig, MeshEvent, PeerAddr, WireMessage};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// A running mesh node.
pub struct Mesh;

impl Mesh {
    /// Validate the configuration, bind the listener, and start all tasks.
    ///
    /// `listen` is both the bind address and, with the bound port filled in,
    /// our identity in the mesh — so it must be an address other nodes can
    /// dial. A bad configuration is fatal here; there is no partial startup.
    pub async fn start(listen: PeerAddr, config: MeshConfig) -> Result<MeshHandle> {
        config.validate().context("invalid configuration")?;

        let listener = TcpListener::bind(listen.to_socket_addr())
            .await
            .with_context(|| format!("failed to bind {listen}"))?;
        let (transport, transport_handle, transport_rx, local) =
            Transport::bind(listen, listener)?;

        info!(%local, "starting mesh node");

        let events = Arc::new(EventBus::new());
        let (membership_tx, membership_rx) = mpsc::unbounded_channel();
        let (dissemination_tx, dissemination_rx) = mpsc::unbounded_channel();
        let (peers_tx, peers_rx) = mpsc::unbounded_channel::<PeerEvent>();
        let (binding_tx, binding_rx) = oneshot::channel();
        let (view_tx, view_rx) = watch::channel(BTreeSet::new());

        let membership = MembershipService::new(
            local,
            config.clone(),
            transport_handle.clone(),
            Arc::clone(&events),
            peers_tx,
            view_tx,
        );
        let dissemination = DisseminationService::new(config.gossip_fanout, Arc::clone(&events));

        let tasks = vec![
            tokio::spawn(transport.run()),
            tokio::spawn(route(transport_rx, membership_tx, dissemination_tx.clone())),
            tokio::spawn(membership.run(membership_rx, binding_tx)),
            tokio::spawn(dissemination.run(binding_rx, dissemination_rx, peers_rx)),
        ];

        Ok(MeshHandle {
            local,
            events,
            broadcaster: Broadcaster {
                tx: dissemination_tx,
            },
            view_rx,
            tasks,
        })
    }
}

/// Dispatch transport events to the service that owns them.
async fn route(
    mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    membership_tx: mpsc::UnboundedSender<TransportEvent>,
    dissemination_tx: mpsc::UnboundedSender<DisseminationInput>,
) {
    while let Some(event) = transport_rx.recv().await {
        match event {
            TransportEvent::Message {
                from,
                msg: WireMessage::Gossip(envelope),
                ..
            } => {
                let _ = dissemination_tx.send(DisseminationInput::Gossip { from, envelope });
            }
            other => {
                let _ = membership_tx.send(other);
            }
        }
    }
}

/// Cheap cloneable handle for submitting broadcasts, usable from blocking
/// threads (the console reader).
#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<DisseminationInput>,
}

impl Broadcaster {
    /// Fire-and-forget broadcast of an opaque payload.
    pub fn broadcast(&self, payload: Vec<u8>) {
        let _ = self.tx.send(DisseminationInput::Broadcast(payload));
    }
}

/// Handle to a running node.
pub struct MeshHandle {
    local: PeerAddr,
    events: Arc<EventBus>,
    broadcaster: Broadcaster,
    view_rx: watch::Receiver<BTreeSet<PeerAddr>>,
    tasks: Vec<JoinHandle<()>>,
}

impl MeshHandle {
    /// Our identity in the mesh (bind address with the actual port).
    pub fn local_addr(&self) -> PeerAddr {
        self.local
    }

    /// Submit a payload for broadcast. Fire-and-forget.
    pub fn broadcast(&self, payload: Vec<u8>) {
        self.broadcaster.broadcast(payload);
    }

    /// A cloneable submission handle.
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Subscribe to mesh events. The subscription ends when dropped.
    pub fn subscribe(
        &self,
        callback: impl Fn(MeshEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    /// Watch snapshots of the membership view.
    pub fn view(&self) -> watch::Receiver<BTreeSet<PeerAddr>> {
        self.view_rx.clone()
    }

    /// Stop all node tasks and drop every connection.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

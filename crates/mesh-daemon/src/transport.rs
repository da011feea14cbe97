//! Shared transport for mesh traffic.
//!
//! One task owns the listener, the dial set and the connection maps; the two
//! protocol services talk to it through a cloneable [`TransportHandle`].
//! Connections are keyed by the remote's *listen* address. For outbound
//! connections that address is the dial target; for inbound connections it is
//! announced by the dialer in a handshake frame — the first frame on every
//! dialed connection — because the dialer's ephemeral port is not an
//! identity. Inbound connections are held back until that handshake arrives;
//! pre-handshake closes are cleaned up silently.
//!
//! Connection outcomes (up, down, failed) and inbound messages surface as
//! [`TransportEvent`]s. Send failures are warned about and reported, never
//! retried.

use crate::connection::{ConnEvent, Connection};
use anyhow::{Context, Result};
use mesh_core::{PeerAddr, WireMessage};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long a dial may take before it counts as failed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which side opened a connection, from our perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Commands accepted by the transport task.
#[derive(Debug)]
enum TransportCmd {
    Dial(PeerAddr),
    Send {
        to: PeerAddr,
        direction: Direction,
        msg: WireMessage,
    },
}

/// Events emitted by the transport task.
#[derive(Debug)]
pub enum TransportEvent {
    /// An outbound connection is established.
    OutUp(PeerAddr),
    /// An outbound connection is gone.
    OutDown(PeerAddr),
    /// An outbound dial failed.
    OutFailed(PeerAddr),
    /// An inbound connection completed its handshake.
    InUp(PeerAddr),
    /// An inbound connection is gone.
    InDown(PeerAddr),
    /// A message arrived, with the direction of the connection it came in on
    /// (so replies can travel back the same way).
    Message {
        from: PeerAddr,
        direction: Direction,
        msg: WireMessage,
    },
    /// A send could not be queued or delivered.
    SendFailed { to: PeerAddr, kind: &'static str },
}

/// Cloneable handle for submitting transport commands.
///
/// Dials are non-blocking requests whose outcomes arrive as later events.
#[derive(Clone)]
pub struct TransportHandle {
    cmd_tx: mpsc::UnboundedSender<TransportCmd>,
}

impl TransportHandle {
    /// Open an outbound connection. Duplicate dials are ignored.
    pub fn dial(&self, addr: PeerAddr) {
        let _ = self.cmd_tx.send(TransportCmd::Dial(addr));
    }

    /// Queue a message to a peer over a connection of the given direction.
    pub fn send(&self, to: PeerAddr, direction: Direction, msg: WireMessage) {
        let _ = self.cmd_tx.send(TransportCmd::Send { to, direction, msg });
    }
}

/// Result of an in-flight dial.
#[derive(Debug)]
struct DialOutcome {
    addr: PeerAddr,
    stream: Option<TcpStream>,
}

/// The transport task state.
pub struct Transport {
    local: PeerAddr,
    listener: TcpListener,
    cmd_rx: mpsc::UnboundedReceiver<TransportCmd>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    conn_tx: mpsc::UnboundedSender<ConnEvent>,
    conn_rx: mpsc::UnboundedReceiver<ConnEvent>,
    dial_tx: mpsc::UnboundedSender<DialOutcome>,
    dial_rx: mpsc::UnboundedReceiver<DialOutcome>,
    /// Dials in flight
    dialing: HashSet<PeerAddr>,
    /// Established connections keyed by peer address
    outgoing: HashMap<PeerAddr, Connection>,
    incoming: HashMap<PeerAddr, Connection>,
    /// Inbound connections awaiting their handshake, keyed by connection id
    pending_incoming: HashMap<u64, Connection>,
    /// Resolves connection ids of established connections back to peers
    conn_peers: HashMap<u64, (PeerAddr, Direction)>,
    next_conn_id: u64,
}

impl Transport {
    /// Bind the listener and create the transport task state.
    ///
    /// Returns the state, the command handle, the event stream, and the
    /// actual local address (the configured one with the bound port, for
    /// listen-on-port-0 setups).
    pub fn bind(
        listen: PeerAddr,
        listener: TcpListener,
    ) -> Result<(
        Self,
        TransportHandle,
        mpsc::UnboundedReceiver<TransportEvent>,
        PeerAddr,
    )> {
        let bound = listener.local_addr().context("listener has no address")?;
        let local = PeerAddr::new(listen.ip(), bound.port());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();

        let transport = Self {
            local,
            listener,
            cmd_rx,
            event_tx,
            conn_tx,
            conn_rx,
            dial_tx,
            dial_rx,
            dialing: HashSet::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            pending_incoming: HashMap::new(),
            conn_peers: HashMap::new(),
            next_conn_id: 1,
        };

        Ok((transport, TransportHandle { cmd_tx }, event_rx, local))
    }

    /// Run until every command handle is dropped.
    pub async fn run(mut self) {
        info!(local = %self.local, "transport listening");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(TransportCmd::Dial(addr)) => self.on_dial(addr),
                        Some(TransportCmd::Send { to, direction, msg }) => {
                            self.on_send(to, direction, msg);
                        }
                        None => break,
                    }
                }
                outcome = self.dial_rx.recv() => {
                    if let Some(outcome) = outcome {
                        self.on_dial_outcome(outcome);
                    }
                }
                event = self.conn_rx.recv() => {
                    if let Some(event) = event {
                        self.on_conn_event(event);
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.on_accept(stream, addr),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
        debug!("transport stopped");
    }

    fn on_dial(&mut self, addr: PeerAddr) {
        if self.outgoing.contains_key(&addr) || self.dialing.contains(&addr) {
            debug!(peer = %addr, "dial ignored, already connected or in flight");
            return;
        }
        self.dialing.insert(addr);

        let dial_tx = self.dial_tx.clone();
        tokio::spawn(async move {
            let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr.to_socket_addr()))
                .await
            {
                Ok(Ok(stream)) => Some(stream),
                Ok(Err(e)) => {
                    debug!(peer = %addr, error = %e, "dial failed");
                    None
                }
                Err(_) => {
                    debug!(peer = %addr, "dial timed out");
                    None
                }
            };
            let _ = dial_tx.send(DialOutcome { addr, stream });
        });
    }

    fn on_dial_outcome(&mut self, outcome: DialOutcome) {
        let addr = outcome.addr;
        self.dialing.remove(&addr);

        let Some(stream) = outcome.stream else {
            let _ = self.event_tx.send(TransportEvent::OutFailed(addr));
            return;
        };

        if self.outgoing.contains_key(&addr) {
            // Raced with an earlier dial; keep the established connection
            debug!(peer = %addr, "dropping redundant connection");
            return;
        }

        let conn_id = self.next_conn_id();
        let conn = Connection::spawn(conn_id, stream, self.conn_tx.clone());
        // Announce our listen address before any protocol traffic
        conn.send(WireMessage::Handshake(self.local));

        debug!(peer = %addr, conn_id, "connection to peer is up");
        self.conn_peers.insert(conn_id, (addr, Direction::Outgoing));
        self.outgoing.insert(addr, conn);
        let _ = self.event_tx.send(TransportEvent::OutUp(addr));
    }

    fn on_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = self.next_conn_id();
        debug!(remote = %addr, conn_id, "new inbound connection");
        let conn = Connection::spawn(conn_id, stream, self.conn_tx.clone());
        self.pending_incoming.insert(conn_id, conn);
    }

    fn on_conn_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Frame { conn_id, msg } => self.on_frame(conn_id, msg),
            ConnEvent::Closed { conn_id } => self.on_closed(conn_id),
        }
    }

    fn on_frame(&mut self, conn_id: u64, msg: WireMessage) {
        // Pre-handshake connections may only introduce themselves
        if let Some(conn) = self.pending_incoming.remove(&conn_id) {
            let WireMessage::Handshake(peer) = msg else {
                warn!(conn_id, kind = msg.kind(), "first frame was not a handshake, dropping");
                return;
            };

            if let Some(old) = self.incoming.remove(&peer) {
                debug!(%peer, "replacing inbound connection");
                self.conn_peers.remove(&old.conn_id);
            }
            debug!(%peer, conn_id, "connection from peer is up");
            self.conn_peers.insert(conn_id, (peer, Direction::Incoming));
            self.incoming.insert(peer, conn);
            let _ = self.event_tx.send(TransportEvent::InUp(peer));
            return;
        }

        let Some(&(from, direction)) = self.conn_peers.get(&conn_id) else {
            debug!(conn_id, "frame from unknown connection, ignored");
            return;
        };
        if matches!(msg, WireMessage::Handshake(_)) {
            debug!(%from, "repeated handshake ignored");
            return;
        }
        let _ = self.event_tx.send(TransportEvent::Message {
            from,
            direction,
            msg,
        });
    }

    fn on_closed(&mut self, conn_id: u64) {
        let Some((peer, direction)) = self.conn_peers.remove(&conn_id) else {
            // Closed before handshake: clean up silently
            if self.pending_incoming.remove(&conn_id).is_some() {
                debug!(conn_id, "connection closed before handshake");
            }
            return;
        };

        let (map, event) = match direction {
            Direction::Outgoing => (&mut self.outgoing, TransportEvent::OutDown(peer)),
            Direction::Incoming => (&mut self.incoming, TransportEvent::InDown(peer)),
        };
        // Only drop the map entry if it still refers to this connection
        if map.get(&peer).is_some_and(|c| c.conn_id == conn_id) {
            map.remove(&peer);
        }
        debug!(%peer, ?direction, "connection closed");
        let _ = self.event_tx.send(event);
    }

    fn on_send(&mut self, to: PeerAddr, direction: Direction, msg: WireMessage) {
        let kind = msg.kind();
        let map = match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        };
        let sent = map.get(&to).is_some_and(|conn| conn.send(msg));
        if !sent {
            warn!(peer = %to, kind, "send failed, no usable connection");
            let _ = self.event_tx.send(TransportEvent::SendFailed { to, kind });
        }
    }

    fn next_conn_id(&mut self) -> u64 {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        id
    }
}

//! Wire message types.
//!
//! One closed enum per category, decoded by a single tag match. Layout (all
//! integers big-endian):
//!
//! | tag | message      | body                                           |
//! |-----|--------------|------------------------------------------------|
//! | 1   | Handshake    | PeerAddr                                       |
//! | 2   | Shuffle      | u32 exchange_id, u32 count, count × PeerAddr   |
//! | 3   | ShuffleReply | same shape as Shuffle                          |
//! | 4   | Gossip       | u64 id_high, u64 id_low, u32 hops, bytes       |
//!
//! A `PeerAddr` travels as 4 address octets + u16 port.

use super::wire::{WireError, WireReader, WireWriter};
use crate::PeerAddr;
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use uuid::Uuid;

const TAG_HANDSHAKE: u8 = 1;
const TAG_SHUFFLE: u8 = 2;
const TAG_SHUFFLE_REPLY: u8 = 3;
const TAG_GOSSIP: u8 = 4;

/// 128-bit random message identifier.
///
/// Fresh ids are generated at the broadcast entry point; on the wire the id
/// travels as two big-endian u64 halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_u64_pair(&self) -> (u64, u64) {
        self.0.as_u64_pair()
    }

    pub fn from_u64_pair(high: u64, low: u64) -> Self {
        Self(Uuid::from_u64_pair(high, low))
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer-address sample travelling in either direction of a shuffle round.
///
/// Immutable once sent. The exchange id correlates a reply with the round
/// that triggered it, for diagnostics only; correctness never depends on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleExchange {
    pub exchange_id: u32,
    pub sample: Vec<PeerAddr>,
}

impl ShuffleExchange {
    pub fn new(exchange_id: u32, sample: Vec<PeerAddr>) -> Self {
        Self {
            exchange_id,
            sample,
        }
    }
}

/// A flooded application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipEnvelope {
    pub id: MessageId,
    /// Relay hops travelled since origination; incremented exactly once per relay
    pub hops: u32,
    /// Opaque application payload
    pub payload: Vec<u8>,
}

impl GossipEnvelope {
    pub fn new(id: MessageId, hops: u32, payload: Vec<u8>) -> Self {
        Self { id, hops, payload }
    }

    /// The same envelope, one relay hop further along.
    pub fn next_hop(&self) -> Self {
        Self {
            id: self.id,
            hops: self.hops + 1,
            payload: self.payload.clone(),
        }
    }
}

/// Everything that travels between two mesh nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// First frame on a dialed connection: the dialer announces its listen
    /// address (its ephemeral port is not an identity).
    Handshake(PeerAddr),
    /// A shuffle sample offered to a random target.
    Shuffle(ShuffleExchange),
    /// The symmetric sample sent back over the connection that carried the
    /// request.
    ShuffleReply(ShuffleExchange),
    /// A flooded application message.
    Gossip(GossipEnvelope),
}

impl WireMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::Shuffle(_) => "shuffle",
            Self::ShuffleReply(_) => "shuffleReply",
            Self::Gossip(_) => "gossip",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        match self {
            Self::Handshake(addr) => {
                w.put_u8(TAG_HANDSHAKE);
                put_addr(&mut w, addr);
            }
            Self::Shuffle(exchange) => {
                w.put_u8(TAG_SHUFFLE);
                put_exchange(&mut w, exchange);
            }
            Self::ShuffleReply(exchange) => {
                w.put_u8(TAG_SHUFFLE_REPLY);
                put_exchange(&mut w, exchange);
            }
            Self::Gossip(envelope) => {
                w.put_u8(TAG_GOSSIP);
                let (high, low) = envelope.id.as_u64_pair();
                w.put_u64(high);
                w.put_u64(low);
                w.put_u32(envelope.hops);
                w.put_bytes(&envelope.payload);
            }
        }
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        let tag = r.get_u8()?;
        let msg = match tag {
            TAG_HANDSHAKE => Self::Handshake(get_addr(&mut r)?),
            TAG_SHUFFLE => Self::Shuffle(get_exchange(&mut r)?),
            TAG_SHUFFLE_REPLY => Self::ShuffleReply(get_exchange(&mut r)?),
            TAG_GOSSIP => {
                let high = r.get_u64()?;
                let low = r.get_u64()?;
                let hops = r.get_u32()?;
                let payload = r.get_bytes()?;
                Self::Gossip(GossipEnvelope::new(
                    MessageId::from_u64_pair(high, low),
                    hops,
                    payload,
                ))
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        r.finish()?;
        Ok(msg)
    }
}

fn put_addr(w: &mut WireWriter, addr: &PeerAddr) {
    w.put_raw(&addr.octets());
    w.put_u16(addr.port());
}

fn get_addr(r: &mut WireReader) -> Result<PeerAddr, WireError> {
    let octets = r.get_raw(4)?;
    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    let port = r.get_u16()?;
    Ok(PeerAddr::new(ip, port))
}

fn put_exchange(w: &mut WireWriter, exchange: &ShuffleExchange) {
    w.put_u32(exchange.exchange_id);
    w.put_u32(exchange.sample.len() as u32);
    for addr in &exchange.sample {
        put_addr(w, addr);
    }
}

fn get_exchange(r: &mut WireReader) -> Result<ShuffleExchange, WireError> {
    let exchange_id = r.get_u32()?;
    let count = r.get_u32()?;
    // Each entry is 6 bytes; reject counts the buffer cannot possibly hold
    if count as usize > r.remaining() / 6 {
        return Err(WireError::BadLength(count));
    }
    let mut sample = Vec::with_capacity(count as usize);
    for _ in 0..count {
        sample.push(get_addr(r)?);
    }
    Ok(ShuffleExchange::new(exchange_id, sample))
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Protocol tags recognised by the node dispatcher. Tags are case-sensitive
/// strings so that ad-hoc handlers can be registered without touching the core.
pub mod protocol {
    /// Plain delivery; used by latency experiments.
    pub const DELAY: &str = "delay";
    /// Delivery with per-hop forward tracing.
    pub const FORWARD: &str = "forward";
    /// Distance-vector advertisements.
    pub const BROADCAST: &str = "broadcast";
    /// User-level data for routing tests.
    pub const TRANSMIT: &str = "transmit";
    /// Reliable byte-stream segments.
    pub const TCP: &str = "tcp";
}

/// Destination address reserved for broadcast delivery.
pub const BROADCAST_ADDRESS: u32 = 0;

/// Hop budget given to unicast packets.
pub const DEFAULT_TTL: u32 = 100;

/// Routing advertisements stay one hop: the receiver consumes the budget.
pub const BROADCAST_TTL: u32 = 1;

/// A reliable-transport segment carried in a packet body.
///
/// `sequence` names the first byte of `data`; `ack_number` names the next
/// byte the sender of this segment expects to receive (cumulative ACK).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u64,
    pub ack_number: u64,
    pub data: Vec<u8>,
}

/// A distance-vector advertisement: the sender's hostname and its current
/// vector of address -> hop count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub hostname: String,
    pub vector: BTreeMap<u32, u32>,
}

/// Opaque payload attached to a packet. The simulation itself only looks at
/// `Packet::length`; protocol handlers interpret the body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PacketBody {
    #[default]
    Empty,
    Data(Vec<u8>),
    Segment(Segment),
    Advertisement(Advertisement),
}

/// A simulated network packet.
///
/// `length` drives link timing and is independent of the body. `created` is
/// stamped exactly once, when the packet first enters a node's send path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub source_address: u32,
    pub destination_address: u32,
    pub ident: u32,
    pub protocol: String,
    /// Payload size in bytes as seen by links.
    pub length: u32,
    pub ttl: u32,
    pub created: Option<f64>,
    pub body: PacketBody,
}

impl Packet {
    /// A unicast packet with an empty body, as used by latency experiments.
    pub fn new(destination_address: u32, ident: u32, protocol: &str, length: u32) -> Self {
        Self {
            source_address: 0,
            destination_address,
            ident,
            protocol: protocol.to_string(),
            length,
            ttl: DEFAULT_TTL,
            created: None,
            body: PacketBody::Empty,
        }
    }

    /// A one-hop broadcast packet. Broadcasts carry no timed payload, so
    /// `length` is zero and only propagation delay applies.
    pub fn broadcast(ident: u32, protocol: &str, body: PacketBody) -> Self {
        Self {
            source_address: 0,
            destination_address: BROADCAST_ADDRESS,
            ident,
            protocol: protocol.to_string(),
            length: 0,
            ttl: BROADCAST_TTL,
            created: None,
            body,
        }
    }

    /// A transport segment packet. `length` tracks the segment payload, so a
    /// pure ACK has length zero and costs no serialization time on a link.
    pub fn segment(source_address: u32, destination_address: u32, segment: Segment) -> Self {
        let length = segment.data.len() as u32;
        Self {
            source_address,
            destination_address,
            ident: 0,
            protocol: protocol::TCP.to_string(),
            length,
            ttl: DEFAULT_TTL,
            created: None,
            body: PacketBody::Segment(segment),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination_address == BROADCAST_ADDRESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_packet_length_tracks_payload() {
        let seg = Segment {
            source_port: 1,
            destination_port: 1,
            sequence: 0,
            ack_number: 0,
            data: vec![0u8; 500],
        };
        let p = Packet::segment(1, 2, seg);
        assert_eq!(p.length, 500);
        assert_eq!(p.protocol, protocol::TCP);
    }

    #[test]
    fn pure_ack_has_zero_length() {
        let seg = Segment {
            source_port: 1,
            destination_port: 1,
            sequence: 0,
            ack_number: 1000,
            data: Vec::new(),
        };
        assert_eq!(Packet::segment(1, 2, seg).length, 0);
    }

    #[test]
    fn broadcast_is_one_hop() {
        let p = Packet::broadcast(0, protocol::BROADCAST, PacketBody::Empty);
        assert!(p.is_broadcast());
        assert_eq!(p.ttl, BROADCAST_TTL);
    }
}

use crate::link::Link;
use crate::node::Node;
use netlab_abstract::config::DEFAULT_QUEUE_BYTES;
use netlab_abstract::packet::BROADCAST_ADDRESS;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Stable arena index of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

/// Stable arena index of a one-way link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl LinkId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to read topology file: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "line {line}: expected `link <a> <b> <addr_a> <addr_b> <bandwidth_bps> <delay_s> [queue_bytes] [loss_rate]`"
    )]
    MalformedLink { line: usize },
    #[error("line {line}: expected `node <hostname>`")]
    MalformedNode { line: usize },
    #[error("line {line}: unknown directive `{directive}`")]
    UnknownDirective { line: usize, directive: String },
    #[error("line {line}: invalid number in field `{field}`")]
    InvalidNumber { line: usize, field: &'static str },
    #[error("address {BROADCAST_ADDRESS} is reserved for broadcast")]
    ReservedAddress,
    #[error("duplicate address {address} on node {hostname}")]
    DuplicateAddress { hostname: String, address: u32 },
    #[error("bandwidth must be positive")]
    NonPositiveBandwidth,
    #[error("propagation delay must be non-negative")]
    NegativeDelay,
    #[error("loss rate must be within [0, 1]")]
    LossOutOfRange,
}

/// The topology container: an arena of nodes and one-way links, plus a
/// hostname index. Forwarding tables and routing vectors refer to entries by
/// `NodeId` / `LinkId`, never by owning references.
#[derive(Debug, Default)]
pub struct Network {
    nodes: Vec<Node>,
    links: Vec<Link>,
    by_name: HashMap<String, NodeId>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a line-oriented topology descriptor. Blank lines and `#`
    /// comments are skipped; nodes are created on first reference.
    pub fn parse(text: &str) -> Result<Self, NetworkError> {
        let mut network = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            match fields[0] {
                "node" => {
                    if fields.len() != 2 {
                        return Err(NetworkError::MalformedNode { line });
                    }
                    network.add_node(fields[1]);
                }
                "link" => network.parse_link(line, &fields)?,
                other => {
                    return Err(NetworkError::UnknownDirective {
                        line,
                        directive: other.to_string(),
                    });
                }
            }
        }
        Ok(network)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NetworkError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    fn parse_link(&mut self, line: usize, fields: &[&str]) -> Result<(), NetworkError> {
        if !(7..=9).contains(&fields.len()) {
            return Err(NetworkError::MalformedLink { line });
        }
        let addr_a = parse_field::<u32>(fields[3], line, "addr_a")?;
        let addr_b = parse_field::<u32>(fields[4], line, "addr_b")?;
        let bandwidth = parse_field::<f64>(fields[5], line, "bandwidth")?;
        let delay = parse_field::<f64>(fields[6], line, "delay")?;
        let queue = match fields.get(7) {
            Some(f) => parse_field::<u64>(f, line, "queue_bytes")?,
            None => DEFAULT_QUEUE_BYTES,
        };
        let loss = match fields.get(8) {
            Some(f) => parse_field::<f64>(f, line, "loss_rate")?,
            None => 0.0,
        };
        self.add_link_pair(fields[1], fields[2], addr_a, addr_b, bandwidth, delay, queue, loss)?;
        Ok(())
    }

    pub fn add_node(&mut self, hostname: &str) -> NodeId {
        if let Some(&id) = self.by_name.get(hostname) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(hostname));
        self.by_name.insert(hostname.to_string(), id);
        id
    }

    /// Declare a bidirectional pair of links between `a` and `b`. `addr_a` is
    /// the interface address on `a`'s side, `addr_b` the one on `b`'s side.
    #[allow(clippy::too_many_arguments)]
    pub fn add_link_pair(
        &mut self,
        a: &str,
        b: &str,
        addr_a: u32,
        addr_b: u32,
        bandwidth: f64,
        propagation: f64,
        max_queue_bytes: u64,
        loss_rate: f64,
    ) -> Result<(LinkId, LinkId), NetworkError> {
        if addr_a == BROADCAST_ADDRESS || addr_b == BROADCAST_ADDRESS {
            return Err(NetworkError::ReservedAddress);
        }
        if bandwidth <= 0.0 {
            return Err(NetworkError::NonPositiveBandwidth);
        }
        if propagation < 0.0 {
            return Err(NetworkError::NegativeDelay);
        }
        if !(0.0..=1.0).contains(&loss_rate) {
            return Err(NetworkError::LossOutOfRange);
        }
        let a_id = self.add_node(a);
        let b_id = self.add_node(b);
        self.check_duplicate_address(a_id, addr_a)?;
        self.check_duplicate_address(b_id, addr_b)?;

        let forward = LinkId(self.links.len());
        self.links.push(Link::new(
            a_id,
            b_id,
            a.to_string(),
            b.to_string(),
            addr_a,
            bandwidth,
            propagation,
            max_queue_bytes,
            loss_rate,
        ));
        self.nodes[a_id.0].add_link(forward);

        let reverse = LinkId(self.links.len());
        self.links.push(Link::new(
            b_id,
            a_id,
            b.to_string(),
            a.to_string(),
            addr_b,
            bandwidth,
            propagation,
            max_queue_bytes,
            loss_rate,
        ));
        self.nodes[b_id.0].add_link(reverse);

        Ok((forward, reverse))
    }

    fn check_duplicate_address(&self, node: NodeId, address: u32) -> Result<(), NetworkError> {
        if self.nodes[node.0]
            .links
            .iter()
            .any(|&l| self.links[l.0].address == address)
        {
            return Err(NetworkError::DuplicateAddress {
                hostname: self.nodes[node.0].hostname.clone(),
                address,
            });
        }
        Ok(())
    }

    // -- Lookup --

    pub fn node_id(&self, hostname: &str) -> Option<NodeId> {
        self.by_name.get(hostname).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    pub fn link_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.links[id.0]
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// The one-way link from `a` toward `b`, if they are directly connected.
    pub fn link_between(&self, a: &str, b: &str) -> Option<LinkId> {
        let a_id = self.node_id(a)?;
        self.nodes[a_id.0].link_to(b, &self.links)
    }

    /// This node's interface address on its link toward `peer`.
    pub fn address_of(&self, hostname: &str, peer: &str) -> Option<u32> {
        let id = self.node_id(hostname)?;
        match self.nodes[id.0].get_address(peer, &self.links) {
            0 => None,
            address => Some(address),
        }
    }

    /// Apply a uniform loss rate to every link.
    pub fn set_loss(&mut self, rate: f64) {
        for link in &mut self.links {
            link.loss_rate = rate;
        }
    }

    /// A node's mutable state together with shared access to the link arena,
    /// for handlers that rebuild routing tables.
    pub fn node_and_links_mut(&mut self, id: NodeId) -> (&mut Node, &[Link]) {
        (&mut self.nodes[id.0], &self.links)
    }
}

fn parse_field<T: std::str::FromStr>(
    field: &str,
    line: usize,
    name: &'static str,
) -> Result<T, NetworkError> {
    field
        .parse()
        .map_err(|_| NetworkError::InvalidNumber { line, field: name })
}

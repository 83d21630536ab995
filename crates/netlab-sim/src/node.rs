use crate::link::Link;
use crate::network::LinkId;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A neighbor's last-heard distance vector.
#[derive(Debug, Clone, Serialize)]
pub struct DistanceVectorEntry {
    pub timestamp: f64,
    pub vector: BTreeMap<u32, u32>,
}

/// An addressable host: attached links, forwarding table, and distance-vector
/// state. Protocol handlers are registered with the simulator, which owns the
/// dispatch registry; the node itself holds only routable state.
#[derive(Debug)]
pub struct Node {
    pub hostname: String,
    pub links: Vec<LinkId>,
    pub forwarding_table: HashMap<u32, LinkId>,
    pub distance_vectors: BTreeMap<String, DistanceVectorEntry>,
}

impl Node {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            links: Vec::new(),
            forwarding_table: HashMap::new(),
            distance_vectors: BTreeMap::new(),
        }
    }

    // -- Links --

    pub fn add_link(&mut self, link: LinkId) {
        self.links.push(link);
    }

    pub fn delete_link(&mut self, link: LinkId) {
        self.links.retain(|&l| l != link);
    }

    /// The link from this node toward the named peer, if directly attached.
    pub fn link_to(&self, hostname: &str, links: &[Link]) -> Option<LinkId> {
        self.links
            .iter()
            .copied()
            .find(|&l| links[l.index()].endpoint_hostname == hostname)
    }

    /// This node's interface address on the link toward the named peer, or 0
    /// when the peer is not directly attached.
    pub fn get_address(&self, hostname: &str, links: &[Link]) -> u32 {
        self.link_to(hostname, links)
            .map(|l| links[l.index()].address)
            .unwrap_or(0)
    }

    /// Whether `address` names one of this node's own interfaces.
    pub fn is_local_address(&self, address: u32, links: &[Link]) -> bool {
        self.links
            .iter()
            .any(|&l| links[l.index()].address == address)
    }

    // -- Forwarding table --

    pub fn add_forwarding_entry(&mut self, address: u32, link: LinkId) {
        self.forwarding_table.insert(address, link);
    }

    pub fn delete_forwarding_entry(&mut self, address: u32) {
        self.forwarding_table.remove(&address);
    }

    // -- Distance vectors --

    /// Rebuild local routing state from the currently running links: direct
    /// forwarding entries, own per-link addresses at cost 1, fresh timestamp.
    pub fn init_routing(&mut self, links: &[Link], now: f64) {
        self.forwarding_table.clear();
        self.distance_vectors.clear();
        let mut vector = BTreeMap::new();
        for &l in &self.links {
            let link = &links[l.index()];
            if link.running {
                vector.insert(link.address, 1);
                self.forwarding_table.insert(link.address, l);
            }
        }
        self.distance_vectors.insert(
            self.hostname.clone(),
            DistanceVectorEntry {
                timestamp: now,
                vector,
            },
        );
    }

    /// This node's own distance vector, if routing has been initialized.
    pub fn distance_vector(&self) -> Option<&BTreeMap<u32, u32>> {
        self.distance_vector_of(&self.hostname)
    }

    pub fn distance_vector_of(&self, hostname: &str) -> Option<&BTreeMap<u32, u32>> {
        self.distance_vectors.get(hostname).map(|e| &e.vector)
    }

    pub fn distance_vector_time(&self, hostname: &str) -> Option<f64> {
        self.distance_vectors.get(hostname).map(|e| e.timestamp)
    }

    fn vector_changed(&self, hostname: &str, new_vector: &BTreeMap<u32, u32>) -> bool {
        match self.distance_vectors.get(hostname) {
            Some(entry) => entry.vector != *new_vector,
            None => true,
        }
    }

    /// Store a neighbor's advertised vector. Returns whether it differed from
    /// the previous one; a change triggers a forwarding-table rebuild.
    pub fn update_distance_vector(
        &mut self,
        hostname: &str,
        vector: BTreeMap<u32, u32>,
        links: &[Link],
        now: f64,
    ) -> bool {
        let changed = self.vector_changed(hostname, &vector);
        self.distance_vectors.insert(
            hostname.to_string(),
            DistanceVectorEntry {
                timestamp: now,
                vector,
            },
        );
        if changed {
            self.build_forwarding_table(links, now);
        }
        changed
    }

    /// Recompute this node's own vector and forwarding table: start from the
    /// direct entries over running links, then fold every stored neighbor
    /// vector, adopting `cost + 1` for any non-local address that is new or
    /// better and pointing its forwarding entry at the link toward the
    /// advertising neighbor.
    ///
    /// Rebuilding from scratch (rather than only ever improving the previous
    /// vector) lets costs rise again after a failure, so routes through dead
    /// links actually disappear.
    pub fn build_forwarding_table(&mut self, links: &[Link], now: f64) {
        let mut mine = BTreeMap::new();
        self.forwarding_table.clear();
        for &l in &self.links {
            let link = &links[l.index()];
            if link.running {
                mine.insert(link.address, 1);
                self.forwarding_table.insert(link.address, l);
            }
        }

        let hosts: Vec<String> = self
            .distance_vectors
            .keys()
            .filter(|h| **h != self.hostname)
            .cloned()
            .collect();
        for host in hosts {
            let Some(via) = self.link_to(&host, links) else {
                continue;
            };
            let vector = self.distance_vectors[&host].vector.clone();
            for (address, cost) in vector {
                if self.is_local_address(address, links) {
                    continue;
                }
                let improved = match mine.get(&address) {
                    Some(&current) => cost + 1 < current,
                    None => true,
                };
                if improved {
                    debug!(
                        node = %self.hostname,
                        address,
                        cost = cost + 1,
                        via = %host,
                        "adopting route"
                    );
                    mine.insert(address, cost + 1);
                    self.add_forwarding_entry(address, via);
                }
            }
        }
        self.distance_vectors.insert(
            self.hostname.clone(),
            DistanceVectorEntry {
                timestamp: now,
                vector: mine,
            },
        );
    }

    /// Evict a dead neighbor and recompute routes from what remains.
    pub fn remove_distance_vector(&mut self, hostname: &str, links: &[Link], now: f64) -> bool {
        if self.distance_vectors.remove(hostname).is_none() {
            return false;
        }
        self.build_forwarding_table(links, now);
        true
    }
}

use netlab_abstract::config::RoutingConfig;
use netlab_abstract::packet::{Advertisement, Packet, PacketBody, protocol};
use netlab_sim::engine::{Protocol, ProtocolContext, Simulator};
use tracing::{debug, info};

/// Distance-vector routing agent, registered on a node under the `broadcast`
/// tag.
///
/// Every received advertisement is folded into the node's stored vectors;
/// neighbors that have been silent longer than the dead interval are evicted;
/// and the node's own vector is rebroadcast one hop, sooner when something
/// changed so the network reconverges quickly.
pub struct DistanceVectorApp {
    config: RoutingConfig,
}

impl DistanceVectorApp {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }
}

impl Protocol for DistanceVectorApp {
    fn receive_packet(&mut self, ctx: &mut ProtocolContext<'_>, packet: Packet) {
        let PacketBody::Advertisement(advertisement) = packet.body else {
            debug!(node = %ctx.node.hostname, "non-advertisement broadcast, dropping");
            return;
        };
        let now = ctx.now;
        let mut changed =
            ctx.node
                .update_distance_vector(&advertisement.hostname, advertisement.vector, ctx.links, now);

        // Evict neighbors we have not heard from within the dead interval.
        let dead: Vec<String> = ctx
            .node
            .distance_vectors
            .iter()
            .filter(|(host, entry)| {
                **host != ctx.node.hostname && now - entry.timestamp > self.config.dead_interval
            })
            .map(|(host, _)| host.clone())
            .collect();
        for host in dead {
            info!(node = %ctx.node.hostname, neighbor = %host, "evicting dead neighbor");
            changed = true;
            ctx.node.remove_distance_vector(&host, ctx.links, now);
        }

        if changed {
            debug!(
                node = %ctx.node.hostname,
                vector = ?ctx.node.distance_vector(),
                "distance vector changed"
            );
        }
        let delay = if changed {
            self.config.changed_period
        } else {
            self.config.steady_period
        };
        let advertisement = Advertisement {
            hostname: ctx.node.hostname.clone(),
            vector: ctx.node.distance_vector().cloned().unwrap_or_default(),
        };
        ctx.send_packet_after(
            delay,
            Packet::broadcast(0, protocol::BROADCAST, PacketBody::Advertisement(advertisement)),
        );
    }
}

/// Wire distance-vector routing onto every node: install an agent, initialize
/// local routing state, and schedule each node's first advertisement at time
/// zero.
pub fn enable_routing(sim: &mut Simulator, config: &RoutingConfig) {
    let nodes: Vec<_> = sim.network().node_ids().collect();
    for node_id in nodes {
        sim.add_protocol(
            node_id,
            protocol::BROADCAST,
            Box::new(DistanceVectorApp::new(config.clone())),
        );
        let now = sim.current_time();
        let (node, links) = sim.network_mut().node_and_links_mut(node_id);
        node.init_routing(links, now);
        let advertisement = Advertisement {
            hostname: node.hostname.clone(),
            vector: node.distance_vector().cloned().unwrap_or_default(),
        };
        sim.send_at(
            0.0,
            node_id,
            Packet::broadcast(0, protocol::BROADCAST, PacketBody::Advertisement(advertisement)),
        );
    }
}

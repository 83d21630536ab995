use netlab_abstract::packet::Packet;
use netlab_sim::engine::{Protocol, ProtocolContext};
use tracing::info;

/// Terminal handler for experiment traffic (`delay`, `forward`, `transmit`):
/// logs each arriving packet and records its one-way latency as a metric.
pub struct LatencyMonitor;

impl Protocol for LatencyMonitor {
    fn receive_packet(&mut self, ctx: &mut ProtocolContext<'_>, packet: Packet) {
        let created = packet.created.unwrap_or(ctx.now);
        let latency = ctx.now - created;
        info!(
            node = %ctx.node.hostname,
            ident = packet.ident,
            created,
            latency,
            "packet received"
        );
        ctx.record_metric("latency", latency);
    }
}

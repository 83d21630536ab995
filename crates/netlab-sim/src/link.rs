use crate::engine::SimEvent;
use crate::network::{LinkId, NodeId};
use crate::scheduler::Scheduler;
use crate::trace::{DropReason, TraceSink};
use netlab_abstract::packet::Packet;
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use tracing::debug;

/// A one-way channel with bandwidth, propagation delay, a bounded FIFO queue,
/// optional random loss, and an up/down switch.
///
/// While a packet is serializing, later packets wait in the queue; a
/// `TransmitEnd` event frees the transmitter for the next one. Arrivals are
/// scheduled at serialization end plus propagation delay, so delivery order
/// on a link always equals send order.
#[derive(Debug)]
pub struct Link {
    pub source: NodeId,
    pub endpoint: NodeId,
    pub source_hostname: String,
    pub endpoint_hostname: String,
    /// Interface address of the source node on this link.
    pub address: u32,
    /// Bits per second.
    pub bandwidth: f64,
    /// Seconds.
    pub propagation: f64,
    queue: VecDeque<Packet>,
    queue_bytes: u64,
    pub max_queue_bytes: u64,
    pub loss_rate: f64,
    pub running: bool,
    transmitting: bool,
}

impl Link {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        source: NodeId,
        endpoint: NodeId,
        source_hostname: String,
        endpoint_hostname: String,
        address: u32,
        bandwidth: f64,
        propagation: f64,
        max_queue_bytes: u64,
        loss_rate: f64,
    ) -> Self {
        Self {
            source,
            endpoint,
            source_hostname,
            endpoint_hostname,
            address,
            bandwidth,
            propagation,
            queue: VecDeque::new(),
            queue_bytes: 0,
            max_queue_bytes,
            loss_rate,
            running: true,
            transmitting: false,
        }
    }

    pub fn down(&mut self) {
        self.running = false;
    }

    pub fn up(&mut self) {
        self.running = true;
    }

    pub fn queue_bytes(&self) -> u64 {
        self.queue_bytes
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn location(&self) -> String {
        format!("{} -> {}", self.source_hostname, self.endpoint_hostname)
    }

    /// Accept a packet for transmission. Drops are absorbed here; recovery is
    /// the sender's job.
    pub(crate) fn send_packet(
        &mut self,
        id: LinkId,
        packet: Packet,
        scheduler: &mut Scheduler<SimEvent>,
        rng: &mut StdRng,
        sink: &mut TraceSink,
    ) {
        if !self.running {
            debug!(link = %self.location(), "link down, dropping packet");
            sink.drop_event(scheduler.current_time(), self.location(), DropReason::LinkDown);
            return;
        }
        if self.loss_rate > 0.0 && rng.random::<f64>() < self.loss_rate {
            debug!(link = %self.location(), ident = packet.ident, "randomly dropping packet");
            sink.drop_event(scheduler.current_time(), self.location(), DropReason::Loss);
            return;
        }
        if self.queue_bytes + u64::from(packet.length) > self.max_queue_bytes {
            debug!(link = %self.location(), ident = packet.ident, "queue full, dropping packet");
            sink.drop_event(
                scheduler.current_time(),
                self.location(),
                DropReason::QueueOverflow,
            );
            return;
        }
        if self.transmitting {
            self.queue_bytes += u64::from(packet.length);
            self.queue.push_back(packet);
        } else {
            self.start_transmission(id, packet, scheduler);
        }
    }

    /// The transmitter went idle; start on the next queued packet if any.
    pub(crate) fn transmit_end(&mut self, id: LinkId, scheduler: &mut Scheduler<SimEvent>) {
        self.transmitting = false;
        if let Some(packet) = self.queue.pop_front() {
            self.queue_bytes -= u64::from(packet.length);
            self.start_transmission(id, packet, scheduler);
        }
    }

    fn start_transmission(
        &mut self,
        id: LinkId,
        packet: Packet,
        scheduler: &mut Scheduler<SimEvent>,
    ) {
        self.transmitting = true;
        // A zero-length packet (pure ACK) costs no serialization time.
        let transmission = f64::from(packet.length) * 8.0 / self.bandwidth;
        scheduler.add(transmission, SimEvent::TransmitEnd { link: id });
        scheduler.add(transmission + self.propagation, SimEvent::Arrival { link: id, packet });
    }
}

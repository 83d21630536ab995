use crate::buffer::{ReceiveBuffer, SendBuffer};
use netlab_abstract::config::{
    DUP_ACK_THRESHOLD, INITIAL_RTO, INITIAL_SSTHRESH, MIN_RTO, RTT_ALPHA, RTT_BETA, TcpConfig,
};
use netlab_abstract::packet::{Packet, PacketBody, Segment};
use netlab_sim::engine::{Protocol, ProtocolContext};
use netlab_sim::scheduler::EventToken;
use tracing::debug;

/// One endpoint of a reliable byte-stream connection.
///
/// Registered on a node under the `tcp` tag. Both peers are permanently
/// established once wired: there is no handshake and no teardown, only
/// segmentation, cumulative ACKs, RTO estimation, optional fast retransmit,
/// and slow-start / congestion-avoidance window growth.
pub struct Tcp {
    source_address: u32,
    source_port: u16,
    destination_address: u32,
    destination_port: u16,

    // -- Sender --
    /// Congestion window: bytes that may be outstanding at one time.
    window: u64,
    mss: u64,
    send_buffer: SendBuffer,
    /// Largest sequence number acknowledged so far.
    sequence: u64,
    /// Sequence numbers to drop exactly once, for reproducible loss tests.
    drops: Vec<u64>,
    dropped: Vec<u64>,
    timer: Option<EventToken>,
    /// Delay used when arming the retransmission timer outside a timeout.
    timeout: f64,
    rto: f64,
    srtt: f64,
    rttvar: f64,
    fast_enabled: bool,
    last_ack: u64,
    dup_ack_count: u32,
    fast_retransmitted: bool,
    /// Slow-start threshold.
    threshold: u64,
    /// Fractional window growth accumulated during congestion avoidance.
    increment: f64,

    // -- Receiver --
    receive_buffer: ReceiveBuffer,
    /// Next in-order byte expected; sent as the cumulative ACK number.
    ack: u64,
}

impl Tcp {
    pub fn new(
        source_address: u32,
        source_port: u16,
        destination_address: u32,
        destination_port: u16,
        config: TcpConfig,
    ) -> Self {
        Self {
            source_address,
            source_port,
            destination_address,
            destination_port,
            window: config.window,
            mss: config.mss,
            send_buffer: SendBuffer::new(),
            sequence: 0,
            drops: config.drops,
            dropped: Vec::new(),
            timer: None,
            timeout: INITIAL_RTO,
            rto: INITIAL_RTO,
            srtt: 0.0,
            rttvar: 0.0,
            fast_enabled: config.fast_retransmit,
            last_ack: 0,
            dup_ack_count: 0,
            fast_retransmitted: false,
            threshold: INITIAL_SSTHRESH,
            increment: 0.0,
            receive_buffer: ReceiveBuffer::new(),
            ack: 0,
        }
    }

    // -- Sender --

    /// Buffer application bytes and emit as many segments as the window
    /// allows.
    pub fn send(&mut self, ctx: &mut ProtocolContext<'_>, data: &[u8]) {
        self.send_buffer.put(data);
        while self.send_buffer.available() > 0 && self.send_buffer.outstanding() < self.window {
            let (data, sequence) = self.send_buffer.get(self.mss);
            self.send_segment(ctx, data, sequence);
            if self.timer.is_none() {
                self.timer = Some(ctx.start_timer(self.timeout));
            }
        }
    }

    fn send_segment(&mut self, ctx: &mut ProtocolContext<'_>, data: Vec<u8>, sequence: u64) {
        if self.drops.contains(&sequence) && !self.dropped.contains(&sequence) {
            self.dropped.push(sequence);
            ctx.record_metric("sequence.drop", sequence as f64);
            debug!(node = %ctx.node.hostname, sequence, "dropping segment for test");
            return;
        }
        ctx.record_metric("sequence.send", sequence as f64);
        debug!(
            node = %ctx.node.hostname,
            to = self.destination_address,
            sequence,
            bytes = data.len(),
            "sending segment"
        );
        let segment = Segment {
            source_port: self.source_port,
            destination_port: self.destination_port,
            sequence,
            ack_number: self.ack,
            data,
        };
        ctx.send_packet(Packet::segment(
            self.source_address,
            self.destination_address,
            segment,
        ));
        if self.timer.is_none() {
            self.timer = Some(ctx.start_timer(self.timeout));
        }
    }

    fn handle_ack(&mut self, ctx: &mut ProtocolContext<'_>, segment: &Segment, created: Option<f64>) {
        debug!(
            node = %ctx.node.hostname,
            ack = segment.ack_number,
            "received ACK"
        );
        ctx.record_metric("sequence.ack", segment.ack_number as f64);

        if self.fast_enabled {
            if segment.ack_number == self.last_ack {
                self.dup_ack_count += 1;
                if self.dup_ack_count == DUP_ACK_THRESHOLD && !self.fast_retransmitted {
                    self.fast_retransmit(ctx, segment.ack_number);
                    return;
                }
            } else {
                self.dup_ack_count = 0;
                self.last_ack = segment.ack_number;
                self.fast_retransmitted = false;
            }
        }

        let acked = segment.ack_number.saturating_sub(self.sequence);
        if self.window >= self.threshold {
            self.additive_increase(ctx, acked);
        } else {
            self.slow_start(ctx, acked);
        }

        self.sequence = segment.ack_number;
        self.send_buffer.slide(segment.ack_number);
        while self.send_buffer.available() > 0 && self.send_buffer.outstanding() < self.window {
            let (data, sequence) = self.send_buffer.get(self.mss);
            self.send_segment(ctx, data, sequence);
        }

        // Jacobson/Karn: sample from the ACK's creation time.
        if let Some(created) = created {
            let r = ctx.now - created;
            if self.srtt == 0.0 {
                self.srtt = r;
                self.rttvar = r / 2.0;
            } else {
                self.rttvar = (1.0 - RTT_BETA) * self.rttvar + RTT_BETA * (self.srtt - r).abs();
                self.srtt = (1.0 - RTT_ALPHA) * self.srtt + RTT_ALPHA * r;
            }
            self.rto = (self.srtt + 4.0 * self.rttvar).max(MIN_RTO);
        }

        self.cancel_timer(ctx);
        if self.send_buffer.outstanding() > 0 {
            self.timer = Some(ctx.start_timer(self.timeout));
        }
    }

    fn fast_retransmit(&mut self, ctx: &mut ProtocolContext<'_>, ack_number: u64) {
        debug!(node = %ctx.node.hostname, ack_number, "fast retransmit");
        self.cancel_timer(ctx);
        self.collapse_window(ctx);
        let (data, sequence) = self.send_buffer.resend(self.window, true);
        if data.is_empty() {
            return;
        }
        self.timer = Some(ctx.start_timer(self.timeout));
        self.send_segment(ctx, data, sequence);
        self.fast_retransmitted = true;
    }

    fn retransmit(&mut self, ctx: &mut ProtocolContext<'_>) {
        debug!(node = %ctx.node.hostname, "retransmission timer fired");
        self.collapse_window(ctx);
        let (data, sequence) = self.send_buffer.resend(self.window, true);
        if data.is_empty() {
            // Misfire with nothing outstanding: disarm and wait for new data.
            self.cancel_timer(ctx);
            return;
        }
        self.timer = Some(ctx.start_timer(self.rto));
        self.send_segment(ctx, data, sequence);
    }

    /// Multiplicative decrease shared by RTO and fast retransmit: the
    /// threshold falls to half the window floored to a multiple of the MSS,
    /// and the window restarts at one MSS.
    fn collapse_window(&mut self, ctx: &mut ProtocolContext<'_>) {
        let threshold = (self.window / 2).max(self.mss);
        self.threshold = threshold - threshold % self.mss;
        self.window = self.mss;
        self.increment = 0.0;
        ctx.record_metric("cwnd", self.window as f64);
        ctx.record_metric("threshold", self.threshold as f64);
    }

    fn slow_start(&mut self, ctx: &mut ProtocolContext<'_>, bytes: u64) {
        self.window += bytes.min(self.mss);
        ctx.record_metric("cwnd", self.window as f64);
        debug!(node = %ctx.node.hostname, window = self.window, "slow start");
    }

    fn additive_increase(&mut self, ctx: &mut ProtocolContext<'_>, bytes: u64) {
        self.increment += (bytes * self.mss) as f64 / self.window as f64;
        while self.increment >= self.mss as f64 {
            self.window += self.mss;
            self.increment -= self.mss as f64;
            ctx.record_metric("cwnd", self.window as f64);
            debug!(node = %ctx.node.hostname, window = self.window, "additive increase");
        }
    }

    fn cancel_timer(&mut self, ctx: &mut ProtocolContext<'_>) {
        if let Some(token) = self.timer.take() {
            ctx.cancel_timer(token);
        }
    }

    // -- Receiver --

    fn handle_data(&mut self, ctx: &mut ProtocolContext<'_>, segment: Segment) {
        debug!(
            node = %ctx.node.hostname,
            sequence = segment.sequence,
            bytes = segment.data.len(),
            "received segment"
        );
        self.receive_buffer.put(&segment.data, segment.sequence);
        let (data, start) = self.receive_buffer.get();
        ctx.deliver_data(&data);
        self.ack = start + data.len() as u64;
        self.send_ack(ctx);
    }

    fn send_ack(&mut self, ctx: &mut ProtocolContext<'_>) {
        debug!(
            node = %ctx.node.hostname,
            to = self.destination_address,
            ack = self.ack,
            "sending ACK"
        );
        let segment = Segment {
            source_port: self.source_port,
            destination_port: self.destination_port,
            sequence: self.sequence,
            ack_number: self.ack,
            data: Vec::new(),
        };
        ctx.send_packet(Packet::segment(
            self.source_address,
            self.destination_address,
            segment,
        ));
    }
}

impl Protocol for Tcp {
    fn receive_packet(&mut self, ctx: &mut ProtocolContext<'_>, packet: Packet) {
        let created = packet.created;
        let length = packet.length;
        let PacketBody::Segment(segment) = packet.body else {
            debug!(node = %ctx.node.hostname, "non-segment packet on transport tag, dropping");
            return;
        };
        if segment.ack_number > 0 {
            self.handle_ack(ctx, &segment, created);
        }
        if length > 0 {
            self.handle_data(ctx, segment);
        }
    }

    fn on_timer(&mut self, ctx: &mut ProtocolContext<'_>) {
        self.timer = None;
        self.retransmit(ctx);
    }

    fn on_app_data(&mut self, ctx: &mut ProtocolContext<'_>, data: &[u8]) {
        self.send(ctx, data);
    }
}

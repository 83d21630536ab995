use netlab_abstract::config::TcpConfig;
use netlab_abstract::packet::protocol;
use netlab_protocols::Tcp;
use netlab_sim::{Network, NodeId, Simulator};

const ONE_HOP: &str = "link n1 n2 1 2 1000000 0.01\n";

/// One-hop network with a reliable connection in each direction, sender on
/// n1.
fn wire(sender: TcpConfig, receiver: TcpConfig, loss: f64, seed: u64) -> (Simulator, NodeId) {
    let mut net = Network::parse(ONE_HOP).expect("topology parses");
    net.set_loss(loss);
    let n1 = net.node_id("n1").expect("n1");
    let n2 = net.node_id("n2").expect("n2");
    let to_n2 = net.link_between("n1", "n2").expect("link");
    let to_n1 = net.link_between("n2", "n1").expect("link");
    let n1_addr = net.address_of("n1", "n2").expect("address");
    let n2_addr = net.address_of("n2", "n1").expect("address");
    net.node_mut(n1).add_forwarding_entry(n2_addr, to_n2);
    net.node_mut(n2).add_forwarding_entry(n1_addr, to_n1);

    let mut sim = Simulator::new(net, seed);
    sim.add_protocol(
        n1,
        protocol::TCP,
        Box::new(Tcp::new(n1_addr, 1, n2_addr, 1, sender)),
    );
    sim.add_protocol(
        n2,
        protocol::TCP,
        Box::new(Tcp::new(n2_addr, 1, n1_addr, 1, receiver)),
    );
    (sim, n1)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn lossless_transfer_delivers_in_order() {
    let (mut sim, n1) = wire(TcpConfig::default(), TcpConfig::default(), 0.0, 0);
    let data = payload(10_000);
    sim.app_send_at(0.0, n1, protocol::TCP, data.clone());
    sim.run();

    assert_eq!(sim.sink().delivered("n2", protocol::TCP), &data[..]);
    // The last cumulative ACK the sender saw names the end of the stream.
    let acks = sim.sink().metric_series("n1.sequence.ack").expect("acks");
    assert_eq!(acks.last().map(|&(_, v)| v), Some(10_000.0));
}

#[test]
fn incremental_app_writes_are_one_stream() {
    let (mut sim, n1) = wire(TcpConfig::default(), TcpConfig::default(), 0.0, 0);
    let data = payload(5_000);
    for (i, chunk) in data.chunks(1000).enumerate() {
        sim.app_send_at(i as f64 * 0.001, n1, protocol::TCP, chunk.to_vec());
    }
    sim.run();

    assert_eq!(sim.sink().delivered("n2", protocol::TCP), &data[..]);
}

#[test]
fn single_drop_recovers_via_retransmission_timeout() {
    let sender = TcpConfig {
        drops: vec![3000],
        ..TcpConfig::default()
    };
    let (mut sim, n1) = wire(sender, TcpConfig::default(), 0.0, 0);
    let data = payload(10_000);
    sim.app_send_at(0.0, n1, protocol::TCP, data.clone());
    sim.run();

    assert_eq!(sim.sink().delivered("n2", protocol::TCP), &data[..]);
    // The deterministic drop was taken exactly once...
    let drops = sim.sink().metric_series("n1.sequence.drop").expect("drop");
    assert_eq!(drops.len(), 1);
    assert_eq!(drops[0].1, 3000.0);
    // ...and recovery had to wait out the retransmission timer.
    assert!(sim.current_time() > 1.0);
    let acks = sim.sink().metric_series("n1.sequence.ack").expect("acks");
    assert_eq!(acks.last().map(|&(_, v)| v), Some(10_000.0));
}

#[test]
fn triple_duplicate_ack_triggers_fast_retransmit() {
    let sender = TcpConfig {
        fast_retransmit: true,
        drops: vec![3000],
        ..TcpConfig::default()
    };
    let receiver = TcpConfig {
        fast_retransmit: true,
        ..TcpConfig::default()
    };
    let (mut sim, n1) = wire(sender, receiver, 0.0, 0);
    let data = payload(10_000);
    sim.app_send_at(0.0, n1, protocol::TCP, data.clone());
    sim.run();

    assert_eq!(sim.sink().delivered("n2", protocol::TCP), &data[..]);
    // Recovery happened on duplicate ACKs, well before any 1 s timeout.
    assert!(sim.current_time() < 1.0, "took {} s", sim.current_time());

    // The congestion window grew past the loss point, then collapsed to one
    // MSS with the threshold at half the window floored to an MSS multiple.
    let cwnd = sim.sink().metric_series("n1.cwnd").expect("cwnd");
    let peak = cwnd.iter().map(|&(_, v)| v).fold(0.0, f64::max);
    assert!(peak >= 3000.0);
    let collapse = cwnd.iter().position(|&(_, v)| v == 1000.0).expect("collapse");
    assert!(cwnd[..collapse].iter().any(|&(_, v)| v >= 3000.0));
    let threshold = sim.sink().metric_series("n1.threshold").expect("threshold");
    let t = threshold.last().map(|&(_, v)| v).expect("sample");
    assert_eq!(t % 1000.0, 0.0);
    assert!(t >= 1000.0);
}

#[test]
fn transfer_survives_random_loss() {
    let (mut sim, n1) = wire(TcpConfig::default(), TcpConfig::default(), 0.2, 3);
    let data = payload(20_000);
    sim.app_send_at(0.0, n1, protocol::TCP, data.clone());
    sim.run();

    // Lossy links delay but never corrupt the stream: every byte arrives
    // exactly once and in order.
    assert_eq!(sim.sink().delivered("n2", protocol::TCP), &data[..]);
}

#[test]
fn lossy_runs_are_reproducible() {
    let run = |seed: u64| {
        let (mut sim, n1) = wire(TcpConfig::default(), TcpConfig::default(), 0.2, seed);
        sim.app_send_at(0.0, n1, protocol::TCP, payload(20_000));
        sim.run();
        (
            sim.current_time(),
            sim.sink().receptions().len(),
            sim.sink().drops().len(),
        )
    };
    assert_eq!(run(11), run(11));
}

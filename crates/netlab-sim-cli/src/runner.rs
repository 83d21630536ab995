use anyhow::{Context, Result, anyhow};
use netlab_abstract::packet::{Packet, protocol};
use netlab_abstract::scenario::{Scenario, ScenarioAction, ScenarioAssertion, Topology};
use netlab_protocols::{LatencyMonitor, Tcp, enable_routing};
use netlab_sim::{Network, NodeId, SimulationReport, Simulator};
use std::path::Path;
use tracing::info;

/// Build a simulator from a scenario, run it, check every assertion, and
/// return the trace report.
pub fn run_scenario(scenario: &Scenario, base_dir: &Path) -> Result<SimulationReport> {
    info!("Running scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("{}", scenario.description);
    }

    let mut network = load_topology(scenario, base_dir)?;
    if let Some(rate) = scenario.loss_rate {
        network.set_loss(rate);
    }
    let mut sim = Simulator::new(network, scenario.seed);

    wire_transports(&mut sim, scenario)?;
    for node in sim.network().node_ids().collect::<Vec<_>>() {
        for tag in [protocol::DELAY, protocol::FORWARD, protocol::TRANSMIT] {
            sim.add_protocol(node, tag, Box::new(LatencyMonitor));
        }
    }
    if let Some(routing) = &scenario.routing {
        enable_routing(&mut sim, &routing.routing_config());
    } else {
        populate_direct_routes(&mut sim);
    }
    schedule_actions(&mut sim, scenario)?;

    match scenario.run_until {
        Some(limit) => sim.run_until(limit),
        None => {
            if scenario.routing.is_some() {
                return Err(anyhow!(
                    "scenarios with routing enabled must set run_until; advertisements never stop"
                ));
            }
            sim.run();
        }
    }

    check_assertions(&sim, scenario)?;
    info!(
        duration = sim.current_time(),
        receptions = sim.sink().receptions().len(),
        drops = sim.sink().drops().len(),
        "scenario passed"
    );
    Ok(sim.export_report())
}

fn load_topology(scenario: &Scenario, base_dir: &Path) -> Result<Network> {
    let network = match &scenario.topology {
        Topology::Inline(text) => Network::parse(text)?,
        Topology::File { file } => {
            let path = base_dir.join(file);
            Network::from_file(&path)
                .with_context(|| format!("failed to load topology {}", path.display()))?
        }
    };
    Ok(network)
}

fn node_id(sim: &Simulator, hostname: &str) -> Result<NodeId> {
    sim.network()
        .node_id(hostname)
        .ok_or_else(|| anyhow!("unknown node `{hostname}` in scenario"))
}

fn wire_transports(sim: &mut Simulator, scenario: &Scenario) -> Result<()> {
    for spec in &scenario.transports {
        let sender = node_id(sim, &spec.sender)?;
        let receiver = node_id(sim, &spec.receiver)?;
        let sender_addr = sim
            .network()
            .address_of(&spec.sender, &spec.receiver)
            .ok_or_else(|| {
                anyhow!(
                    "transport endpoints {} and {} are not directly linked",
                    spec.sender,
                    spec.receiver
                )
            })?;
        let receiver_addr = sim
            .network()
            .address_of(&spec.receiver, &spec.sender)
            .ok_or_else(|| anyhow!("missing reverse link for transport"))?;

        let config = spec.tcp_config();
        let mut receiver_config = config.clone();
        receiver_config.drops.clear();
        sim.add_protocol(
            sender,
            protocol::TCP,
            Box::new(Tcp::new(
                sender_addr,
                spec.sender_port,
                receiver_addr,
                spec.receiver_port,
                config,
            )),
        );
        sim.add_protocol(
            receiver,
            protocol::TCP,
            Box::new(Tcp::new(
                receiver_addr,
                spec.receiver_port,
                sender_addr,
                spec.sender_port,
                receiver_config,
            )),
        );
    }
    Ok(())
}

/// Without routing, every directly-linked pair gets forwarding entries, which
/// is all the lab topologies need.
fn populate_direct_routes(sim: &mut Simulator) {
    let network = sim.network_mut();
    let mut routes = Vec::new();
    for node in network.node_ids() {
        for &l in &network.node(node).links {
            let link = network.link(l);
            // The peer's interface address sits on the reverse link; it is
            // reached by sending on this one.
            if let Some(reverse) =
                network.link_between(&link.endpoint_hostname, &link.source_hostname)
            {
                routes.push((node, network.link(reverse).address, l));
            }
        }
    }
    for (node, address, link) in routes {
        network.node_mut(node).add_forwarding_entry(address, link);
    }
}

fn resolve_destination(
    sim: &Simulator,
    from: &str,
    to: &str,
    via: Option<&str>,
) -> Result<u32> {
    let network = sim.network();
    let peer = match via {
        Some(via) => via.to_string(),
        None => from.to_string(),
    };
    if let Some(address) = network.address_of(to, &peer) {
        return Ok(address);
    }
    // Fall back to the destination's first interface.
    let id = network
        .node_id(to)
        .ok_or_else(|| anyhow!("unknown node `{to}` in scenario"))?;
    network
        .node(id)
        .links
        .first()
        .map(|&l| network.link(l).address)
        .ok_or_else(|| anyhow!("node `{to}` has no links"))
}

fn schedule_actions(sim: &mut Simulator, scenario: &Scenario) -> Result<()> {
    for action in &scenario.actions {
        match action {
            ScenarioAction::SendPacket {
                time,
                from,
                to,
                via,
                ident,
                protocol,
                length,
            } => {
                let node = node_id(sim, from)?;
                let destination = resolve_destination(sim, from, to, via.as_deref())?;
                sim.send_at(*time, node, Packet::new(destination, *ident, protocol, *length));
            }
            ScenarioAction::AppSend { time, node, data } => {
                let node = node_id(sim, node)?;
                sim.app_send_at(*time, node, protocol::TCP, data.clone().into_bytes());
            }
            ScenarioAction::LinkDown { time, from, to } => {
                let (forward, reverse) = link_pair(sim, from, to)?;
                sim.link_down_at(*time, forward);
                sim.link_down_at(*time, reverse);
            }
            ScenarioAction::LinkUp { time, from, to } => {
                let (forward, reverse) = link_pair(sim, from, to)?;
                sim.link_up_at(*time, forward);
                sim.link_up_at(*time, reverse);
            }
            ScenarioAction::Generator {
                start,
                node,
                to,
                via,
                load,
                duration,
                length,
            } => {
                let node_id = node_id(sim, node)?;
                let destination = resolve_destination(sim, node, to, via.as_deref())?;
                sim.add_generator(
                    netlab_sim::Generator::new(node_id, destination, *load, *duration, *length),
                    *start,
                );
            }
        }
    }
    Ok(())
}

fn link_pair(
    sim: &Simulator,
    from: &str,
    to: &str,
) -> Result<(netlab_sim::LinkId, netlab_sim::LinkId)> {
    let network = sim.network();
    let forward = network
        .link_between(from, to)
        .ok_or_else(|| anyhow!("no link between {from} and {to}"))?;
    let reverse = network
        .link_between(to, from)
        .ok_or_else(|| anyhow!("no link between {to} and {from}"))?;
    Ok((forward, reverse))
}

fn check_assertions(sim: &Simulator, scenario: &Scenario) -> Result<()> {
    for assertion in &scenario.assertions {
        match assertion {
            ScenarioAssertion::DataDelivered { node, data } => {
                let delivered = sim.sink().delivered(node, protocol::TCP);
                if delivered != data.as_bytes() {
                    return Err(anyhow!(
                        "assertion failed: {node} delivered {} bytes, expected {:?}",
                        delivered.len(),
                        data
                    ));
                }
            }
            ScenarioAssertion::DeliveredBytes { node, bytes } => {
                let delivered = sim.sink().delivered(node, protocol::TCP).len() as u64;
                if delivered != *bytes {
                    return Err(anyhow!(
                        "assertion failed: {node} delivered {delivered} bytes, expected {bytes}"
                    ));
                }
            }
            ScenarioAssertion::ReceptionCount { node, min, max } => {
                let count = sim
                    .sink()
                    .receptions()
                    .iter()
                    .filter(|r| r.node == *node)
                    .count() as u32;
                if count < *min {
                    return Err(anyhow!(
                        "assertion failed: {node} received {count} packets, expected at least {min}"
                    ));
                }
                if let Some(max) = max
                    && count > *max
                {
                    return Err(anyhow!(
                        "assertion failed: {node} received {count} packets, expected at most {max}"
                    ));
                }
            }
            ScenarioAssertion::ForwardingEntry { node, address, via } => {
                let id = node_id(sim, node)?;
                let expected = sim
                    .network()
                    .link_between(node, via)
                    .ok_or_else(|| anyhow!("no link between {node} and {via}"))?;
                match sim.network().node(id).forwarding_table.get(address) {
                    Some(link) if *link == expected => {}
                    other => {
                        return Err(anyhow!(
                            "assertion failed: {node} forwards {address} via {other:?}, expected the link toward {via}"
                        ));
                    }
                }
            }
            ScenarioAssertion::MaxDuration { seconds } => {
                if sim.current_time() > *seconds {
                    return Err(anyhow!(
                        "assertion failed: simulation ran to {} s, limit {} s",
                        sim.current_time(),
                        seconds
                    ));
                }
            }
        }
    }
    Ok(())
}

use crate::config::{RoutingConfig, TcpConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// A self-contained simulation scenario, loaded from TOML by the CLI.
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub topology: Topology,
    #[serde(default)]
    pub seed: u64,
    /// Stop the run once the clock passes this time. Required when routing is
    /// enabled, since periodic advertisements keep the event queue non-empty.
    pub run_until: Option<f64>,
    /// Override the loss rate of every link in the topology.
    pub loss_rate: Option<f64>,
    #[serde(default)]
    pub transports: Vec<TransportSpec>,
    pub routing: Option<RoutingSpec>,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
    #[serde(default)]
    pub assertions: Vec<ScenarioAssertion>,
}

/// Either an inline topology descriptor or a path to one, relative to the
/// scenario file.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum Topology {
    Inline(String),
    File { file: PathBuf },
}

/// One reliable connection between two hosts. The pair must be directly
/// linked; interface addresses are resolved from the topology.
#[derive(Deserialize, Debug, Clone)]
pub struct TransportSpec {
    pub sender: String,
    pub receiver: String,
    #[serde(default = "default_port")]
    pub sender_port: u16,
    #[serde(default = "default_port")]
    pub receiver_port: u16,
    pub window: Option<u64>,
    pub mss: Option<u64>,
    #[serde(default)]
    pub fast_retransmit: bool,
    /// Segment sequence numbers the sender drops exactly once.
    #[serde(default)]
    pub drops: Vec<u64>,
}

impl TransportSpec {
    pub fn tcp_config(&self) -> TcpConfig {
        let defaults = TcpConfig::default();
        TcpConfig {
            window: self.window.unwrap_or(defaults.window),
            mss: self.mss.unwrap_or(defaults.mss),
            fast_retransmit: self.fast_retransmit,
            drops: self.drops.clone(),
        }
    }
}

/// Enables distance-vector routing on every node.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RoutingSpec {
    pub dead_interval: Option<f64>,
    pub steady_period: Option<f64>,
    pub changed_period: Option<f64>,
}

impl RoutingSpec {
    pub fn routing_config(&self) -> RoutingConfig {
        let defaults = RoutingConfig::default();
        RoutingConfig {
            dead_interval: self.dead_interval.unwrap_or(defaults.dead_interval),
            steady_period: self.steady_period.unwrap_or(defaults.steady_period),
            changed_period: self.changed_period.unwrap_or(defaults.changed_period),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Inject a bare packet into a node's send path.
    SendPacket {
        time: f64,
        from: String,
        to: String,
        /// Peer whose interface address on `to` is the destination; defaults
        /// to `from` when the two are directly linked.
        via: Option<String>,
        #[serde(default)]
        ident: u32,
        #[serde(default = "default_protocol")]
        protocol: String,
        #[serde(default = "default_length")]
        length: u32,
    },
    /// Offer bytes to a node's transport connection.
    AppSend { time: f64, node: String, data: String },
    /// Take both directions of a link down.
    LinkDown { time: f64, from: String, to: String },
    /// Bring both directions of a link back up.
    LinkUp { time: f64, from: String, to: String },
    /// Start a Poisson packet generator on a node.
    Generator {
        start: f64,
        node: String,
        to: String,
        via: Option<String>,
        /// Mean packets per second.
        load: f64,
        duration: f64,
        #[serde(default = "default_length")]
        length: u32,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAssertion {
    /// Assert the exact byte stream a node's connection delivered upward.
    DataDelivered { node: String, data: String },
    /// Assert how many bytes a node's connection delivered upward.
    DeliveredBytes { node: String, bytes: u64 },
    /// Assert how many packets a node received for local delivery.
    ReceptionCount {
        node: String,
        min: u32,
        max: Option<u32>,
    },
    /// Assert that a node forwards the given address toward the given peer.
    ForwardingEntry {
        node: String,
        address: u32,
        via: String,
    },
    /// Assert that the simulation clock never passes this time.
    MaxDuration { seconds: f64 },
}

fn default_port() -> u16 {
    1
}

fn default_protocol() -> String {
    crate::packet::protocol::DELAY.to_string()
}

fn default_length() -> u32 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_scenario() {
        let text = r#"
            name = "one-hop transfer"
            description = "reliable transfer over a single link"
            topology = "link n1 n2 1 2 1000000 0.01"
            seed = 7
            run_until = 60.0

            [[transports]]
            sender = "n1"
            receiver = "n2"
            window = 3000
            fast_retransmit = true
            drops = [3000]

            [[actions]]
            type = "app_send"
            time = 0.0
            node = "n1"
            data = "hello world"

            [[assertions]]
            type = "data_delivered"
            node = "n2"
            data = "hello world"
        "#;
        let scenario: Scenario = toml::from_str(text).expect("scenario should parse");
        assert_eq!(scenario.transports.len(), 1);
        assert_eq!(scenario.transports[0].tcp_config().window, 3000);
        assert!(scenario.transports[0].tcp_config().fast_retransmit);
        assert!(matches!(scenario.topology, Topology::Inline(_)));
        assert_eq!(scenario.actions.len(), 1);
    }

    #[test]
    fn topology_file_reference_parses() {
        let text = r#"
            name = "ring"
            topology = { file = "ring.txt" }
            [[assertions]]
            type = "max_duration"
            seconds = 30.0
        "#;
        let scenario: Scenario = toml::from_str(text).expect("scenario should parse");
        assert!(matches!(scenario.topology, Topology::File { .. }));
    }
}

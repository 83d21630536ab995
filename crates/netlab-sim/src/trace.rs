use serde::Serialize;
use std::collections::BTreeMap;

/// A packet accepted for local delivery at a node.
#[derive(Debug, Clone, Serialize)]
pub struct Reception {
    pub time: f64,
    pub node: String,
    pub protocol: String,
    pub ident: u32,
    pub created: f64,
    pub latency: f64,
}

/// Why a packet left the simulation early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    LinkDown,
    Loss,
    QueueOverflow,
    TtlExpired,
    NoRoute,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropEvent {
    pub time: f64,
    pub location: String,
    pub reason: DropReason,
}

/// Collects everything observable about a run: reception logs, drop events,
/// application byte streams, and named time-series metrics.
#[derive(Debug, Default)]
pub struct TraceSink {
    receptions: Vec<Reception>,
    drops: Vec<DropEvent>,
    delivered: BTreeMap<(String, String), Vec<u8>>,
    metrics: BTreeMap<String, Vec<(f64, f64)>>,
}

impl TraceSink {
    pub fn reception(&mut self, reception: Reception) {
        self.receptions.push(reception);
    }

    pub fn drop_event(&mut self, time: f64, location: String, reason: DropReason) {
        self.drops.push(DropEvent {
            time,
            location,
            reason,
        });
    }

    pub fn deliver(&mut self, node: &str, protocol: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.delivered
            .entry((node.to_string(), protocol.to_string()))
            .or_default()
            .extend_from_slice(data);
    }

    pub fn metric(&mut self, name: &str, time: f64, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push((time, value));
    }

    pub fn receptions(&self) -> &[Reception] {
        &self.receptions
    }

    pub fn drops(&self) -> &[DropEvent] {
        &self.drops
    }

    /// Bytes a protocol handler on `node` passed up to its application.
    pub fn delivered(&self, node: &str, protocol: &str) -> &[u8] {
        self.delivered
            .get(&(node.to_string(), protocol.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Samples recorded under a metric name, e.g. `"n1.cwnd"`.
    pub fn metric_series(&self, name: &str) -> Option<&[(f64, f64)]> {
        self.metrics.get(name).map(Vec::as_slice)
    }

    pub fn metrics(&self) -> &BTreeMap<String, Vec<(f64, f64)>> {
        &self.metrics
    }
}

/// A serializable snapshot of a finished simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub duration: f64,
    pub receptions: Vec<Reception>,
    pub drops: Vec<DropEvent>,
    /// Keyed by `"<hostname>/<protocol>"`.
    pub delivered: BTreeMap<String, Vec<u8>>,
    pub metrics: BTreeMap<String, Vec<(f64, f64)>>,
}

impl SimulationReport {
    pub fn from_sink(duration: f64, sink: &TraceSink) -> Self {
        Self {
            duration,
            receptions: sink.receptions.clone(),
            drops: sink.drops.clone(),
            delivered: sink
                .delivered
                .iter()
                .map(|((node, protocol), data)| (format!("{node}/{protocol}"), data.clone()))
                .collect(),
            metrics: sink.metrics.clone(),
        }
    }
}

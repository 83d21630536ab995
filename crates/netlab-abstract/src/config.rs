use serde::{Deserialize, Serialize};

/// Largest payload carried by a single transport segment, in bytes.
pub const DEFAULT_MSS: u64 = 1000;

/// Initial congestion window, in bytes.
pub const DEFAULT_WINDOW: u64 = 1000;

/// Retransmission timer value before any RTT sample exists, in seconds.
pub const INITIAL_RTO: f64 = 1.0;

/// Lower bound on the computed retransmission timeout, in seconds.
pub const MIN_RTO: f64 = 1.0;

/// Jacobson/Karn smoothing gains.
pub const RTT_ALPHA: f64 = 0.125;
pub const RTT_BETA: f64 = 0.25;

/// Number of duplicate ACKs that triggers a fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

/// Slow-start threshold before any loss event, in bytes.
pub const INITIAL_SSTHRESH: u64 = 100_000;

/// Routing advertisement period when the last update changed nothing.
pub const BROADCAST_PERIOD_STEADY: f64 = 2.0;

/// Routing advertisement period right after a change, to speed convergence.
pub const BROADCAST_PERIOD_CHANGED: f64 = 1.0;

/// Seconds of silence after which a neighbor's vector is evicted.
pub const NEIGHBOR_DEAD_INTERVAL: f64 = 6.0;

/// Link queue capacity when the topology descriptor leaves it out, in bytes.
pub const DEFAULT_QUEUE_BYTES: u64 = 1_000_000;

/// Per-connection transport parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Send window in bytes; bounds the outstanding unacked data.
    pub window: u64,
    /// Maximum segment size in bytes.
    pub mss: u64,
    /// Retransmit on the third duplicate ACK instead of waiting for the RTO.
    pub fast_retransmit: bool,
    /// Sequence numbers to drop exactly once, for reproducible loss tests.
    pub drops: Vec<u64>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            mss: DEFAULT_MSS,
            fast_retransmit: false,
            drops: Vec::new(),
        }
    }
}

/// Distance-vector routing parameters.
///
/// The dead interval is configurable because the reference deployments
/// disagreed on its value; the default favors quick reconvergence in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub dead_interval: f64,
    pub steady_period: f64,
    pub changed_period: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            dead_interval: NEIGHBOR_DEAD_INTERVAL,
            steady_period: BROADCAST_PERIOD_STEADY,
            changed_period: BROADCAST_PERIOD_CHANGED,
        }
    }
}

use crate::network::NodeId;
use rand_distr::Exp;

/// Poisson traffic source: emits fixed-size packets with exponentially
/// distributed inter-arrival times until `duration` elapses. Deterministic
/// under the simulator's seed.
#[derive(Debug, Clone)]
pub struct Generator {
    pub node: NodeId,
    pub destination: u32,
    /// Mean packets per second.
    pub load: f64,
    pub duration: f64,
    pub length: u32,
    pub(crate) inter_arrival: Exp<f64>,
    pub(crate) started: f64,
    pub(crate) ident: u32,
}

impl Generator {
    /// Panics when `load` is not positive; that is a construction-time
    /// programmer error.
    pub fn new(node: NodeId, destination: u32, load: f64, duration: f64, length: u32) -> Self {
        let inter_arrival = match Exp::new(load) {
            Ok(d) => d,
            Err(_) => panic!("generator load must be positive, got {load}"),
        };
        Self {
            node,
            destination,
            load,
            duration,
            length,
            inter_arrival,
            started: 0.0,
            ident: 0,
        }
    }
}

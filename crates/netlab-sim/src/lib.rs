pub mod engine;
pub mod generator;
pub mod link;
pub mod network;
pub mod node;
pub mod scheduler;
pub mod trace;

pub use engine::{Protocol, ProtocolContext, SimEvent, Simulator};
pub use generator::Generator;
pub use link::Link;
pub use network::{LinkId, Network, NetworkError, NodeId};
pub use node::Node;
pub use scheduler::{EventToken, Scheduler};
pub use trace::{DropReason, Reception, SimulationReport};

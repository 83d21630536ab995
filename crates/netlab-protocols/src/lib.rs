pub mod buffer;
pub mod monitor;
pub mod routing;
pub mod tcp;

pub use buffer::{ReceiveBuffer, SendBuffer};
pub use monitor::LatencyMonitor;
pub use routing::{DistanceVectorApp, enable_routing};
pub use tcp::Tcp;

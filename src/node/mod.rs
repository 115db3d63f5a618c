// Node module - THE PROTOCOL
// Listener, peer set, dispatch and the sync exchange

mod config;
mod engine;
mod error;
mod peers;
mod sync;

pub use config::NodeConfig;
pub use engine::{Node, NodeState, NodeStats, PeerSummary};
pub use error::NodeError;
pub use peers::{BroadcastReport, PeerSet};

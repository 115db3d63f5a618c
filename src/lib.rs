// txmesh - peer-to-peer transaction propagation
//
// A node keeps an append-only, deduplicated list of transaction records,
// pushes locally created records to its peers and reconciles divergent
// histories with a full-state sync exchange.

pub mod console;
pub mod identity;
pub mod ledger;
pub mod node;
pub mod storage;
pub mod transport;
pub mod wire;

pub use identity::WalletAddress;
pub use ledger::{FileStore, MemoryStore, MergeReport, StoreError, TransactionRecord, TransactionStore};
pub use node::{BroadcastReport, Node, NodeConfig, NodeError, NodeState, NodeStats};
pub use transport::{CloseReason, ConnectionId, ConnectionState, Direction, PeerConnection, TransportError};
pub use wire::{Message, MessageCodec, MessageKind, WireError};

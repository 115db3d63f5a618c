// Identity module - the node's wallet address
// Opaque per-node endpoint used as sender/recipient in transaction records

mod wallet;

pub use wallet::WalletAddress;

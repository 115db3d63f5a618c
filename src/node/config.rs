use crate::node::NodeError;
use crate::storage::FileStore;
use crate::wire::DEFAULT_MAX_FRAME_LENGTH;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to bind the listener to
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Directory holding the transaction file
    pub data_dir: PathBuf,
    /// Outbound connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// How long to wait for a sync response, in seconds
    pub sync_timeout_secs: u64,
    /// Per-message write timeout in seconds; a peer that stalls longer is dropped
    pub send_timeout_secs: u64,
    /// Largest frame accepted from or sent to a peer
    pub max_frame_length: usize,
    /// Re-broadcast transactions received from one peer to the others
    pub relay_transactions: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            data_dir: PathBuf::from("."),
            connect_timeout_secs: 10,
            sync_timeout_secs: 10,
            send_timeout_secs: 10,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            relay_transactions: false,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_sync_timeout(mut self, secs: u64) -> Self {
        self.sync_timeout_secs = secs;
        self
    }

    pub fn with_send_timeout(mut self, secs: u64) -> Self {
        self.send_timeout_secs = secs;
        self
    }

    pub fn with_max_frame_length(mut self, len: usize) -> Self {
        self.max_frame_length = len;
        self
    }

    pub fn with_relay_transactions(mut self, relay: bool) -> Self {
        self.relay_transactions = relay;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// The file store this node persists to, keyed by its port
    pub fn file_store(&self) -> FileStore {
        FileStore::for_port(&self.data_dir, self.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.host.is_empty() {
            return Err(NodeError::InvalidConfig("host cannot be empty".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(NodeError::InvalidConfig("connect_timeout_secs cannot be 0".to_string()));
        }
        if self.sync_timeout_secs == 0 {
            return Err(NodeError::InvalidConfig("sync_timeout_secs cannot be 0".to_string()));
        }
        if self.send_timeout_secs == 0 {
            return Err(NodeError::InvalidConfig("send_timeout_secs cannot be 0".to_string()));
        }
        if self.max_frame_length < 64 {
            return Err(NodeError::InvalidConfig("max_frame_length must be at least 64 bytes".to_string()));
        }
        Ok(())
    }
}

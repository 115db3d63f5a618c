// txnode - run a node with the interactive operator menu

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::error;
use tracing_subscriber::EnvFilter;
use txmesh::console::Console;
use txmesh::wire::DEFAULT_MAX_FRAME_LENGTH;
use txmesh::{Node, NodeConfig};

#[derive(Parser, Debug)]
#[command(name = "txnode", version, about = "Peer-to-peer transaction node")]
struct Args {
    /// Port to listen on
    port: u16,

    /// Address to bind the listener to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory holding transactions_<port>.json
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Give up dialing a peer after this many seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    /// Give up waiting for a sync response after this many seconds
    #[arg(long, default_value_t = 10)]
    sync_timeout_secs: u64,

    /// Drop a peer whose socket accepts no data for this many seconds
    #[arg(long, default_value_t = 10)]
    send_timeout_secs: u64,

    /// Largest frame accepted from a peer, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LENGTH)]
    max_frame_bytes: usize,

    /// Forward transactions received from one peer to all others
    #[arg(long)]
    relay_transactions: bool,
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        NodeConfig::new()
            .with_host(&args.host)
            .with_port(args.port)
            .with_data_dir(args.data_dir)
            .with_connect_timeout(args.connect_timeout_secs)
            .with_sync_timeout(args.sync_timeout_secs)
            .with_send_timeout(args.send_timeout_secs)
            .with_max_frame_length(args.max_frame_bytes)
            .with_relay_transactions(args.relay_transactions)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = NodeConfig::from(Args::parse());
    let store = Arc::new(config.file_store());
    let node = Node::new(config, store);

    let address = node.start().await?;
    println!("Node listening on {}", address);
    println!("Your wallet address is: {}", node.wallet_address());

    let mut console = Console::new(Arc::clone(&node), BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    if let Err(e) = console.run().await {
        error!(error = %e, "Console failed");
    }

    node.shutdown().await?;
    Ok(())
}

// Node Tests
// End-to-end tests for connect, sync, broadcast and failure isolation

use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::Framed;
use txmesh::{
    FileStore, MemoryStore, Message, MessageCodec, Node, NodeConfig, NodeError, NodeState,
    TransactionRecord, TransactionStore, TransportError,
};

// ============================================================================
// HELPERS
// ============================================================================

fn config() -> NodeConfig {
    NodeConfig::new()
        .with_host("127.0.0.1")
        .with_port(0)
        .with_connect_timeout(5)
        .with_sync_timeout(5)
}

fn record(recipient: &str, amount: f64) -> TransactionRecord {
    TransactionRecord::new("0xfeed", recipient, amount)
}

async fn start_with(records: Vec<TransactionRecord>) -> (Arc<Node>, u16) {
    let node = Node::new(config(), Arc::new(MemoryStore::with_records(records)));
    let addr = node.start().await.unwrap();
    (node, addr.port())
}

async fn start_empty() -> (Arc<Node>, u16) {
    start_with(vec![]).await
}

/// Poll `condition` until it holds or two seconds pass
async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Put a non-empty directory where the store file goes so every write fails
fn block_store_path(path: &Path) {
    std::fs::create_dir(path).unwrap();
    std::fs::write(path.join("occupant"), b"x").unwrap();
}

async fn framed_client(port: u16) -> Framed<TcpStream, MessageCodec> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    Framed::new(stream, MessageCodec::default())
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_start_binds_and_runs() {
    let (node, port) = start_empty().await;

    assert_eq!(node.state(), NodeState::Running);
    assert_eq!(node.local_addr().unwrap().port(), port);
}

#[tokio::test]
async fn test_start_twice_fails() {
    let (node, _) = start_empty().await;

    assert_eq!(node.start().await, Err(NodeError::AlreadyRunning));
}

#[tokio::test]
async fn test_bind_conflict_aborts_start() {
    let (_first, port) = start_empty().await;
    let second = Node::new(config().with_port(port), Arc::new(MemoryStore::new()));

    let result = second.start().await;

    assert!(matches!(result, Err(NodeError::Bind { .. })));
    assert_eq!(second.state(), NodeState::Stopped);
}

#[tokio::test]
async fn test_start_surfaces_corrupt_store() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("transactions.json");
    std::fs::write(&path, b"{ not a list").unwrap();

    let node = Node::new(config(), Arc::new(FileStore::new(&path)));
    let result = node.start().await;

    assert!(matches!(result, Err(NodeError::Store(_))));
}

#[tokio::test]
async fn test_shutdown_closes_peers() {
    let (a, _) = start_empty().await;
    let (b, b_port) = start_empty().await;

    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();
    assert!(eventually(|| b.peer_count() == 1).await);

    a.shutdown().await.unwrap();

    assert_eq!(a.state(), NodeState::ShutDown);
    assert_eq!(a.peer_count(), 0);
    assert!(eventually(|| b.peer_count() == 0).await);
    assert_eq!(
        a.connect_to_peer("127.0.0.1", b_port).await,
        Err(NodeError::NotRunning)
    );
}

#[tokio::test]
async fn test_shutdown_without_start_keeps_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("transactions_seeded.json");
    FileStore::new(&path).append(record("0x01", 1.0)).unwrap();

    let node = Node::new(config(), Arc::new(FileStore::new(&path)));
    node.shutdown().await.unwrap();

    let reloaded = FileStore::new(&path);
    assert_eq!(reloaded.restore().unwrap(), 1);
    assert_eq!(node.state(), NodeState::ShutDown);
    assert_eq!(node.start().await, Err(NodeError::NotRunning));
}

#[tokio::test]
async fn test_shutdown_after_failed_start_keeps_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("transactions_seeded.json");
    FileStore::new(&path).append(record("0x01", 1.0)).unwrap();
    let (_first, port) = start_empty().await;

    let node = Node::new(config().with_port(port), Arc::new(FileStore::new(&path)));
    assert!(matches!(node.start().await, Err(NodeError::Bind { .. })));
    node.shutdown().await.unwrap();

    let reloaded = FileStore::new(&path);
    assert_eq!(reloaded.restore().unwrap(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let (node, port) = start_empty().await;

    node.shutdown().await.unwrap();

    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    assert_eq!(node.peer_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dial_racing_shutdown_leaves_no_peer() {
    let (b, b_port) = start_empty().await;

    for _ in 0..10 {
        let (a, _) = start_empty().await;
        let dialer = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.connect_to_peer("127.0.0.1", b_port).await })
        };
        a.shutdown().await.unwrap();
        let _ = dialer.await.unwrap();

        assert_eq!(a.peer_count(), 0);
    }

    assert!(eventually(|| b.peer_count() == 0).await);
}

// ============================================================================
// CONNECT
// ============================================================================

#[tokio::test]
async fn test_connect_refused_is_connection_error() {
    let (a, _) = start_empty().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = a.connect_to_peer("127.0.0.1", dead_port).await;

    assert!(matches!(
        result,
        Err(NodeError::Connection(TransportError::ConnectionFailed(_)))
    ));
    assert_eq!(a.peer_count(), 0);
}

#[tokio::test]
async fn test_connecting_side_sends_sync_request_first() {
    let (a, _) = start_empty().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (connected, accepted) = tokio::join!(a.connect_to_peer("127.0.0.1", port), listener.accept());
    connected.unwrap();
    let mut peer = Framed::new(accepted.unwrap().0, MessageCodec::default());

    assert_eq!(peer.next().await.unwrap().unwrap(), Message::SyncRequest);
}

#[tokio::test]
async fn test_accepting_side_does_not_request_sync() {
    let (a, _) = start_empty().await;
    let (b, b_port) = start_empty().await;

    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(b.stats().syncs_completed, 0);
    assert_eq!(a.stats().syncs_served, 0);
    assert_eq!(b.stats().syncs_served, 1);
}

#[tokio::test]
async fn test_sync_wait_times_out_on_silent_peer() {
    let a = Node::new(config().with_sync_timeout(1), Arc::new(MemoryStore::new()));
    a.start().await.unwrap();
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = silent.local_addr().unwrap().port();

    let (result, _accepted) = tokio::join!(a.connect_and_sync("127.0.0.1", port), silent.accept());

    assert!(matches!(result, Err(NodeError::Timeout(_))));
}

// ============================================================================
// SYNC
// ============================================================================

#[tokio::test]
async fn test_sync_converges_to_union() {
    let (t1, t2, t3) = (record("1", 1.0), record("2", 2.0), record("3", 3.0));
    let (a, _) = start_with(vec![t1.clone(), t2.clone()]).await;
    let (b, b_port) = start_with(vec![t2.clone(), t3.clone()]).await;

    let report = a.connect_and_sync("127.0.0.1", b_port).await.unwrap();

    assert_eq!(report.received, 2);
    assert_eq!(report.added, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(a.transactions(), vec![t1, t2.clone(), t3.clone()]);
    assert_eq!(b.transactions(), vec![t2, t3]);
}

#[tokio::test]
async fn test_request_sync_on_existing_connection() {
    let (a, _) = start_empty().await;
    let (_b, b_port) = start_with(vec![record("1", 1.0)]).await;

    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();
    let id = a.peers()[0].id;
    let again = a.request_sync(id).await.unwrap();

    assert_eq!(again.received, 1);
    assert_eq!(again.added, 0);
    assert_eq!(a.transaction_count(), 1);
}

#[tokio::test]
async fn test_request_sync_unknown_connection() {
    let (a, _) = start_empty().await;
    let id = txmesh::ConnectionId::generate();

    assert_eq!(a.request_sync(id).await, Err(NodeError::UnknownConnection(id)));
}

// ============================================================================
// BROADCAST
// ============================================================================

#[tokio::test]
async fn test_create_transaction_fans_out_once_per_peer() {
    let (a, _) = start_empty().await;
    let (b, b_port) = start_empty().await;
    let (c, c_port) = start_empty().await;
    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();
    a.connect_and_sync("127.0.0.1", c_port).await.unwrap();

    let created = a.create_transaction("0xABC", 5.0).await.unwrap();

    assert!(eventually(|| b.has_transaction(&created) && c.has_transaction(&created)).await);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(b.stats().transactions_received, 1);
    assert_eq!(c.stats().transactions_received, 1);
    assert_eq!(b.transactions(), vec![created.clone()]);
    assert_eq!(c.transactions(), vec![created]);
}

#[tokio::test]
async fn test_create_transaction_example() {
    let (a, _) = start_empty().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (connected, accepted) = tokio::join!(a.connect_to_peer("127.0.0.1", port), listener.accept());
    connected.unwrap();
    let mut peer = Framed::new(accepted.unwrap().0, MessageCodec::default());
    assert_eq!(peer.next().await.unwrap().unwrap(), Message::SyncRequest);

    a.create_transaction("0xABC", 5.0).await.unwrap();

    let expected = TransactionRecord::new(a.wallet_address().as_str(), "0xABC", 5.0);
    assert_eq!(a.transactions(), vec![expected.clone()]);
    assert_eq!(peer.next().await.unwrap().unwrap(), Message::Transaction(expected));
}

#[tokio::test]
async fn test_dead_peer_does_not_block_broadcast() {
    let (a, _) = start_empty().await;
    let (b, b_port) = start_empty().await;
    let (c, c_port) = start_empty().await;
    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();
    a.connect_and_sync("127.0.0.1", c_port).await.unwrap();

    c.shutdown().await.unwrap();
    let created = a.create_transaction("0xABC", 1.0).await.unwrap();

    assert!(eventually(|| b.has_transaction(&created)).await);
    assert!(eventually(|| a.peer_count() == 1).await);
}

#[tokio::test]
async fn test_received_transaction_is_not_regossiped() {
    // b <- a -> c : a transaction from b reaches a but not c
    let (a, _) = start_empty().await;
    let (b, b_port) = start_empty().await;
    let (c, c_port) = start_empty().await;
    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();
    a.connect_and_sync("127.0.0.1", c_port).await.unwrap();

    let created = b.create_transaction("0xABC", 2.0).await.unwrap();

    assert!(eventually(|| a.has_transaction(&created)).await);
    sleep(Duration::from_millis(100)).await;
    assert!(!c.has_transaction(&created));
}

#[tokio::test]
async fn test_relay_enabled_reaches_second_hop() {
    let a = Node::new(config().with_relay_transactions(true), Arc::new(MemoryStore::new()));
    a.start().await.unwrap();
    let (b, b_port) = start_empty().await;
    let (c, c_port) = start_empty().await;
    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();
    a.connect_and_sync("127.0.0.1", c_port).await.unwrap();

    let created = b.create_transaction("0xABC", 2.0).await.unwrap();

    assert!(eventually(|| c.has_transaction(&created)).await);
}

// ============================================================================
// FAILURE ISOLATION
// ============================================================================

#[tokio::test]
async fn test_malformed_frame_closes_only_that_connection() {
    let (b, b_port) = start_with(vec![record("1", 1.0)]).await;
    let mut healthy = framed_client(b_port).await;
    let mut bad = TcpStream::connect(("127.0.0.1", b_port)).await.unwrap();
    assert!(eventually(|| b.peer_count() == 2).await);

    let garbage = b"{{{ definitely not json";
    bad.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
    bad.write_all(garbage).await.unwrap();

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), bad.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    healthy.send(Message::SyncRequest).await.unwrap();
    let response = healthy.next().await.unwrap().unwrap();

    assert_eq!(response, Message::SyncResponse(vec![record("1", 1.0)]));
    assert!(eventually(|| b.peer_count() == 1).await);
    assert_eq!(b.stats().malformed_frames, 1);
}

#[tokio::test]
async fn test_unknown_message_is_ignored() {
    let (b, b_port) = start_empty().await;
    let mut client = framed_client(b_port).await;

    client
        .send(Message::Unknown(serde_json::json!({"type": "hello"})))
        .await
        .unwrap();
    client.send(Message::SyncRequest).await.unwrap();

    assert_eq!(client.next().await.unwrap().unwrap(), Message::SyncResponse(vec![]));
    assert_eq!(b.stats().unknown_messages, 1);
    assert_eq!(b.peer_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_peer_is_dropped_and_others_still_receive() {
    let a = Node::new(config().with_send_timeout(3), Arc::new(MemoryStore::new()));
    a.start().await.unwrap();
    let (b, b_port) = start_empty().await;
    let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stalled_port = stalled.local_addr().unwrap().port();

    let (connected, accepted) = tokio::join!(a.connect_to_peer("127.0.0.1", stalled_port), stalled.accept());
    connected.unwrap();
    let _never_read = accepted.unwrap().0;
    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();

    let recipient = "0x".to_string() + &"b".repeat(15 * 1024 * 1024);
    let created = timeout(Duration::from_secs(15), a.create_transaction(&recipient, 1.0))
        .await
        .expect("create_transaction stalled behind a peer that never reads")
        .unwrap();

    assert_eq!(a.peer_count(), 1);
    assert_eq!(a.stats().broadcast_failures, 1);
    let delivered = timeout(Duration::from_secs(10), async {
        while !b.has_transaction(&created) {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(delivered.is_ok());
}

#[tokio::test]
async fn test_create_transaction_store_failure_broadcasts_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("transactions_a.json");
    let a = Node::new(config(), Arc::new(FileStore::new(&path)));
    a.start().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (connected, accepted) = tokio::join!(a.connect_to_peer("127.0.0.1", port), listener.accept());
    connected.unwrap();
    let mut peer = Framed::new(accepted.unwrap().0, MessageCodec::default());
    assert_eq!(peer.next().await.unwrap().unwrap(), Message::SyncRequest);

    block_store_path(&path);
    let result = a.create_transaction("0xABC", 5.0).await;

    assert!(matches!(result, Err(NodeError::Store(_))));
    assert_eq!(a.transaction_count(), 0);
    assert!(timeout(Duration::from_millis(200), peer.next()).await.is_err());
}

#[tokio::test]
async fn test_sync_store_failure_is_returned() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("transactions_a.json");
    let (_b, b_port) = start_with(vec![record("1", 1.0), record("2", 2.0)]).await;
    let a = Node::new(config(), Arc::new(FileStore::new(&path)));
    a.start().await.unwrap();

    block_store_path(&path);
    let result = a.connect_and_sync("127.0.0.1", b_port).await;

    assert!(matches!(result, Err(NodeError::Store(_))));
    assert_eq!(a.transaction_count(), 0);
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[tokio::test]
async fn test_transactions_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("transactions_test.json");

    let first = Node::new(config(), Arc::new(FileStore::new(&path)));
    first.start().await.unwrap();
    for i in 0..5 {
        first.create_transaction(&format!("0x{:02}", i), i as f64).await.unwrap();
    }
    let before = first.transactions();
    first.shutdown().await.unwrap();

    let second = Node::new(config(), Arc::new(FileStore::new(&path)));
    second.start().await.unwrap();

    assert_eq!(second.transactions(), before);
}

#[tokio::test]
async fn test_synced_records_are_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("transactions_a.json");
    let (_b, b_port) = start_with(vec![record("1", 1.0), record("2", 2.0)]).await;

    let a = Node::new(config(), Arc::new(FileStore::new(&path)));
    a.start().await.unwrap();
    a.connect_and_sync("127.0.0.1", b_port).await.unwrap();

    let reloaded = FileStore::new(&path);
    reloaded.restore().unwrap();
    assert_eq!(reloaded.snapshot(), vec![record("1", 1.0), record("2", 2.0)]);
}

use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::blockchain::block::Block;
use crate::blockchain::chain::Blockchain;
use crate::blockchain::node::{self, Node};
use crate::config::Config;
use crate::mining::miner;
use crate::networking::message::{
    self, BlockListMessage, BlockMessage, KnownNodesMessage, LatestBlockHeight, Version,
    BLOCK_BATCH_SIZE, COMMAND_LENGTH,
};
use crate::networking::rpc;
use crate::networking::send;

pub const BOOTSTRAP_NODE: &str = "localhost:3000";

/// Everything the handlers and the coordinator share. Owned by
/// `start_server` and passed by reference; there are no module-level
/// globals.
pub struct NodeState {
    pub chain: Arc<Blockchain>,
    pub node_address: String,
    pub validator_address: String,
    pub known_nodes: Mutex<Vec<String>>,
    pub blocks_in_transit: Mutex<Vec<Block>>,
    temp_block_list: Mutex<Vec<Block>>,
    pub is_sync: AtomicBool,
    pub is_append_block_list: AtomicBool,
    sync_tx: mpsc::Sender<()>,
    new_block_list_tx: mpsc::Sender<()>,
    mined_block_tx: mpsc::Sender<Block>,
}

/// Receiving ends of the coordinator's three inputs.
pub struct CoordinatorChannels {
    pub sync_rx: mpsc::Receiver<()>,
    pub mined_block_rx: mpsc::Receiver<Block>,
    pub new_block_list_rx: mpsc::Receiver<()>,
}

impl NodeState {
    pub fn new(
        chain: Arc<Blockchain>,
        node_address: String,
        validator_address: String,
    ) -> (Arc<Self>, CoordinatorChannels) {
        let (sync_tx, sync_rx) = mpsc::channel(1);
        let (new_block_list_tx, new_block_list_rx) = mpsc::channel(1);
        let (mined_block_tx, mined_block_rx) = mpsc::channel(1);

        let state = Arc::new(NodeState {
            chain,
            node_address,
            validator_address,
            known_nodes: Mutex::new(vec![BOOTSTRAP_NODE.to_string()]),
            blocks_in_transit: Mutex::new(Vec::new()),
            temp_block_list: Mutex::new(Vec::new()),
            is_sync: AtomicBool::new(false),
            is_append_block_list: AtomicBool::new(false),
            sync_tx,
            new_block_list_tx,
            mined_block_tx,
        });

        (
            state,
            CoordinatorChannels {
                sync_rx,
                mined_block_rx,
                new_block_list_rx,
            },
        )
    }

    pub fn known_nodes_snapshot(&self) -> Vec<String> {
        self.known_nodes
            .lock()
            .expect("[server] ERROR: known-nodes lock poisoned")
            .clone()
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        self.known_nodes
            .lock()
            .expect("[server] ERROR: known-nodes lock poisoned")
            .iter()
            .any(|node| node == addr)
    }

    /// Signals are level-triggered: a pending one already covers this event.
    fn signal_sync(&self) {
        let _ = self.sync_tx.try_send(());
    }

    fn signal_new_block_list(&self) {
        let _ = self.new_block_list_tx.try_send(());
    }
}

/// Binds the node listener, starts the RPC server and the sync coordinator,
/// greets the bootstrap peer, then accepts connections until shutdown.
pub async fn start_server(
    config: Arc<Config>,
    chain: Arc<Blockchain>,
    validator_address: &str,
) -> Result<(), Box<dyn Error>> {
    if !node::is_validator(validator_address) {
        return Err("[server::start_server] ERROR: address is not a validator".into());
    }

    let node = Node::new(validator_address, config.port);
    let node_address = if node.is_public_ip(&node.ip) {
        node.address()
    } else {
        format!("localhost:{}", node.listen_port)
    };
    info!("Starting node server on {}", node_address);

    let listener = TcpListener::bind(&node_address).await.map_err(|e| {
        format!(
            "[server::start_server] ERROR: failed to bind {}: {}",
            node_address, e
        )
    })?;

    let (state, channels) =
        NodeState::new(chain.clone(), node_address, validator_address.to_string());

    tokio::spawn(rpc::start_rpc_server(chain, node, config.rpc_port));

    let bootstrap = state.known_nodes_snapshot()[0].clone();
    if state.node_address != bootstrap {
        info!(
            "Sending version from node {} to bootstrap node {}",
            state.node_address, bootstrap
        );
        send::send_version(&state, &bootstrap).await;
    }

    tokio::spawn(coordinator(state.clone(), channels));

    info!("Node server successfully started on {}", state.node_address);
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| format!("[server::start_server] ERROR: accept failed: {}", e))?;
        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, state).await;
        });
    }
}

/// Reads one complete request (the stream is written then shut down by the
/// peer) and dispatches on the 20-byte command.
async fn handle_connection(mut stream: TcpStream, state: Arc<NodeState>) {
    let mut request = Vec::new();
    if let Err(e) = stream.read_to_end(&mut request).await {
        error!("failed to read request: {}", e);
        return;
    }
    drop(stream);

    if request.len() < COMMAND_LENGTH {
        warn!("request shorter than a command frame ({} bytes)", request.len());
        return;
    }

    let command = message::bytes_to_cmd(&request[..COMMAND_LENGTH]);
    let payload = &request[COMMAND_LENGTH..];
    info!("Received command: {}", command);

    match command.as_str() {
        "knownNodes" => handle_known_nodes(&state, payload),
        "block" => handle_block(&state, payload).await,
        "latestBlockHeight" => handle_latest_block_height(&state, payload).await,
        "version" => handle_version(&state, payload).await,
        "blocklist" => handle_block_list(&state, payload).await,
        _ => warn!("Unknown command"),
    }
}

/// Decode failures are unrecoverable: the store has no protocol for
/// resynchronizing with a peer speaking garbage. Log enough to reproduce,
/// then abort the process.
fn protocol_fatal(command: &str, input_len: usize, err: &dyn std::fmt::Display) -> ! {
    error!(
        "fatal decode failure for command {:?} ({} payload bytes): {}",
        command, input_len, err
    );
    std::process::exit(1);
}

fn decode_payload<T: serde::de::DeserializeOwned>(command: &str, payload: &[u8]) -> T {
    match bincode::deserialize(payload) {
        Ok(value) => value,
        Err(e) => protocol_fatal(command, payload.len(), &e),
    }
}

fn decode_block(command: &str, data: &[u8]) -> Block {
    match Block::deserialize(data) {
        Ok(block) => block,
        Err(e) => protocol_fatal(command, data.len(), &e),
    }
}

fn handle_known_nodes(state: &NodeState, payload: &[u8]) {
    let payload: KnownNodesMessage = decode_payload("knownNodes", payload);

    let mut nodes = state
        .known_nodes
        .lock()
        .expect("[server::handle_known_nodes] ERROR: known-nodes lock poisoned");
    nodes.extend(payload.addr_list);
    dedupe_nodes(&mut nodes);
    info!("there are {} known nodes", nodes.len());
}

async fn handle_block(state: &Arc<NodeState>, payload: &[u8]) {
    let payload: BlockMessage = decode_payload("block", payload);
    let block = decode_block("block", &payload.block);

    // Height the next block is expected at; zero while this process has not
    // appended anything itself.
    let expected_height = match state.chain.current_block() {
        Some(current) => current.height + 1,
        None => 0,
    };

    if block.height > expected_height {
        let other_height = block.height;
        sync_with_longest_chain(state, other_height, &payload.addr_from).await;
    } else {
        {
            let mut transit = state
                .blocks_in_transit
                .lock()
                .expect("[server::handle_block] ERROR: transit lock poisoned");
            transit.push(block);
            info!("blocks in transit: {}", transit.len());
        }

        if !state.is_sync.load(Ordering::SeqCst) {
            state.is_sync.store(true, Ordering::SeqCst);
            state.signal_sync();
        }
        if !state.is_append_block_list.load(Ordering::SeqCst) {
            state.signal_new_block_list();
        }
    }

    sync_known_nodes(state, &payload.addr_from).await;
}

async fn handle_latest_block_height(state: &Arc<NodeState>, payload: &[u8]) {
    let payload: LatestBlockHeight = decode_payload("latestBlockHeight", payload);

    let range = String::from_utf8_lossy(&payload.id).into_owned();
    let (start_height, end_height) = match parse_height_range(&range) {
        Some(range) => range,
        None => {
            warn!("Invalid block range requested: {}", range);
            return;
        }
    };

    // Collected tip-first, sent oldest-first.
    let mut blocks = state.chain.blocks_in_range(start_height, end_height);
    blocks.reverse();

    info!(
        "Sending blocks from height {} to {} to {}",
        start_height, end_height, payload.addr_from
    );

    let total = blocks.len();
    for batch in blocks.chunks(BLOCK_BATCH_SIZE) {
        send::send_block_list(state, &payload.addr_from, batch.to_vec(), total).await;
        time::sleep(Duration::from_secs(1)).await;
    }
}

fn parse_height_range(range: &str) -> Option<(i64, i64)> {
    let (start, end) = range.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

async fn handle_version(state: &Arc<NodeState>, payload: &[u8]) {
    let payload: Version = decode_payload("version", payload);

    let best_height = state.chain.best_height();
    let other_height = payload.best_height;

    info!(
        "Received version from {} with best height {} (local best height {})",
        payload.addr_from, other_height, best_height
    );

    if best_height < other_height && !payload.addr_from.is_empty() {
        if state.chain.tip_hash().is_empty() {
            send::send_latest_block_height(state, &payload.addr_from, 0, other_height).await;
            state.is_sync.store(true, Ordering::SeqCst);
            state.signal_sync();
        } else if other_height > best_height + 1 {
            // More than one block ahead of us: treat the peer's chain as
            // divergent and refetch it from scratch.
            sync_with_longest_chain(state, other_height, &payload.addr_from).await;
        } else {
            send::send_latest_block_height(
                state,
                &payload.addr_from,
                best_height + 1,
                other_height,
            )
            .await;
            state.is_sync.store(true, Ordering::SeqCst);
            state.signal_sync();
        }
    } else if best_height > other_height && !payload.addr_from.is_empty() {
        info!("Node height is higher. Sending version to {}", payload.addr_from);
        send::send_version(state, &payload.addr_from).await;
    }

    sync_known_nodes(state, &payload.addr_from).await;
}

async fn handle_block_list(state: &Arc<NodeState>, payload: &[u8]) {
    let payload: BlockListMessage = decode_payload("blocklist", payload);
    info!("Received blocklist with {} blocks", payload.blocks.len());

    state.is_append_block_list.store(true, Ordering::SeqCst);
    state.is_sync.store(true, Ordering::SeqCst);
    state.signal_sync();

    let drain_ready = {
        let mut transit = state
            .blocks_in_transit
            .lock()
            .expect("[server::handle_block_list] ERROR: transit lock poisoned");
        let mut temp = state
            .temp_block_list
            .lock()
            .expect("[server::handle_block_list] ERROR: temp-list lock poisoned");

        for block_data in &payload.blocks {
            let block = decode_block("blocklist", block_data);

            let duplicate = transit.iter().any(|existing| existing.hash == block.hash);
            if duplicate {
                info!(
                    "Block {} at height {} is a duplicate and was not added",
                    hex::encode(&block.hash),
                    block.height
                );
                continue;
            }

            info!(
                "Added block {} at height {} to transit",
                hex::encode(&block.hash),
                block.height
            );
            transit.push(block.clone());
            temp.push(block);
        }

        if temp.len() == payload.length {
            temp.clear();
            true
        } else {
            false
        }
    };

    if drain_ready {
        state.is_append_block_list.store(false, Ordering::SeqCst);
        state.signal_new_block_list();
    }

    sync_known_nodes(state, &payload.addr_from).await;
}

/// Divergent-chain recovery: wipe the store and refetch the full range
/// `0..other_height`, never a partial prefix.
pub async fn sync_with_longest_chain(state: &Arc<NodeState>, other_height: i64, addr: &str) {
    if state.is_sync.swap(true, Ordering::SeqCst) {
        return;
    }
    state.signal_sync();

    state.chain.reset();
    state.chain.clear_tip();
    send::send_latest_block_height(state, addr, 0, other_height).await;
}

/// Adds a newly-seen peer and gossips the whole table to everyone but self.
async fn sync_known_nodes(state: &Arc<NodeState>, addr: &str) {
    if addr.is_empty() || state.node_is_known(addr) {
        return;
    }

    let peers = {
        let mut nodes = state
            .known_nodes
            .lock()
            .expect("[server::sync_known_nodes] ERROR: known-nodes lock poisoned");
        nodes.push(addr.to_string());
        dedupe_nodes(&mut nodes);
        nodes.clone()
    };
    info!("known nodes: {:?}", peers);

    for peer in &peers {
        if peer == &state.node_address {
            continue;
        }
        send::send_known_nodes(state, peer).await;
    }
}

fn dedupe_nodes(nodes: &mut Vec<String>) {
    let mut seen = HashSet::new();
    nodes.retain(|node| seen.insert(node.clone()));
}

/// The sync coordinator: a single task multiplexing mining, inbound blocks,
/// and bulk catch-up. The cancel handle it owns is the only one, so at most
/// one miner task is ever live.
async fn coordinator(state: Arc<NodeState>, mut channels: CoordinatorChannels) {
    let mut miner_cancel: Option<watch::Sender<bool>> = None;

    if !state.is_sync.load(Ordering::SeqCst) && !state.chain.tip_hash().is_empty() {
        miner_cancel = Some(spawn_miner(&state));
    }

    loop {
        tokio::select! {
            Some(()) = channels.sync_rx.recv() => {
                cancel_miner(&mut miner_cancel);
            }
            Some(block) = channels.mined_block_rx.recv() => {
                cancel_miner(&mut miner_cancel);

                // Broadcast before the local append; a receiver may see the
                // block before our store has it and must queue it.
                for peer in state.known_nodes_snapshot() {
                    if peer == state.node_address {
                        continue;
                    }
                    info!("Propagating block to node: {}", peer);
                    send::send_block(&state, &peer, &block).await;
                }

                state.chain.append(&block);

                if !state.is_sync.load(Ordering::SeqCst) && !state.chain.tip_hash().is_empty() {
                    miner_cancel = Some(spawn_miner(&state));
                }
            }
            Some(()) = channels.new_block_list_rx.recv() => {
                cancel_miner(&mut miner_cancel);
                drain_blocks_in_transit(&state);

                if !state.is_sync.load(Ordering::SeqCst) && !state.chain.tip_hash().is_empty() {
                    miner_cancel = Some(spawn_miner(&state));
                }
            }
            else => return,
        }
    }
}

fn spawn_miner(state: &Arc<NodeState>) -> watch::Sender<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(miner::run(
        cancel_rx,
        state.chain.clone(),
        state.validator_address.clone(),
        state.mined_block_tx.clone(),
    ));
    cancel_tx
}

fn cancel_miner(current: &mut Option<watch::Sender<bool>>) {
    if let Some(cancel) = current.take() {
        let _ = cancel.send(true);
    }
}

/// Drains the transit buffer into the store in ascending height order.
/// Height-0 blocks bypass the parent-link check; everything else goes
/// through the normal append, one lock acquisition per block.
pub fn drain_blocks_in_transit(state: &NodeState) {
    state.is_sync.store(true, Ordering::SeqCst);

    let blocks = {
        let mut transit = state
            .blocks_in_transit
            .lock()
            .expect("[server::drain_blocks_in_transit] ERROR: transit lock poisoned");
        transit.sort_by_key(|block| block.height);
        transit.drain(..).collect::<Vec<_>>()
    };

    for block in blocks {
        info!(
            "appending block at height {} ({})",
            block.height,
            hex::encode(&block.hash)
        );
        if block.height == 0 {
            state.chain.write_genesis(&block);
        } else {
            state.chain.append(&block);
        }
    }

    state.is_sync.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::HexBytes;
    use crate::utils;
    use num_bigint::BigUint;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Arc<Config> {
        Arc::new(Config {
            data_dir: dir.path().to_string_lossy().into_owned(),
            default_difficulty: BigUint::from(4u8),
            ..Config::default()
        })
    }

    fn test_state(dir: &TempDir) -> (Arc<NodeState>, CoordinatorChannels) {
        let config = test_config(dir);
        let chain = Arc::new(Blockchain::init(config, "addr1").unwrap());
        NodeState::new(chain, "localhost:42000".to_string(), "addr1".to_string())
    }

    fn fabricated_block(parent: &Block, height: i64) -> Block {
        let mut block = Block {
            timestamp: height * 20,
            hash: HexBytes::default(),
            prev_hash: parent.hash.clone(),
            main_block_height: 0,
            main_block_hash: HexBytes::default(),
            nonce: HexBytes(vec![height as u8]),
            height,
            difficulty: BigUint::from(4u8),
            miner: HexBytes::from("addr1"),
            validator: HexBytes::from("addr1"),
        };
        block.hash = HexBytes(utils::sha256_bytes(&height.to_be_bytes()));
        block
    }

    #[tokio::test]
    async fn out_of_order_blocklist_drains_in_height_order() {
        let dir = TempDir::new().unwrap();
        let (state, mut channels) = test_state(&dir);

        let genesis = state.chain.last_block();
        let block1 = fabricated_block(&genesis, 1);
        let block2 = fabricated_block(&block1, 2);
        let block3 = fabricated_block(&block2, 3);

        // Heights [3, 1, 2] with intact parent links; an empty addr_from
        // skips the peer gossip.
        let payload = BlockListMessage {
            addr_from: String::new(),
            blocks: vec![block3.serialize(), block1.serialize(), block2.serialize()],
            length: 3,
        };
        handle_block_list(&state, &message::encode_payload(&payload)).await;

        assert!(state.is_sync.load(Ordering::SeqCst));
        assert!(!state.is_append_block_list.load(Ordering::SeqCst));
        channels
            .new_block_list_rx
            .try_recv()
            .expect("drain signal should be pending");

        drain_blocks_in_transit(&state);

        assert!(!state.is_sync.load(Ordering::SeqCst));
        assert_eq!(state.chain.best_height(), 3);
        for height in 0..=3 {
            let block = state.chain.get_block_by_height(height).unwrap();
            assert_eq!(block.height, height);
            if height > 0 {
                let parent = state.chain.get_block(&block.prev_hash).unwrap();
                assert_eq!(parent.height, height - 1);
            }
        }
        assert!(state.blocks_in_transit.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocklist_dedupes_and_counts_toward_advertised_length() {
        let dir = TempDir::new().unwrap();
        let (state, mut channels) = test_state(&dir);

        let genesis = state.chain.last_block();
        let block1 = fabricated_block(&genesis, 1);
        let block2 = fabricated_block(&block1, 2);

        // First batch of a two-batch reply: no drain signal yet.
        let first = BlockListMessage {
            addr_from: String::new(),
            blocks: vec![block1.serialize(), block1.serialize()],
            length: 2,
        };
        handle_block_list(&state, &message::encode_payload(&first)).await;
        assert!(state.is_append_block_list.load(Ordering::SeqCst));
        assert!(channels.new_block_list_rx.try_recv().is_err());
        assert_eq!(state.blocks_in_transit.lock().unwrap().len(), 1);

        // Second batch completes the advertised total.
        let second = BlockListMessage {
            addr_from: String::new(),
            blocks: vec![block2.serialize()],
            length: 2,
        };
        handle_block_list(&state, &message::encode_payload(&second)).await;
        assert!(!state.is_append_block_list.load(Ordering::SeqCst));
        channels
            .new_block_list_rx
            .try_recv()
            .expect("drain signal should be pending");
        assert!(state.temp_block_list.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gossiped_nodes_are_unioned_and_deduped() {
        let dir = TempDir::new().unwrap();
        let (state, _channels) = test_state(&dir);

        let payload = KnownNodesMessage {
            addr_list: vec![
                "localhost:3001".to_string(),
                BOOTSTRAP_NODE.to_string(),
                "localhost:3001".to_string(),
            ],
        };
        handle_known_nodes(&state, &message::encode_payload(&payload));

        assert_eq!(
            state.known_nodes_snapshot(),
            vec![BOOTSTRAP_NODE.to_string(), "localhost:3001".to_string()]
        );
    }

    #[tokio::test]
    async fn expected_next_block_is_queued_into_transit() {
        let dir = TempDir::new().unwrap();
        let (state, mut channels) = test_state(&dir);

        // Appending locally sets the in-memory current block.
        let genesis = state.chain.last_block();
        let block1 = fabricated_block(&genesis, 1);
        state.chain.append(&block1);

        let block2 = fabricated_block(&block1, 2);
        let payload = BlockMessage {
            addr_from: String::new(),
            block: block2.serialize(),
        };
        handle_block(&state, &message::encode_payload(&payload)).await;

        assert_eq!(state.blocks_in_transit.lock().unwrap().len(), 1);
        assert!(state.is_sync.load(Ordering::SeqCst));
        channels.sync_rx.try_recv().expect("sync signal should be pending");
        channels
            .new_block_list_rx
            .try_recv()
            .expect("drain signal should be pending");
    }

    #[tokio::test]
    async fn far_ahead_block_triggers_reset_and_full_refetch() {
        let dir = TempDir::new().unwrap();
        let (state, _channels) = test_state(&dir);

        // current_block is None on a process that never appended, so any
        // nonzero height reads as far ahead.
        let genesis = state.chain.last_block();
        let block1 = fabricated_block(&genesis, 1);
        let block3 = fabricated_block(&block1, 3);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = Vec::new();
            stream.read_to_end(&mut frame).await.unwrap();
            frame
        });

        let payload = BlockMessage {
            addr_from: peer_addr,
            block: block3.serialize(),
        };
        handle_block(&state, &message::encode_payload(&payload)).await;

        assert!(state.is_sync.load(Ordering::SeqCst));
        assert!(state.chain.tip_hash().is_empty());
        assert!(state.chain.block_hashes().is_empty());

        let frame = accept.await.unwrap();
        assert_eq!(
            message::bytes_to_cmd(&frame[..COMMAND_LENGTH]),
            "latestBlockHeight"
        );
        let request: LatestBlockHeight =
            bincode::deserialize(&frame[COMMAND_LENGTH..]).unwrap();
        assert_eq!(request.id, b"0-3".to_vec());
    }

    #[tokio::test]
    async fn divergent_version_resets_and_requests_full_range() {
        let dir = TempDir::new().unwrap();
        let (state, _channels) = test_state(&dir);

        // Local tip at height 2.
        let genesis = state.chain.last_block();
        let block1 = fabricated_block(&genesis, 1);
        state.chain.append(&block1);
        let block2 = fabricated_block(&block1, 2);
        state.chain.append(&block2);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = Vec::new();
            stream.read_to_end(&mut frame).await.unwrap();
            frame
        });

        let payload = Version {
            version: message::PROTOCOL_VERSION,
            best_height: 10,
            addr_from: peer_addr,
        };
        handle_version(&state, &message::encode_payload(&payload)).await;

        assert!(state.is_sync.load(Ordering::SeqCst));
        assert!(state.chain.tip_hash().is_empty());
        assert!(state.chain.block_hashes().is_empty());

        let frame = accept.await.unwrap();
        assert_eq!(
            message::bytes_to_cmd(&frame[..COMMAND_LENGTH]),
            "latestBlockHeight"
        );
        let request: LatestBlockHeight =
            bincode::deserialize(&frame[COMMAND_LENGTH..]).unwrap();
        assert_eq!(request.id, b"0-10".to_vec());
    }

    #[tokio::test]
    async fn version_one_ahead_requests_missing_range_only() {
        let dir = TempDir::new().unwrap();
        let (state, _channels) = test_state(&dir);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = Vec::new();
            stream.read_to_end(&mut frame).await.unwrap();
            frame
        });

        // Local chain has only genesis; the peer is exactly one ahead.
        let payload = Version {
            version: message::PROTOCOL_VERSION,
            best_height: 1,
            addr_from: peer_addr,
        };
        handle_version(&state, &message::encode_payload(&payload)).await;

        assert!(state.is_sync.load(Ordering::SeqCst));
        // The store survives; only the missing block is requested.
        assert_eq!(state.chain.best_height(), 0);

        let frame = accept.await.unwrap();
        let request: LatestBlockHeight =
            bincode::deserialize(&frame[COMMAND_LENGTH..]).unwrap();
        assert_eq!(request.id, b"1-1".to_vec());
    }

    #[tokio::test]
    async fn lower_version_gets_our_version_back() {
        let dir = TempDir::new().unwrap();
        let (state, _channels) = test_state(&dir);

        let genesis = state.chain.last_block();
        let block1 = fabricated_block(&genesis, 1);
        state.chain.append(&block1);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = Vec::new();
            stream.read_to_end(&mut frame).await.unwrap();
            frame
        });

        let payload = Version {
            version: message::PROTOCOL_VERSION,
            best_height: 0,
            addr_from: peer_addr,
        };
        handle_version(&state, &message::encode_payload(&payload)).await;

        let frame = accept.await.unwrap();
        assert_eq!(message::bytes_to_cmd(&frame[..COMMAND_LENGTH]), "version");
        let reply: Version = bincode::deserialize(&frame[COMMAND_LENGTH..]).unwrap();
        assert_eq!(reply.best_height, 1);
        assert_eq!(reply.addr_from, state.node_address);
    }

    #[tokio::test]
    async fn failed_send_evicts_the_peer() {
        let dir = TempDir::new().unwrap();
        let (state, _channels) = test_state(&dir);

        // A port nothing listens on.
        let dead_addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        state.known_nodes.lock().unwrap().push(dead_addr.clone());

        send::send_data(&state, &dead_addr, b"ping").await;
        assert!(!state.node_is_known(&dead_addr));
    }

    #[test]
    fn height_range_parsing() {
        assert_eq!(parse_height_range("0-10"), Some((0, 10)));
        assert_eq!(parse_height_range("3-7"), Some((3, 7)));
        assert_eq!(parse_height_range("garbage"), None);
        assert_eq!(parse_height_range("1-"), None);
    }
}

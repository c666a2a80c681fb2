use log::{error, info};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::blockchain::block::Block;
use crate::networking::message::{
    self, BlockListMessage, BlockMessage, KnownNodesMessage, LatestBlockHeight, Version,
    PROTOCOL_VERSION,
};
use crate::networking::server::NodeState;

/// Writes one framed request to `addr` over a fresh connection. A connect
/// failure evicts the peer from the known-nodes table; that is the table's
/// only eviction path.
pub async fn send_data(state: &NodeState, addr: &str, data: &[u8]) {
    if addr.is_empty() {
        error!("target address is empty, cannot send data");
        return;
    }

    let mut stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("failed to connect to {}: {}", addr, e);
            let mut nodes = state
                .known_nodes
                .lock()
                .expect("[send::send_data] ERROR: known-nodes lock poisoned");
            nodes.retain(|node| node != addr);
            return;
        }
    };

    if let Err(e) = stream.write_all(data).await {
        error!("error while sending data to {}: {}", addr, e);
        return;
    }
    let _ = stream.shutdown().await;
}

pub async fn send_known_nodes(state: &NodeState, addr: &str) {
    let payload = KnownNodesMessage {
        addr_list: state.known_nodes_snapshot(),
    };
    send_data(state, addr, &message::frame("knownNodes", &payload)).await;
}

pub async fn send_block(state: &NodeState, addr: &str, block: &Block) {
    let payload = BlockMessage {
        addr_from: state.node_address.clone(),
        block: block.serialize(),
    };
    send_data(state, addr, &message::frame("block", &payload)).await;
}

pub async fn send_block_list(state: &NodeState, addr: &str, blocks: Vec<Vec<u8>>, length: usize) {
    if addr.is_empty() {
        error!("target address for block list is empty");
        return;
    }

    info!("Sending blocklist to {} with {} blocks", addr, blocks.len());
    let payload = BlockListMessage {
        addr_from: state.node_address.clone(),
        blocks,
        length,
    };
    send_data(state, addr, &message::frame("blocklist", &payload)).await;
}

pub async fn send_latest_block_height(
    state: &NodeState,
    addr: &str,
    start_height: i64,
    end_height: i64,
) {
    let payload = LatestBlockHeight {
        addr_from: state.node_address.clone(),
        kind: String::new(),
        id: format!("{}-{}", start_height, end_height).into_bytes(),
    };

    info!(
        "Requesting blocks from height {} to {} from {}",
        start_height, end_height, addr
    );
    send_data(state, addr, &message::frame("latestBlockHeight", &payload)).await;
}

pub async fn send_version(state: &NodeState, addr: &str) {
    if state.node_address.is_empty() {
        error!("node address is empty, cannot send version message");
        return;
    }

    let best_height = state.chain.best_height();
    let payload = Version {
        version: PROTOCOL_VERSION,
        best_height,
        addr_from: state.node_address.clone(),
    };

    info!(
        "Sending version to {} with best height {} from {}",
        addr, best_height, state.node_address
    );
    send_data(state, addr, &message::frame("version", &payload)).await;
}

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use log::{error, info};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::blockchain::block::{difficulty_json, Block};
use crate::blockchain::chain::Blockchain;
use crate::blockchain::node::Node;

pub struct RpcState {
    chain: Arc<Blockchain>,
    node: Node,
}

/// Read-only RPC surface over the chain plus the stub methods kept for
/// interface compatibility.
pub async fn start_rpc_server(chain: Arc<Blockchain>, node: Node, rpc_port: u16) {
    let rpc_host = format!("localhost:{}", rpc_port);
    let router = create_router(Arc::new(RpcState { chain, node }));

    let listener = match TcpListener::bind(&rpc_host).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Error in RPC server: {}", e);
            return;
        }
    };

    info!("Serving RPC server on {}", rpc_host);
    if let Err(e) = axum::serve(listener, router.into_make_service()).await {
        error!("Error in RPC server: {}", e);
    }
}

fn create_router(state: Arc<RpcState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/rpc/getBlockNumber", post(get_block_number))
        .route("/rpc/getBestHeight", post(get_best_height))
        .route("/rpc/getLastBlockHash", post(get_last_block_hash))
        .route("/rpc/getBlock", post(get_block))
        .route("/rpc/getBlockHashes", post(get_block_hashes))
        .route("/rpc/getBlockList", post(get_block_list))
        .route("/rpc/getDifficulty", post(get_difficulty))
        .route("/rpc/getWork", post(get_work))
        .route("/rpc/getHashRate", post(get_hash_rate))
        .route("/rpc/coinbase", post(coinbase))
        .route("/rpc/mining", post(mining))
        .route("/rpc/addPeer", post(add_peer))
        .route("/rpc/getDataDir", post(get_data_dir))
        .route("/rpc/getNodeInfo", post(get_node_info))
        .route("/rpc/getPeer", post(get_peer))
        .route("/rpc/removePeer", post(remove_peer))
        .route("/rpc/setXpbase", post(set_xpbase))
        .route("/rpc/getNodeHashRate", post(get_node_hash_rate))
        .with_state(state)
        .layer(cors)
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub error: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Serialize, Deserialize)]
pub struct HeightRes {
    pub height: i64,
}

#[derive(Serialize, Deserialize)]
pub struct GetLastBlockHashRes {
    pub hash: String,
}

#[derive(Deserialize, Serialize)]
pub struct GetBlockArgs {
    pub hash: String,
}

#[derive(Serialize, Deserialize)]
pub struct GetBlockRes {
    pub block: Block,
}

#[derive(Serialize, Deserialize)]
pub struct GetBlockHashesRes {
    pub hash: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct GetBlockListRes {
    pub block: Vec<Block>,
}

#[derive(Deserialize, Serialize)]
pub struct GetDifficultyArgs {
    pub height: i64,
}

#[derive(Serialize, Deserialize)]
pub struct GetDifficultyRes {
    #[serde(with = "difficulty_json")]
    pub difficulty: BigUint,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetWorkRes {
    pub current_pow_hash: String,
    pub seed_hash: String,
    pub target_threshold: String,
}

#[derive(Serialize, Deserialize)]
pub struct HashRateRes {
    pub hashrate: i64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinbaseRes {
    pub coinbase_address: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningRes {
    pub is_mining: bool,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerArgs {
    pub peer_address: String,
}

#[derive(Serialize, Deserialize)]
pub struct SuccessRes {
    pub success: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDataDirRes {
    pub data_directory: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetNodeInfoRes {
    pub enode: String,
    pub id: String,
    pub ip: String,
    pub listen_port: u16,
    pub validator: String,
    pub name: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: String,
    pub ip: String,
    pub name: String,
    pub listen_port: u16,
}

#[derive(Serialize, Deserialize)]
pub struct GetPeerRes {
    pub peers: Vec<Peer>,
}

#[derive(Deserialize, Serialize)]
pub struct SetXpbaseArgs {
    pub address: String,
}

async fn get_block_number(State(state): State<Arc<RpcState>>) -> Json<HeightRes> {
    Json(HeightRes {
        height: state.chain.best_height(),
    })
}

async fn get_best_height(State(state): State<Arc<RpcState>>) -> Json<HeightRes> {
    Json(HeightRes {
        height: state.chain.best_height(),
    })
}

async fn get_last_block_hash(
    State(state): State<Arc<RpcState>>,
) -> Result<Json<GetLastBlockHashRes>, ErrorResponse> {
    let hash = state.chain.last_hash().map_err(|e| ErrorResponse {
        code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        error: e.to_string(),
    })?;

    Ok(Json(GetLastBlockHashRes {
        hash: hex::encode(hash),
    }))
}

async fn get_block(
    State(state): State<Arc<RpcState>>,
    Json(args): Json<GetBlockArgs>,
) -> Result<Json<GetBlockRes>, ErrorResponse> {
    if args.hash.is_empty() {
        return Err(ErrorResponse {
            code: StatusCode::BAD_REQUEST.as_u16(),
            error: "hash is required".to_string(),
        });
    }

    let hash = hex::decode(&args.hash).map_err(|e| ErrorResponse {
        code: StatusCode::BAD_REQUEST.as_u16(),
        error: e.to_string(),
    })?;

    let block = state.chain.get_block(&hash).map_err(|e| ErrorResponse {
        code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        error: e.to_string(),
    })?;

    Ok(Json(GetBlockRes { block }))
}

async fn get_block_hashes(State(state): State<Arc<RpcState>>) -> Json<GetBlockHashesRes> {
    let hash = state
        .chain
        .block_hashes()
        .iter()
        .map(hex::encode)
        .collect();
    Json(GetBlockHashesRes { hash })
}

async fn get_block_list(State(state): State<Arc<RpcState>>) -> Json<GetBlockListRes> {
    Json(GetBlockListRes {
        block: state.chain.block_list(),
    })
}

async fn get_difficulty(
    State(state): State<Arc<RpcState>>,
    Json(args): Json<GetDifficultyArgs>,
) -> Json<GetDifficultyRes> {
    Json(GetDifficultyRes {
        difficulty: state.chain.difficulty(args.height),
    })
}

async fn get_work() -> Json<GetWorkRes> {
    Json(GetWorkRes {
        current_pow_hash: "0x5eab5d6d3e47adf8d0d4ae9a4b96be1f24acb8b3f1b3cfa7cde7d77eae75a4a8"
            .to_string(),
        seed_hash: "0x7e3f9c19b0d3ea84363e7fd32158ef87688b1bb1a5ed0a5d003a3f54e9a2a5a3"
            .to_string(),
        target_threshold: "0x0000000000000000000000000000000000000000000000000000000000001abc"
            .to_string(),
    })
}

async fn get_hash_rate() -> Json<HashRateRes> {
    Json(HashRateRes { hashrate: 1000 })
}

async fn coinbase() -> Json<CoinbaseRes> {
    Json(CoinbaseRes {
        coinbase_address: "0x742d35cc6634c0532925a3b844bc454e4438f44e".to_string(),
    })
}

async fn mining() -> Json<MiningRes> {
    Json(MiningRes { is_mining: true })
}

async fn add_peer(Json(args): Json<PeerArgs>) -> Json<SuccessRes> {
    info!("peer address: {}", args.peer_address);
    Json(SuccessRes { success: true })
}

async fn get_data_dir() -> Json<GetDataDirRes> {
    Json(GetDataDirRes {
        data_directory: "/tmp/blocks_1001".to_string(),
    })
}

async fn get_node_info(State(state): State<Arc<RpcState>>) -> Json<GetNodeInfoRes> {
    Json(GetNodeInfoRes {
        enode: "enode://abcdef1234567890@127.0.0.1:30303".to_string(),
        id: "abcdef1234567890".to_string(),
        ip: state.node.ip.clone(),
        listen_port: state.node.listen_port,
        validator: state.node.validator.clone(),
        name: "Geth/v1.9.0-stable/linux-amd64/go1.12".to_string(),
    })
}

async fn get_peer() -> Json<GetPeerRes> {
    Json(GetPeerRes {
        peers: vec![
            Peer {
                id: "abcdef1234567890".to_string(),
                ip: "192.168.1.10".to_string(),
                name: "Geth/v1.9.0-stable/linux-amd64/go1.12".to_string(),
                listen_port: 30303,
            },
            Peer {
                id: "abcdef23456".to_string(),
                ip: "192.168.1.11".to_string(),
                name: "Geth/v1.9.0-stable1/linux-amd64/go1.12".to_string(),
                listen_port: 30303,
            },
        ],
    })
}

async fn remove_peer(Json(args): Json<PeerArgs>) -> Json<SuccessRes> {
    info!("peer address: {}", args.peer_address);
    Json(SuccessRes { success: true })
}

async fn set_xpbase(Json(args): Json<SetXpbaseArgs>) -> Json<SuccessRes> {
    info!("xpbase address: {}", args.address);
    Json(SuccessRes { success: true })
}

async fn get_node_hash_rate() -> Json<HashRateRes> {
    Json(HashRateRes { hashrate: 1000 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn rpc_state(dir: &TempDir) -> Arc<RpcState> {
        let config = Arc::new(Config {
            data_dir: dir.path().to_string_lossy().into_owned(),
            default_difficulty: BigUint::from(4u8),
            ..Config::default()
        });
        let chain = Arc::new(Blockchain::init(config, "addr1").unwrap());
        Arc::new(RpcState {
            chain,
            node: Node {
                ip: "127.0.0.1".to_string(),
                listen_port: 8080,
                validator: "addr1".to_string(),
            },
        })
    }

    #[tokio::test]
    async fn chain_queries_reflect_the_store() {
        let dir = TempDir::new().unwrap();
        let state = rpc_state(&dir);
        let tip = state.chain.last_block();

        let Json(number) = get_block_number(State(state.clone())).await;
        assert_eq!(number.height, 0);

        let Json(hashes) = get_block_hashes(State(state.clone())).await;
        assert_eq!(hashes.hash, vec![hex::encode(&tip.hash)]);

        let result = get_block(
            State(state.clone()),
            Json(GetBlockArgs {
                hash: hex::encode(&tip.hash),
            }),
        )
        .await;
        assert_eq!(result.unwrap().0.block, tip);

        let Json(difficulty) = get_difficulty(
            State(state.clone()),
            Json(GetDifficultyArgs { height: 1 }),
        )
        .await;
        assert_eq!(difficulty.difficulty, BigUint::from(4u8));
    }

    #[tokio::test]
    async fn get_block_rejects_bad_hashes() {
        let dir = TempDir::new().unwrap();
        let state = rpc_state(&dir);

        let missing = get_block(
            State(state.clone()),
            Json(GetBlockArgs {
                hash: String::new(),
            }),
        )
        .await;
        assert!(missing.is_err());

        let invalid = get_block(
            State(state),
            Json(GetBlockArgs {
                hash: "zz".to_string(),
            }),
        )
        .await;
        assert!(invalid.is_err());
    }
}

use std::error::Error;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::blockchain::block::Block;
use crate::blockchain::chain::Blockchain;
use crate::cli::cli::{CliUI, RpcCommands};
use crate::config::Config;
use crate::networking::rpc::{
    CoinbaseRes, GetBlockArgs, GetBlockHashesRes, GetBlockListRes, GetBlockRes, GetDataDirRes,
    GetDifficultyArgs, GetDifficultyRes, GetLastBlockHashRes, GetNodeInfoRes, GetPeerRes,
    GetWorkRes, HashRateRes, HeightRes, MiningRes, PeerArgs, SetXpbaseArgs, SuccessRes,
};
use crate::networking::server;

pub fn handle_init_db(config: Arc<Config>, validator: &str) {
    CliUI::print_header("Initialize Database");
    match Blockchain::init(config, validator) {
        Ok(_) => CliUI::print_text("Database initialized"),
        Err(e) => CliUI::print_error(&e.to_string()),
    }
}

pub fn handle_create_blockchain(config: Arc<Config>, address: &str) {
    CliUI::print_header("Create Blockchain");
    if address.is_empty() {
        CliUI::print_error("Validator address is required");
        return;
    }

    match Blockchain::init(config, address) {
        Ok(_) => CliUI::print_text("Blockchain created successfully"),
        Err(e) => CliUI::print_error(&e.to_string()),
    }
}

pub fn handle_genesis_proof_block(config: Arc<Config>, address: &str) {
    CliUI::print_header("Genesis Proof Block");

    let chain = match Blockchain::open(config.clone()) {
        Ok(chain) => chain,
        Err(e) => {
            CliUI::print_error(&e.to_string());
            return;
        }
    };

    match Block::genesis(address, &config) {
        Ok(genesis) => {
            chain.append(&genesis);
            CliUI::print_text("Genesis block created");
        }
        Err(e) => CliUI::print_error(&e.to_string()),
    }
}

pub async fn handle_start(config: Arc<Config>, validator: &str) {
    let chain = match Blockchain::open(config.clone()) {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            CliUI::print_error(&e.to_string());
            return;
        }
    };

    if let Err(e) = server::start_server(config, chain, validator).await {
        CliUI::print_error(&e.to_string());
    }
}

/// One typed method call against the local RPC server.
async fn rpc_post<Req: Serialize, Res: DeserializeOwned>(
    config: &Config,
    method: &str,
    args: &Req,
) -> Result<Res, Box<dyn Error>> {
    let url = format!("http://localhost:{}/rpc/{}", config.rpc_port, method);
    let client = reqwest::Client::new();

    let response = client.post(&url).json(args).send().await.map_err(|e| {
        format!(
            "[handlers::rpc_post] ERROR: failed to reach RPC server: {}",
            e
        )
    })?;

    if !response.status().is_success() {
        return Err(format!(
            "[handlers::rpc_post] ERROR: {} failed with status {}",
            method,
            response.status()
        )
        .into());
    }

    response
        .json()
        .await
        .map_err(|e| format!("[handlers::rpc_post] ERROR: invalid response: {}", e).into())
}

pub async fn handle_rpc(config: Arc<Config>, command: &RpcCommands) {
    if let Err(e) = run_rpc_command(&config, command).await {
        CliUI::print_error(&e.to_string());
    }
}

async fn run_rpc_command(config: &Config, command: &RpcCommands) -> Result<(), Box<dyn Error>> {
    match command {
        RpcCommands::GetBlockNumber => {
            let res: HeightRes = rpc_post(config, "getBlockNumber", &json!({})).await?;
            CliUI::print_kv("Block Number", &res.height.to_string());
        }
        RpcCommands::GetBestHeight => {
            let res: HeightRes = rpc_post(config, "getBestHeight", &json!({})).await?;
            CliUI::print_kv("Best Height", &res.height.to_string());
        }
        RpcCommands::GetLastBlockHash => {
            let res: GetLastBlockHashRes =
                rpc_post(config, "getLastBlockHash", &json!({})).await?;
            CliUI::print_kv("Last Block Hash", &res.hash);
        }
        RpcCommands::GetBlock { hash } => {
            let args = GetBlockArgs { hash: hash.clone() };
            let res: GetBlockRes = rpc_post(config, "getBlock", &args).await?;
            CliUI::print_text(&res.block.to_string());
        }
        RpcCommands::GetBlockHashes => {
            let res: GetBlockHashesRes = rpc_post(config, "getBlockHashes", &json!({})).await?;
            for (i, hash) in res.hash.iter().enumerate() {
                CliUI::print_kv(&format!("Block {}", i), hash);
            }
        }
        RpcCommands::GetBlockList => {
            let res: GetBlockListRes = rpc_post(config, "getBlockList", &json!({})).await?;
            for block in &res.block {
                CliUI::print_text(&block.to_string());
            }
        }
        RpcCommands::GetDifficulty { height } => {
            let args = GetDifficultyArgs { height: *height };
            let res: GetDifficultyRes = rpc_post(config, "getDifficulty", &args).await?;
            CliUI::print_kv("Difficulty", &res.difficulty.to_string());
        }
        RpcCommands::GetWork => {
            let res: GetWorkRes = rpc_post(config, "getWork", &json!({})).await?;
            CliUI::print_kv("Current PoW Hash", &res.current_pow_hash);
            CliUI::print_kv("Seed Hash", &res.seed_hash);
            CliUI::print_kv("Target Threshold", &res.target_threshold);
        }
        RpcCommands::GetHashRate => {
            let res: HashRateRes = rpc_post(config, "getHashRate", &json!({})).await?;
            CliUI::print_kv("Hash Rate", &res.hashrate.to_string());
        }
        RpcCommands::Coinbase => {
            let res: CoinbaseRes = rpc_post(config, "coinbase", &json!({})).await?;
            CliUI::print_kv("Coinbase Address", &res.coinbase_address);
        }
        RpcCommands::Mining => {
            let res: MiningRes = rpc_post(config, "mining", &json!({})).await?;
            CliUI::print_kv("Is Mining", &res.is_mining.to_string());
        }
        RpcCommands::AddPeer { peer } => {
            let args = PeerArgs {
                peer_address: peer.clone(),
            };
            let res: SuccessRes = rpc_post(config, "addPeer", &args).await?;
            CliUI::print_kv("Success", &res.success.to_string());
        }
        RpcCommands::GetDataDir => {
            let res: GetDataDirRes = rpc_post(config, "getDataDir", &json!({})).await?;
            CliUI::print_kv("Data Directory", &res.data_directory);
        }
        RpcCommands::GetNodeInfo => {
            let res: GetNodeInfoRes = rpc_post(config, "getNodeInfo", &json!({})).await?;
            CliUI::print_kv("Enode", &res.enode);
            CliUI::print_kv("ID", &res.id);
            CliUI::print_kv("IP", &res.ip);
            CliUI::print_kv("Listen Port", &res.listen_port.to_string());
            CliUI::print_kv("Validator", &res.validator);
            CliUI::print_kv("Name", &res.name);
        }
        RpcCommands::GetPeer => {
            let res: GetPeerRes = rpc_post(config, "getPeer", &json!({})).await?;
            for peer in &res.peers {
                CliUI::print_kv("Peer", &format!("{} ({}:{})", peer.id, peer.ip, peer.listen_port));
            }
        }
        RpcCommands::RemovePeer { peer } => {
            let args = PeerArgs {
                peer_address: peer.clone(),
            };
            let res: SuccessRes = rpc_post(config, "removePeer", &args).await?;
            CliUI::print_kv("Success", &res.success.to_string());
        }
        RpcCommands::SetXpbase { address } => {
            let args = SetXpbaseArgs {
                address: address.clone(),
            };
            let res: SuccessRes = rpc_post(config, "setXpbase", &args).await?;
            CliUI::print_kv("Success", &res.success.to_string());
        }
        RpcCommands::GetNodeHashRate => {
            let res: HashRateRes = rpc_post(config, "getNodeHashRate", &json!({})).await?;
            CliUI::print_kv("Node Hash Rate", &res.hashrate.to_string());
        }
    }

    Ok(())
}

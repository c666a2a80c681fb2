use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;

use crate::cli::handlers;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "proofnode")]
#[command(about = "CLI for managing a proof-of-work blockchain node", long_about = None)]
#[command(version = "1.0")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the block database with a genesis block
    #[command(name = "initDB")]
    InitDb {
        #[arg(long, help = "Set validator address")]
        validator: String,
    },

    /// Create a blockchain with a validator address
    #[command(name = "createBlockchain")]
    CreateBlockchain {
        #[arg(long, help = "Set validator address")]
        address: String,
    },

    /// Mine a genesis proof block onto the open store
    #[command(name = "genesisProofBlock")]
    GenesisProofBlock {
        #[arg(long, help = "Set validator for the genesis block")]
        address: String,
    },

    /// Start the node
    #[command(name = "start")]
    Start {
        #[arg(long, help = "Set validator address")]
        validator: String,
    },

    /// RPC commands for managing the blockchain node
    #[command(name = "rpc")]
    Rpc {
        #[command(subcommand)]
        command: RpcCommands,
    },
}

#[derive(Subcommand)]
pub enum RpcCommands {
    /// Get the current block number
    #[command(name = "getBlockNumber")]
    GetBlockNumber,

    /// Get the best block height
    #[command(name = "getBestHeight")]
    GetBestHeight,

    /// Get the hash of the last block
    #[command(name = "getLastBlockHash")]
    GetLastBlockHash,

    /// Get block details by hash
    #[command(name = "getBlock")]
    GetBlock {
        #[arg(long, help = "Hash of the block to retrieve")]
        hash: String,
    },

    /// Get all block hashes
    #[command(name = "getBlockHashes")]
    GetBlockHashes,

    /// Retrieve and display the list of all blocks
    #[command(name = "getBlockList")]
    GetBlockList,

    /// Get the difficulty for a block height
    #[command(name = "getDifficulty")]
    GetDifficulty {
        #[arg(long, help = "Height to compute the difficulty for")]
        height: i64,
    },

    /// Get the current proof-of-work assignment
    #[command(name = "getWork")]
    GetWork,

    /// Get the network hash rate
    #[command(name = "getHashRate")]
    GetHashRate,

    /// Get the coinbase address
    #[command(name = "coinbase")]
    Coinbase,

    /// Check whether the node is mining
    #[command(name = "mining")]
    Mining,

    /// Add a peer
    #[command(name = "addPeer")]
    AddPeer {
        #[arg(long, help = "Peer address to add")]
        peer: String,
    },

    /// Get the data directory
    #[command(name = "getDataDir")]
    GetDataDir,

    /// Get node information
    #[command(name = "getNodeInfo")]
    GetNodeInfo,

    /// Get connected peers
    #[command(name = "getPeer")]
    GetPeer,

    /// Remove a peer
    #[command(name = "removePeer")]
    RemovePeer {
        #[arg(long, help = "Peer address to remove")]
        peer: String,
    },

    /// Set the reward address
    #[command(name = "setXpbase")]
    SetXpbase {
        #[arg(long, help = "Reward address")]
        address: String,
    },

    /// Get this node's hash rate
    #[command(name = "getNodeHashRate")]
    GetNodeHashRate,
}

impl Cli {
    pub async fn run(config: Config) {
        let config = Arc::new(config);
        let cli = Cli::parse();

        match &cli.command {
            Commands::InitDb { validator } => handlers::handle_init_db(config, validator),
            Commands::CreateBlockchain { address } => {
                handlers::handle_create_blockchain(config, address)
            }
            Commands::GenesisProofBlock { address } => {
                handlers::handle_genesis_proof_block(config, address)
            }
            Commands::Start { validator } => handlers::handle_start(config, validator).await,
            Commands::Rpc { command } => handlers::handle_rpc(config, command).await,
        }
    }
}

pub struct CliUI {}

impl CliUI {
    pub fn print_header(text: &str) {
        println!("{}", text.bold().underline().green());
    }

    pub fn print_kv(label: &str, value: &str) {
        println!("{}: {}", label.blue().bold(), value.cyan());
    }

    pub fn print_text(text: &str) {
        println!("{}", text.white());
    }

    pub fn print_error(text: &str) {
        eprintln!("{}", text.red().bold());
    }
}

use std::error::Error;
use std::fs::File;
use std::io::BufReader;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH: &str = "./tmp/config.json";

/// Node configuration. Loaded once before the server starts; the difficulty
/// constants ride along so the chain and miner never reach for globals.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub chain_id: i64,
    pub port: u16,
    pub rpc_port: u16,
    pub node_type: String,
    pub mining: bool,
    pub data_dir: String,
    #[serde(with = "crate::blockchain::block::difficulty_json")]
    pub default_difficulty: BigUint,
    pub difficulty_change_cycle: i64,
    pub resource_interval: i64,
    pub max_difficulty_weight: f64,
    pub min_difficulty_weight: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chain_id: 1,
            port: 8080,
            rpc_port: 8545,
            node_type: "full-node".to_string(),
            mining: false,
            data_dir: "./tmp".to_string(),
            default_difficulty: BigUint::from(500_000u32),
            difficulty_change_cycle: 20,
            resource_interval: 20,
            max_difficulty_weight: 4.0,
            min_difficulty_weight: 0.25,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn Error>> {
        Self::load_from(CONFIG_PATH)
    }

    pub fn load_from(path: &str) -> Result<Self, Box<dyn Error>> {
        let file = File::open(path)
            .map_err(|e| format!("[config::load] ERROR: could not open config file: {}", e))?;
        let config = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| format!("[config::load] ERROR: could not decode config file: {}", e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hardcoded_values() {
        let config = Config::default();
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.default_difficulty, BigUint::from(500_000u32));
        assert_eq!(config.difficulty_change_cycle, 20);
        assert_eq!(config.resource_interval, 20);
        assert_eq!(config.max_difficulty_weight, 4.0);
        assert_eq!(config.min_difficulty_weight, 0.25);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: Config =
            serde_json::from_str(r#"{"chainId":1001,"port":3000,"mining":true}"#).unwrap();
        assert_eq!(config.chain_id, 1001);
        assert_eq!(config.port, 3000);
        assert!(config.mining);
        assert_eq!(config.rpc_port, 8545);
        assert_eq!(config.default_difficulty, BigUint::from(500_000u32));
    }
}

mod blockchain;
mod cli;
mod config;
mod mining;
mod networking;
mod utils;

use env_logger::Env;
use log::warn;

use crate::cli::cli::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(_) => {
            warn!(
                "Config file does not exist at {}, using defaults",
                config::CONFIG_PATH
            );
            Config::default()
        }
    };

    Cli::run(config).await;
}

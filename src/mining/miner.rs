use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, info};
use tokio::sync::{mpsc, watch};
use tokio::{task, time};

use crate::blockchain::block::{Block, HexBytes};
use crate::blockchain::chain::Blockchain;
use crate::blockchain::proof::ProofOfWork;

/// Mining loop. Builds a candidate on the current tip, waits out the
/// anti-fork delay, then searches until it wins or the coordinator cancels.
/// Won blocks are published on `mined`; appending them is the coordinator's
/// job, never the miner's.
pub async fn run(
    mut cancel: watch::Receiver<bool>,
    chain: Arc<Blockchain>,
    validator: String,
    mined: mpsc::Sender<Block>,
) {
    loop {
        if *cancel.borrow() {
            info!("Mining stopped.");
            return;
        }

        let last_block = chain.last_block();
        let height = last_block.height + 1;
        let mut block = Block {
            timestamp: unix_now(),
            hash: HexBytes::default(),
            prev_hash: last_block.hash.clone(),
            main_block_height: 0,
            main_block_hash: HexBytes::default(),
            nonce: HexBytes::default(),
            height,
            difficulty: chain.difficulty(height),
            miner: HexBytes::from(validator.as_str()),
            validator: HexBytes::from(validator.as_str()),
        };

        // Hold back one second so simultaneous winners fork less often.
        tokio::select! {
            _ = cancel.changed() => {
                info!("Mining stopped.");
                return;
            }
            _ = time::sleep(Duration::from_secs(1)) => {}
        }

        let stop = Arc::new(AtomicBool::new(false));
        let search_stop = stop.clone();
        let search_block = block.clone();
        let mut search = task::spawn_blocking(move || {
            ProofOfWork::new(&search_block)
                .run(&search_stop)
                .map_err(|e| e.to_string())
        });

        let result = tokio::select! {
            _ = cancel.changed() => {
                stop.store(true, Ordering::Relaxed);
                let _ = (&mut search).await;
                info!("Mining interrupted before block completion.");
                return;
            }
            result = &mut search => result,
        };

        let nonce = match result {
            Ok(Ok(Some(nonce))) => nonce,
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => {
                error!("[miner::run] ERROR: {}", e);
                return;
            }
            Err(e) => {
                error!("[miner::run] ERROR: search task failed: {}", e);
                return;
            }
        };

        if *cancel.borrow() {
            info!("Mining interrupted before block completion.");
            return;
        }

        let pow = ProofOfWork::new(&block);
        block.hash = HexBytes(pow.final_hash(&nonce));
        block.nonce = HexBytes(nonce);
        info!("mined block:\n{}", block);

        if mined.send(block).await.is_err() {
            return;
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("[miner::run] ERROR: system clock is before the epoch")
        .as_secs() as i64
}

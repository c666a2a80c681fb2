use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use num_bigint::BigUint;
use num_traits::One;

use crate::blockchain::block::Block;
use crate::utils;

/// Proof-of-work search over a candidate block. The target comparison runs
/// on the block root (prev hash ‖ canonical JSON ‖ ascii nonce); the
/// persisted block hash is the separate, shorter `final_hash` construction.
pub struct ProofOfWork {
    block: Block,
}

impl ProofOfWork {
    pub fn new(block: &Block) -> Self {
        ProofOfWork {
            block: block.clone(),
        }
    }

    /// `2^256 / difficulty`, zero-padded to at least 64 lowercase hex chars.
    /// Fails before the search starts when the difficulty is below 1.
    pub fn hash_limit(&self) -> Result<String, Box<dyn Error>> {
        if self.block.difficulty < BigUint::one() {
            return Err("[proof::hash_limit] ERROR: invalid difficulty value".into());
        }

        let limit = (BigUint::one() << 256u32) / &self.block.difficulty;
        Ok(format!("{:0>64}", limit.to_str_radix(16)))
    }

    /// Digest of the pre-image for one candidate nonce, as lowercase hex.
    pub fn block_root(&self, nonce: &str) -> String {
        let json = self.block.serialize();
        let mut preimage =
            Vec::with_capacity(self.block.prev_hash.len() + json.len() + nonce.len());
        preimage.extend_from_slice(&self.block.prev_hash);
        preimage.extend_from_slice(&json);
        preimage.extend_from_slice(nonce.as_bytes());
        utils::sha256_hex(&preimage)
    }

    /// Parallel nonce search: one worker per core, each drawing random
    /// candidates until one lands under the target. Returns `None` once
    /// `stop` is raised; every worker observes the flag within one
    /// iteration. No fairness between workers.
    pub fn run(&self, stop: &AtomicBool) -> Result<Option<Vec<u8>>, Box<dyn Error>> {
        let limit = self.hash_limit()?;
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        // The candidate JSON does not change between nonces, so the
        // pre-image prefix is computed once for the whole search.
        let json = self.block.serialize();
        let mut prefix = Vec::with_capacity(self.block.prev_hash.len() + json.len());
        prefix.extend_from_slice(&self.block.prev_hash);
        prefix.extend_from_slice(&json);

        let found = AtomicBool::new(false);
        let (result_tx, result_rx) = mpsc::channel::<Vec<u8>>();

        let nonce = thread::scope(|scope| {
            for _ in 0..workers {
                let result_tx = result_tx.clone();
                let prefix = &prefix;
                let limit = limit.as_str();
                let found = &found;

                scope.spawn(move || loop {
                    if stop.load(Ordering::Relaxed) || found.load(Ordering::Relaxed) {
                        return;
                    }

                    let nonce = utils::random_hex_64bit();
                    let mut preimage = Vec::with_capacity(prefix.len() + nonce.len());
                    preimage.extend_from_slice(prefix);
                    preimage.extend_from_slice(nonce.as_bytes());
                    let block_root = utils::sha256_hex(&preimage);

                    if block_root.as_str() <= limit {
                        if !found.swap(true, Ordering::SeqCst) {
                            let nonce_bytes = hex::decode(&nonce)
                                .expect("[proof::run] ERROR: invalid nonce hex");
                            let _ = result_tx.send(nonce_bytes);
                        }
                        return;
                    }
                });
            }

            drop(result_tx);
            // Err means every worker exited on the stop flag.
            result_rx.recv().ok()
        });

        Ok(nonce)
    }

    /// The persisted block hash: sha256(big-endian timestamp ‖ nonce bytes).
    pub fn final_hash(&self, nonce: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + nonce.len());
        data.extend_from_slice(&self.block.timestamp.to_be_bytes());
        data.extend_from_slice(nonce);
        utils::sha256_bytes(&data)
    }
}

use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{error, info};
use num_bigint::BigUint;
use num_traits::One;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};

use crate::blockchain::block::Block;
use crate::blockchain::iterator::ChainIterator;
use crate::config::Config;

pub const LAST_HASH_KEY: &[u8] = b"lh";

fn height_key(height: i64) -> Vec<u8> {
    format!("height-{}", height).into_bytes()
}

/// Fixed-point scale for the retarget weight. A 32-bit fraction covers the
/// clamped weight range exactly for the representable values.
const WEIGHT_SCALE_BITS: u32 = 32;
const WEIGHT_SCALE: u64 = 1 << WEIGHT_SCALE_BITS;

#[derive(Default)]
struct TipState {
    last_hash: Vec<u8>,
    current_block: Option<Block>,
}

/// The append-only chain store. One logical resource shared by the miner,
/// the network handlers, and RPC; every mutation goes through the internal
/// tip lock.
pub struct Blockchain {
    pub chain_id: String,
    config: Arc<Config>,
    db: DB,
    tip: Mutex<TipState>,
}

impl Blockchain {
    pub fn db_path(config: &Config) -> String {
        format!("{}/blocks_{}", config.data_dir, config.chain_id)
    }

    pub fn exists(config: &Config) -> bool {
        Path::new(&Self::db_path(config)).exists()
    }

    /// Creates the store and persists a freshly-mined genesis block. Fails
    /// when the store directory already exists.
    pub fn init(config: Arc<Config>, address: &str) -> Result<Self, Box<dyn Error>> {
        let path = Self::db_path(&config);
        info!("init blockchain path: {}", path);

        if Self::exists(&config) {
            return Err("[chain::init] ERROR: blockchain already exists".into());
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, &path)
            .map_err(|e| format!("[chain::init] ERROR: failed to open store: {}", e))?;

        let genesis = Block::genesis(address, &config)?;
        info!(
            "genesis block: {}",
            String::from_utf8_lossy(&genesis.serialize())
        );

        let chain = Blockchain {
            chain_id: config.chain_id.to_string(),
            config,
            db,
            tip: Mutex::new(TipState::default()),
        };
        chain.write_genesis(&genesis);

        Ok(chain)
    }

    /// Opens an existing store; fails when the directory is missing.
    pub fn open(config: Arc<Config>) -> Result<Self, Box<dyn Error>> {
        let path = Self::db_path(&config);
        info!("blockchain path: {}", path);

        if !Self::exists(&config) {
            return Err(
                "[chain::open] ERROR: no existing blockchain found, create one first".into(),
            );
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, &path)
            .map_err(|e| format!("[chain::open] ERROR: failed to open store: {}", e))?;

        let last_hash = db
            .get(LAST_HASH_KEY)
            .map_err(|e| format!("[chain::open] ERROR: store read failed: {}", e))?
            .unwrap_or_default();

        Ok(Blockchain {
            chain_id: config.chain_id.to_string(),
            config,
            db,
            tip: Mutex::new(TipState {
                last_hash,
                current_block: None,
            }),
        })
    }

    /// Writes the genesis keys directly, bypassing the parent-link check.
    /// Used at store creation and by the sync drain for height-0 blocks.
    pub fn write_genesis(&self, block: &Block) {
        let mut tip = self.lock_tip();

        let mut batch = WriteBatch::default();
        batch.put(&block.hash, block.serialize());
        batch.put(LAST_HASH_KEY, &block.hash);
        batch.put(height_key(block.height), &block.hash);
        self.db
            .write(batch)
            .expect("[chain::write_genesis] ERROR: store write failed");

        tip.last_hash = block.hash.to_vec();
    }

    /// Appends a block that extends the tip. Duplicate hashes are refused
    /// silently; a wrong height or parent hash is logged and dropped. The
    /// three keys land in one atomic batch.
    pub fn append(&self, block: &Block) {
        let mut tip = self.lock_tip();

        let already_stored = self
            .db
            .get(&block.hash)
            .expect("[chain::append] ERROR: store read failed")
            .is_some();
        if already_stored {
            return;
        }

        let last_hash = self
            .db
            .get(LAST_HASH_KEY)
            .expect("[chain::append] ERROR: store read failed")
            .expect("[chain::append] ERROR: last hash missing from store");
        let last_data = self
            .db
            .get(&last_hash)
            .expect("[chain::append] ERROR: store read failed")
            .expect("[chain::append] ERROR: tip block missing from store");
        let last_block =
            Block::deserialize(&last_data).expect("[chain::append] ERROR: corrupt tip block");

        if block.height <= last_block.height {
            error!(
                "block height check failed: {} does not extend tip height {}",
                block.height, last_block.height
            );
            return;
        }
        if block.prev_hash != last_block.hash {
            error!(
                "block hash check failed: prev hash of block {} does not match tip",
                block.height
            );
            return;
        }

        let data = block.serialize();
        info!("appending block: {}", String::from_utf8_lossy(&data));

        let mut batch = WriteBatch::default();
        batch.put(&block.hash, &data);
        batch.put(LAST_HASH_KEY, &block.hash);
        batch.put(height_key(block.height), &block.hash);
        self.db
            .write(batch)
            .expect("[chain::append] ERROR: store write failed");

        tip.current_block = Some(block.clone());
        tip.last_hash = block.hash.to_vec();
    }

    /// The block at `"lh"`, or the default sentinel when the pointer is
    /// missing.
    pub fn last_block(&self) -> Block {
        let last_hash = match self
            .db
            .get(LAST_HASH_KEY)
            .expect("[chain::last_block] ERROR: store read failed")
        {
            Some(hash) => hash,
            None => return Block::default_block(),
        };

        match self
            .db
            .get(&last_hash)
            .expect("[chain::last_block] ERROR: store read failed")
        {
            Some(data) => {
                Block::deserialize(&data).expect("[chain::last_block] ERROR: corrupt tip block")
            }
            None => Block::default_block(),
        }
    }

    pub fn last_hash(&self) -> Result<Vec<u8>, Box<dyn Error>> {
        self.db
            .get(LAST_HASH_KEY)
            .map_err(|e| format!("[chain::last_hash] ERROR: store read failed: {}", e))?
            .ok_or_else(|| "[chain::last_hash] ERROR: last hash missing from store".into())
    }

    pub fn best_height(&self) -> i64 {
        self.last_block().height
    }

    /// In-memory tip hash; empty while the chain is empty or freshly reset.
    pub fn tip_hash(&self) -> Vec<u8> {
        self.lock_tip().last_hash.clone()
    }

    /// In-memory copy of the last block this process appended, if any. Not
    /// rebuilt on open; restarted nodes report `None` until they append.
    pub fn current_block(&self) -> Option<Block> {
        self.lock_tip().current_block.clone()
    }

    /// Forgets the in-memory tip after a reset.
    pub fn clear_tip(&self) {
        let mut tip = self.lock_tip();
        tip.last_hash = Vec::new();
        tip.current_block = None;
    }

    pub fn get_block(&self, hash: &[u8]) -> Result<Block, Box<dyn Error>> {
        let data = self
            .db
            .get(hash)
            .map_err(|e| format!("[chain::get_block] ERROR: store read failed: {}", e))?
            .ok_or_else(|| format!("block {} not found", hex::encode(hash)))?;
        Block::deserialize(&data)
    }

    pub fn get_block_by_height(&self, height: i64) -> Result<Block, Box<dyn Error>> {
        let hash = self
            .db
            .get(height_key(height))
            .map_err(|e| format!("[chain::get_block_by_height] ERROR: store read failed: {}", e))?
            .ok_or_else(|| format!("block with height {} not found", height))?;
        self.get_block(&hash)
    }

    /// Hashes of every block from genesis up to the tip, in height order.
    pub fn block_hashes(&self) -> Vec<Vec<u8>> {
        let mut hashes = Vec::new();
        let mut height = 0;

        while let Ok(block) = self.get_block_by_height(height) {
            hashes.push(block.hash.to_vec());
            height += 1;
        }

        hashes
    }

    /// Every block from the tip back to genesis.
    pub fn block_list(&self) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut iter = self.iterator();

        while let Some(block) = iter.next_block() {
            let at_genesis = block.prev_hash.is_empty();
            blocks.push(block);
            if at_genesis {
                break;
            }
        }

        blocks
    }

    /// Serialized blocks with heights in `[start, end]`, tip-first.
    pub fn blocks_in_range(&self, start_height: i64, end_height: i64) -> Vec<Vec<u8>> {
        let mut blocks = Vec::new();
        let mut iter = self.iterator();

        while let Some(block) = iter.next_block() {
            if block.height < start_height {
                break;
            }
            if block.height <= end_height {
                blocks.push(block.serialize());
            }
        }

        blocks
    }

    pub fn iterator(&self) -> ChainIterator<'_> {
        ChainIterator::new(self)
    }

    pub(crate) fn get_raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db
            .get(key)
            .expect("[chain::get_raw] ERROR: store read failed")
    }

    /// Deletes every key. Only used for divergent-chain recovery.
    pub fn reset(&self) {
        let keys: Vec<Vec<u8>> = self
            .db
            .iterator(IteratorMode::Start)
            .map(|entry| {
                let (key, _) = entry.expect("[chain::reset] ERROR: store iteration failed");
                key.to_vec()
            })
            .collect();

        for key in keys {
            self.db
                .delete(&key)
                .expect("[chain::reset] ERROR: store delete failed");
        }

        info!("local database reset complete");
    }

    /// Difficulty for the block at `height`. Recomputed only on retarget
    /// boundaries; inherited from the previous block otherwise.
    pub fn difficulty(&self, height: i64) -> BigUint {
        let config = &self.config;

        if height < config.difficulty_change_cycle + 1 {
            return config.default_difficulty.clone();
        }
        if height % config.difficulty_change_cycle != 1 {
            let block = self
                .get_block_by_height(height - 1)
                .expect("[chain::difficulty] ERROR: missing block below target height");
            return block.difficulty;
        }

        let end_block = self
            .get_block_by_height(height - 1)
            .expect("[chain::difficulty] ERROR: missing cycle end block");
        let start_block = self
            .get_block_by_height(height - config.difficulty_change_cycle - 1)
            .expect("[chain::difficulty] ERROR: missing cycle start block");

        let gap = end_block.timestamp - start_block.timestamp;
        let standard_gap = config.resource_interval * config.difficulty_change_cycle;

        // A zero gap means the cycle ran arbitrarily fast; the clamp turns
        // that into the maximum raise.
        let mut weight = if gap == 0 {
            f64::INFINITY
        } else {
            standard_gap as f64 / gap as f64
        };
        if weight > config.max_difficulty_weight {
            weight = config.max_difficulty_weight;
        }
        if weight < config.min_difficulty_weight {
            weight = config.min_difficulty_weight;
        }

        let scaled_weight = (weight * WEIGHT_SCALE as f64) as u64;
        let result = (&end_block.difficulty * BigUint::from(scaled_weight)) >> WEIGHT_SCALE_BITS;

        if result <= BigUint::one() {
            BigUint::one()
        } else {
            result
        }
    }

    fn lock_tip(&self) -> std::sync::MutexGuard<'_, TipState> {
        self.tip
            .lock()
            .expect("[chain] ERROR: tip lock poisoned")
    }
}

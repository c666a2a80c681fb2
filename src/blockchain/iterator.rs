use crate::blockchain::block::Block;
use crate::blockchain::chain::Blockchain;

/// Single-use cursor from the tip back to genesis. Captures the tip at
/// creation; do not interleave with appends.
pub struct ChainIterator<'a> {
    current_hash: Vec<u8>,
    chain: &'a Blockchain,
}

impl<'a> ChainIterator<'a> {
    pub(crate) fn new(chain: &'a Blockchain) -> Self {
        ChainIterator {
            current_hash: chain.tip_hash(),
            chain,
        }
    }

    /// Loads the block at the cursor and steps to its parent. Returns `None`
    /// once a lookup fails, which includes the step past genesis where
    /// `prev_hash` is empty.
    pub fn next_block(&mut self) -> Option<Block> {
        let data = self.chain.get_raw(&self.current_hash)?;
        let block = Block::deserialize(&data)
            .expect("[iterator::next_block] ERROR: corrupt block in store");
        self.current_hash = block.prev_hash.to_vec();
        Some(block)
    }
}

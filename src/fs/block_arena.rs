use log::trace;

use crate::utils::fs_size_calculator::reserved_blocks;

use super::{BlockId, Errno, Volume, BLOCK_COUNT, BLOCK_SIZE};

/// for content block allocation
impl Volume {
    /// check if a block is marked as allocated
    pub fn block_allocated(&self, block: BlockId) -> bool {
        self.block_bitmap()
            .get(block.index())
            .as_deref()
            .copied()
            .unwrap_or(false)
    }

    /// allocate the lowest free block after the reserved region
    pub fn alloc_block(&mut self) -> Result<BlockId, Errno> {
        let reserved = reserved_blocks();
        let index = self.block_bitmap()[reserved..BLOCK_COUNT]
            .first_zero()
            .map(|p| p + reserved)
            .ok_or(libc::ENOSPC)?;
        self.block_bitmap_mut().set(index, true);
        trace!("alloc_block() -> {index}");
        Ok(BlockId(index as u32))
    }

    /// release a block
    ///
    /// The caller guarantees nothing references the block any more.
    pub fn free_block(&mut self, block: BlockId) {
        trace!("free_block({})", block.index());
        debug_assert!(block.index() >= reserved_blocks(), "freeing a reserved block");
        debug_assert!(self.block_allocated(block), "double free of a block");
        if block.index() < reserved_blocks() || block.index() >= BLOCK_COUNT {
            return;
        }
        self.block_bitmap_mut().set(block.index(), false);
    }

    pub fn free_block_count(&self) -> usize {
        self.block_bitmap().count_zeros()
    }

    /// read only view of one block
    #[inline]
    pub fn block(&self, block: BlockId) -> &[u8] {
        let start = block.index() * BLOCK_SIZE;
        &self.bytes()[start..start + BLOCK_SIZE]
    }

    /// writable view of one block
    #[inline]
    pub fn block_mut(&mut self, block: BlockId) -> &mut [u8] {
        let start = block.index() * BLOCK_SIZE;
        &mut self.bytes_mut()[start..start + BLOCK_SIZE]
    }
}

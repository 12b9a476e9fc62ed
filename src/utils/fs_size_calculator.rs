//! This module contains functions to calculate the size and position of different fs components

use crate::fs::{BLOCK_COUNT, BLOCK_SIZE, INODE_SIZE, MAX_INODE_COUNT};

/// calculate needed bitmap size
/// # Arguments
/// - `element_count`: the number of blocks or inodes tracked
/// # Return
/// the size of the bitmap in bytes
/// # Example
/// ```
/// use chainfs::utils::fs_size_calculator::bitmap_size;
/// assert_eq!(bitmap_size(256), 32);
/// assert_eq!(bitmap_size(100), 13);
/// ```
pub const fn bitmap_size(element_count: usize) -> usize {
    element_count.div_ceil(8)
}

/// calculate needed Inode Table size
/// # Example
/// ```
/// use chainfs::utils::fs_size_calculator::inode_table_size;
/// assert_eq!(inode_table_size(256), 256 * 32);
/// ```
pub const fn inode_table_size(inode_count: usize) -> usize {
    inode_count * INODE_SIZE
}

/// byte offset of the block bitmap, it opens the image
pub const fn block_bitmap_offset() -> usize {
    0
}

/// byte offset of the inode bitmap, right after the block bitmap
pub const fn inode_bitmap_offset() -> usize {
    block_bitmap_offset() + bitmap_size(BLOCK_COUNT)
}

/// byte offset of the inode table, right after the inode bitmap
pub const fn inode_table_offset() -> usize {
    inode_bitmap_offset() + bitmap_size(MAX_INODE_COUNT)
}

/// bytes taken by both bitmaps and the inode table
/// # Example
/// ```
/// use chainfs::utils::fs_size_calculator::reserved_size;
/// assert_eq!(reserved_size(), 32 + 32 + 256 * 32);
/// ```
pub const fn reserved_size() -> usize {
    inode_table_offset() + inode_table_size(MAX_INODE_COUNT)
}

/// blocks that hold the metadata and are never handed out by block allocation
/// # Example
/// ```
/// use chainfs::utils::fs_size_calculator::reserved_blocks;
/// assert_eq!(reserved_blocks(), 3);
/// ```
pub const fn reserved_blocks() -> usize {
    bytes_to_blocks(reserved_size())
}

/// total size of an image file
pub const fn image_size() -> usize {
    BLOCK_SIZE * BLOCK_COUNT
}

/// number of blocks needed to store `bytes` bytes
/// # Example
/// ```
/// use chainfs::utils::fs_size_calculator::bytes_to_blocks;
/// assert_eq!(bytes_to_blocks(0), 0);
/// assert_eq!(bytes_to_blocks(1), 1);
/// assert_eq!(bytes_to_blocks(4096), 1);
/// assert_eq!(bytes_to_blocks(4097), 2);
/// ```
pub const fn bytes_to_blocks(bytes: usize) -> usize {
    bytes.div_ceil(BLOCK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_fits_in_reserved_blocks() {
        assert!(reserved_size() <= reserved_blocks() * BLOCK_SIZE);
        assert!(reserved_blocks() < BLOCK_COUNT);
        assert_eq!(inode_table_offset(), 64);
    }

    #[test]
    fn test_image_size() {
        assert_eq!(image_size(), 1 << 20);
    }
}

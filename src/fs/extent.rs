//! growing and shrinking inode chains, and byte-level access to their content
//!
//! Both directions work on the *current* last link of the chain,
//! re-discovered on every step, because one call may cross block and inode boundaries.
use log::debug;
use smallvec::SmallVec;

use crate::utils::fs_size_calculator::bytes_to_blocks;

use super::{
    BlockId, Errno, InodeId, LinkId, Volume, BLOCK_SIZE, INODE_MAX_LOCAL_SIZE, LOCAL_BLOCK_CAP,
};

/// growth that stopped early
///
/// `grown` bytes were committed before `errno` ended the operation;
/// they stay part of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortGrowth {
    pub grown: usize,
    pub errno: Errno,
}

/// a contiguous piece of a byte range that lives in a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockSpan {
    block: BlockId,
    /// offset inside the block
    start: usize,
    len: usize,
}

impl Volume {
    /// grow a file by `additional` bytes
    /// # Return
    /// the number of bytes grown, always `additional` on success
    pub fn grow(&mut self, head: InodeId, additional: usize) -> Result<usize, ShortGrowth> {
        let mut remaining = additional;
        let short = |remaining: usize, errno: Errno| ShortGrowth {
            grown: additional - remaining,
            errno,
        };

        while remaining > 0 {
            let last = self
                .last_link(head)
                .map_err(|errno| short(remaining, errno))?;
            let mut inode = self.read_link(last).map_err(|errno| short(remaining, errno))?;
            let used = inode.used_blocks();

            if bytes_to_blocks(inode.size + remaining) == used {
                // fits in the partially used last block
                inode.size += remaining;
                self.write_link(last, &inode)
                    .map_err(|errno| short(remaining, errno))?;
                remaining = 0;
            } else if used < LOCAL_BLOCK_CAP {
                let block = self.alloc_block().map_err(|errno| short(remaining, errno))?;
                debug!("inode {head}: block {} into slot {used}", block.index());
                let step = remaining.min(BLOCK_SIZE);
                inode.blocks[used] = Some(block);
                inode.size += step;
                if let Err(errno) = self.write_link(last, &inode) {
                    self.free_block(block);
                    return Err(short(remaining, errno));
                }
                remaining -= step;
            } else {
                // local slots are exhausted: pack this link, continue in a new one
                let room = INODE_MAX_LOCAL_SIZE - inode.size;
                inode.size = INODE_MAX_LOCAL_SIZE;
                self.write_link(last, &inode)
                    .map_err(|errno| short(remaining, errno))?;
                remaining -= room;
                if remaining == 0 {
                    break;
                }

                let next = self.alloc_link().map_err(|errno| short(remaining, errno))?;
                debug!("inode {head}: continuation inode {}", next.0);
                inode.next = Some(next);
                self.write_link(last, &inode)
                    .map_err(|errno| short(remaining, errno))?;
            }
        }

        Ok(additional)
    }

    /// grow a file and make the new bytes read as zero
    pub fn grow_zero(&mut self, head: InodeId, additional: usize) -> Result<usize, ShortGrowth> {
        let old_size = self.total_size(head).map_err(|errno| ShortGrowth { grown: 0, errno })?;
        let outcome = self.grow(head, additional);
        let grown = match outcome {
            Ok(grown) => grown,
            Err(short) => short.grown,
        };
        self.zero_range(head, old_size, grown)
            .map_err(|errno| ShortGrowth { grown, errno })?;
        outcome
    }

    /// shrink a file by `bytes` bytes, or to empty if it is shorter
    /// # Return
    /// the number of bytes actually removed
    ///
    /// Continuation inodes that become empty are unlinked and freed.
    /// The head itself is never freed here.
    pub fn shrink(&mut self, head: InodeId, bytes: usize) -> Result<usize, Errno> {
        let mut remaining = bytes;

        while remaining > 0 {
            let (previous, last, mut inode) = self.tail(head)?;
            if inode.size == 0 {
                match previous {
                    // left behind by growth that ran out of blocks
                    Some(previous) => {
                        self.unlink_continuation(previous, last)?;
                        continue;
                    }
                    None => break,
                }
            }
            let used = inode.used_blocks();

            if remaining < inode.size && bytes_to_blocks(inode.size - remaining) == used {
                inode.size -= remaining;
                self.write_link(last, &inode)?;
                remaining = 0;
                break;
            }

            // the last occupied block goes away entirely
            let slot = used - 1;
            let held = inode.size - BLOCK_SIZE * slot;
            if let Some(block) = inode.blocks[slot].take() {
                self.free_block(block);
            }
            inode.size -= held;
            remaining -= held.min(remaining);

            self.write_link(last, &inode)?;
            if let (Some(previous), 0) = (previous, inode.size) {
                self.unlink_continuation(previous, last)?;
            }
        }

        Ok(bytes - remaining)
    }

    /// detach the empty terminal link `last` from `previous` and free it
    fn unlink_continuation(&mut self, previous: LinkId, last: LinkId) -> Result<(), Errno> {
        let mut predecessor = self.read_link(previous)?;
        predecessor.next = None;
        self.write_link(previous, &predecessor)?;
        debug!("dropping continuation inode {}", last.0);
        self.free_link(last)
    }
}

/// byte access through the logical block map
impl Volume {
    /// split `[offset, offset + len)` of a file into per-block pieces
    fn block_spans(
        &self,
        head: InodeId,
        offset: usize,
        len: usize,
    ) -> Result<SmallVec<[BlockSpan; 4]>, Errno> {
        let mut spans = SmallVec::new();
        let mut done = 0;
        while done < len {
            let position = offset + done;
            let start = position % BLOCK_SIZE;
            let span_len = (BLOCK_SIZE - start).min(len - done);
            let block = self
                .logical_block(head, position / BLOCK_SIZE)?
                .ok_or(libc::EIO)?;
            spans.push(BlockSpan {
                block,
                start,
                len: span_len,
            });
            done += span_len;
        }
        Ok(spans)
    }

    /// copy file content starting at `offset` into `buf`
    /// # Return
    /// bytes copied, clipped at the end of the file
    pub fn read_at(&self, head: InodeId, offset: usize, buf: &mut [u8]) -> Result<usize, Errno> {
        let total = self.total_size(head)?;
        if offset >= total {
            return Ok(0);
        }
        let len = buf.len().min(total - offset);
        let mut done = 0;
        for span in self.block_spans(head, offset, len)? {
            buf[done..done + span.len]
                .copy_from_slice(&self.block(span.block)[span.start..span.start + span.len]);
            done += span.len;
        }
        Ok(len)
    }

    /// overwrite file content starting at `offset`
    ///
    /// The file is not grown, callers grow it first.
    /// # Return
    /// bytes copied, clipped at the end of the file
    pub fn write_at(&mut self, head: InodeId, offset: usize, data: &[u8]) -> Result<usize, Errno> {
        let total = self.total_size(head)?;
        if offset >= total {
            return Ok(0);
        }
        let len = data.len().min(total - offset);
        let mut done = 0;
        for span in self.block_spans(head, offset, len)? {
            self.block_mut(span.block)[span.start..span.start + span.len]
                .copy_from_slice(&data[done..done + span.len]);
            done += span.len;
        }
        Ok(len)
    }

    fn zero_range(&mut self, head: InodeId, offset: usize, len: usize) -> Result<(), Errno> {
        for span in self.block_spans(head, offset, len)? {
            self.block_mut(span.block)[span.start..span.start + span.len].fill(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{utils::fs_size_calculator::reserved_blocks, BLOCK_COUNT, MAX_INODE_COUNT};

    fn volume_with_file() -> (Volume, InodeId) {
        let mut volume = Volume::anonymous().expect("map anonymous volume");
        let head = volume.alloc_inode().expect("allocate head inode");
        (volume, head)
    }

    #[test]
    fn test_grow_within_block_only_adds_size() {
        let (mut volume, head) = volume_with_file();
        volume.grow(head, 10).unwrap();
        let blocks = volume.free_block_count();
        assert_eq!(volume.grow(head, 100), Ok(100));
        assert_eq!(volume.free_block_count(), blocks);
        assert_eq!(volume.total_size(head), Ok(110));
    }

    #[test]
    fn test_grow_across_blocks_and_inodes() {
        let (mut volume, head) = volume_with_file();
        let free_blocks = volume.free_block_count();

        assert_eq!(volume.grow(head, 10_000), Ok(10_000));
        assert_eq!(volume.total_size(head), Ok(10_000));
        assert_eq!(volume.chain_len(head), Ok(1));
        assert_eq!(volume.free_block_count(), free_blocks - 3);

        // the fifth block needs a continuation inode
        assert_eq!(volume.grow(head, 4 * BLOCK_SIZE), Ok(4 * BLOCK_SIZE));
        assert_eq!(volume.total_size(head), Ok(10_000 + 4 * BLOCK_SIZE));
        assert_eq!(volume.chain_len(head), Ok(2));
        assert_eq!(volume.free_block_count(), free_blocks - 7);

        let chain = volume.chain(head).unwrap();
        assert_eq!(chain[0].1.size, INODE_MAX_LOCAL_SIZE);
        assert_eq!(chain[1].1.size, 10_000 + 4 * BLOCK_SIZE - INODE_MAX_LOCAL_SIZE);
    }

    #[test]
    fn test_grow_exact_local_capacity_has_no_continuation() {
        let (mut volume, head) = volume_with_file();
        volume.grow(head, INODE_MAX_LOCAL_SIZE).unwrap();
        assert_eq!(volume.chain_len(head), Ok(1));
        volume.grow(head, 1).unwrap();
        assert_eq!(volume.chain_len(head), Ok(2));
        assert_eq!(volume.total_size(head), Ok(INODE_MAX_LOCAL_SIZE + 1));
    }

    #[test]
    fn test_grow_shrink_inverse() {
        let (mut volume, head) = volume_with_file();
        volume.grow(head, 123).unwrap();
        let free_blocks = volume.free_block_count();
        let free_inodes = volume.usage().free_inodes;

        for bytes in [1, 4000, 4096, 4097, 16_384, 16_385, 50_000, 200_000] {
            assert_eq!(volume.grow(head, bytes), Ok(bytes));
            assert_eq!(volume.shrink(head, bytes), Ok(bytes));
            assert_eq!(volume.total_size(head), Ok(123));
            assert_eq!(volume.free_block_count(), free_blocks);
            assert_eq!(volume.usage().free_inodes, free_inodes);
            assert_eq!(volume.chain_len(head), Ok(1));
        }
    }

    #[test]
    fn test_shrink_to_zero_keeps_head() {
        let (mut volume, head) = volume_with_file();
        volume.grow(head, 40_000).unwrap();
        assert_eq!(volume.shrink(head, 40_000), Ok(40_000));
        assert!(volume.inode_exists(head));
        let inode = volume.find_inode(head).unwrap();
        assert!(inode.is_empty());
        assert_eq!(volume.free_block_count(), BLOCK_COUNT - reserved_blocks());
        assert_eq!(volume.usage().free_inodes, MAX_INODE_COUNT - 1);
    }

    #[test]
    fn test_shrink_more_than_size_stops_at_empty() {
        let (mut volume, head) = volume_with_file();
        volume.grow(head, 5000).unwrap();
        assert_eq!(volume.shrink(head, 9000), Ok(5000));
        assert_eq!(volume.total_size(head), Ok(0));
        assert_eq!(volume.shrink(head, 1), Ok(0));
    }

    #[test]
    fn test_grow_reports_partial_growth_when_blocks_run_out() {
        let (mut volume, head) = volume_with_file();
        let available = volume.free_block_count();
        let wanted = (available + 2) * BLOCK_SIZE;

        let short = volume.grow(head, wanted).unwrap_err();
        assert_eq!(short.errno, libc::ENOSPC);
        assert_eq!(short.grown, available * BLOCK_SIZE);
        // committed growth stays
        assert_eq!(volume.total_size(head), Ok(short.grown));
        assert_eq!(volume.free_block_count(), 0);

        // and can be released again
        assert_eq!(volume.shrink(head, short.grown), Ok(short.grown));
        assert_eq!(volume.free_block_count(), available);
        assert_eq!(volume.chain_len(head), Ok(1));
    }

    #[test]
    fn test_shrink_drops_empty_continuation_left_by_short_growth() {
        let (mut volume, head) = volume_with_file();
        while volume.free_block_count() > LOCAL_BLOCK_CAP {
            volume.alloc_block().unwrap();
        }
        let free_inodes = volume.usage().free_inodes;

        // the head fills up, the continuation gets no block
        let short = volume.grow(head, INODE_MAX_LOCAL_SIZE + 1).unwrap_err();
        assert_eq!(short.grown, INODE_MAX_LOCAL_SIZE);
        assert_eq!(volume.chain_len(head), Ok(2));
        assert_eq!(volume.usage().free_inodes, free_inodes - 1);

        assert_eq!(volume.shrink(head, INODE_MAX_LOCAL_SIZE), Ok(INODE_MAX_LOCAL_SIZE));
        assert_eq!(volume.chain_len(head), Ok(1));
        assert_eq!(volume.usage().free_inodes, free_inodes);
        assert_eq!(volume.free_block_count(), LOCAL_BLOCK_CAP);
    }

    #[test]
    fn test_grow_reports_partial_growth_when_inodes_run_out() {
        let (mut volume, head) = volume_with_file();
        while volume.alloc_inode().is_ok() {}

        let short = volume.grow(head, INODE_MAX_LOCAL_SIZE + 10).unwrap_err();
        assert_eq!(short.errno, libc::ENOSPC);
        assert_eq!(short.grown, INODE_MAX_LOCAL_SIZE);
        assert_eq!(volume.total_size(head), Ok(INODE_MAX_LOCAL_SIZE));
    }

    #[test]
    fn test_grow_zero_clears_recycled_blocks() {
        let (mut volume, head) = volume_with_file();
        volume.grow(head, 3 * BLOCK_SIZE).unwrap();
        volume.write_at(head, 0, &vec![0xee; 3 * BLOCK_SIZE]).unwrap();
        volume.shrink(head, 3 * BLOCK_SIZE - 10).unwrap();

        // stale bytes still sit in the freed blocks and after the new end
        volume.grow_zero(head, 2 * BLOCK_SIZE).unwrap();
        let mut buf = vec![0xffu8; 2 * BLOCK_SIZE + 10];
        assert_eq!(volume.read_at(head, 0, &mut buf), Ok(2 * BLOCK_SIZE + 10));
        assert!(buf[..10].iter().all(|b| *b == 0xee));
        assert!(buf[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_write_across_chain() {
        let (mut volume, head) = volume_with_file();
        let data: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
        volume.grow(head, data.len()).unwrap();
        assert_eq!(volume.write_at(head, 0, &data), Ok(data.len()));

        let mut buf = vec![0u8; data.len()];
        assert_eq!(volume.read_at(head, 0, &mut buf), Ok(data.len()));
        assert_eq!(buf, data);

        // unaligned window crossing the head/continuation boundary
        let mut window = vec![0u8; 300];
        let offset = INODE_MAX_LOCAL_SIZE - 150;
        assert_eq!(volume.read_at(head, offset, &mut window), Ok(300));
        assert_eq!(window.as_slice(), &data[offset..offset + 300]);
    }

    #[test]
    fn test_read_and_write_clip_at_end() {
        let (mut volume, head) = volume_with_file();
        volume.grow(head, 100).unwrap();
        assert_eq!(volume.write_at(head, 90, &[1u8; 50]), Ok(10));
        let mut buf = [0u8; 50];
        assert_eq!(volume.read_at(head, 90, &mut buf), Ok(10));
        assert_eq!(&buf[..10], &[1u8; 10]);
        assert_eq!(volume.read_at(head, 100, &mut buf), Ok(0));
        assert_eq!(volume.write_at(head, 200, &[1u8; 5]), Ok(0));
    }
}

use serde::{Deserialize, Serialize};

use crate::utils::{fs_size_calculator::bytes_to_blocks, traits::FixedRecord};

use super::{BlockId, LinkId, DEFAULT_FILE_MODE, INODE_SIZE, LOCAL_BLOCK_CAP, MODE_DIR, MODE_TYPE_MASK};

/// sentinel for "no block" and "no continuation" on disk
const NONE: i32 = -1;

/// the inode record exactly as stored in the inode table
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InodeRecord {
    refs: i32,
    mode: u32,
    size: i32,
    blocks: [i32; LOCAL_BLOCK_CAP],
    next: i32,
}

impl FixedRecord for InodeRecord {
    const ENCODED_SIZE: usize = INODE_SIZE;
}

/// one link of an inode chain
///
/// `size` only counts the bytes held by this record's own block slots,
/// a file's length is the sum over its whole chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub refs: u32,
    pub mode: u32,
    pub size: usize,
    pub(crate) blocks: [Option<BlockId>; LOCAL_BLOCK_CAP],
    pub(crate) next: Option<LinkId>,
}

impl Default for Inode {
    fn default() -> Self {
        Inode {
            refs: 0,
            mode: DEFAULT_FILE_MODE,
            size: 0,
            blocks: [None; LOCAL_BLOCK_CAP],
            next: None,
        }
    }
}

impl From<InodeRecord> for Inode {
    fn from(record: InodeRecord) -> Self {
        let to_option = |raw: i32| u32::try_from(raw).ok();
        Inode {
            refs: record.refs.max(0) as u32,
            mode: record.mode,
            size: record.size.max(0) as usize,
            blocks: record.blocks.map(|b| to_option(b).map(BlockId)),
            next: to_option(record.next).map(LinkId),
        }
    }
}

impl From<&Inode> for InodeRecord {
    fn from(inode: &Inode) -> Self {
        InodeRecord {
            refs: inode.refs as i32,
            mode: inode.mode,
            size: inode.size as i32,
            blocks: inode.blocks.map(|b| b.map_or(NONE, |b| b.0 as i32)),
            next: inode.next.map_or(NONE, |n| n.0 as i32),
        }
    }
}

impl Inode {
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_DIR
    }

    /// block slots currently holding content
    pub fn used_blocks(&self) -> usize {
        bytes_to_blocks(self.size)
    }

    /// true when this record holds no content and no continuation
    pub fn is_empty(&self) -> bool {
        self.size == 0 && self.next.is_none() && self.blocks.iter().all(Option::is_none)
    }
}

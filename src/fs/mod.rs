//! our inode-chain filesystem engine
pub mod block_arena;
pub mod directory;
pub mod extent;
pub mod filekind;
pub mod inode;
pub mod inode_table;
pub mod path;
pub mod storage;
pub mod volume;
mod fs_api_impl;
pub use directory::*;
pub use extent::ShortGrowth;
pub use filekind::*;
pub use fs_api_impl::FuseAdapter;
pub use inode::*;
pub use storage::*;
pub use volume::*;

/// error numbers are plain `libc` errno values
pub type Errno = libc::c_int;

pub const BLOCK_SIZE: usize = 4096;
pub const BLOCK_COUNT: usize = 256;
pub const MAX_INODE_COUNT: usize = 256;
/// block pointers stored directly in one inode record
pub const LOCAL_BLOCK_CAP: usize = 4;
/// content one inode record can address before a continuation is needed
pub const INODE_MAX_LOCAL_SIZE: usize = LOCAL_BLOCK_CAP * BLOCK_SIZE;
pub const INODE_SIZE: usize = 32;
pub const DIRENT_SIZE: usize = 64;
/// width of the name field of a directory entry, terminator included
pub const DIR_NAME_LENGTH: usize = 48;
pub const ROOT_INODE: InodeId = InodeId(0);

pub const MODE_TYPE_MASK: u32 = libc::S_IFMT as u32;
pub const MODE_DIR: u32 = libc::S_IFDIR as u32;
pub const MODE_FILE: u32 = libc::S_IFREG as u32;
pub const DEFAULT_FILE_MODE: u32 = MODE_FILE | 0o644;
pub const ROOT_DIR_MODE: u32 = MODE_DIR | 0o755;

/// index of a physical block in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// number of the head inode of a file or directory
///
/// This is what directory entries point at and what `stat` reports.
/// Continuation inodes are never handed out as an [InodeId].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeId(pub(crate) u32);

impl InodeId {
    #[inline]
    pub const fn number(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for InodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// any inode of a chain, head or continuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LinkId(pub(crate) u32);

impl LinkId {
    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<InodeId> for LinkId {
    fn from(head: InodeId) -> Self {
        LinkId(head.0)
    }
}

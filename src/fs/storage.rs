//! the storage facade: POSIX-flavoured operations over one [Volume]
//!
//! Path based operations resolve against the root directory and forward to
//! the inode addressed `*_in` variants, which the FUSE adapter calls directly.
use std::{path::Path, sync::Arc};

use anyhow::Context;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::utils::fs_size_calculator::bytes_to_blocks;

use super::{
    Errno, FileKind, InodeId, Volume, VolumeUsage, BLOCK_SIZE, MAX_INODE_COUNT, MODE_TYPE_MASK,
    ROOT_DIR_MODE, ROOT_INODE,
};

/// a [Storage] shared between threads, every call holds the lock for its whole duration
pub type SharedStorage = Arc<Mutex<Storage>>;

/// attributes reported by `stat`
///
/// Timestamps and ownership are not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub ino: InodeId,
    pub blksize: usize,
    /// total bytes over the whole inode chain
    pub size: usize,
    /// blocks of `blksize` bytes needed for `size`
    pub blocks: usize,
    pub mode: u32,
    pub nlink: u32,
}

impl Stat {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }
}

/// leaf names a directory entry may not be created or removed under
fn check_leaf(name: &str) -> Result<(), Errno> {
    match name {
        "" | "." | ".." => Err(libc::EINVAL),
        _ => Ok(()),
    }
}

fn io_error(errno: Errno) -> anyhow::Error {
    std::io::Error::from_raw_os_error(errno).into()
}

#[derive(Debug)]
pub struct Storage {
    volume: Volume,
}

/// lifecycle
impl Storage {
    /// open the image at `image_path`, creating it if necessary,
    /// and make sure it has a root directory
    pub fn init<P>(image_path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        Storage::with_volume(Volume::open(image_path)?)
    }

    /// a storage over an anonymous mapping, nothing is persisted
    pub fn open_anonymous() -> anyhow::Result<Self> {
        Storage::with_volume(Volume::anonymous()?)
    }

    pub fn with_volume(volume: Volume) -> anyhow::Result<Self> {
        let mut storage = Storage { volume };
        storage
            .ensure_root()
            .map_err(io_error)
            .context("can't set up the root directory")?;
        Ok(storage)
    }

    pub fn into_shared(self) -> SharedStorage {
        Arc::new(Mutex::new(self))
    }

    /// flush everything written so far to the image file
    pub fn deinit(&self) -> anyhow::Result<()> {
        info!("deinit() called");
        self.volume.flush()
    }

    /// wipe the volume down to an empty root directory
    pub fn clear(&mut self) -> Result<(), Errno> {
        info!("clear() called");
        self.volume.format();
        self.ensure_root()
    }

    /// create the root directory if the volume has none
    fn ensure_root(&mut self) -> Result<(), Errno> {
        if self.volume.inode_exists(ROOT_INODE) {
            return Ok(());
        }
        let root = self.volume.alloc_inode()?;
        debug_assert_eq!(root, ROOT_INODE);
        let mut inode = self.volume.find_inode(root)?;
        inode.mode = ROOT_DIR_MODE;
        inode.refs = 1;
        self.volume.save_inode(root, &inode)?;
        self.volume.init_directory(root)?;
        self.volume.add_entry(root, "..", root, false)?;
        debug!("created root directory");
        Ok(())
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn usage(&self) -> VolumeUsage {
        self.volume.usage()
    }
}

/// operations on inodes
impl Storage {
    /// existence is the only thing checked, permissions are not enforced
    pub fn access_in(&self, ino: InodeId, _mask: i32) -> Result<(), Errno> {
        self.volume.find_inode(ino).map(|_| ())
    }

    pub fn stat_in(&self, ino: InodeId) -> Result<Stat, Errno> {
        let inode = self.volume.find_inode(ino)?;
        let size = self.volume.total_size(ino)?;
        Ok(Stat {
            ino,
            blksize: BLOCK_SIZE,
            size,
            blocks: bytes_to_blocks(size),
            mode: inode.mode,
            nlink: inode.refs,
        })
    }

    pub fn lookup_in(&self, parent: InodeId, name: &str) -> Result<InodeId, Errno> {
        if !self.volume.is_dir(parent)? {
            return Err(libc::ENOTDIR);
        }
        self.volume.lookup(parent, name)
    }

    /// create a file or directory called `name` in `parent`
    ///
    /// A mode without type bits creates a regular file.
    pub fn mknod_in(&mut self, parent: InodeId, name: &str, mode: u32) -> Result<InodeId, Errno> {
        check_leaf(name)?;
        let kind = FileKind::from_mode(mode);
        let type_bits = kind.mode_bits().ok_or(libc::EINVAL)?;
        match self.lookup_in(parent, name) {
            Ok(_) => return Err(libc::EEXIST),
            Err(libc::ENOENT) => {}
            Err(errno) => return Err(errno),
        }

        let ino = self.volume.alloc_inode()?;
        let mut inode = self.volume.find_inode(ino)?;
        inode.mode = type_bits | (mode & !MODE_TYPE_MASK);
        self.volume.save_inode(ino, &inode)?;

        let attached = match kind {
            FileKind::Directory => self.volume.init_directory(ino),
            _ => Ok(()),
        }
        .and_then(|_| self.volume.add_entry(parent, name, ino, true));
        if let Err(errno) = attached {
            warn!("mknod(): can't attach {name:?} to {parent}, releasing inode {ino}");
            if let Err(release) = self.volume.release_inode(ino) {
                warn!("mknod(): releasing inode {ino} failed with errno {release}");
            }
            return Err(errno);
        }

        // the ".." added above changed the record on disk
        let mut inode = self.volume.find_inode(ino)?;
        inode.refs += 1;
        self.volume.save_inode(ino, &inode)?;
        debug!("mknod(): {name:?} in {parent} is inode {ino}");
        Ok(ino)
    }

    /// add another name for a regular file
    pub fn link_in(&mut self, ino: InodeId, new_parent: InodeId, new_name: &str) -> Result<(), Errno> {
        check_leaf(new_name)?;
        if self.volume.is_dir(ino)? {
            return Err(libc::EPERM);
        }
        if !self.volume.is_dir(new_parent)? {
            return Err(libc::ENOTDIR);
        }
        self.volume.add_entry(new_parent, new_name, ino, false)?;
        let mut inode = self.volume.find_inode(ino)?;
        inode.refs += 1;
        self.volume.save_inode(ino, &inode)
    }

    /// remove a name of a regular file, freeing it with its last name
    pub fn unlink_in(&mut self, parent: InodeId, name: &str) -> Result<(), Errno> {
        check_leaf(name)?;
        let target = self.lookup_in(parent, name)?;
        if self.volume.is_dir(target)? {
            return Err(libc::EISDIR);
        }
        self.drop_entry(parent, name, target)
    }

    /// remove an empty directory
    pub fn rmdir_in(&mut self, parent: InodeId, name: &str) -> Result<(), Errno> {
        check_leaf(name)?;
        let target = self.lookup_in(parent, name)?;
        if !self.volume.is_dir(target)? {
            return Err(libc::ENOTDIR);
        }
        if !self.volume.is_empty_dir(target)? {
            return Err(libc::ENOTEMPTY);
        }
        self.drop_entry(parent, name, target)
    }

    fn drop_entry(&mut self, parent: InodeId, name: &str, target: InodeId) -> Result<(), Errno> {
        self.volume.remove_entry(parent, name, true)?;
        let mut inode = self.volume.find_inode(target)?;
        inode.refs = inode.refs.saturating_sub(1);
        if inode.refs == 0 {
            debug!("inode {target} lost its last name, releasing it");
            self.volume.save_inode(target, &inode)?;
            self.volume.release_inode(target)
        } else {
            self.volume.save_inode(target, &inode)
        }
    }

    /// move an entry, possibly into another directory
    ///
    /// The new name is linked first and the old one removed after.
    /// If the removal fails while the old name still points at the entry,
    /// the new name is unlinked again. Once the old slot is gone the new
    /// name is kept, so the entry is never left without a name.
    pub fn rename_in(
        &mut self,
        parent: InodeId,
        name: &str,
        new_parent: InodeId,
        new_name: &str,
    ) -> Result<(), Errno> {
        check_leaf(name)?;
        check_leaf(new_name)?;
        let target = self.lookup_in(parent, name)?;
        match self.lookup_in(new_parent, new_name) {
            Ok(_) => return Err(libc::EEXIST),
            Err(libc::ENOENT) => {}
            Err(errno) => return Err(errno),
        }
        let is_dir = self.volume.is_dir(target)?;
        if is_dir && self.is_ancestor(target, new_parent)? {
            return Err(libc::EINVAL);
        }

        self.volume.add_entry(new_parent, new_name, target, false)?;
        if let Err(errno) = self.volume.remove_entry(parent, name, false) {
            if self.volume.lookup(parent, name) == Ok(target) {
                warn!("rename(): can't remove {name:?} from {parent}, undoing the link");
                self.volume.remove_entry(new_parent, new_name, false)?;
            } else {
                warn!("rename(): {name:?} left {parent} but trimming {parent} failed");
            }
            return Err(errno);
        }
        if is_dir && parent != new_parent {
            self.volume.retarget_entry(target, "..", new_parent)?;
        }
        Ok(())
    }

    /// check whether `dir` is `ancestor` or lies below it
    fn is_ancestor(&self, ancestor: InodeId, mut dir: InodeId) -> Result<bool, Errno> {
        for _ in 0..MAX_INODE_COUNT {
            if dir == ancestor {
                return Ok(true);
            }
            if dir == ROOT_INODE {
                return Ok(false);
            }
            dir = self.volume.lookup(dir, "..")?;
        }
        Err(libc::EIO)
    }

    /// set the length of a regular file, new bytes read as zero
    pub fn truncate_in(&mut self, ino: InodeId, size: usize) -> Result<(), Errno> {
        if self.volume.is_dir(ino)? {
            return Err(libc::EISDIR);
        }
        let current = self.volume.total_size(ino)?;
        if size > current {
            if let Err(short) = self.volume.grow_zero(ino, size - current) {
                self.volume.shrink(ino, short.grown)?;
                return Err(short.errno);
            }
        } else {
            self.volume.shrink(ino, current - size)?;
        }
        Ok(())
    }

    /// read up to `buf.len()` bytes at `offset`
    pub fn read_in(&self, ino: InodeId, offset: usize, buf: &mut [u8]) -> Result<usize, Errno> {
        if self.volume.is_dir(ino)? {
            return Err(libc::EISDIR);
        }
        self.volume.read_at(ino, offset, buf)
    }

    /// write `data` at `offset`, growing the file as needed
    ///
    /// When the volume fills up the write is cut to the space that could be provided.
    pub fn write_in(&mut self, ino: InodeId, offset: usize, data: &[u8]) -> Result<usize, Errno> {
        if self.volume.is_dir(ino)? {
            return Err(libc::EISDIR);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let total = self.volume.total_size(ino)?;
        let end = offset.checked_add(data.len()).ok_or(libc::EFBIG)?;
        if end > total {
            if let Err(short) = self.volume.grow_zero(ino, end - total) {
                if total + short.grown <= offset {
                    self.volume.shrink(ino, short.grown)?;
                    return Err(short.errno);
                }
                debug!(
                    "write(): inode {ino} only grew by {} of {} bytes",
                    short.grown,
                    end - total
                );
            }
        }
        self.volume.write_at(ino, offset, data)
    }

    /// names in a directory, in directory order
    pub fn list_in(&self, ino: InodeId) -> Result<Vec<String>, Errno> {
        Ok(self.read_dir_in(ino)?.into_iter().map(|(name, _)| name).collect())
    }

    /// names and inodes in a directory, in directory order
    pub fn read_dir_in(&self, ino: InodeId) -> Result<Vec<(String, InodeId)>, Errno> {
        if !self.volume.is_dir(ino)? {
            return Err(libc::ENOTDIR);
        }
        Ok(self
            .volume
            .entries(ino)?
            .into_iter()
            .filter_map(|entry| entry.inode.map(|inode| (entry.name, inode)))
            .collect())
    }

    /// replace the permission bits, the file type stays
    pub fn chmod_in(&mut self, ino: InodeId, mode: u32) -> Result<(), Errno> {
        let mut inode = self.volume.find_inode(ino)?;
        inode.mode = (inode.mode & MODE_TYPE_MASK) | (mode & !MODE_TYPE_MASK);
        self.volume.save_inode(ino, &inode)
    }
}

/// operations on paths
impl Storage {
    fn resolve(&self, path: &str) -> Result<InodeId, Errno> {
        self.volume.resolve_path(ROOT_INODE, path)
    }

    fn parent_and_leaf<'a>(&self, path: &'a str) -> Result<(InodeId, &'a str), Errno> {
        self.volume.parent_and_leaf(ROOT_INODE, path)
    }

    pub fn access(&self, path: &str, mask: i32) -> Result<(), Errno> {
        info!("access() called with path: {path:?}, mask: {mask:#o}");
        let ino = self.resolve(path)?;
        self.access_in(ino, mask)
    }

    pub fn stat(&self, path: &str) -> Result<Stat, Errno> {
        info!("stat() called with path: {path:?}");
        let ino = self.resolve(path)?;
        self.stat_in(ino)
    }

    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<InodeId, Errno> {
        info!("mknod() called with path: {path:?}, mode: {mode:#o}");
        match self.resolve(path) {
            Ok(_) => return Err(libc::EEXIST),
            Err(libc::ENOENT) => {}
            Err(errno) => return Err(errno),
        }
        let (parent, leaf) = self.parent_and_leaf(path)?;
        self.mknod_in(parent, leaf, mode)
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<InodeId, Errno> {
        info!("mkdir() called with path: {path:?}, mode: {mode:#o}");
        self.mknod(path, super::MODE_DIR | (mode & !MODE_TYPE_MASK))
    }

    pub fn link(&mut self, from: &str, to: &str) -> Result<(), Errno> {
        info!("link() called with from: {from:?}, to: {to:?}");
        let ino = self.resolve(from)?;
        match self.resolve(to) {
            Ok(_) => return Err(libc::EEXIST),
            Err(libc::ENOENT) => {}
            Err(errno) => return Err(errno),
        }
        let (parent, leaf) = self.parent_and_leaf(to)?;
        self.link_in(ino, parent, leaf)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), Errno> {
        info!("unlink() called with path: {path:?}");
        let (parent, leaf) = self.parent_and_leaf(path)?;
        self.unlink_in(parent, leaf)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), Errno> {
        info!("rename() called with from: {from:?}, to: {to:?}");
        let (parent, leaf) = self.parent_and_leaf(from)?;
        let (new_parent, new_leaf) = self.parent_and_leaf(to)?;
        self.rename_in(parent, leaf, new_parent, new_leaf)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), Errno> {
        info!("rmdir() called with path: {path:?}");
        let (parent, leaf) = self.parent_and_leaf(path)?;
        self.rmdir_in(parent, leaf)
    }

    pub fn truncate(&mut self, path: &str, size: usize) -> Result<(), Errno> {
        info!("truncate() called with path: {path:?}, size: {size}");
        let ino = self.resolve(path)?;
        self.truncate_in(ino, size)
    }

    pub fn read(&self, path: &str, buf: &mut [u8], offset: usize) -> Result<usize, Errno> {
        info!(
            "read() called with path: {path:?}, size: {}, offset: {offset}",
            buf.len()
        );
        let ino = self.resolve(path)?;
        self.read_in(ino, offset, buf)
    }

    pub fn write(&mut self, path: &str, data: &[u8], offset: usize) -> Result<usize, Errno> {
        info!(
            "write() called with path: {path:?}, size: {}, offset: {offset}",
            data.len()
        );
        let ino = self.resolve(path)?;
        self.write_in(ino, offset, data)
    }

    pub fn list(&self, path: &str) -> Result<Vec<String>, Errno> {
        info!("list() called with path: {path:?}");
        let ino = self.resolve(path)?;
        self.list_in(ino)
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<(), Errno> {
        info!("chmod() called with path: {path:?}, mode: {mode:#o}");
        let ino = self.resolve(path)?;
        self.chmod_in(ino, mode)
    }
}

use std::{
    ffi::OsStr,
    time::{Duration, UNIX_EPOCH},
};

use fuser::{FileAttr, Filesystem};
use log::{error, info};

use super::{Errno, InodeId, SharedStorage, Stat, BLOCK_SIZE, DIR_NAME_LENGTH, MODE_TYPE_MASK};

const TTL: Duration = Duration::new(0, 0);
/// `st_blocks` is counted in 512-byte units
const SECTOR_SIZE: usize = 512;

/// exposes a [SharedStorage] through `FUSE`
///
/// `FUSE` inode numbers are ours plus one, its root is 1.
pub struct FuseAdapter {
    storage: SharedStorage,
    uid: u32,
    gid: u32,
}

impl FuseAdapter {
    pub fn new(storage: SharedStorage) -> Self {
        // use `users` crate to get the uid and gid of this program
        FuseAdapter {
            storage,
            uid: users::get_effective_uid(),
            gid: users::get_effective_gid(),
        }
    }

    fn file_attr(&self, stat: &Stat) -> FileAttr {
        FileAttr {
            ino: to_ino(stat.ino),
            size: stat.size as u64,
            blocks: (stat.blocks * (stat.blksize / SECTOR_SIZE)) as u64,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind: stat.kind().into(),
            perm: (stat.mode & !MODE_TYPE_MASK) as u16,
            nlink: stat.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: stat.blksize as u32,
            flags: 0,
        }
    }

    fn attr_of(&self, ino: InodeId) -> Result<FileAttr, Errno> {
        let stat = self.storage.lock().stat_in(ino)?;
        Ok(self.file_attr(&stat))
    }
}

fn to_inode(ino: u64) -> Result<InodeId, Errno> {
    ino.checked_sub(1)
        .and_then(|n| u32::try_from(n).ok())
        .map(InodeId)
        .ok_or(libc::ENOENT)
}

fn to_ino(inode: InodeId) -> u64 {
    inode.number() as u64 + 1
}

/// names we store are UTF-8
fn to_name(name: &OsStr) -> Result<&str, Errno> {
    name.to_str().ok_or(libc::EINVAL)
}

fn to_offset(offset: i64) -> Result<usize, Errno> {
    usize::try_from(offset).map_err(|_| libc::EINVAL)
}

impl Filesystem for FuseAdapter {
    // to init the filesystem
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        info!("filesystem mounted");
        Ok(())
    }

    // to umount the filesystem
    fn destroy(&mut self) {
        if let Err(e) = self.storage.lock().deinit() {
            error!("flushing the image on unmount failed: {e:#}");
        }
    }

    // to show FS information
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let usage = self.storage.lock().usage();
        reply.statfs(
            usage.total_blocks as u64,
            usage.free_blocks as u64,
            usage.free_blocks as u64,
            (usage.total_inodes - usage.free_inodes) as u64,
            usage.free_inodes as u64,
            BLOCK_SIZE as u32,
            (DIR_NAME_LENGTH - 1) as u32,
            BLOCK_SIZE as u32,
        )
    }

    fn getattr(&mut self, _req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
        info!("getattr() called with inode number: {ino}");
        match to_inode(ino).and_then(|inode| self.attr_of(inode)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    // to look up a file
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        info!("lookup() called with parent inode number: {parent} and name: {name:?}");
        let found = to_inode(parent).and_then(|parent| {
            let inode = self.storage.lock().lookup_in(parent, to_name(name)?)?;
            self.attr_of(inode)
        });
        match found {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    // to set file attributes, only size and mode are stored
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        info!("setattr() called with inode number: {ino}, mode: {mode:?}, size: {size:?}");
        let updated = to_inode(ino).and_then(|inode| {
            {
                let mut storage = self.storage.lock();
                if let Some(size) = size {
                    storage.truncate_in(inode, usize::try_from(size).map_err(|_| libc::EFBIG)?)?;
                }
                if let Some(mode) = mode {
                    storage.chmod_in(inode, mode)?;
                }
            }
            self.attr_of(inode)
        });
        match updated {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mknod() called with parent inode number: {parent}, name: {name:?}, mode: {mode:#o}");
        let created = to_inode(parent).and_then(|parent| {
            let inode = self
                .storage
                .lock()
                .mknod_in(parent, to_name(name)?, mode & !umask)?;
            self.attr_of(inode)
        });
        match created {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    // to create a dir
    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mkdir() called with parent inode number: {parent} and name: {name:?}");
        let created = to_inode(parent).and_then(|parent| {
            let mode = libc::S_IFDIR as u32 | (mode & !umask & !MODE_TYPE_MASK);
            let inode = self.storage.lock().mknod_in(parent, to_name(name)?, mode)?;
            self.attr_of(inode)
        });
        match created {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    // to create a new file
    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        info!("create() called with parent inode number: {parent} and name: {name:?}");
        let created = to_inode(parent).and_then(|parent| {
            let inode = self
                .storage
                .lock()
                .mknod_in(parent, to_name(name)?, mode & !umask)?;
            self.attr_of(inode)
        });
        match created {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, flags as u32),
            Err(errno) => reply.error(errno),
        }
    }

    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        info!("link() called with inode number: {ino}, new parent: {newparent}, new name: {newname:?}");
        let linked = to_inode(ino).and_then(|inode| {
            self.storage
                .lock()
                .link_in(inode, to_inode(newparent)?, to_name(newname)?)?;
            self.attr_of(inode)
        });
        match linked {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    // to delete a file
    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("unlink() called with parent inode number: {parent} and name: {name:?}");
        let removed = to_inode(parent)
            .and_then(|parent| self.storage.lock().unlink_in(parent, to_name(name)?));
        match removed {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("rmdir() called with parent inode number: {parent} and name: {name:?}");
        let removed = to_inode(parent)
            .and_then(|parent| self.storage.lock().rmdir_in(parent, to_name(name)?));
        match removed {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        info!("rename() called with {parent}/{name:?} -> {newparent}/{newname:?}");
        let renamed = to_inode(parent).and_then(|parent| {
            self.storage.lock().rename_in(
                parent,
                to_name(name)?,
                to_inode(newparent)?,
                to_name(newname)?,
            )
        });
        match renamed {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    // to read from a file
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        info!("read() called with inode number: {ino}, offset: {offset}, size: {size}");
        let mut buf = vec![0u8; size as usize];
        let read = to_inode(ino).and_then(|inode| {
            self.storage
                .lock()
                .read_in(inode, to_offset(offset)?, &mut buf)
        });
        match read {
            Ok(read) => reply.data(&buf[..read]),
            Err(errno) => reply.error(errno),
        }
    }

    // to write to a file
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        info!(
            "write() called with inode number: {ino}, offset: {offset}, size: {}",
            data.len()
        );
        let written = to_inode(ino)
            .and_then(|inode| self.storage.lock().write_in(inode, to_offset(offset)?, data));
        match written {
            Ok(written) => reply.written(written as u32),
            Err(errno) => reply.error(errno),
        }
    }

    // to read a dir
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        info!("readdir() called with inode number: {ino}, offset: {offset}");
        let listed = to_inode(ino).and_then(|inode| {
            let storage = self.storage.lock();
            let skip = to_offset(offset)?;
            storage
                .read_dir_in(inode)?
                .into_iter()
                .skip(skip)
                .map(|(name, entry)| -> Result<_, Errno> {
                    Ok((name, entry, storage.stat_in(entry)?.kind()))
                })
                .collect::<Result<Vec<_>, Errno>>()
        });
        let entries = match listed {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        for (index, (name, entry, kind)) in entries.into_iter().enumerate() {
            let buffer_full: bool =
                reply.add(to_ino(entry), offset + index as i64 + 1, kind.into(), name);
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &fuser::Request<'_>, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        info!("access() called with inode number: {ino}, mask: {mask:#o}");
        match to_inode(ino).and_then(|inode| self.storage.lock().access_in(inode, mask)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{utils::init_test_environment::storage_with_files, FileKind, ROOT_INODE};

    #[test]
    fn test_inode_number_mapping() {
        assert_eq!(to_ino(ROOT_INODE), fuser::FUSE_ROOT_ID);
        assert_eq!(to_inode(fuser::FUSE_ROOT_ID), Ok(ROOT_INODE));
        assert_eq!(to_inode(8), Ok(InodeId(7)));
        assert_eq!(to_inode(0), Err(libc::ENOENT));
        assert_eq!(to_offset(-1), Err(libc::EINVAL));
    }

    #[test]
    fn test_file_attr_reflects_stat() {
        let mut storage = storage_with_files(&["/d/", "/f"]);
        storage.write("/f", &[0u8; 5000], 0).unwrap();
        let file = storage.stat("/f").unwrap();
        let dir = storage.stat("/d").unwrap();
        let adapter = FuseAdapter::new(storage.into_shared());

        let attr = adapter.file_attr(&file);
        assert_eq!(attr.ino, to_ino(file.ino));
        assert_eq!(attr.size, 5000);
        assert_eq!(attr.blocks, 2 * (BLOCK_SIZE / SECTOR_SIZE) as u64);
        assert_eq!(attr.kind, fuser::FileType::RegularFile);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.blksize, BLOCK_SIZE as u32);
        assert_eq!(attr.uid, users::get_effective_uid());

        let attr = adapter.attr_of(dir.ino).unwrap();
        assert_eq!(attr.kind, FileKind::Directory.into());
        assert_eq!(attr.perm, 0o755);
        assert_eq!(adapter.attr_of(InodeId(200)).err(), Some(libc::ENOENT));
    }
}

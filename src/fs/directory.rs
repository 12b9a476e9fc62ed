//! directory content: an array of fixed-width entries stored as ordinary file content
use log::{debug, warn};

use super::{Errno, InodeId, Volume, DIRENT_SIZE, DIR_NAME_LENGTH};

const NAME_FIELD: std::ops::Range<usize> = 0..DIR_NAME_LENGTH;
const INUM_FIELD: std::ops::Range<usize> = DIR_NAME_LENGTH..DIR_NAME_LENGTH + 4;
/// inode number marking a free slot
const FREE_SLOT: i32 = -1;

/// one name to inode mapping in a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// `None` for a free slot
    pub inode: Option<InodeId>,
}

impl DirEntry {
    pub fn new(name: &str, inode: InodeId) -> Self {
        DirEntry {
            name: name.to_owned(),
            inode: Some(inode),
        }
    }

    pub fn free() -> Self {
        DirEntry {
            name: String::new(),
            inode: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.inode.is_none()
    }

    /// decode a 64-byte on-disk entry
    pub fn from_bytes(raw: &[u8; DIRENT_SIZE]) -> Self {
        let field = &raw[NAME_FIELD];
        let len = field.iter().position(|c| *c == 0).unwrap_or(field.len());
        let name = String::from_utf8_lossy(&field[..len]).into_owned();

        let mut inum = [0u8; 4];
        inum.copy_from_slice(&raw[INUM_FIELD]);
        let inode = u32::try_from(i32::from_le_bytes(inum)).ok().map(InodeId);
        DirEntry { name, inode }
    }

    /// encode into the 64-byte on-disk form
    ///
    /// Names are cut to fit the name field, callers validate lengths first.
    pub fn to_bytes(&self) -> [u8; DIRENT_SIZE] {
        let mut raw = [0u8; DIRENT_SIZE];
        let name = self.name.as_bytes();
        let len = name.len().min(DIR_NAME_LENGTH - 1);
        raw[..len].copy_from_slice(&name[..len]);
        let inum = self.inode.map_or(FREE_SLOT, |inode| inode.0 as i32);
        raw[INUM_FIELD].copy_from_slice(&inum.to_le_bytes());
        raw
    }
}

/// check a name can be stored in an entry
fn name_fits(name: &str) -> bool {
    name.len() < DIR_NAME_LENGTH
}

/// directory operations
impl Volume {
    /// make a freshly allocated inode an empty directory containing only "."
    pub fn init_directory(&mut self, dir: InodeId) -> Result<(), Errno> {
        self.add_entry(dir, ".", dir, false).map(|_| ())
    }

    pub fn entry_count(&self, dir: InodeId) -> Result<usize, Errno> {
        let total = self.total_size(dir)?;
        debug_assert_eq!(total % DIRENT_SIZE, 0, "directory {dir} has a torn entry");
        Ok(total / DIRENT_SIZE)
    }

    /// read entry `index`
    pub fn get_entry(&self, dir: InodeId, index: usize) -> Result<DirEntry, Errno> {
        let mut raw = [0u8; DIRENT_SIZE];
        let read = self.read_at(dir, index * DIRENT_SIZE, &mut raw)?;
        if read != DIRENT_SIZE {
            return Err(libc::EIO);
        }
        Ok(DirEntry::from_bytes(&raw))
    }

    fn put_entry(&mut self, dir: InodeId, index: usize, entry: &DirEntry) -> Result<(), Errno> {
        let written = self.write_at(dir, index * DIRENT_SIZE, &entry.to_bytes())?;
        if written != DIRENT_SIZE {
            return Err(libc::EIO);
        }
        Ok(())
    }

    /// all entries in directory order, free slots included
    pub fn entries(&self, dir: InodeId) -> Result<Vec<DirEntry>, Errno> {
        (0..self.entry_count(dir)?)
            .map(|index| self.get_entry(dir, index))
            .collect()
    }

    /// slot index and target of a used entry called `name`
    fn find_entry(&self, dir: InodeId, name: &str) -> Result<Option<(usize, InodeId)>, Errno> {
        for (index, entry) in self.entries(dir)?.into_iter().enumerate() {
            if let Some(inode) = entry.inode {
                if entry.name == name {
                    return Ok(Some((index, inode)));
                }
            }
        }
        Ok(None)
    }

    /// find the inode an entry points to
    pub fn lookup(&self, dir: InodeId, name: &str) -> Result<InodeId, Errno> {
        if !name_fits(name) {
            return Err(libc::ENOENT);
        }
        self.find_entry(dir, name)?
            .map(|(_, inode)| inode)
            .ok_or(libc::ENOENT)
    }

    /// add an entry `name -> target`
    ///
    /// The first free slot is reused, otherwise the directory grows by one entry.
    /// With `link_back` and a directory target, the target gets a ".." entry pointing at `dir`.
    /// # Return
    /// the slot index of the new entry
    pub fn add_entry(
        &mut self,
        dir: InodeId,
        name: &str,
        target: InodeId,
        link_back: bool,
    ) -> Result<usize, Errno> {
        if !name_fits(name) {
            return Err(libc::ENAMETOOLONG);
        }

        let mut free_slot = None;
        for (index, entry) in self.entries(dir)?.into_iter().enumerate() {
            if entry.is_free() {
                free_slot.get_or_insert(index);
            } else if entry.name == name {
                return Err(libc::EEXIST);
            }
        }

        let index = match free_slot {
            Some(index) => index,
            None => {
                let index = self.entry_count(dir)?;
                if let Err(short) = self.grow(dir, DIRENT_SIZE) {
                    // a torn entry would break the entry count
                    if short.grown > 0 {
                        self.shrink(dir, short.grown)?;
                    }
                    return Err(short.errno);
                }
                index
            }
        };
        self.put_entry(dir, index, &DirEntry::new(name, target))?;
        debug!("directory {dir}: {name:?} -> {target} at slot {index}");

        if link_back && self.is_dir(target)? {
            if let Err(errno) = self.add_entry(target, "..", dir, false) {
                warn!("directory {dir}: can't link {name:?} back, undoing the entry");
                self.remove_entry(dir, name, false)?;
                return Err(errno);
            }
        }
        Ok(index)
    }

    /// remove the entry called `name`
    ///
    /// With `unlink_back` and a directory target, the target's ".." entry goes too.
    /// Free entries at the end of the directory are trimmed away,
    /// holes in the middle stay for reuse.
    /// # Return
    /// the slot index the entry occupied
    pub fn remove_entry(&mut self, dir: InodeId, name: &str, unlink_back: bool) -> Result<usize, Errno> {
        if !name_fits(name) {
            return Err(libc::ENOENT);
        }
        let (index, target) = self.find_entry(dir, name)?.ok_or(libc::ENOENT)?;
        self.put_entry(dir, index, &DirEntry::free())?;
        debug!("directory {dir}: removed {name:?} from slot {index}");

        if unlink_back && self.is_dir(target)? {
            match self.remove_entry(target, "..", false) {
                Ok(_) | Err(libc::ENOENT) => {}
                Err(errno) => return Err(errno),
            }
        }

        self.prune_trailing_free(dir)?;
        Ok(index)
    }

    /// point the existing entry `name` at another inode, keeping its slot
    pub fn retarget_entry(&mut self, dir: InodeId, name: &str, target: InodeId) -> Result<usize, Errno> {
        if !name_fits(name) {
            return Err(libc::ENOENT);
        }
        let (index, _) = self.find_entry(dir, name)?.ok_or(libc::ENOENT)?;
        self.put_entry(dir, index, &DirEntry::new(name, target))?;
        debug!("directory {dir}: {name:?} now -> {target}");
        Ok(index)
    }

    fn prune_trailing_free(&mut self, dir: InodeId) -> Result<(), Errno> {
        let entries = self.entries(dir)?;
        let trailing = entries.iter().rev().take_while(|e| e.is_free()).count();
        if trailing > 0 {
            self.shrink(dir, trailing * DIRENT_SIZE)?;
        }
        Ok(())
    }

    /// true when only "." and ".." remain
    pub fn is_empty_dir(&self, dir: InodeId) -> Result<bool, Errno> {
        Ok(self
            .entries(dir)?
            .iter()
            .filter(|e| !e.is_free())
            .all(|e| e.name == "." || e.name == ".."))
    }

    /// names of all used entries, in directory order
    pub fn list(&self, dir: InodeId) -> Result<Vec<String>, Errno> {
        Ok(self
            .entries(dir)?
            .into_iter()
            .filter(|e| !e.is_free())
            .map(|e| e.name)
            .collect())
    }
}

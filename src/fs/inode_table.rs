//! the inode table and its occupancy bitmap
use log::{error, trace};

use crate::utils::traits::FixedRecord;

use super::{
    inode::InodeRecord, BlockId, Errno, Inode, InodeId, LinkId, Volume, LOCAL_BLOCK_CAP,
    MAX_INODE_COUNT,
};

/// [Inode] allocation
impl Volume {
    pub(crate) fn link_exists(&self, link: LinkId) -> bool {
        self.inode_bitmap()
            .get(link.index())
            .as_deref()
            .copied()
            .unwrap_or(false)
    }

    /// check if an inode number is in use
    pub fn inode_exists(&self, inode: InodeId) -> bool {
        self.link_exists(inode.into())
    }

    /// take the first free inode slot
    ///
    /// The record is reset before its bitmap bit is set,
    /// so a published number never points at stale content.
    pub(crate) fn alloc_link(&mut self) -> Result<LinkId, Errno> {
        let index = self.inode_bitmap().first_zero().ok_or(libc::ENOSPC)?;
        if index >= MAX_INODE_COUNT {
            return Err(libc::ENOSPC);
        }
        let link = LinkId(index as u32);
        self.write_link(link, &Inode::default())?;
        self.inode_bitmap_mut().set(index, true);
        trace!("alloc_inode() -> {index}");
        Ok(link)
    }

    /// allocate a fresh head inode
    pub fn alloc_inode(&mut self) -> Result<InodeId, Errno> {
        self.alloc_link().map(|link| InodeId(link.0))
    }

    /// clear the bitmap bit of an already emptied link
    pub(crate) fn free_link(&mut self, link: LinkId) -> Result<(), Errno> {
        let inode = self.read_link(link)?;
        if !inode.is_empty() {
            error!("refusing to free inode {} that still owns content", link.0);
            return Err(libc::ENOTEMPTY);
        }
        trace!("free_inode({})", link.0);
        self.inode_bitmap_mut().set(link.index(), false);
        Ok(())
    }

    /// free a head inode whose chain has already been shrunk to zero bytes
    pub fn free_inode(&mut self, inode: InodeId) -> Result<(), Errno> {
        self.free_link(inode.into())
    }

    /// shrink a head's chain to nothing and free it
    pub fn release_inode(&mut self, inode: InodeId) -> Result<(), Errno> {
        let total = self.total_size(inode)?;
        self.shrink(inode, total)?;
        self.free_inode(inode)
    }
}

/// reading and writing [Inode] records
impl Volume {
    pub(crate) fn read_link(&self, link: LinkId) -> Result<Inode, Errno> {
        if link.index() >= MAX_INODE_COUNT || !self.link_exists(link) {
            return Err(libc::ENOENT);
        }
        self.decode_slot(link)
    }

    fn decode_slot(&self, link: LinkId) -> Result<Inode, Errno> {
        InodeRecord::deserialize_from(self.inode_slot(link.index()))
            .map(Inode::from)
            .map_err(|_| libc::EIO)
    }

    pub(crate) fn write_link(&mut self, link: LinkId, inode: &Inode) -> Result<(), Errno> {
        if link.index() >= MAX_INODE_COUNT {
            return Err(libc::EINVAL);
        }
        InodeRecord::from(inode)
            .serialize_into(self.inode_slot_mut(link.index()))
            .map(|_| ())
            .map_err(|_| libc::EIO)
    }

    /// find a head inode
    pub fn find_inode(&self, inode: InodeId) -> Result<Inode, Errno> {
        self.read_link(inode.into())
    }

    pub fn save_inode(&mut self, index: InodeId, inode: &Inode) -> Result<(), Errno> {
        self.write_link(index.into(), inode)
    }

    pub fn is_dir(&self, inode: InodeId) -> Result<bool, Errno> {
        Ok(self.find_inode(inode)?.is_dir())
    }
}

/// walking inode chains
impl Volume {
    /// every link of the chain starting at `head`, head first
    ///
    /// A chain longer than the inode table can only come from a corrupt image.
    pub(crate) fn chain(&self, head: InodeId) -> Result<Vec<(LinkId, Inode)>, Errno> {
        let mut links = Vec::new();
        let mut current = Some(LinkId::from(head));
        while let Some(link) = current {
            if links.len() >= MAX_INODE_COUNT {
                error!("inode chain starting at {head} does not terminate");
                return Err(libc::EIO);
            }
            let inode = self.read_link(link)?;
            current = inode.next;
            links.push((link, inode));
        }
        Ok(links)
    }

    /// number of inode records a file occupies, head included
    pub fn chain_len(&self, head: InodeId) -> Result<usize, Errno> {
        Ok(self.chain(head)?.len())
    }

    /// logical size of a file: the sum of `size` over its whole chain
    pub fn total_size(&self, head: InodeId) -> Result<usize, Errno> {
        Ok(self.chain(head)?.iter().map(|(_, inode)| inode.size).sum())
    }

    /// the terminal link of a chain together with its predecessor, if any
    pub(crate) fn tail(&self, head: InodeId) -> Result<(Option<LinkId>, LinkId, Inode), Errno> {
        let mut chain = self.chain(head)?;
        let (last, inode) = chain.pop().ok_or(libc::EIO)?;
        let previous = chain.last().map(|(link, _)| *link);
        Ok((previous, last, inode))
    }

    /// the terminal link of a chain
    pub(crate) fn last_link(&self, head: InodeId) -> Result<LinkId, Errno> {
        self.tail(head).map(|(_, last, _)| last)
    }

    /// translate a block index within the file to a physical block
    ///
    /// `None` means the file has no block there.
    pub fn logical_block(&self, head: InodeId, file_block: usize) -> Result<Option<BlockId>, Errno> {
        let link_index = file_block / LOCAL_BLOCK_CAP;
        let slot = file_block % LOCAL_BLOCK_CAP;
        let mut current = Some(LinkId::from(head));
        let mut hops = 0;
        while let Some(link) = current {
            let inode = self.read_link(link)?;
            if hops == link_index {
                return Ok(inode.blocks[slot]);
            }
            hops += 1;
            if hops > MAX_INODE_COUNT {
                return Err(libc::EIO);
            }
            current = inode.next;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_inode_resets_record() -> anyhow::Result<()> {
        let mut volume = Volume::anonymous()?;
        // leave garbage in slot 0 before it is ever allocated
        volume.inode_slot_mut(0).fill(0x5a);
        let inode = volume.alloc_inode().unwrap();
        assert_eq!(inode, InodeId(0));
        assert_eq!(volume.find_inode(inode), Ok(Inode::default()));
        Ok(())
    }

    #[test]
    fn test_find_unallocated_inode_is_enoent() -> anyhow::Result<()> {
        let volume = Volume::anonymous()?;
        assert!(!volume.inode_exists(InodeId(4)));
        assert_eq!(volume.find_inode(InodeId(4)), Err(libc::ENOENT));
        assert_eq!(volume.find_inode(InodeId(MAX_INODE_COUNT as u32)), Err(libc::ENOENT));
        Ok(())
    }

    #[test]
    fn test_inode_alloc_free_round_trip() -> anyhow::Result<()> {
        let mut volume = Volume::anonymous()?;
        let inodes: Vec<_> = (0..10).map(|_| volume.alloc_inode().unwrap()).collect();
        assert_eq!(inodes[9], InodeId(9));
        for inode in &inodes {
            volume.free_inode(*inode).unwrap();
        }
        assert_eq!(volume.usage().free_inodes, MAX_INODE_COUNT);
        assert_eq!(volume.alloc_inode(), Ok(InodeId(0)));
        Ok(())
    }

    #[test]
    fn test_inode_exhaustion() -> anyhow::Result<()> {
        let mut volume = Volume::anonymous()?;
        for _ in 0..MAX_INODE_COUNT {
            volume.alloc_inode().unwrap();
        }
        assert_eq!(volume.alloc_inode(), Err(libc::ENOSPC));
        volume.free_inode(InodeId(17)).unwrap();
        assert_eq!(volume.alloc_inode(), Ok(InodeId(17)));
        Ok(())
    }

    #[test]
    fn test_free_refuses_non_empty_inode() -> anyhow::Result<()> {
        let mut volume = Volume::anonymous()?;
        let inode = volume.alloc_inode().unwrap();
        let mut record = volume.find_inode(inode).unwrap();
        record.size = 10;
        record.blocks[0] = Some(volume.alloc_block().unwrap());
        volume.save_inode(inode, &record).unwrap();
        assert_eq!(volume.free_inode(inode), Err(libc::ENOTEMPTY));
        assert!(volume.inode_exists(inode));
        Ok(())
    }

    #[test]
    fn test_chain_walk_and_logical_block() -> anyhow::Result<()> {
        let mut volume = Volume::anonymous()?;
        let head = volume.alloc_inode().unwrap();
        let tail = volume.alloc_link().unwrap();

        let mut head_record = volume.find_inode(head).unwrap();
        head_record.size = 4 * 4096;
        head_record.blocks = [Some(BlockId(10)), Some(BlockId(11)), Some(BlockId(12)), Some(BlockId(13))];
        head_record.next = Some(tail);
        volume.save_inode(head, &head_record).unwrap();

        let mut tail_record = volume.read_link(tail).unwrap();
        tail_record.size = 100;
        tail_record.blocks[0] = Some(BlockId(20));
        volume.write_link(tail, &tail_record).unwrap();

        assert_eq!(volume.total_size(head), Ok(4 * 4096 + 100));
        assert_eq!(volume.chain_len(head), Ok(2));
        assert_eq!(volume.last_link(head), Ok(tail));
        assert_eq!(volume.logical_block(head, 0), Ok(Some(BlockId(10))));
        assert_eq!(volume.logical_block(head, 3), Ok(Some(BlockId(13))));
        assert_eq!(volume.logical_block(head, 4), Ok(Some(BlockId(20))));
        assert_eq!(volume.logical_block(head, 5), Ok(None));
        assert_eq!(volume.logical_block(head, 8), Ok(None));
        Ok(())
    }

    #[test]
    fn test_cyclic_chain_is_reported() -> anyhow::Result<()> {
        let mut volume = Volume::anonymous()?;
        let head = volume.alloc_inode().unwrap();
        let mut record = volume.find_inode(head).unwrap();
        record.next = Some(LinkId::from(head));
        volume.save_inode(head, &record).unwrap();
        assert_eq!(volume.total_size(head), Err(libc::EIO));
        Ok(())
    }
}

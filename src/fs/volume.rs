//! what does our filesystem look like in the memory
//!
//! The whole image is one memory map with the following layout:
//! - block bitmap
//! - inode bitmap
//! - inode table
//! - content blocks, starting at the first block after the ones above

use crate::utils::fs_size_calculator::{
    bitmap_size, block_bitmap_offset, image_size, inode_bitmap_offset, inode_table_offset,
    reserved_blocks,
};

use super::{BLOCK_COUNT, MAX_INODE_COUNT};
use anyhow::{anyhow, Context};
use bitvec::prelude::*;
use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};
use std::{fs::OpenOptions, path::Path};

/// a single mounted volume: the block arena, both bitmaps and the inode table
///
/// Every engine operation is a method on this type,
/// there is no process-wide state.
#[derive(Debug)]
pub struct Volume {
    /// the image, mapped read-write
    mmap: MmapMut,
}

/// capacity summary of a [Volume]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUsage {
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub total_inodes: usize,
    pub free_inodes: usize,
}

impl Volume {
    /// open an image file, creating it if it does not exist yet
    /// # Params
    /// - `image_path`: the path of the image file
    /// # Return
    /// an [anyhow::Result] type,\
    /// which contains a [Volume] instance if the operation is successful
    pub fn open<P>(image_path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let image_path = image_path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(image_path)
            .with_context(|| format!("can't open image file {}", image_path.display()))?;
        // the image always has exactly the fixed size
        file.set_len(image_size() as u64)?;

        // Safety
        // The mapping stays valid as long as nobody else truncates the image file,
        // which we don't support anyway.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        info!("opened image {}", image_path.display());
        Ok(Volume::from_mmap(mmap))
    }

    /// open an existing image for inspection, leaving the file untouched
    ///
    /// The file is opened read-only and mapped copy-on-write,
    /// so nothing done to the returned [Volume] ever reaches the image.
    /// A file of any other length than an image is rejected.
    pub fn open_existing<P>(image_path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let image_path = image_path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .open(image_path)
            .with_context(|| format!("can't open image file {}", image_path.display()))?;
        let len = file.metadata()?.len();
        if len != image_size() as u64 {
            return Err(anyhow!(
                "{} is not an image: {len} bytes instead of {}",
                image_path.display(),
                image_size()
            ));
        }

        // Safety
        // The mapping is private, the file itself is only ever read.
        let mmap = unsafe { MmapOptions::new().map_copy(&file)? };
        debug!("inspecting image {}", image_path.display());
        Ok(Volume { mmap })
    }

    /// create a brand-new image file, refusing to overwrite an existing one
    pub fn create<P>(image_path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let image_path = image_path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(image_path)
            .with_context(|| format!("can't create image file {}", image_path.display()))?;
        // all regions are set to zero using `set_len` method
        file.set_len(image_size() as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let mut volume = Volume::from_mmap(mmap);
        volume.format();
        Ok(volume)
    }

    /// a volume that only lives in memory, used by tests and scratch mounts
    pub fn anonymous() -> anyhow::Result<Self> {
        let mmap = MmapMut::map_anon(image_size())?;
        Ok(Volume::from_mmap(mmap))
    }

    fn from_mmap(mmap: MmapMut) -> Self {
        let mut volume = Volume { mmap };
        volume.reserve_metadata_blocks();
        volume
    }

    /// wipe every region, keeping the metadata blocks reserved
    pub fn format(&mut self) {
        debug!("formatting volume");
        self.mmap.fill(0);
        self.reserve_metadata_blocks();
    }

    /// push dirty pages of the map to the image file
    pub fn flush(&self) -> anyhow::Result<()> {
        self.mmap
            .flush()
            .map_err(|e| anyhow!("flush image failed: {e}"))
    }

    pub fn usage(&self) -> VolumeUsage {
        VolumeUsage {
            total_blocks: BLOCK_COUNT,
            free_blocks: self.block_bitmap().count_zeros(),
            total_inodes: MAX_INODE_COUNT,
            free_inodes: self.inode_bitmap().count_zeros(),
        }
    }
}

/// regions of the image
impl Volume {
    #[inline]
    pub(crate) fn block_bitmap(&self) -> &BitSlice<u8, Lsb0> {
        let start = block_bitmap_offset();
        BitSlice::from_slice(&self.mmap[start..start + bitmap_size(BLOCK_COUNT)])
    }

    #[inline]
    pub(crate) fn block_bitmap_mut(&mut self) -> &mut BitSlice<u8, Lsb0> {
        let start = block_bitmap_offset();
        BitSlice::from_slice_mut(&mut self.mmap[start..start + bitmap_size(BLOCK_COUNT)])
    }

    #[inline]
    pub(crate) fn inode_bitmap(&self) -> &BitSlice<u8, Lsb0> {
        let start = inode_bitmap_offset();
        BitSlice::from_slice(&self.mmap[start..start + bitmap_size(MAX_INODE_COUNT)])
    }

    #[inline]
    pub(crate) fn inode_bitmap_mut(&mut self) -> &mut BitSlice<u8, Lsb0> {
        let start = inode_bitmap_offset();
        BitSlice::from_slice_mut(&mut self.mmap[start..start + bitmap_size(MAX_INODE_COUNT)])
    }

    /// bytes of the inode table slot `index`
    #[inline]
    pub(crate) fn inode_slot(&self, index: usize) -> &[u8] {
        let start = inode_table_offset() + index * super::INODE_SIZE;
        &self.mmap[start..start + super::INODE_SIZE]
    }

    #[inline]
    pub(crate) fn inode_slot_mut(&mut self, index: usize) -> &mut [u8] {
        let start = inode_table_offset() + index * super::INODE_SIZE;
        &mut self.mmap[start..start + super::INODE_SIZE]
    }

    /// raw bytes of the whole image
    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    fn reserve_metadata_blocks(&mut self) {
        let bitmap = self.block_bitmap_mut();
        for index in 0..reserved_blocks() {
            bitmap.set(index, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::BLOCK_SIZE;

    #[test]
    fn test_anonymous_volume_reserves_metadata() -> anyhow::Result<()> {
        let volume = Volume::anonymous()?;
        let usage = volume.usage();
        assert_eq!(usage.total_blocks, BLOCK_COUNT);
        assert_eq!(usage.free_blocks, BLOCK_COUNT - reserved_blocks());
        assert_eq!(usage.free_inodes, MAX_INODE_COUNT);
        for index in 0..reserved_blocks() {
            assert!(volume.block_bitmap()[index]);
        }
        assert!(!volume.block_bitmap()[reserved_blocks()]);
        Ok(())
    }

    #[test]
    fn test_bitmaps_are_lsb_first_in_image() -> anyhow::Result<()> {
        let mut volume = Volume::anonymous()?;
        volume.inode_bitmap_mut().set(9, true);
        // bit 9 lives in the second byte of the inode bitmap, second bit
        assert_eq!(volume.bytes()[inode_bitmap_offset() + 1], 0b10);
        // three reserved blocks => low three bits of the first byte
        assert_eq!(volume.bytes()[block_bitmap_offset()], 0b111);
        Ok(())
    }

    #[test]
    fn test_create_refuses_existing_image() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fs.img");
        Volume::create(&path)?;
        assert!(Volume::create(&path).is_err());
        assert_eq!(std::fs::metadata(&path)?.len(), (BLOCK_SIZE * BLOCK_COUNT) as u64);
        Ok(())
    }

    #[test]
    fn test_open_resizes_image() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("small.img");
        std::fs::write(&path, b"short")?;
        let volume = Volume::open(&path)?;
        volume.flush()?;
        assert_eq!(std::fs::metadata(&path)?.len(), image_size() as u64);
        Ok(())
    }

    #[test]
    fn test_open_existing_leaves_file_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fs.img");
        Volume::create(&path)?.flush()?;
        let before = std::fs::read(&path)?;

        let mut volume = Volume::open_existing(&path)?;
        volume.bytes_mut()[0] = 0xaa;
        volume.flush()?;
        drop(volume);
        assert_eq!(std::fs::read(&path)?, before);

        assert!(Volume::open_existing(dir.path().join("missing.img")).is_err());
        assert!(!dir.path().join("missing.img").exists());
        Ok(())
    }

    #[test]
    fn test_format_clears_everything() -> anyhow::Result<()> {
        let mut volume = Volume::anonymous()?;
        volume.inode_bitmap_mut().set(0, true);
        let last = volume.bytes().len() - 1;
        volume.bytes_mut()[last] = 0xaa;
        volume.format();
        assert_eq!(volume.usage().free_inodes, MAX_INODE_COUNT);
        assert_eq!(volume.bytes()[last], 0);
        Ok(())
    }
}

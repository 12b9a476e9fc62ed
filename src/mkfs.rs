//! create our filesystem
use crate::{
    utils::fs_size_calculator::{image_size, reserved_blocks},
    Storage, Volume, BLOCK_COUNT, BLOCK_SIZE, MAX_INODE_COUNT,
};
use byte_unit::{Byte, ByteUnit};
use log::info;
use std::path::Path;

/// create a new filesystem image with an empty root directory
/// # Params
/// - `image_file_path`: the path of the image file, which must not exist yet
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(image_file_path: P) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let image_file_path = image_file_path.as_ref();
    let storage = Storage::with_volume(Volume::create(image_file_path)?)?;
    storage.deinit()?;
    info!(
        "created {} image {}: {} blocks of {}, {} inodes, {} blocks reserved",
        Byte::from_bytes(image_size() as _).get_appropriate_unit(true),
        image_file_path.display(),
        BLOCK_COUNT,
        Byte::from_bytes(BLOCK_SIZE as _).get_adjusted_unit(ByteUnit::B),
        MAX_INODE_COUNT,
        reserved_blocks(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ROOT_DIR_MODE, ROOT_INODE};

    #[test]
    fn test_mkfs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tmp_file = dir.path().join("new_fs.img");
        mkfs(&tmp_file)?;
        assert_eq!(std::fs::metadata(&tmp_file)?.len(), image_size() as u64);

        let storage = Storage::init(&tmp_file)?;
        // test if root inode "/" is created correctly
        let root = storage.stat("/").unwrap();
        assert_eq!(root.ino, ROOT_INODE);
        assert_eq!(root.mode, ROOT_DIR_MODE);
        assert_eq!(root.nlink, 1);
        assert_eq!(storage.list("/"), Ok(vec![".".to_string(), "..".to_string()]));

        let usage = storage.usage();
        assert_eq!(usage.free_inodes, MAX_INODE_COUNT - 1);
        assert_eq!(usage.free_blocks, BLOCK_COUNT - reserved_blocks() - 1);
        Ok(())
    }

    #[test]
    fn test_mkfs_refuses_existing_image() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tmp_file = dir.path().join("taken.img");
        std::fs::write(&tmp_file, b"precious")?;
        assert!(mkfs(&tmp_file).is_err());
        assert_eq!(std::fs::read(&tmp_file)?, b"precious");
        Ok(())
    }
}

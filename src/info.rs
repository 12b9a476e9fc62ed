//! report capacity and usage of an image
use anyhow::anyhow;
use byte_unit::Byte;
use std::path::Path;

use crate::{Volume, VolumeUsage, BLOCK_SIZE};

/// read the usage of an existing image
pub fn usage<P>(image_file_path: P) -> anyhow::Result<VolumeUsage>
where
    P: AsRef<Path>,
{
    let image_file_path = image_file_path.as_ref();
    if !image_file_path.exists() {
        return Err(anyhow!("image {} does not exist", image_file_path.display()));
    }
    Ok(Volume::open_existing(image_file_path)?.usage())
}

/// human readable summary of [usage]
pub fn info<P>(image_file_path: P) -> anyhow::Result<String>
where
    P: AsRef<Path>,
{
    let usage = usage(image_file_path)?;
    let bytes = |blocks: usize| Byte::from_bytes((blocks * BLOCK_SIZE) as _).get_appropriate_unit(true);
    let used_blocks = usage.total_blocks - usage.free_blocks;
    Ok(format!(
        "blocks: {used_blocks}/{} used ({} of {})\ninodes: {}/{} used",
        usage.total_blocks,
        bytes(used_blocks),
        bytes(usage.total_blocks),
        usage.total_inodes - usage.free_inodes,
        usage.total_inodes,
    ))
}

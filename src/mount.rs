//! register our filesystem to `FUSE` and mount it
use fuser::MountOption;
use log::info;
use std::path::Path;

use crate::{FuseAdapter, Storage};

/// mount options for a mount of `chainfs`
pub fn mount_options(auto_unmount: bool, allow_other: bool) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("chainfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    if allow_other {
        opts.push(MountOption::AllowOther);
    }
    if auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }
    opts
}

/// mount the image at `mountpoint`, blocking until it is unmounted
///
/// The image is created when it does not exist yet.
pub fn mount<P, Q>(
    image_path: P,
    mountpoint: Q,
    auto_unmount: bool,
    allow_other: bool,
) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let storage = Storage::init(image_path)?.into_shared();
    let fs = FuseAdapter::new(storage);
    info!("mounting at {}", mountpoint.as_ref().display());
    Ok(fuser::mount2(
        fs,
        mountpoint,
        &mount_options(auto_unmount, allow_other),
    )?)
}

use crate::{Storage, MODE_DIR};

/// a fresh in-memory storage holding only the root directory
pub fn test_storage() -> Storage {
    Storage::open_anonymous().expect("Failed to create anonymous storage")
}

/// a fresh in-memory storage populated with `paths`, in order
///
/// Paths ending in `/` become directories, everything else an empty regular file.
pub fn storage_with_files(paths: &[&str]) -> Storage {
    let mut storage = test_storage();
    for path in paths {
        let mode = if path.ends_with('/') {
            MODE_DIR | 0o755
        } else {
            0o644
        };
        storage
            .mknod(path, mode)
            .unwrap_or_else(|errno| panic!("Failed to create {path}: errno {errno}"));
    }
    storage
}

use serde::{Deserialize, Serialize};

use super::{MODE_DIR, MODE_FILE, MODE_TYPE_MASK};

/// an enum to describe the type of a file
#[derive(Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// an regular file
    RegularFile,
    /// a directory
    Directory,
    /// type bits we don't store
    #[default]
    Unknown,
}

impl FileKind {
    /// the kind encoded in the type bits of `mode`
    ///
    /// A mode without type bits means a regular file.
    pub fn from_mode(mode: u32) -> Self {
        match mode & MODE_TYPE_MASK {
            0 | MODE_FILE => FileKind::RegularFile,
            MODE_DIR => FileKind::Directory,
            _ => FileKind::Unknown,
        }
    }

    /// the type bits of this kind
    pub fn mode_bits(self) -> Option<u32> {
        match self {
            FileKind::RegularFile => Some(MODE_FILE),
            FileKind::Directory => Some(MODE_DIR),
            FileKind::Unknown => None,
        }
    }
}

/// implement a trait to convert [FileKind] to [fuser::FileType]
impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
            // Unknown Types are treated as regular files
            FileKind::Unknown => fuser::FileType::RegularFile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(FileKind::from_mode(0o644), FileKind::RegularFile);
        assert_eq!(FileKind::from_mode(MODE_FILE | 0o600), FileKind::RegularFile);
        assert_eq!(FileKind::from_mode(MODE_DIR | 0o755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(libc::S_IFLNK as u32 | 0o777), FileKind::Unknown);
        assert_eq!(FileKind::Directory.mode_bits(), Some(MODE_DIR));
        assert_eq!(
            fuser::FileType::from(FileKind::Directory),
            fuser::FileType::Directory
        );
    }
}

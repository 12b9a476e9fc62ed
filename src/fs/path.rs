//! slash-delimited path resolution
use smallvec::SmallVec;

use super::{Errno, InodeId, Volume};

pub type Components<'a> = SmallVec<[&'a str; 8]>;

/// split a path on `/`
///
/// Leading, trailing and repeated separators produce empty components.
pub fn split(path: &str) -> Components<'_> {
    path.split('/').collect()
}

impl Volume {
    /// walk `components` from the directory `root`
    ///
    /// An empty component followed by another one is skipped,
    /// an empty last component names the directory reached so far.
    pub fn resolve(&self, root: InodeId, components: &[&str]) -> Result<InodeId, Errno> {
        let mut current = root;
        let mut iter = components.iter().peekable();
        while let Some(component) = iter.next() {
            if component.is_empty() {
                if iter.peek().is_some() {
                    continue;
                }
                return Ok(current);
            }
            if !self.is_dir(current)? {
                return Err(libc::ENOTDIR);
            }
            current = self.lookup(current, component)?;
        }
        Ok(current)
    }

    pub fn resolve_path(&self, root: InodeId, path: &str) -> Result<InodeId, Errno> {
        self.resolve(root, &split(path))
    }

    /// the directory holding the last component of `path`, and that component
    pub fn parent_and_leaf<'a>(
        &self,
        root: InodeId,
        path: &'a str,
    ) -> Result<(InodeId, &'a str), Errno> {
        let mut components = split(path);
        while components.last().map_or(false, |c| c.is_empty()) {
            components.pop();
        }
        let leaf = components.pop().ok_or(libc::ENOENT)?;
        let parent = self.resolve(root, &components)?;
        if !self.is_dir(parent)? {
            return Err(libc::ENOTDIR);
        }
        Ok((parent, leaf))
    }
}

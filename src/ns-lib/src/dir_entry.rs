use crate::{FsInode, Stat};

/// One row of a directory listing.
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
    pub name: String,
    pub inode: FsInode,
}

impl DirectoryEntry {
    pub fn new(name: String, inode: FsInode) -> Self {
        Self { name, inode }
    }

    pub fn stat(&self) -> Option<&Stat> {
        self.inode.stat_cache()
    }

    pub fn is_dot_or_dotdot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

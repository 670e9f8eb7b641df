use serde::{Deserialize, Serialize};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_PERMS: u32 = 0o7777;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Other(u32),
}

impl FileType {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => FileType::Regular,
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            other => FileType::Other(other),
        }
    }

    /// Type bits as stored in the `itype` column.
    pub fn type_bits(&self) -> u32 {
        match self {
            FileType::Regular => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
            FileType::Other(bits) => *bits & S_IFMT,
        }
    }
}

/// Attribute snapshot of an inode (or of one of its levels, or of a tag).
///
/// `mode` carries both the type bits and the permission bits. Times are
/// milliseconds since the epoch. `nlink` is signed because link-count
/// arithmetic in the backend is blind.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stat {
    pub size: u64,
    pub nlink: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
}

impl Stat {
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }

    pub fn perms(&self) -> u32 {
        self.mode & S_PERMS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_mode() {
        assert_eq!(FileType::from_mode(S_IFDIR | 0o755), FileType::Directory);
        assert_eq!(FileType::from_mode(S_IFREG | 0o644), FileType::Regular);
        assert_eq!(FileType::from_mode(S_IFLNK | 0o777), FileType::Symlink);
        assert_eq!(FileType::from_mode(0o010000), FileType::Other(0o010000));
        assert_eq!(FileType::Symlink.type_bits(), 40960);
    }

    #[test]
    fn test_stat_helpers() {
        let stat = Stat {
            mode: S_IFDIR | 0o1777,
            nlink: 2,
            ..Default::default()
        };
        assert!(stat.is_dir());
        assert!(!stat.is_symlink());
        assert_eq!(stat.perms(), 0o1777);
    }
}

use crate::{NsError, NsResult, Stat};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const INODE_ID_LEN: usize = 36;
pub const ROOT_INODE_ID: &str = "000000000000000000000000000000000000";
/// Highest auxiliary level; level 0 is the inode itself.
pub const MAX_LEVEL: u8 = 7;

/// Opaque inode identifier: 36 uppercase hexadecimal characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeId(String);

impl InodeId {
    pub fn root() -> Self {
        InodeId(ROOT_INODE_ID.to_string())
    }

    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        InodeId(format!("0000{}", raw).to_uppercase())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_INODE_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InodeId {
    type Err = NsError;

    fn from_str(s: &str) -> NsResult<Self> {
        if s.len() != INODE_ID_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(NsError::InvalidArgument(format!("bad inode id: {}", s)));
        }
        Ok(InodeId(s.to_ascii_uppercase()))
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for InodeId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.0.as_str().into())
    }
}

impl FromSql for InodeId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        if s.is_empty() {
            return Err(FromSqlError::InvalidType);
        }
        Ok(InodeId(s.to_string()))
    }
}

/// Handle to an inode, optionally addressing one of its auxiliary levels.
///
/// The stat snapshot is whatever the producing call happened to read. It is
/// informational; equality only looks at id and level.
#[derive(Clone, Debug)]
pub struct FsInode {
    id: InodeId,
    level: u8,
    stat_cache: Option<Stat>,
}

impl FsInode {
    pub fn new(id: InodeId) -> Self {
        Self {
            id,
            level: 0,
            stat_cache: None,
        }
    }

    pub fn root() -> Self {
        Self::new(InodeId::root())
    }

    pub fn generate() -> Self {
        Self::new(InodeId::generate())
    }

    pub fn with_level(id: InodeId, level: u8) -> NsResult<Self> {
        if level > MAX_LEVEL {
            return Err(NsError::InvalidArgument(format!("bad level: {}", level)));
        }
        Ok(Self {
            id,
            level,
            stat_cache: None,
        })
    }

    pub fn with_stat(id: InodeId, stat: Stat) -> Self {
        Self {
            id,
            level: 0,
            stat_cache: Some(stat),
        }
    }

    pub fn id(&self) -> &InodeId {
        &self.id
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Same inode at another level, without a snapshot.
    pub fn at_level(&self, level: u8) -> NsResult<Self> {
        Self::with_level(self.id.clone(), level)
    }

    pub fn stat_cache(&self) -> Option<&Stat> {
        self.stat_cache.as_ref()
    }

    pub fn set_stat_cache(&mut self, stat: Option<Stat>) {
        self.stat_cache = stat;
    }
}

impl PartialEq for FsInode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.level == other.level
    }
}

impl Eq for FsInode {}

impl fmt::Display for FsInode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.level == 0 {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}@{}", self.id, self.level)
        }
    }
}

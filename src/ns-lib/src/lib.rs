mod dir_entry;
mod inode;
mod stat;
mod storage;

pub use dir_entry::*;
pub use inode::*;
pub use stat::*;
pub use storage::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NsError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("I/O error: {0}")]
    IoError(String),
    /// Backend failure that no dialect classified as a namespace condition.
    #[error("db error: {0}")]
    DbError(#[source] rusqlite::Error),
}

pub type NsResult<T> = std::result::Result<T, NsError>;

/// Milliseconds since the unix epoch, the unit of every stored timestamp.
pub fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

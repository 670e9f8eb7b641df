use crate::{NsError, NsResult};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

pub const LOCATION_TAPE: i32 = 0;
pub const LOCATION_DISK: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLatency {
    Nearline,
    Online,
}

impl AccessLatency {
    pub fn id(&self) -> i32 {
        match self {
            AccessLatency::Nearline => 0,
            AccessLatency::Online => 1,
        }
    }

    pub fn from_id(id: i32) -> NsResult<Self> {
        match id {
            0 => Ok(AccessLatency::Nearline),
            1 => Ok(AccessLatency::Online),
            _ => Err(NsError::InvalidData(format!("unknown access latency: {}", id))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    Custodial,
    Output,
    Replica,
}

impl RetentionPolicy {
    pub fn id(&self) -> i32 {
        match self {
            RetentionPolicy::Custodial => 0,
            RetentionPolicy::Output => 1,
            RetentionPolicy::Replica => 2,
        }
    }

    pub fn from_id(id: i32) -> NsResult<Self> {
        match id {
            0 => Ok(RetentionPolicy::Custodial),
            1 => Ok(RetentionPolicy::Output),
            2 => Ok(RetentionPolicy::Replica),
            _ => Err(NsError::InvalidData(format!("unknown retention policy: {}", id))),
        }
    }
}

impl ToSql for AccessLatency {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.id().into())
    }
}

impl FromSql for AccessLatency {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let id = value.as_i64()?;
        AccessLatency::from_id(id as i32).map_err(|_| FromSqlError::OutOfRange(id))
    }
}

impl ToSql for RetentionPolicy {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.id().into())
    }
}

impl FromSql for RetentionPolicy {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let id = value.as_i64()?;
        RetentionPolicy::from_id(id as i32).map_err(|_| FromSqlError::OutOfRange(id))
    }
}

/// Storage class triple recorded once per inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub hsm_name: String,
    pub storage_group: String,
    pub storage_sub_group: String,
}

impl StorageInfo {
    pub fn new(hsm_name: &str, storage_group: &str, storage_sub_group: &str) -> Self {
        Self {
            hsm_name: hsm_name.to_string(),
            storage_group: storage_group.to_string(),
            storage_sub_group: storage_sub_group.to_string(),
        }
    }
}

/// Storage info together with whatever latency and policy are set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeStorageInformation {
    pub info: StorageInfo,
    pub access_latency: Option<AccessLatency>,
    pub retention_policy: Option<RetentionPolicy>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub location_type: i32,
    pub location: String,
    pub priority: i32,
    pub ctime: i64,
    pub atime: i64,
    pub online: bool,
}

use log::{info, warn};
use ns_lib::{FsInode, NsError, NsResult, Stat};
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;

use crate::config::DriverConfig;
use crate::driver::FsSqlDriver;
use crate::schema;

/// Runs driver calls in their own write transactions on a blocking thread.
///
/// Each transaction gets a fresh connection, so concurrent callers are
/// serialized by the backend rather than by this type.
pub struct NsMetaService {
    db_path: String,
    busy_timeout_ms: u64,
    driver: Arc<FsSqlDriver>,
}

impl NsMetaService {
    pub fn new(db_path: impl Into<String>, config: DriverConfig) -> NsResult<Self> {
        let db_path = db_path.into();
        let driver = FsSqlDriver::from_config(&config);
        let conn = Self::open_connection(&db_path, config.busy_timeout_ms)?;
        schema::create_schema(&conn, driver.dialect())?;
        info!(
            "NsMetaService: opened {} with {} dialect",
            db_path,
            driver.dialect().name
        );
        Ok(Self {
            db_path,
            busy_timeout_ms: config.busy_timeout_ms,
            driver: Arc::new(driver),
        })
    }

    pub fn driver(&self) -> &FsSqlDriver {
        &self.driver
    }

    pub fn root(&self) -> FsInode {
        FsInode::root()
    }

    fn open_connection(db_path: &str, busy_timeout_ms: u64) -> NsResult<Connection> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(NsError::DbError)?;
        schema::init_connection(&conn, busy_timeout_ms)?;
        Ok(conn)
    }

    /// Commits when `f` succeeds, rolls back otherwise.
    pub async fn with_txn<T, F>(&self, f: F) -> NsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FsSqlDriver, &Connection) -> NsResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        let busy_timeout_ms = self.busy_timeout_ms;
        let driver = self.driver.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::open_connection(&db_path, busy_timeout_ms)?;
            // take the write lock up front so the transaction cannot hit SQLITE_BUSY mid-way
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(NsError::DbError)?;
            match f(driver.as_ref(), &conn) {
                Ok(value) => {
                    conn.execute_batch("COMMIT").map_err(NsError::DbError)?;
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                        warn!("NsMetaService: rollback failed: {}", rollback_err);
                    }
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| NsError::Internal(format!("db task join failed: {}", e)))?
    }

    /// mkdir followed by tag inheritance, in one transaction.
    pub async fn mkdir(
        &self,
        parent: &FsInode,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> NsResult<FsInode> {
        let parent = parent.clone();
        let name = name.to_string();
        self.with_txn(move |driver, conn| {
            let inode = driver.mkdir(conn, &parent, &name, uid, gid, mode)?;
            driver.copy_tags(conn, &parent, &inode)?;
            Ok(inode)
        })
        .await
    }

    pub async fn stat(&self, inode: &FsInode) -> NsResult<Option<Stat>> {
        let inode = inode.clone();
        self.with_txn(move |driver, conn| driver.stat(conn, &inode))
            .await
    }

    pub async fn resolve_path(&self, path: &str) -> NsResult<Option<FsInode>> {
        let path = path.to_string();
        self.with_txn(move |driver, conn| driver.path2inode(conn, &FsInode::root(), &path))
            .await
    }
}

//! Backend bootstrap: connection pragmas, tables and the root directory.
//!
//! The driver never issues DDL. Whoever owns the database runs these once
//! before handing connections to the driver.

use log::info;
use ns_lib::{unix_millis, InodeId, NsError, NsResult, S_IFDIR};
use rusqlite::{params, Connection, OptionalExtension};

use crate::dialect::Dialect;

/// `t_level_1` .. `t_level_7`, indexed by level.
pub(crate) const LEVEL_TABLES: [&str; 8] = [
    "t_inodes",
    "t_level_1",
    "t_level_2",
    "t_level_3",
    "t_level_4",
    "t_level_5",
    "t_level_6",
    "t_level_7",
];

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

pub fn init_connection(conn: &Connection, busy_timeout_ms: u64) -> NsResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {};",
        busy_timeout_ms
    ))
    .map_err(NsError::DbError)?;
    Ok(())
}

pub fn create_schema(conn: &Connection, dialect: &Dialect) -> NsResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS t_inodes (
            ipnfsid TEXT PRIMARY KEY,
            itype INTEGER NOT NULL,
            imode INTEGER NOT NULL,
            inlink INTEGER NOT NULL,
            iuid INTEGER NOT NULL,
            igid INTEGER NOT NULL,
            isize INTEGER NOT NULL,
            iio INTEGER NOT NULL,
            ictime INTEGER NOT NULL,
            iatime INTEGER NOT NULL,
            imtime INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS t_dirs (
            iparent TEXT NOT NULL REFERENCES t_inodes(ipnfsid),
            iname TEXT NOT NULL,
            ipnfsid TEXT NOT NULL REFERENCES t_inodes(ipnfsid),
            PRIMARY KEY (iparent, iname)
        );

        CREATE INDEX IF NOT EXISTS i_dirs_ipnfsid ON t_dirs(ipnfsid);

        CREATE TABLE IF NOT EXISTS t_inodes_data (
            ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            ifiledata BLOB
        );

        CREATE TABLE IF NOT EXISTS t_tags_inodes (
            itagid TEXT PRIMARY KEY,
            imode INTEGER NOT NULL,
            inlink INTEGER NOT NULL,
            iuid INTEGER NOT NULL,
            igid INTEGER NOT NULL,
            isize INTEGER NOT NULL,
            ictime INTEGER NOT NULL,
            iatime INTEGER NOT NULL,
            imtime INTEGER NOT NULL,
            ivalue BLOB
        );

        CREATE TABLE IF NOT EXISTS t_tags (
            ipnfsid TEXT NOT NULL REFERENCES t_inodes(ipnfsid),
            itagname TEXT NOT NULL,
            itagid TEXT NOT NULL REFERENCES t_tags_inodes(itagid),
            isorign INTEGER NOT NULL,
            PRIMARY KEY (ipnfsid, itagname)
        );

        CREATE TABLE IF NOT EXISTS t_locationinfo (
            ipnfsid TEXT NOT NULL REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            itype INTEGER NOT NULL,
            ilocation TEXT NOT NULL,
            ipriority INTEGER NOT NULL,
            ictime INTEGER NOT NULL,
            iatime INTEGER NOT NULL,
            istate INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS i_locationinfo_ipnfsid ON t_locationinfo(ipnfsid);

        CREATE TABLE IF NOT EXISTS t_storageinfo (
            ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            ihsmName TEXT NOT NULL,
            istorageGroup TEXT NOT NULL,
            istorageSubGroup TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS t_access_latency (
            ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            iaccessLatency INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS t_retention_policy (
            ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            iretentionPolicy INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS t_inodes_checksum (
            ipnfsid TEXT NOT NULL REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
            itype INTEGER NOT NULL,
            isum TEXT NOT NULL,
            PRIMARY KEY (ipnfsid, itype)
        );

        CREATE TABLE IF NOT EXISTS t_dir_cache (
            ipnfsid TEXT NOT NULL,
            ipath TEXT NOT NULL PRIMARY KEY
        );",
    )
    .map_err(NsError::DbError)?;

    for table in &LEVEL_TABLES[1..] {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                ipnfsid TEXT PRIMARY KEY REFERENCES t_inodes(ipnfsid) ON DELETE CASCADE,
                imode INTEGER NOT NULL,
                inlink INTEGER NOT NULL,
                iuid INTEGER NOT NULL,
                igid INTEGER NOT NULL,
                isize INTEGER NOT NULL,
                ictime INTEGER NOT NULL,
                iatime INTEGER NOT NULL,
                imtime INTEGER NOT NULL,
                ifiledata BLOB
            );",
            table
        ))
        .map_err(NsError::DbError)?;
    }

    if dialect.tag_copy_trigger {
        // New subdirectories inherit the parent's tags as non-origin.
        conn.execute_batch(&format!(
            "CREATE TRIGGER IF NOT EXISTS tgr_populate_tags AFTER INSERT ON t_dirs
             FOR EACH ROW
             WHEN NEW.iname != '.' AND NEW.iname != '..'
                AND (SELECT itype FROM t_inodes WHERE ipnfsid = NEW.ipnfsid) = {}
             BEGIN
                INSERT INTO t_tags (ipnfsid, itagname, itagid, isorign)
                    SELECT NEW.ipnfsid, itagname, itagid, 0 FROM t_tags
                    WHERE ipnfsid = NEW.iparent;
             END;",
            S_IFDIR
        ))
        .map_err(NsError::DbError)?;
    }

    ensure_root_dir(conn)?;
    Ok(())
}

fn ensure_root_dir(conn: &Connection) -> NsResult<()> {
    let root = InodeId::root();
    let exists = conn
        .query_row(
            "SELECT 1 FROM t_inodes WHERE ipnfsid = ?1",
            params![root],
            |_| Ok(()),
        )
        .optional()
        .map_err(NsError::DbError)?;
    if exists.is_some() {
        return Ok(());
    }

    let now = unix_millis();
    conn.execute(
        "INSERT INTO t_inodes VALUES (?1, ?2, ?3, 2, 0, 0, 512, 0, ?4, ?4, ?4)",
        params![root, S_IFDIR as i64, 0o755i64, now],
    )
    .map_err(NsError::DbError)?;
    conn.execute(
        "INSERT INTO t_dirs (iparent, iname, ipnfsid) VALUES (?1, '.', ?1), (?1, '..', ?1)",
        params![root],
    )
    .map_err(NsError::DbError)?;
    info!("schema: root directory {} created", root);
    Ok(())
}

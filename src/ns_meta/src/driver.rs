use log::{debug, info};
use ns_lib::{
    unix_millis, AccessLatency, FileType, FsInode, InodeId, InodeStorageInformation, NsError,
    NsResult, RetentionPolicy, Stat, StorageInfo, StorageLocation, MAX_LEVEL, S_IFMT,
    S_IFREG, S_PERMS,
};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::config::DriverConfig;
use crate::dialect::{Dialect, ErrorClass};
use crate::dir_stream::DirectoryStream;
use crate::schema::LEVEL_TABLES;

pub const DEFAULT_FETCH_SIZE: usize = 50;

const DEFAULT_SYMLINK_COUNT: u32 = 40;
const DEFAULT_LOCATION_PRIORITY: i32 = 10;
const LOCATION_ONLINE: i32 = 1;
const DIR_SIZE: i64 = 512;
const LEVEL_DEFAULT_MODE: u32 = 0o644;

/// Namespace operations over the relational schema.
///
/// The driver holds no connection and no mutable state. Every call runs on
/// the connection (usually an open transaction) handed in by the caller and
/// re-reads whatever it needs, so concurrent callers only interact through
/// the backend's own constraints.
pub struct FsSqlDriver {
    dialect: Dialect,
    inode_io_enabled: bool,
    fetch_size: usize,
}

impl FsSqlDriver {
    pub fn new(dialect: Dialect) -> Self {
        info!("FsSqlDriver: using {} dialect", dialect.name);
        Self {
            dialect,
            inode_io_enabled: false,
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        let mut driver = Self::new(Dialect::for_backend(&config.dialect));
        driver.inode_io_enabled = config.inode_io_enabled;
        driver.fetch_size = config.fetch_size();
        driver
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn with_inode_io(mut self, enabled: bool) -> Self {
        self.inode_io_enabled = enabled;
        self
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Maps a backend error through the dialect's classification.
    pub(crate) fn db_err(&self, e: rusqlite::Error) -> NsError {
        match (self.dialect.classify)(&e) {
            ErrorClass::DuplicateKey => NsError::AlreadyExists(e.to_string()),
            ErrorClass::ForeignKey => NsError::NotFound(e.to_string()),
            ErrorClass::Other => NsError::DbError(e),
        }
    }

    // ==================== usage ====================

    pub fn used_space(&self, conn: &Connection) -> NsResult<u64> {
        let total: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(isize), 0) FROM t_inodes WHERE itype = ?1",
                params![S_IFREG as i64],
                |row| row.get(0),
            )
            .map_err(|e| self.db_err(e))?;
        Ok(total as u64)
    }

    pub fn used_files(&self, conn: &Connection) -> NsResult<u64> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM t_inodes WHERE itype = ?1",
                params![S_IFREG as i64],
                |row| row.get(0),
            )
            .map_err(|e| self.db_err(e))?;
        Ok(count as u64)
    }

    // ==================== creation ====================

    #[allow(clippy::too_many_arguments)]
    pub fn create_file(
        &self,
        conn: &Connection,
        parent: &FsInode,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
        file_type: FileType,
    ) -> NsResult<FsInode> {
        self.create_file_with_id(
            conn,
            parent,
            &FsInode::generate(),
            name,
            uid,
            gid,
            mode,
            file_type,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_file_with_id(
        &self,
        conn: &Connection,
        parent: &FsInode,
        inode: &FsInode,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
        file_type: FileType,
    ) -> NsResult<FsInode> {
        validate_name(name)?;
        self.require_dir(conn, parent)?;
        self.create_inode(conn, inode, file_type, uid, gid, mode, 1)?;
        self.create_entry_in_parent(conn, parent, name, inode)?;
        self.inc_nlink(conn, parent, 1)?;
        Ok(FsInode::new(inode.id().clone()))
    }

    /// Symbolic link whose level-0 data holds the target path.
    #[allow(clippy::too_many_arguments)]
    pub fn create_link(
        &self,
        conn: &Connection,
        parent: &FsInode,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
        target: &[u8],
    ) -> NsResult<FsInode> {
        let inode = self.create_file(conn, parent, name, uid, gid, mode, FileType::Symlink)?;
        self.write(conn, &inode, 0, 0, target)?;
        Ok(inode)
    }

    pub fn create_hard_link(
        &self,
        conn: &Connection,
        parent: &FsInode,
        inode: &FsInode,
        name: &str,
    ) -> NsResult<()> {
        validate_name(name)?;
        self.require_dir(conn, parent)?;
        let stat = self
            .stat_level(conn, inode.id(), 0)?
            .ok_or_else(|| NsError::NotFound(inode.to_string()))?;
        if stat.is_dir() {
            return Err(NsError::NotAFile(format!(
                "hard link to directory {} refused",
                inode
            )));
        }
        self.create_entry_in_parent(conn, parent, name, inode)?;
        self.inc_nlink(conn, inode, 1)?;
        self.inc_nlink(conn, parent, 1)?;
        Ok(())
    }

    pub fn mkdir(
        &self,
        conn: &Connection,
        parent: &FsInode,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> NsResult<FsInode> {
        validate_name(name)?;
        self.require_dir(conn, parent)?;
        let inode = FsInode::generate();
        self.create_inode(conn, &inode, FileType::Directory, uid, gid, mode, 2)?;
        self.create_entry_in_parent(conn, parent, name, &inode)?;
        self.inc_nlink(conn, parent, 1)?;
        self.create_entry_in_parent(conn, &inode, ".", &inode)?;
        self.create_entry_in_parent(conn, &inode, "..", parent)?;
        debug!("mkdir: {} -> {}/{}", inode, parent, name);
        Ok(inode)
    }

    /// Not atomic: a concurrent creator of the same name makes the inner
    /// mkdir fail with `AlreadyExists`.
    pub fn mkdir_if_not_exists(
        &self,
        conn: &Connection,
        parent: &FsInode,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> NsResult<FsInode> {
        if let Some(existing) = self.inode_of(conn, parent, name)? {
            return Ok(existing);
        }
        self.mkdir(conn, parent, name, uid, gid, mode)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_inode(
        &self,
        conn: &Connection,
        inode: &FsInode,
        file_type: FileType,
        uid: u32,
        gid: u32,
        mode: u32,
        nlink: i64,
    ) -> NsResult<()> {
        let now = unix_millis();
        let size = if file_type == FileType::Directory {
            DIR_SIZE
        } else {
            0
        };
        conn.execute(
            "INSERT INTO t_inodes (ipnfsid, itype, imode, inlink, iuid, igid, isize, iio,
                                   ictime, iatime, imtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9)",
            params![
                inode.id(),
                file_type.type_bits() as i64,
                (mode & S_PERMS) as i64,
                nlink,
                uid as i64,
                gid as i64,
                size,
                self.inode_io_enabled as i64,
                now
            ],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(())
    }

    /// Creates the row of an auxiliary level.
    pub fn create_level(
        &self,
        conn: &Connection,
        inode: &FsInode,
        level: u8,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> NsResult<FsInode> {
        let table = level_table(level)?;
        let now = unix_millis();
        conn.execute(
            &format!(
                "INSERT INTO {} (ipnfsid, imode, inlink, iuid, igid, isize, ictime, iatime, imtime, ifiledata)
                 VALUES (?1, ?2, 1, ?3, ?4, 0, ?5, ?5, ?5, NULL)",
                table
            ),
            params![inode.id(), (mode & S_PERMS) as i64, uid as i64, gid as i64, now],
        )
        .map_err(|e| self.db_err(e))?;
        inode.at_level(level)
    }

    pub fn create_entry_in_parent(
        &self,
        conn: &Connection,
        parent: &FsInode,
        name: &str,
        inode: &FsInode,
    ) -> NsResult<()> {
        match (self.dialect.insert_entry)(conn, parent.id(), name, inode.id()) {
            Ok(0) => Err(NsError::AlreadyExists(format!(
                "entry {} in {} already exists",
                name, parent
            ))),
            Ok(_) => Ok(()),
            Err(e) => Err(self.db_err(e)),
        }
    }

    pub fn remove_entry_in_parent(
        &self,
        conn: &Connection,
        parent: &FsInode,
        name: &str,
    ) -> NsResult<bool> {
        let rc = conn
            .execute(
                "DELETE FROM t_dirs WHERE iparent = ?1 AND iname = ?2",
                params![parent.id(), name],
            )
            .map_err(|e| self.db_err(e))?;
        Ok(rc > 0)
    }

    pub fn remove_entry_in_parent_by_id(
        &self,
        conn: &Connection,
        parent: &FsInode,
        inode: &FsInode,
    ) -> NsResult<bool> {
        let rc = conn
            .execute(
                "DELETE FROM t_dirs WHERE iparent = ?1 AND ipnfsid = ?2
                    AND iname != '.' AND iname != '..'",
                params![parent.id(), inode.id()],
            )
            .map_err(|e| self.db_err(e))?;
        Ok(rc > 0)
    }

    // ==================== removal ====================

    /// Removes `name` from `parent`. `Ok(false)` when there is nothing to remove.
    pub fn remove(&self, conn: &Connection, parent: &FsInode, name: &str) -> NsResult<bool> {
        if name == "." || name == ".." {
            return Err(NsError::InvalidArgument(format!("cannot remove {}", name)));
        }
        match self.stat_level(conn, parent.id(), 0)? {
            None => return Ok(false),
            Some(stat) if !stat.is_dir() => {
                return Err(NsError::NotADirectory(parent.to_string()))
            }
            Some(_) => {}
        }
        let Some(inode) = self.inode_of(conn, parent, name)? else {
            return Ok(false);
        };
        let Some(stat) = self.stat_level(conn, inode.id(), 0)? else {
            return Ok(false);
        };
        if stat.is_dir() {
            self.remove_dir(conn, parent, EntryRef::Name(name), &inode, &stat)
        } else {
            self.remove_file(conn, parent, EntryRef::Name(name), &inode, &stat)
        }
    }

    /// Same as [`remove`](Self::remove), addressing the entry by inode.
    pub fn remove_inode_entry(
        &self,
        conn: &Connection,
        parent: &FsInode,
        inode: &FsInode,
    ) -> NsResult<bool> {
        match self.stat_level(conn, parent.id(), 0)? {
            None => return Ok(false),
            Some(stat) if !stat.is_dir() => {
                return Err(NsError::NotADirectory(parent.to_string()))
            }
            Some(_) => {}
        }
        if self.get_name_of(conn, parent, inode)?.is_none() {
            return Ok(false);
        }
        let Some(stat) = self.stat_level(conn, inode.id(), 0)? else {
            return Ok(false);
        };
        if stat.is_dir() {
            self.remove_dir(conn, parent, EntryRef::Inode, inode, &stat)
        } else {
            self.remove_file(conn, parent, EntryRef::Inode, inode, &stat)
        }
    }

    /// Removes an inode from whichever directory holds it.
    pub fn remove_by_id(&self, conn: &Connection, inode: &FsInode) -> NsResult<bool> {
        let Some(parent) = self.get_parent_of(conn, inode)? else {
            return Ok(false);
        };
        self.remove_inode_entry(conn, &parent, inode)
    }

    fn drop_entry(
        &self,
        conn: &Connection,
        parent: &FsInode,
        entry: EntryRef<'_>,
        inode: &FsInode,
    ) -> NsResult<bool> {
        match entry {
            EntryRef::Name(name) => self.remove_entry_in_parent(conn, parent, name),
            EntryRef::Inode => self.remove_entry_in_parent_by_id(conn, parent, inode),
        }
    }

    fn remove_dir(
        &self,
        conn: &Connection,
        parent: &FsInode,
        entry: EntryRef<'_>,
        inode: &FsInode,
        stat: &Stat,
    ) -> NsResult<bool> {
        if stat.nlink > 2 {
            return Err(NsError::DirectoryNotEmpty(inode.to_string()));
        }
        self.remove_entry_in_parent(conn, inode, ".")?;
        self.remove_entry_in_parent(conn, inode, "..")?;
        self.dec_nlink(conn, inode, 2)?;
        self.remove_tags(conn, inode)?;

        self.drop_entry(conn, parent, entry, inode)?;
        self.dec_nlink(conn, parent, 1)?;
        let removed = self.remove_inode_if_unlinked(conn, inode)?;
        debug!("rmdir: {} from {}, removed={}", inode, parent, removed);
        Ok(removed)
    }

    fn remove_file(
        &self,
        conn: &Connection,
        parent: &FsInode,
        entry: EntryRef<'_>,
        inode: &FsInode,
        stat: &Stat,
    ) -> NsResult<bool> {
        let is_last = stat.nlink <= 1;
        self.dec_nlink(conn, inode, 1)?;
        self.drop_entry(conn, parent, entry, inode)?;
        self.dec_nlink(conn, parent, 1)?;
        if !is_last {
            return Ok(true);
        }

        for level in 1..=MAX_LEVEL {
            self.remove_inode_level(conn, inode, level)?;
        }
        self.remove_storage_info(conn, inode)?;
        self.clear_inode_locations(conn, inode)?;
        self.remove_inode_checksum(conn, inode, None)?;
        let removed = self.remove_inode_if_unlinked(conn, inode)?;
        debug!("unlink: {} from {}, removed={}", inode, parent, removed);
        Ok(removed)
    }

    /// Conditional delete: only an inode whose link count reached zero goes.
    pub fn remove_inode_if_unlinked(&self, conn: &Connection, inode: &FsInode) -> NsResult<bool> {
        let rc = conn
            .execute(
                "DELETE FROM t_inodes WHERE ipnfsid = ?1 AND inlink = 0",
                params![inode.id()],
            )
            .map_err(|e| self.db_err(e))?;
        Ok(rc > 0)
    }

    pub fn remove_inode_level(&self, conn: &Connection, inode: &FsInode, level: u8) -> NsResult<bool> {
        let table = level_table(level)?;
        let rc = conn
            .execute(
                &format!("DELETE FROM {} WHERE ipnfsid = ?1", table),
                params![inode.id()],
            )
            .map_err(|e| self.db_err(e))?;
        Ok(rc > 0)
    }

    // ==================== move ====================

    /// Moves `src_dir/src_name` to `dest_dir/dest_name`, replacing a distinct
    /// destination. `Ok(false)` when the source does not exist.
    pub fn move_entry(
        &self,
        conn: &Connection,
        src_dir: &FsInode,
        src_name: &str,
        dest_dir: &FsInode,
        dest_name: &str,
    ) -> NsResult<bool> {
        validate_name(dest_name)?;
        self.require_dir(conn, dest_dir)?;
        let Some(src) = self.inode_of(conn, src_dir, src_name)? else {
            return Ok(false);
        };
        let dest = self.inode_of(conn, dest_dir, dest_name)?;
        if dest.as_ref() == Some(&src) {
            return Ok(true);
        }

        let src_is_dir = self
            .stat_level(conn, src.id(), 0)?
            .map(|s| s.is_dir())
            .unwrap_or(false);
        if src_is_dir && src_dir != dest_dir && self.is_ancestor(conn, &src, dest_dir)? {
            return Err(NsError::InvalidArgument(format!(
                "cannot move {} into its own subtree",
                src
            )));
        }

        match dest {
            Some(dest) => self.unlink_target(conn, dest_dir, dest_name, &dest)?,
            None => self.inc_nlink(conn, dest_dir, 1)?,
        }

        conn.execute(
            "UPDATE t_dirs SET iparent = ?1, iname = ?2 WHERE iparent = ?3 AND iname = ?4",
            params![dest_dir.id(), dest_name, src_dir.id(), src_name],
        )
        .map_err(|e| self.db_err(e))?;
        if src_is_dir && src_dir != dest_dir {
            conn.execute(
                "UPDATE t_dirs SET ipnfsid = ?1 WHERE iparent = ?2 AND iname = '..'",
                params![dest_dir.id(), src.id()],
            )
            .map_err(|e| self.db_err(e))?;
        }
        self.dec_nlink(conn, src_dir, 1)?;
        debug!(
            "move: {} {}/{} -> {}/{}",
            src, src_dir, src_name, dest_dir, dest_name
        );
        Ok(true)
    }

    /// Same-directory rename.
    pub fn set_file_name(
        &self,
        conn: &Connection,
        dir: &FsInode,
        old_name: &str,
        new_name: &str,
    ) -> NsResult<bool> {
        validate_name(new_name)?;
        let Some(src) = self.inode_of(conn, dir, old_name)? else {
            return Ok(false);
        };
        match self.inode_of(conn, dir, new_name)? {
            Some(dest) if dest == src => return Ok(true),
            Some(dest) => {
                self.unlink_target(conn, dir, new_name, &dest)?;
                self.dec_nlink(conn, dir, 1)?;
            }
            None => {}
        }
        conn.execute(
            "UPDATE t_dirs SET iname = ?1 WHERE iparent = ?2 AND iname = ?3",
            params![new_name, dir.id(), old_name],
        )
        .map_err(|e| self.db_err(e))?;
        self.set_file_mtime(conn, dir, 0, unix_millis())?;
        Ok(true)
    }

    /// Drops a destination that is about to be replaced. The parent's link
    /// count is left to the caller.
    fn unlink_target(
        &self,
        conn: &Connection,
        dir: &FsInode,
        name: &str,
        target: &FsInode,
    ) -> NsResult<()> {
        let stat = self
            .stat_level(conn, target.id(), 0)?
            .ok_or_else(|| NsError::NotFound(target.to_string()))?;
        if stat.is_dir() {
            if stat.nlink > 2 {
                return Err(NsError::DirectoryNotEmpty(target.to_string()));
            }
            self.remove_entry_in_parent(conn, target, ".")?;
            self.remove_entry_in_parent(conn, target, "..")?;
            self.remove_tags(conn, target)?;
            self.remove_entry_in_parent(conn, dir, name)?;
            self.dec_nlink(conn, target, 2)?;
        } else {
            self.remove_entry_in_parent(conn, dir, name)?;
            self.dec_nlink(conn, target, 1)?;
        }
        self.remove_inode_if_unlinked(conn, target)?;
        Ok(())
    }

    fn is_ancestor(&self, conn: &Connection, ancestor: &FsInode, inode: &FsInode) -> NsResult<bool> {
        let mut current = FsInode::new(inode.id().clone());
        loop {
            if current.id() == ancestor.id() {
                return Ok(true);
            }
            match self.get_parent_of(conn, &current)? {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
    }

    // ==================== lookup ====================

    pub fn inode_of(
        &self,
        conn: &Connection,
        parent: &FsInode,
        name: &str,
    ) -> NsResult<Option<FsInode>> {
        let id = conn
            .query_row(
                "SELECT ipnfsid FROM t_dirs WHERE iparent = ?1 AND iname = ?2",
                params![parent.id(), name],
                |row| row.get::<_, InodeId>(0),
            )
            .optional()
            .map_err(|e| self.db_err(e))?;
        Ok(id.map(FsInode::new))
    }

    pub fn get_parent_of(&self, conn: &Connection, inode: &FsInode) -> NsResult<Option<FsInode>> {
        let id = conn
            .query_row(
                "SELECT iparent FROM t_dirs WHERE ipnfsid = ?1 AND iname != '.' AND iname != '..'
                 LIMIT 1",
                params![inode.id()],
                |row| row.get::<_, InodeId>(0),
            )
            .optional()
            .map_err(|e| self.db_err(e))?;
        Ok(id.map(FsInode::new))
    }

    pub fn get_name_of(
        &self,
        conn: &Connection,
        parent: &FsInode,
        inode: &FsInode,
    ) -> NsResult<Option<String>> {
        conn.query_row(
            "SELECT iname FROM t_dirs WHERE iparent = ?1 AND ipnfsid = ?2
                AND iname != '.' AND iname != '..' LIMIT 1",
            params![parent.id(), inode.id()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    pub fn list_dir(&self, conn: &Connection, dir: &FsInode) -> NsResult<Vec<String>> {
        let mut stmt = conn
            .prepare_cached("SELECT iname FROM t_dirs WHERE iparent = ?1 ORDER BY iname")
            .map_err(|e| self.db_err(e))?;
        let names = stmt
            .query_map(params![dir.id()], |row| row.get::<_, String>(0))
            .map_err(|e| self.db_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.db_err(e))?;
        Ok(names)
    }

    /// Lazy listing of `dir`, entries carry stat snapshots.
    pub fn new_directory_stream<'c>(
        &'c self,
        conn: &'c Connection,
        dir: &FsInode,
    ) -> NsResult<DirectoryStream<'c>> {
        Ok(DirectoryStream::new(
            conn,
            self,
            dir.id().clone(),
            self.fetch_size,
        ))
    }

    /// Stat of the level the handle addresses.
    pub fn stat(&self, conn: &Connection, inode: &FsInode) -> NsResult<Option<Stat>> {
        self.stat_level(conn, inode.id(), inode.level())
    }

    pub fn stat_level(&self, conn: &Connection, id: &InodeId, level: u8) -> NsResult<Option<Stat>> {
        let sql = if level == 0 {
            "SELECT isize, inlink, itype, imode, iuid, igid, iatime, ictime, imtime
             FROM t_inodes WHERE ipnfsid = ?1"
                .to_string()
        } else {
            format!(
                "SELECT isize, inlink, {}, imode, iuid, igid, iatime, ictime, imtime
                 FROM {} WHERE ipnfsid = ?1",
                S_IFREG,
                level_table(level)?
            )
        };
        conn.query_row(&sql, params![id], |row| stat_from_row(row, 0))
            .optional()
            .map_err(|e| self.db_err(e))
    }

    /// Re-reads the stat of `inode` into its snapshot.
    pub fn refresh_stat(&self, conn: &Connection, inode: &mut FsInode) -> NsResult<Option<Stat>> {
        let stat = self.stat(conn, inode)?;
        inode.set_stat_cache(stat.clone());
        Ok(stat)
    }

    pub(crate) fn with_stat_snapshot(&self, conn: &Connection, inode: &FsInode) -> NsResult<FsInode> {
        let mut inode = inode.clone();
        self.refresh_stat(conn, &mut inode)?;
        Ok(inode)
    }

    /// Path of `inode` below `start_from`. With `inclusive` the name of
    /// `start_from` itself leads the path (the root has none).
    pub fn inode2path(
        &self,
        conn: &Connection,
        inode: &FsInode,
        start_from: &FsInode,
        inclusive: bool,
    ) -> NsResult<Option<String>> {
        (self.dialect.inode2path)(self, conn, inode, start_from, inclusive)
    }

    pub fn path2inode(
        &self,
        conn: &Connection,
        root: &FsInode,
        path: &str,
    ) -> NsResult<Option<FsInode>> {
        let components = split_path(path);
        if components.is_empty() {
            return Ok(Some(root.clone()));
        }
        let chain = (self.dialect.path_walk)(self, conn, root, &components, 0)?;
        Ok(chain.and_then(|mut chain| chain.pop()))
    }

    /// Every inode visited while resolving `path`, starting with `root`.
    pub fn path2inodes(
        &self,
        conn: &Connection,
        root: &FsInode,
        path: &str,
    ) -> NsResult<Option<Vec<FsInode>>> {
        let components = split_path(path);
        (self.dialect.path_walk)(self, conn, root, &components, 0)
    }

    /// Resolves the target of `link`, found in directory `parent`.
    pub(crate) fn follow_symlink(
        &self,
        conn: &Connection,
        parent: &FsInode,
        link: &FsInode,
        depth: u32,
    ) -> NsResult<Option<Vec<FsInode>>> {
        if depth >= DEFAULT_SYMLINK_COUNT {
            return Err(NsError::InvalidArgument(format!(
                "too many levels of symbolic links at {}",
                link
            )));
        }
        let raw = self.read(conn, &FsInode::new(link.id().clone()), 0, 0, usize::MAX)?;
        let target = String::from_utf8_lossy(&raw).into_owned();
        let start = if target.starts_with('/') {
            FsInode::root()
        } else {
            FsInode::new(parent.id().clone())
        };
        (self.dialect.path_walk)(self, conn, &start, &split_path(&target), depth + 1)
    }

    // ==================== link count ====================

    pub fn inc_nlink(&self, conn: &Connection, inode: &FsInode, delta: i64) -> NsResult<()> {
        let now = unix_millis();
        conn.execute(
            "UPDATE t_inodes SET inlink = inlink + ?1, imtime = ?2, ictime = ?2 WHERE ipnfsid = ?3",
            params![delta, now, inode.id()],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(())
    }

    pub fn dec_nlink(&self, conn: &Connection, inode: &FsInode, delta: i64) -> NsResult<()> {
        let now = unix_millis();
        conn.execute(
            "UPDATE t_inodes SET inlink = inlink - ?1, imtime = ?2, ictime = ?2 WHERE ipnfsid = ?3",
            params![delta, now, inode.id()],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(())
    }

    // ==================== attributes ====================

    fn update_inode_row(
        &self,
        conn: &Connection,
        inode: &FsInode,
        level: u8,
        assignments: &str,
        values: &[&dyn ToSql],
    ) -> NsResult<()> {
        let table = any_level_table(level)?;
        let sql = format!("UPDATE {} SET {} WHERE ipnfsid = ?", table, assignments);
        let mut bound: Vec<&dyn ToSql> = values.to_vec();
        bound.push(inode.id());
        let rc = conn
            .execute(&sql, &bound[..])
            .map_err(|e| self.db_err(e))?;
        if rc == 0 {
            return Err(NsError::NotFound(format!("{} level {}", inode, level)));
        }
        Ok(())
    }

    pub fn set_file_size(&self, conn: &Connection, inode: &FsInode, size: u64) -> NsResult<()> {
        let now = unix_millis();
        let size = size as i64;
        self.update_inode_row(
            conn,
            inode,
            0,
            "isize = ?, imtime = ?, ictime = ?",
            &[&size, &now, &now],
        )
    }

    pub fn set_file_owner(&self, conn: &Connection, inode: &FsInode, level: u8, uid: u32) -> NsResult<()> {
        let now = unix_millis();
        let uid = uid as i64;
        self.update_inode_row(conn, inode, level, "iuid = ?, ictime = ?", &[&uid, &now])
    }

    pub fn set_file_group(&self, conn: &Connection, inode: &FsInode, level: u8, gid: u32) -> NsResult<()> {
        let now = unix_millis();
        let gid = gid as i64;
        self.update_inode_row(conn, inode, level, "igid = ?, ictime = ?", &[&gid, &now])
    }

    /// Only the permission bits of `mode` are stored.
    pub fn set_file_mode(&self, conn: &Connection, inode: &FsInode, level: u8, mode: u32) -> NsResult<()> {
        let now = unix_millis();
        let mode = (mode & S_PERMS) as i64;
        self.update_inode_row(conn, inode, level, "imode = ?, ictime = ?", &[&mode, &now])
    }

    pub fn set_file_atime(&self, conn: &Connection, inode: &FsInode, level: u8, atime: i64) -> NsResult<()> {
        self.update_inode_row(conn, inode, level, "iatime = ?", &[&atime])
    }

    pub fn set_file_ctime(&self, conn: &Connection, inode: &FsInode, level: u8, ctime: i64) -> NsResult<()> {
        self.update_inode_row(conn, inode, level, "ictime = ?", &[&ctime])
    }

    pub fn set_file_mtime(&self, conn: &Connection, inode: &FsInode, level: u8, mtime: i64) -> NsResult<()> {
        self.update_inode_row(conn, inode, level, "imtime = ?", &[&mtime])
    }

    /// Applies `stat` in one statement. mtime always becomes now.
    pub fn set_inode_attributes(
        &self,
        conn: &Connection,
        inode: &FsInode,
        level: u8,
        stat: &Stat,
    ) -> NsResult<()> {
        let now = unix_millis();
        let uid = stat.uid as i64;
        let gid = stat.gid as i64;
        let perms = (stat.mode & S_PERMS) as i64;
        if level == 0 {
            let size = stat.size as i64;
            let file_type = (stat.mode & S_IFMT) as i64;
            self.update_inode_row(
                conn,
                inode,
                0,
                "iatime = ?, imtime = ?, isize = ?, iuid = ?, igid = ?, imode = ?, itype = ?",
                &[&stat.atime, &now, &size, &uid, &gid, &perms, &file_type],
            )
        } else {
            self.update_inode_row(
                conn,
                inode,
                level,
                "iatime = ?, imtime = ?, iuid = ?, igid = ?, imode = ?",
                &[&stat.atime, &now, &uid, &gid, &perms],
            )
        }
    }

    pub fn is_io_enabled(&self, conn: &Connection, inode: &FsInode) -> NsResult<bool> {
        let io = conn
            .query_row(
                "SELECT iio FROM t_inodes WHERE ipnfsid = ?1",
                params![inode.id()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| self.db_err(e))?
            .ok_or_else(|| NsError::NotFound(inode.to_string()))?;
        Ok(io == 1)
    }

    pub fn set_inode_io(&self, conn: &Connection, inode: &FsInode, enabled: bool) -> NsResult<()> {
        let io = enabled as i64;
        self.update_inode_row(conn, inode, 0, "iio = ?", &[&io])
    }

    // ==================== inline data ====================

    pub fn write(
        &self,
        conn: &Connection,
        inode: &FsInode,
        level: u8,
        offset: u64,
        data: &[u8],
    ) -> NsResult<usize> {
        if level == 0 {
            self.write_inode_data(conn, inode, offset, data)?;
        } else {
            self.write_level_data(conn, inode, level, data)?;
        }
        Ok(data.len())
    }

    /// Keeps the stored prefix up to `offset` and appends `data`. Nothing is
    /// padded: an offset past the end of the blob appends right after it.
    fn write_inode_data(&self, conn: &Connection, inode: &FsInode, offset: u64, data: &[u8]) -> NsResult<()> {
        let existing = conn
            .query_row(
                "SELECT ifiledata FROM t_inodes_data WHERE ipnfsid = ?1",
                params![inode.id()],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()
            .map_err(|e| self.db_err(e))?;

        let size = match existing {
            Some(old) => {
                let mut buf = old.unwrap_or_default();
                let keep = usize::try_from(offset).map_or(buf.len(), |o| o.min(buf.len()));
                buf.truncate(keep);
                buf.extend_from_slice(data);
                conn.execute(
                    "UPDATE t_inodes_data SET ifiledata = ?1 WHERE ipnfsid = ?2",
                    params![buf, inode.id()],
                )
                .map_err(|e| self.db_err(e))?;
                buf.len()
            }
            None => {
                conn.execute(
                    "INSERT INTO t_inodes_data (ipnfsid, ifiledata) VALUES (?1, ?2)",
                    params![inode.id(), data],
                )
                .map_err(|e| self.db_err(e))?;
                data.len()
            }
        };
        self.set_file_size(conn, inode, size as u64)
    }

    fn write_level_data(&self, conn: &Connection, inode: &FsInode, level: u8, data: &[u8]) -> NsResult<()> {
        let table = level_table(level)?;
        let stat = self
            .stat_level(conn, inode.id(), 0)?
            .ok_or_else(|| NsError::NotFound(inode.to_string()))?;
        if stat.is_dir() {
            return Err(NsError::NotAFile(format!("{} is a directory", inode)));
        }
        if self.stat_level(conn, inode.id(), level)?.is_none() {
            self.create_level(conn, inode, level, 0, 0, LEVEL_DEFAULT_MODE)?;
        }
        conn.execute(
            &format!(
                "UPDATE {} SET ifiledata = ?1, isize = ?2, imtime = ?3 WHERE ipnfsid = ?4",
                table
            ),
            params![data, data.len() as i64, unix_millis(), inode.id()],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(())
    }

    pub fn read(
        &self,
        conn: &Connection,
        inode: &FsInode,
        level: u8,
        offset: u64,
        len: usize,
    ) -> NsResult<Vec<u8>> {
        let sql = if level == 0 {
            "SELECT ifiledata FROM t_inodes_data WHERE ipnfsid = ?1".to_string()
        } else {
            format!("SELECT ifiledata FROM {} WHERE ipnfsid = ?1", level_table(level)?)
        };
        let data = conn
            .query_row(&sql, params![inode.id()], |row| {
                row.get::<_, Option<Vec<u8>>>(0)
            })
            .optional()
            .map_err(|e| self.db_err(e))?
            .flatten()
            .unwrap_or_default();
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    // ==================== locations ====================

    pub fn add_inode_location(
        &self,
        conn: &Connection,
        inode: &FsInode,
        location_type: i32,
        location: &str,
    ) -> NsResult<()> {
        let now = unix_millis();
        conn.execute(
            "INSERT INTO t_locationinfo (ipnfsid, itype, ilocation, ipriority, ictime, iatime, istate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
            params![
                inode.id(),
                location_type,
                location,
                DEFAULT_LOCATION_PRIORITY,
                now,
                LOCATION_ONLINE
            ],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(())
    }

    /// Online locations of one type, highest priority first.
    pub fn get_inode_locations(
        &self,
        conn: &Connection,
        inode: &FsInode,
        location_type: i32,
    ) -> NsResult<Vec<StorageLocation>> {
        let mut stmt = conn
            .prepare_cached(
                "SELECT ilocation, ipriority, ictime, iatime, istate FROM t_locationinfo
                 WHERE itype = ?1 AND ipnfsid = ?2 AND istate = ?3
                 ORDER BY ipriority DESC",
            )
            .map_err(|e| self.db_err(e))?;
        let locations = stmt
            .query_map(params![location_type, inode.id(), LOCATION_ONLINE], |row| {
                Ok(StorageLocation {
                    location_type,
                    location: row.get(0)?,
                    priority: row.get(1)?,
                    ctime: row.get(2)?,
                    atime: row.get(3)?,
                    online: row.get::<_, i32>(4)? == LOCATION_ONLINE,
                })
            })
            .map_err(|e| self.db_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.db_err(e))?;
        Ok(locations)
    }

    pub fn clear_inode_location(
        &self,
        conn: &Connection,
        inode: &FsInode,
        location_type: i32,
        location: &str,
    ) -> NsResult<usize> {
        conn.execute(
            "DELETE FROM t_locationinfo WHERE ipnfsid = ?1 AND itype = ?2 AND ilocation = ?3",
            params![inode.id(), location_type, location],
        )
        .map_err(|e| self.db_err(e))
    }

    pub fn clear_inode_locations(&self, conn: &Connection, inode: &FsInode) -> NsResult<usize> {
        conn.execute(
            "DELETE FROM t_locationinfo WHERE ipnfsid = ?1",
            params![inode.id()],
        )
        .map_err(|e| self.db_err(e))
    }

    // ==================== tags ====================

    pub fn tags(&self, conn: &Connection, dir: &FsInode) -> NsResult<Vec<String>> {
        let mut stmt = conn
            .prepare_cached("SELECT itagname FROM t_tags WHERE ipnfsid = ?1 ORDER BY itagname")
            .map_err(|e| self.db_err(e))?;
        let names = stmt
            .query_map(params![dir.id()], |row| row.get::<_, String>(0))
            .map_err(|e| self.db_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.db_err(e))?;
        Ok(names)
    }

    /// New tag owned by `dir`. Returns the tag content id.
    pub fn create_tag(
        &self,
        conn: &Connection,
        dir: &FsInode,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> NsResult<String> {
        let tag_id = self.create_tag_inode(conn, uid, gid, mode)?;
        self.assign_tag_to_dir(conn, &tag_id, name, dir, false, true)?;
        Ok(tag_id)
    }

    pub fn create_tag_inode(&self, conn: &Connection, uid: u32, gid: u32, mode: u32) -> NsResult<String> {
        let tag_id = uuid::Uuid::new_v4().hyphenated().to_string().to_uppercase();
        let now = unix_millis();
        conn.execute(
            "INSERT INTO t_tags_inodes (itagid, imode, inlink, iuid, igid, isize, ictime, iatime, imtime, ivalue)
             VALUES (?1, ?2, 1, ?3, ?4, 0, ?5, ?5, ?5, NULL)",
            params![tag_id, (mode | S_IFREG) as i64, uid as i64, gid as i64, now],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(tag_id)
    }

    pub fn assign_tag_to_dir(
        &self,
        conn: &Connection,
        tag_id: &str,
        name: &str,
        dir: &FsInode,
        is_update: bool,
        is_origin: bool,
    ) -> NsResult<()> {
        if is_update {
            conn.execute(
                "UPDATE t_tags SET itagid = ?1, isorign = ?2 WHERE ipnfsid = ?3 AND itagname = ?4",
                params![tag_id, is_origin as i64, dir.id(), name],
            )
        } else {
            conn.execute(
                "INSERT INTO t_tags (ipnfsid, itagname, itagid, isorign) VALUES (?1, ?2, ?3, ?4)",
                params![dir.id(), name, tag_id, is_origin as i64],
            )
        }
        .map_err(|e| self.db_err(e))?;
        Ok(())
    }

    pub fn get_tag_id(&self, conn: &Connection, dir: &FsInode, name: &str) -> NsResult<Option<String>> {
        conn.query_row(
            "SELECT itagid FROM t_tags WHERE ipnfsid = ?1 AND itagname = ?2",
            params![dir.id(), name],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    pub fn is_tag_owner(&self, conn: &Connection, dir: &FsInode, name: &str) -> NsResult<bool> {
        let origin = conn
            .query_row(
                "SELECT isorign FROM t_tags WHERE ipnfsid = ?1 AND itagname = ?2",
                params![dir.id(), name],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| self.db_err(e))?;
        Ok(origin == Some(1))
    }

    /// Replaces the tag value. A directory that inherited the tag first gets
    /// its own copy so the other holders keep the old value.
    pub fn set_tag(&self, conn: &Connection, dir: &FsInode, name: &str, data: &[u8]) -> NsResult<usize> {
        let mut tag_id = self
            .get_tag_id(conn, dir, name)?
            .ok_or_else(|| NsError::NotFound(format!("tag {} of {}", name, dir)))?;

        if !self.is_tag_owner(conn, dir, name)? {
            let stat = self
                .stat_tag(conn, dir, name)?
                .ok_or_else(|| NsError::NotFound(format!("tag {} of {}", name, dir)))?;
            tag_id = self.create_tag_inode(conn, stat.uid, stat.gid, stat.mode)?;
            self.assign_tag_to_dir(conn, &tag_id, name, dir, true, true)?;
            debug!("tag {} of {} now owned as {}", name, dir, tag_id);
        }

        conn.execute(
            "UPDATE t_tags_inodes SET ivalue = ?1, isize = ?2, imtime = ?3 WHERE itagid = ?4",
            params![data, data.len() as i64, unix_millis(), tag_id],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(data.len())
    }

    pub fn get_tag(
        &self,
        conn: &Connection,
        dir: &FsInode,
        name: &str,
        len: usize,
    ) -> NsResult<Option<Vec<u8>>> {
        let value = conn
            .query_row(
                "SELECT i.ivalue, i.isize FROM t_tags t
                 JOIN t_tags_inodes i ON i.itagid = t.itagid
                 WHERE t.ipnfsid = ?1 AND t.itagname = ?2",
                params![dir.id(), name],
                |row| Ok((row.get::<_, Option<Vec<u8>>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(|e| self.db_err(e))?;
        Ok(value.map(|(data, size)| {
            let mut data = data.unwrap_or_default();
            data.truncate(len.min(size.max(0) as usize));
            data
        }))
    }

    pub fn stat_tag(&self, conn: &Connection, dir: &FsInode, name: &str) -> NsResult<Option<Stat>> {
        conn.query_row(
            "SELECT i.isize, i.inlink, 0, i.imode, i.iuid, i.igid, i.iatime, i.ictime, i.imtime
             FROM t_tags t JOIN t_tags_inodes i ON i.itagid = t.itagid
             WHERE t.ipnfsid = ?1 AND t.itagname = ?2",
            params![dir.id(), name],
            |row| stat_from_row(row, 0),
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    pub fn remove_tags(&self, conn: &Connection, dir: &FsInode) -> NsResult<usize> {
        conn.execute("DELETE FROM t_tags WHERE ipnfsid = ?1", params![dir.id()])
            .map_err(|e| self.db_err(e))
    }

    /// Makes `dst` inherit every tag of `src`.
    pub fn copy_tags(&self, conn: &Connection, src: &FsInode, dst: &FsInode) -> NsResult<usize> {
        (self.dialect.copy_tags)(conn, src.id(), dst.id()).map_err(|e| self.db_err(e))
    }

    // ==================== storage classification ====================

    pub fn set_storage_info(&self, conn: &Connection, inode: &FsInode, info: &StorageInfo) -> NsResult<()> {
        conn.execute(
            "INSERT INTO t_storageinfo (ipnfsid, ihsmName, istorageGroup, istorageSubGroup)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                inode.id(),
                info.hsm_name,
                info.storage_group,
                info.storage_sub_group
            ],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(())
    }

    pub fn get_storage_info(&self, conn: &Connection, inode: &FsInode) -> NsResult<Option<StorageInfo>> {
        conn.query_row(
            "SELECT ihsmName, istorageGroup, istorageSubGroup FROM t_storageinfo WHERE ipnfsid = ?1",
            params![inode.id()],
            |row| {
                Ok(StorageInfo {
                    hsm_name: row.get(0)?,
                    storage_group: row.get(1)?,
                    storage_sub_group: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    pub fn get_storage_information(
        &self,
        conn: &Connection,
        inode: &FsInode,
    ) -> NsResult<Option<InodeStorageInformation>> {
        conn.query_row(
            "SELECT s.ihsmName, s.istorageGroup, s.istorageSubGroup,
                    a.iaccessLatency, r.iretentionPolicy
             FROM t_storageinfo s
             LEFT JOIN t_access_latency a ON a.ipnfsid = s.ipnfsid
             LEFT JOIN t_retention_policy r ON r.ipnfsid = s.ipnfsid
             WHERE s.ipnfsid = ?1",
            params![inode.id()],
            |row| {
                Ok(InodeStorageInformation {
                    info: StorageInfo {
                        hsm_name: row.get(0)?,
                        storage_group: row.get(1)?,
                        storage_sub_group: row.get(2)?,
                    },
                    access_latency: row.get::<_, Option<AccessLatency>>(3)?,
                    retention_policy: row.get::<_, Option<RetentionPolicy>>(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    pub fn set_access_latency(&self, conn: &Connection, inode: &FsInode, latency: AccessLatency) -> NsResult<()> {
        let rc = conn
            .execute(
                "UPDATE t_access_latency SET iaccessLatency = ?1 WHERE ipnfsid = ?2",
                params![latency, inode.id()],
            )
            .map_err(|e| self.db_err(e))?;
        if rc == 0 {
            conn.execute(
                "INSERT INTO t_access_latency (ipnfsid, iaccessLatency) VALUES (?1, ?2)",
                params![inode.id(), latency],
            )
            .map_err(|e| self.db_err(e))?;
        }
        Ok(())
    }

    pub fn get_access_latency(&self, conn: &Connection, inode: &FsInode) -> NsResult<Option<AccessLatency>> {
        conn.query_row(
            "SELECT iaccessLatency FROM t_access_latency WHERE ipnfsid = ?1",
            params![inode.id()],
            |row| row.get::<_, AccessLatency>(0),
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    pub fn set_retention_policy(
        &self,
        conn: &Connection,
        inode: &FsInode,
        policy: RetentionPolicy,
    ) -> NsResult<()> {
        let rc = conn
            .execute(
                "UPDATE t_retention_policy SET iretentionPolicy = ?1 WHERE ipnfsid = ?2",
                params![policy, inode.id()],
            )
            .map_err(|e| self.db_err(e))?;
        if rc == 0 {
            conn.execute(
                "INSERT INTO t_retention_policy (ipnfsid, iretentionPolicy) VALUES (?1, ?2)",
                params![inode.id(), policy],
            )
            .map_err(|e| self.db_err(e))?;
        }
        Ok(())
    }

    pub fn get_retention_policy(
        &self,
        conn: &Connection,
        inode: &FsInode,
    ) -> NsResult<Option<RetentionPolicy>> {
        conn.query_row(
            "SELECT iretentionPolicy FROM t_retention_policy WHERE ipnfsid = ?1",
            params![inode.id()],
            |row| row.get::<_, RetentionPolicy>(0),
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    pub fn remove_storage_info(&self, conn: &Connection, inode: &FsInode) -> NsResult<()> {
        for sql in [
            "DELETE FROM t_storageinfo WHERE ipnfsid = ?1",
            "DELETE FROM t_access_latency WHERE ipnfsid = ?1",
            "DELETE FROM t_retention_policy WHERE ipnfsid = ?1",
        ] {
            conn.execute(sql, params![inode.id()])
                .map_err(|e| self.db_err(e))?;
        }
        Ok(())
    }

    // ==================== checksums ====================

    pub fn set_inode_checksum(
        &self,
        conn: &Connection,
        inode: &FsInode,
        checksum_type: i32,
        value: &str,
    ) -> NsResult<()> {
        conn.execute(
            "INSERT INTO t_inodes_checksum (ipnfsid, itype, isum) VALUES (?1, ?2, ?3)",
            params![inode.id(), checksum_type, value],
        )
        .map_err(|e| self.db_err(e))?;
        Ok(())
    }

    pub fn get_inode_checksum(
        &self,
        conn: &Connection,
        inode: &FsInode,
        checksum_type: i32,
    ) -> NsResult<Option<String>> {
        conn.query_row(
            "SELECT isum FROM t_inodes_checksum WHERE ipnfsid = ?1 AND itype = ?2",
            params![inode.id(), checksum_type],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    /// `None` removes every checksum of the inode.
    pub fn remove_inode_checksum(
        &self,
        conn: &Connection,
        inode: &FsInode,
        checksum_type: Option<i32>,
    ) -> NsResult<usize> {
        match checksum_type {
            Some(t) => conn.execute(
                "DELETE FROM t_inodes_checksum WHERE ipnfsid = ?1 AND itype = ?2",
                params![inode.id(), t],
            ),
            None => conn.execute(
                "DELETE FROM t_inodes_checksum WHERE ipnfsid = ?1",
                params![inode.id()],
            ),
        }
        .map_err(|e| self.db_err(e))
    }

    // ==================== directory path cache ====================

    pub fn get_inode_from_cache(&self, conn: &Connection, path: &str) -> NsResult<Option<FsInode>> {
        let id = conn
            .query_row(
                "SELECT ipnfsid FROM t_dir_cache WHERE ipath = ?1",
                params![path],
                |row| row.get::<_, InodeId>(0),
            )
            .optional()
            .map_err(|e| self.db_err(e))?;
        Ok(id.map(FsInode::new))
    }

    pub fn get_path_from_cache(&self, conn: &Connection, inode: &FsInode) -> NsResult<Option<String>> {
        conn.query_row(
            "SELECT ipath FROM t_dir_cache WHERE ipnfsid = ?1 LIMIT 1",
            params![inode.id()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| self.db_err(e))
    }

    fn require_dir(&self, conn: &Connection, dir: &FsInode) -> NsResult<Stat> {
        match self.stat_level(conn, dir.id(), 0)? {
            None => Err(NsError::NotFound(dir.to_string())),
            Some(stat) if !stat.is_dir() => Err(NsError::NotADirectory(dir.to_string())),
            Some(stat) => Ok(stat),
        }
    }
}

#[derive(Clone, Copy)]
enum EntryRef<'a> {
    Name(&'a str),
    Inode,
}

fn validate_name(name: &str) -> NsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(NsError::InvalidArgument(format!("bad entry name: {:?}", name)));
    }
    Ok(())
}

fn level_table(level: u8) -> NsResult<&'static str> {
    if level == 0 {
        return Err(NsError::InvalidArgument("level 0 has no level table".to_string()));
    }
    any_level_table(level)
}

fn any_level_table(level: u8) -> NsResult<&'static str> {
    LEVEL_TABLES
        .get(level as usize)
        .copied()
        .ok_or_else(|| NsError::InvalidArgument(format!("bad level: {}", level)))
}

pub(crate) fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect()
}

/// Reads `isize, inlink, itype, imode, iuid, igid, iatime, ictime, imtime`
/// starting at column `first`.
pub(crate) fn stat_from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<Stat> {
    let file_type: i64 = row.get(first + 2)?;
    let mode: i64 = row.get(first + 3)?;
    Ok(Stat {
        size: row.get::<_, i64>(first)? as u64,
        nlink: row.get(first + 1)?,
        mode: (file_type | mode) as u32,
        uid: row.get::<_, i64>(first + 4)? as u32,
        gid: row.get::<_, i64>(first + 5)? as u32,
        atime: row.get(first + 6)?,
        ctime: row.get(first + 7)?,
        mtime: row.get(first + 8)?,
    })
}

/// Like [`stat_from_row`] for outer joins where the inode row may be missing.
pub(crate) fn stat_from_row_opt(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<Stat>> {
    if row.get::<_, Option<i64>>(first)?.is_none() {
        return Ok(None);
    }
    stat_from_row(row, first).map(Some)
}

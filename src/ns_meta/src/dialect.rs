//! Backend dialects.
//!
//! A [`Dialect`] is a bundle of strategy functions picked once from a backend
//! identifier. Each hook can be swapped on its own; the driver only ever calls
//! through the bundle.

use log::info;
use ns_lib::{FsInode, InodeId, NsError, NsResult, S_IFLNK};
use rusqlite::{ffi, params, Connection, ErrorCode};
use std::fmt;

use crate::driver::{stat_from_row_opt, FsSqlDriver};

/// Upper bound for upward walks, guards against a corrupted parent chain.
const MAX_PATH_DEPTH: i64 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    DuplicateKey,
    ForeignKey,
    Other,
}

pub type ClassifyFn = fn(&rusqlite::Error) -> ErrorClass;
/// Inserts one directory entry, returning the number of rows written.
pub type InsertEntryFn = fn(&Connection, &InodeId, &str, &InodeId) -> rusqlite::Result<usize>;
/// Resolves path components from a start inode into the chain of visited inodes.
pub type PathWalkFn =
    fn(&FsSqlDriver, &Connection, &FsInode, &[String], u32) -> NsResult<Option<Vec<FsInode>>>;
pub type Inode2PathFn =
    fn(&FsSqlDriver, &Connection, &FsInode, &FsInode, bool) -> NsResult<Option<String>>;
pub type CopyTagsFn = fn(&Connection, &InodeId, &InodeId) -> rusqlite::Result<usize>;

#[derive(Clone, Copy)]
pub struct Dialect {
    pub name: &'static str,
    pub insert_entry: InsertEntryFn,
    pub path_walk: PathWalkFn,
    pub inode2path: Inode2PathFn,
    pub copy_tags: CopyTagsFn,
    pub classify: ClassifyFn,
    /// Schema carries a trigger that copies tags into new subdirectories.
    pub tag_copy_trigger: bool,
}

impl Dialect {
    pub fn generic() -> Self {
        Self {
            name: "generic",
            insert_entry: insert_entry_checked,
            path_walk: walk_by_component,
            inode2path: inode2path_by_row,
            copy_tags: copy_tags_explicit,
            classify: classify_by_message,
            tag_copy_trigger: false,
        }
    }

    pub fn sqlite() -> Self {
        Self {
            name: "sqlite",
            insert_entry: insert_entry_anti_join,
            path_walk: walk_recursive_cte,
            inode2path: inode2path_recursive_cte,
            copy_tags: copy_tags_by_trigger,
            classify: classify_by_extended_code,
            tag_copy_trigger: true,
        }
    }

    pub fn for_backend(backend: &str) -> Self {
        match backend.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Self::sqlite(),
            "generic" | "" => Self::generic(),
            other => {
                info!("dialect {} not found, using generic driver", other);
                Self::generic()
            }
        }
    }
}

impl fmt::Debug for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialect")
            .field("name", &self.name)
            .field("tag_copy_trigger", &self.tag_copy_trigger)
            .finish()
    }
}

// ==================== error classification ====================

fn classify_by_extended_code(err: &rusqlite::Error) -> ErrorClass {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            match e.extended_code {
                ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    ErrorClass::DuplicateKey
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ErrorClass::ForeignKey,
                _ => ErrorClass::Other,
            }
        }
        _ => ErrorClass::Other,
    }
}

fn classify_by_message(err: &rusqlite::Error) -> ErrorClass {
    let rusqlite::Error::SqliteFailure(_, Some(msg)) = err else {
        return ErrorClass::Other;
    };
    let msg = msg.to_ascii_uppercase();
    if msg.contains("FOREIGN KEY") {
        ErrorClass::ForeignKey
    } else if msg.contains("UNIQUE") || msg.contains("PRIMARY KEY") {
        ErrorClass::DuplicateKey
    } else {
        ErrorClass::Other
    }
}

// ==================== entry insert ====================

fn insert_entry_checked(
    conn: &Connection,
    parent: &InodeId,
    name: &str,
    inode: &InodeId,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO t_dirs (iparent, iname, ipnfsid) VALUES (?1, ?2, ?3)",
        params![parent, name, inode],
    )
}

/// Zero rows written means the name was taken.
fn insert_entry_anti_join(
    conn: &Connection,
    parent: &InodeId,
    name: &str,
    inode: &InodeId,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO t_dirs (iparent, iname, ipnfsid)
         SELECT ?1, ?2, ?3
         WHERE NOT EXISTS (SELECT 1 FROM t_dirs WHERE iparent = ?1 AND iname = ?2)",
        params![parent, name, inode],
    )
}

// ==================== tag copy ====================

fn copy_tags_explicit(conn: &Connection, src: &InodeId, dst: &InodeId) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO t_tags (ipnfsid, itagname, itagid, isorign)
         SELECT ?1, itagname, itagid, 0 FROM t_tags WHERE ipnfsid = ?2",
        params![dst, src],
    )
}

fn copy_tags_by_trigger(_: &Connection, _: &InodeId, _: &InodeId) -> rusqlite::Result<usize> {
    Ok(0)
}

// ==================== path walk ====================

/// Appends a resolved link target in place of the link. The target chain
/// starts at the directory the walk began from; a target such as `/` has
/// nothing beyond that start, and the start itself is the resolved inode.
fn splice_link_target(chain: &mut Vec<FsInode>, target: Vec<FsInode>) {
    if target.len() == 1 {
        chain.extend(target);
    } else {
        chain.extend(target.into_iter().skip(1));
    }
}

fn walk_by_component(
    driver: &FsSqlDriver,
    conn: &Connection,
    start: &FsInode,
    components: &[String],
    depth: u32,
) -> NsResult<Option<Vec<FsInode>>> {
    let mut current = driver.with_stat_snapshot(conn, start)?;
    let mut chain = vec![current.clone()];
    for name in components {
        let Some(inode) = driver.inode_of(conn, &current, name)? else {
            return Ok(None);
        };
        let Some(stat) = driver.stat(conn, &inode)? else {
            return Ok(None);
        };
        let inode = FsInode::with_stat(inode.id().clone(), stat);
        if inode.stat_cache().map(|s| s.is_symlink()).unwrap_or(false) {
            let Some(target) = driver.follow_symlink(conn, &current, &inode, depth)? else {
                return Ok(None);
            };
            current = match target.last() {
                Some(last) => last.clone(),
                None => return Ok(None),
            };
            splice_link_target(&mut chain, target);
        } else {
            chain.push(inode.clone());
            current = inode;
        }
    }
    Ok(Some(chain))
}

/// Walks as far as possible in one statement. The walk stops at the first
/// missing component or right after a symlink, which is then followed here
/// and the remaining components continue from its target.
fn walk_recursive_cte(
    driver: &FsSqlDriver,
    conn: &Connection,
    start: &FsInode,
    components: &[String],
    depth: u32,
) -> NsResult<Option<Vec<FsInode>>> {
    if components.is_empty() {
        return Ok(Some(vec![driver.with_stat_snapshot(conn, start)?]));
    }
    let names = serde_json::to_string(components)
        .map_err(|e| NsError::Internal(format!("encode path components failed: {}", e)))?;

    let mut stmt = conn
        .prepare_cached(
            "WITH RECURSIVE
                comps(idx, name) AS (
                    SELECT CAST(key AS INTEGER), value FROM json_each(?2)
                ),
                walk(idx, ipnfsid) AS (
                    SELECT -1, ?1
                    UNION ALL
                    SELECT c.idx, d.ipnfsid
                    FROM walk w
                    JOIN comps c ON c.idx = w.idx + 1
                    JOIN t_dirs d ON d.iparent = w.ipnfsid AND d.iname = c.name
                    LEFT JOIN t_inodes p ON p.ipnfsid = w.ipnfsid
                    WHERE w.idx = -1 OR p.itype != ?3
                )
             SELECT w.idx, w.ipnfsid, i.isize, i.inlink, i.itype, i.imode, i.iuid, i.igid,
                    i.iatime, i.ictime, i.imtime
             FROM walk w LEFT JOIN t_inodes i ON i.ipnfsid = w.ipnfsid
             ORDER BY w.idx",
        )
        .map_err(|e| driver.db_err(e))?;
    let rows = stmt
        .query_map(params![start.id(), names, S_IFLNK as i64], |row| {
            let idx: i64 = row.get(0)?;
            let id: InodeId = row.get(1)?;
            let mut inode = FsInode::new(id);
            inode.set_stat_cache(stat_from_row_opt(row, 2)?);
            Ok((idx, inode))
        })
        .map_err(|e| driver.db_err(e))?;

    let mut chain = Vec::new();
    let mut last_idx = -1i64;
    for row in rows {
        let (idx, inode) = row.map_err(|e| driver.db_err(e))?;
        last_idx = idx;
        chain.push(inode);
    }
    drop(stmt);

    let Some(last) = chain.last().cloned() else {
        return Ok(None);
    };
    let Some(last_stat) = last.stat_cache() else {
        return Ok(None);
    };
    let resolved = (last_idx + 1) as usize;

    if last_idx >= 0 && last_stat.is_symlink() {
        chain.pop();
        let parent = match chain.last() {
            Some(p) => p.clone(),
            None => return Ok(None),
        };
        let Some(target) = driver.follow_symlink(conn, &parent, &last, depth)? else {
            return Ok(None);
        };
        let current = match target.last() {
            Some(t) => t.clone(),
            None => return Ok(None),
        };
        splice_link_target(&mut chain, target);
        if resolved == components.len() {
            return Ok(Some(chain));
        }
        let Some(rest) = walk_recursive_cte(driver, conn, &current, &components[resolved..], depth)?
        else {
            return Ok(None);
        };
        chain.extend(rest.into_iter().skip(1));
        return Ok(Some(chain));
    }

    if resolved == components.len() {
        Ok(Some(chain))
    } else {
        Ok(None)
    }
}

// ==================== inode2path ====================

fn join_reversed(names: Vec<String>) -> String {
    let parts: Vec<String> = names.into_iter().rev().collect();
    format!("/{}", parts.join("/"))
}

fn inode2path_by_row(
    driver: &FsSqlDriver,
    conn: &Connection,
    inode: &FsInode,
    start_from: &FsInode,
    inclusive: bool,
) -> NsResult<Option<String>> {
    if inode.id() == start_from.id() {
        return Ok(Some("/".to_string()));
    }
    let mut names = Vec::new();
    let mut element = FsInode::new(inode.id().clone());
    loop {
        if names.len() as i64 > MAX_PATH_DEPTH {
            return Err(NsError::Internal(format!("parent chain of {} too deep", inode)));
        }
        let Some(parent) = driver.get_parent_of(conn, &element)? else {
            return Ok(None);
        };
        let Some(name) = driver.get_name_of(conn, &parent, &element)? else {
            return Ok(None);
        };
        names.push(name);
        if (inclusive && element.id() == start_from.id())
            || (!inclusive && parent.id() == start_from.id())
        {
            break;
        }
        // root has no name of its own to include
        if inclusive && parent.id() == start_from.id() && start_from.id().is_root() {
            break;
        }
        element = parent;
    }
    Ok(Some(join_reversed(names)))
}

fn inode2path_recursive_cte(
    driver: &FsSqlDriver,
    conn: &Connection,
    inode: &FsInode,
    start_from: &FsInode,
    inclusive: bool,
) -> NsResult<Option<String>> {
    if inode.id() == start_from.id() {
        return Ok(Some("/".to_string()));
    }
    let mut stmt = conn
        .prepare_cached(
            "WITH RECURSIVE up(depth, ipnfsid, iparent, iname) AS (
                SELECT * FROM (
                    SELECT 0, ipnfsid, iparent, iname FROM t_dirs
                    WHERE ipnfsid = ?1 AND iname != '.' AND iname != '..'
                    LIMIT 1
                )
                UNION ALL
                SELECT up.depth + 1, d.ipnfsid, d.iparent, d.iname
                FROM up JOIN t_dirs d ON d.ipnfsid = up.iparent
                WHERE d.iname != '.' AND d.iname != '..'
                    AND up.ipnfsid != ?2 AND up.depth < ?3
             )
             SELECT ipnfsid, iparent, iname FROM up ORDER BY depth",
        )
        .map_err(|e| driver.db_err(e))?;
    let rows = stmt
        .query_map(params![inode.id(), start_from.id(), MAX_PATH_DEPTH], |row| {
            Ok((
                row.get::<_, InodeId>(0)?,
                row.get::<_, InodeId>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| driver.db_err(e))?;

    let mut names = Vec::new();
    let mut last_parent: Option<InodeId> = None;
    for row in rows {
        let (element, parent, name) = row.map_err(|e| driver.db_err(e))?;
        names.push(name);
        if (inclusive && &element == start_from.id()) || (!inclusive && &parent == start_from.id())
        {
            return Ok(Some(join_reversed(names)));
        }
        last_parent = Some(parent);
    }
    match last_parent {
        Some(parent) if inclusive && &parent == start_from.id() && parent.is_root() => {
            Ok(Some(join_reversed(names)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn open_db(dialect: &Dialect) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_connection(&conn, 1000).unwrap();
        schema::create_schema(&conn, dialect).unwrap();
        conn
    }

    #[test]
    fn test_for_backend() {
        assert_eq!(Dialect::for_backend("sqlite").name, "sqlite");
        assert_eq!(Dialect::for_backend("SQLite3").name, "sqlite");
        assert_eq!(Dialect::for_backend("generic").name, "generic");
        let fallback = Dialect::for_backend("oracle");
        assert_eq!(fallback.name, "generic");
        assert!(!fallback.tag_copy_trigger);
        assert!(Dialect::sqlite().tag_copy_trigger);
    }

    #[test]
    fn test_classifiers_agree() {
        for dialect in [Dialect::generic(), Dialect::sqlite()] {
            let conn = open_db(&dialect);
            let root = InodeId::root();

            let dup = insert_entry_checked(&conn, &root, ".", &root).unwrap_err();
            assert_eq!((dialect.classify)(&dup), ErrorClass::DuplicateKey);

            let missing = InodeId::generate();
            let fk = insert_entry_checked(&conn, &root, "x", &missing).unwrap_err();
            assert_eq!((dialect.classify)(&fk), ErrorClass::ForeignKey);

            let other = conn.execute("SELECT * FROM no_such_table", []).unwrap_err();
            assert_eq!((dialect.classify)(&other), ErrorClass::Other);
        }
    }

    #[test]
    fn test_anti_join_reports_zero_rows() {
        let conn = open_db(&Dialect::sqlite());
        let root = InodeId::root();
        assert_eq!(insert_entry_anti_join(&conn, &root, "..", &root).unwrap(), 0);
    }

    #[test]
    fn test_mixed_hooks() {
        let mut dialect = Dialect::generic();
        dialect.insert_entry = insert_entry_anti_join;
        let conn = open_db(&dialect);
        let root = InodeId::root();
        assert_eq!((dialect.insert_entry)(&conn, &root, ".", &root).unwrap(), 0);
        assert_eq!((dialect.copy_tags)(&conn, &root, &root).unwrap(), 0);
    }
}

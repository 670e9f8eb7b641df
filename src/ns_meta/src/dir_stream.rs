use log::debug;
use ns_lib::{DirectoryEntry, FsInode, InodeId, NsResult};
use rusqlite::{params, Connection};
use std::collections::VecDeque;

use crate::driver::{stat_from_row, FsSqlDriver};

/// Lazy cursor over the entries of one directory, `.` and `..` included.
///
/// Pages of `fetch_size` rows are read on demand, keyed on the last name
/// returned, so the stream never holds a statement open between pages.
/// Exhausting the stream or calling [`close`](Self::close) releases the
/// buffered page; dropping an open stream closes it too.
pub struct DirectoryStream<'c> {
    conn: &'c Connection,
    driver: &'c FsSqlDriver,
    dir: InodeId,
    fetch_size: usize,
    cursor: Option<String>,
    page: VecDeque<DirectoryEntry>,
    exhausted: bool,
    closed: bool,
}

impl<'c> DirectoryStream<'c> {
    pub(crate) fn new(
        conn: &'c Connection,
        driver: &'c FsSqlDriver,
        dir: InodeId,
        fetch_size: usize,
    ) -> Self {
        Self {
            conn,
            driver,
            dir,
            fetch_size: fetch_size.max(1),
            cursor: None,
            page: VecDeque::new(),
            exhausted: false,
            closed: false,
        }
    }

    pub fn dir(&self) -> &InodeId {
        &self.dir
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.exhausted = true;
        self.page.clear();
        self.cursor = None;
    }

    fn fetch_page(&mut self) -> NsResult<()> {
        let conn = self.conn;
        let driver = self.driver;
        let mut stmt = conn
            .prepare_cached(
                "SELECT d.iname, i.ipnfsid, i.isize, i.inlink, i.itype, i.imode, i.iuid, i.igid,
                        i.iatime, i.ictime, i.imtime
                 FROM t_dirs d JOIN t_inodes i ON i.ipnfsid = d.ipnfsid
                 WHERE d.iparent = ?1 AND (?2 IS NULL OR d.iname > ?2)
                 ORDER BY d.iname
                 LIMIT ?3",
            )
            .map_err(|e| driver.db_err(e))?;
        let entries = stmt
            .query_map(
                params![self.dir, self.cursor, self.fetch_size as i64],
                |row| {
                    let name: String = row.get(0)?;
                    let id: InodeId = row.get(1)?;
                    let stat = stat_from_row(row, 2)?;
                    Ok(DirectoryEntry::new(name, FsInode::with_stat(id, stat)))
                },
            )
            .map_err(|e| driver.db_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| driver.db_err(e))?;

        if entries.len() < self.fetch_size {
            self.exhausted = true;
        }
        if let Some(last) = entries.last() {
            self.cursor = Some(last.name.clone());
        }
        self.page.extend(entries);
        Ok(())
    }
}

impl Iterator for DirectoryStream<'_> {
    type Item = NsResult<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.close();
                return Some(Err(e));
            }
        }
        match self.page.pop_front() {
            Some(entry) => Some(Ok(entry)),
            None => {
                self.close();
                None
            }
        }
    }
}

impl Drop for DirectoryStream<'_> {
    fn drop(&mut self) {
        if !self.closed {
            debug!("directory stream of {} dropped while open, closing", self.dir);
            self.close();
        }
    }
}

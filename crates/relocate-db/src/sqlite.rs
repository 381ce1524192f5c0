use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use relocate_core::DumpCompression;
use rusqlite::backup::Progress;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, DatabaseName};

use crate::dump::decompress_to;
use crate::{Database, DumpTool, Row};

const SQLITE_IMAGE_HEADER: &[u8; 16] = b"SQLite format 3\0";

static STAGED_DUMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct SqliteDatabase {
    conn: RefCell<Connection>,
    prefix: String,
    staging_dir: Option<PathBuf>,
}

impl SqliteDatabase {
    pub fn open(path: &Path, prefix: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database: {}", path.display()))?;
        Ok(Self::from_connection(conn, prefix))
    }

    pub fn open_in_memory(prefix: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
        Ok(Self::from_connection(conn, prefix))
    }

    pub fn from_connection(conn: Connection, prefix: impl Into<String>) -> Self {
        Self {
            conn: RefCell::new(conn),
            prefix: prefix.into(),
            staging_dir: None,
        }
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn
            .borrow()
            .execute_batch(sql)
            .context("failed to execute sqlite batch")
    }

    fn restore_plain(&self, path: &Path) -> Result<()> {
        if is_sqlite_image(path)? {
            let mut conn = self.conn.borrow_mut();
            return conn
                .restore(DatabaseName::Main, path, None::<fn(Progress)>)
                .with_context(|| format!("failed to restore sqlite image {}", path.display()));
        }

        let script = fs::read_to_string(path)
            .with_context(|| format!("failed to read SQL dump {}", path.display()))?;
        let conn = self.conn.borrow();
        drop_all_objects(&conn)?;
        conn.execute_batch(&script)
            .with_context(|| format!("failed to apply SQL dump {}", path.display()))
    }
}

impl Database for SqliteDatabase {
    fn execute(&self, sql: &str) -> Result<u64> {
        let changed = self
            .conn
            .borrow()
            .execute(sql, [])
            .with_context(|| format!("failed to execute: {sql}"))?;
        Ok(changed as u64)
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = self.conn.borrow();
        let mut stmt = conn
            .prepare(sql)
            .with_context(|| format!("failed to prepare query: {sql}"))?;
        let names = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut rows = stmt
            .query([])
            .with_context(|| format!("failed to run query: {sql}"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut converted = Row::new();
            for (index, name) in names.iter().enumerate() {
                converted.push(name.clone(), value_to_string(row.get_ref(index)?));
            }
            out.push(converted);
        }
        Ok(out)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .borrow()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to check table {table}"))?;
        Ok(count > 0)
    }

    fn escape(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl DumpTool for SqliteDatabase {
    fn dump(&self, dest: &Path) -> Result<()> {
        self.conn
            .borrow()
            .backup(DatabaseName::Main, dest, None)
            .with_context(|| format!("failed to snapshot sqlite database to {}", dest.display()))
    }

    fn restore(&self, src: &Path) -> Result<()> {
        match DumpCompression::detect(src)? {
            DumpCompression::None => self.restore_plain(src),
            DumpCompression::Gzip => {
                let dir = self.staging_dir.as_deref().ok_or_else(|| {
                    anyhow!("no staging directory to unpack {}", src.display())
                })?;
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                let staged = staged_dump_path(dir);
                let result = decompress_to(src, &staged).and_then(|_| self.restore_plain(&staged));
                if let Err(err) = fs::remove_file(&staged) {
                    log::warn!("failed to remove staged dump {}: {err}", staged.display());
                }
                result
            }
        }
    }
}

fn staged_dump_path(dir: &Path) -> PathBuf {
    let sequence = STAGED_DUMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(
        "relocate-staged-dump-{}-{sequence}",
        std::process::id()
    ))
}

fn is_sqlite_image(path: &Path) -> Result<bool> {
    let mut header = [0_u8; 16];
    let mut file =
        File::open(path).with_context(|| format!("failed to open dump: {}", path.display()))?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_IMAGE_HEADER),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to read dump: {}", path.display())),
    }
}

fn drop_all_objects(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = OFF;")
        .context("failed to disable foreign keys")?;
    let objects = {
        let mut stmt = conn.prepare(
            "SELECT type, name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for (kind, name) in objects {
        let keyword = if kind == "view" { "VIEW" } else { "TABLE" };
        let sql = format!(
            "DROP {keyword} IF EXISTS \"{}\"",
            name.replace('"', "\"\"")
        );
        conn.execute_batch(&sql)
            .with_context(|| format!("failed to drop {kind} {name}"))?;
    }
    Ok(())
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(number) => Some(number.to_string()),
        ValueRef::Real(number) => Some(number.to_string()),
        ValueRef::Text(text) => Some(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Some(String::from_utf8_lossy(blob).into_owned()),
    }
}

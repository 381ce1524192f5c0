use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use relocate_core::{run_command, run_command_with_stdin, DatabaseSettings};

use crate::dump::open_dump_reader;
use crate::{Database, DumpTool, Row};

const DEFAULT_CLIENT: &str = "mysql";
const DEFAULT_DUMPER: &str = "mysqldump";

pub struct MysqlCliDatabase {
    settings: DatabaseSettings,
    client: PathBuf,
}

impl MysqlCliDatabase {
    pub fn new(settings: DatabaseSettings) -> Result<Self> {
        ensure_database_name(&settings)?;
        Ok(Self {
            settings,
            client: PathBuf::from(DEFAULT_CLIENT),
        })
    }

    pub fn with_client(mut self, client: impl Into<PathBuf>) -> Self {
        self.client = client.into();
        self
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }
}

impl Database for MysqlCliDatabase {
    fn execute(&self, sql: &str) -> Result<u64> {
        let statement = format!("{}; SELECT ROW_COUNT();", sql.trim().trim_end_matches(';'));
        let mut command = build_query_command(&self.client, &self.settings, &statement, false);
        let output = run_command(&mut command, "mysql statement failed")?;
        let last = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or("0");
        let affected = last
            .parse::<i64>()
            .with_context(|| format!("unexpected ROW_COUNT output: {last}"))?;
        Ok(affected.max(0) as u64)
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut command = build_query_command(&self.client, &self.settings, sql, true);
        let output = run_command(&mut command, "mysql query failed")?;
        Ok(parse_batch_output(&output.stdout))
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = '{}'",
            self.escape(table)
        );
        let count = self.get_scalar(&sql)?.unwrap_or_default();
        Ok(count.trim().parse::<u64>().unwrap_or(0) > 0)
    }

    fn escape(&self, value: &str) -> String {
        escape_mysql(value)
    }

    fn prefix(&self) -> &str {
        &self.settings.prefix
    }
}

pub struct MysqlDumpTool {
    settings: DatabaseSettings,
    dumper: PathBuf,
    client: PathBuf,
}

impl MysqlDumpTool {
    pub fn new(settings: DatabaseSettings) -> Result<Self> {
        ensure_database_name(&settings)?;
        Ok(Self {
            settings,
            dumper: PathBuf::from(DEFAULT_DUMPER),
            client: PathBuf::from(DEFAULT_CLIENT),
        })
    }

    pub fn with_programs(mut self, dumper: impl Into<PathBuf>, client: impl Into<PathBuf>) -> Self {
        self.dumper = dumper.into();
        self.client = client.into();
        self
    }
}

impl DumpTool for MysqlDumpTool {
    fn dump(&self, dest: &Path) -> Result<()> {
        let mut command = build_mysqldump_command(&self.dumper, &self.settings, dest);
        run_command(
            &mut command,
            &format!("failed to dump database into {}", dest.display()),
        )?;
        Ok(())
    }

    // The dump only recreates its own tables, so everything else in the schema is dropped
    // in the same session first.
    fn restore(&self, src: &Path) -> Result<()> {
        let reader = open_dump_reader(src)?;
        let objects = self.list_objects()?;
        let prelude = build_drop_objects_script(&objects);
        let mut input = Cursor::new(prelude.into_bytes()).chain(reader);
        let mut command = build_mysql_restore_command(&self.client, &self.settings);
        run_command_with_stdin(
            &mut command,
            &mut input,
            &format!("failed to restore database from {}", src.display()),
        )?;
        Ok(())
    }
}

impl MysqlDumpTool {
    fn list_objects(&self) -> Result<Vec<SchemaObject>> {
        let mut command =
            build_query_command(&self.client, &self.settings, "SHOW FULL TABLES", false);
        let output = run_command(
            &mut command,
            &format!("failed to list tables of {}", self.settings.name),
        )?;
        Ok(parse_table_listing(&output.stdout))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SchemaObject {
    pub(crate) name: String,
    pub(crate) is_view: bool,
}

pub(crate) fn parse_table_listing(stdout: &str) -> Vec<SchemaObject> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next().filter(|name| !name.is_empty())?;
            let is_view = fields
                .next()
                .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("VIEW"));
            Some(SchemaObject {
                name: unescape_batch_value(name),
                is_view,
            })
        })
        .collect()
}

pub(crate) fn build_drop_objects_script(objects: &[SchemaObject]) -> String {
    let quoted = |object: &SchemaObject| format!("`{}`", object.name.replace('`', "``"));
    let views = objects
        .iter()
        .filter(|object| object.is_view)
        .map(quoted)
        .collect::<Vec<_>>();
    let tables = objects
        .iter()
        .filter(|object| !object.is_view)
        .map(quoted)
        .collect::<Vec<_>>();

    let mut script = String::from("SET FOREIGN_KEY_CHECKS=0;\n");
    if !views.is_empty() {
        script.push_str(&format!("DROP VIEW IF EXISTS {};\n", views.join(", ")));
    }
    if !tables.is_empty() {
        script.push_str(&format!("DROP TABLE IF EXISTS {};\n", tables.join(", ")));
    }
    script.push_str("SET FOREIGN_KEY_CHECKS=1;\n");
    script
}

fn ensure_database_name(settings: &DatabaseSettings) -> Result<()> {
    if settings.name.trim().is_empty() {
        return Err(anyhow!("database name is required for the mysql backend"));
    }
    Ok(())
}

fn connection_args(settings: &DatabaseSettings) -> Vec<String> {
    let mut args = vec![format!("--host={}", settings.host)];
    if let Some(port) = settings.port {
        args.push(format!("--port={port}"));
    }
    if !settings.user.is_empty() {
        args.push(format!("--user={}", settings.user));
    }
    if !settings.password.is_empty() {
        args.push(format!("--password={}", settings.password));
    }
    args.push("--default-character-set=utf8mb4".to_string());
    args
}

pub(crate) fn build_query_command(
    client: &Path,
    settings: &DatabaseSettings,
    sql: &str,
    with_headers: bool,
) -> Command {
    let mut command = Command::new(client);
    command.args(connection_args(settings));
    command.arg("--batch");
    if !with_headers {
        command.arg("--skip-column-names");
    }
    command.arg(format!("--execute={sql}"));
    command.arg(&settings.name);
    command
}

pub(crate) fn build_mysqldump_command(
    dumper: &Path,
    settings: &DatabaseSettings,
    dest: &Path,
) -> Command {
    let mut command = Command::new(dumper);
    command.args(connection_args(settings));
    command
        .arg("--single-transaction")
        .arg("--routines")
        .arg("--triggers")
        .arg("--add-drop-table")
        .arg(format!("--result-file={}", dest.display()))
        .arg(&settings.name);
    command
}

pub(crate) fn build_mysql_restore_command(client: &Path, settings: &DatabaseSettings) -> Command {
    let mut command = Command::new(client);
    command.args(connection_args(settings));
    command.arg(&settings.name);
    command
}

pub(crate) fn parse_batch_output(stdout: &str) -> Vec<Row> {
    let mut lines = stdout.lines().filter(|line| !line.is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns = header.split('\t').collect::<Vec<_>>();

    lines
        .map(|line| {
            let mut row = Row::new();
            for (index, value) in line.split('\t').enumerate() {
                let name = columns.get(index).copied().unwrap_or_default();
                let value = if value == "NULL" {
                    None
                } else {
                    Some(unescape_batch_value(value))
                };
                row.push(name, value);
            }
            row
        })
        .collect()
}

fn unescape_batch_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

pub(crate) fn escape_mysql(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{1a}' => out.push_str("\\Z"),
            other => out.push(other),
        }
    }
    out
}

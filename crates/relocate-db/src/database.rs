use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: Option<String>) {
        self.columns.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn first(&self) -> Option<&str> {
        self.columns.first().and_then(|(_, value)| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub trait Database {
    fn execute(&self, sql: &str) -> Result<u64>;

    fn query(&self, sql: &str) -> Result<Vec<Row>>;

    fn get_row(&self, sql: &str) -> Result<Option<Row>> {
        Ok(self.query(sql)?.into_iter().next())
    }

    fn get_scalar(&self, sql: &str) -> Result<Option<String>> {
        Ok(self
            .get_row(sql)?
            .and_then(|row| row.first().map(str::to_string)))
    }

    fn table_exists(&self, table: &str) -> Result<bool>;

    fn escape(&self, value: &str) -> String;

    fn prefix(&self) -> &str;
}

pub fn quote(db: &dyn Database, value: &str) -> String {
    format!("'{}'", db.escape(value))
}

pub fn like_contains(db: &dyn Database, value: &str) -> String {
    format!("'%{}%'", db.escape(value))
}

pub fn validate_identifier(identifier: &str) -> Result<&str> {
    let valid = !identifier.is_empty()
        && identifier
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(identifier)
    } else {
        Err(anyhow!("invalid SQL identifier: '{identifier}'"))
    }
}

pub fn table_name(db: &dyn Database, table: &str) -> Result<String> {
    let full = format!("{}{}", db.prefix(), table);
    Ok(format!("`{}`", validate_identifier(&full)?))
}

pub fn column_name(column: &str) -> Result<String> {
    Ok(format!("`{}`", validate_identifier(column)?))
}

pub(crate) fn sql_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

use anyhow::{anyhow, bail, Result};
use relocate_core::{clean_domain, is_local_domain, normalize_physical_uri};
use serde::Serialize;

use crate::database::{quote, sql_timestamp, table_name};
use crate::Database;

pub const PS_SHOP_DOMAIN: &str = "PS_SHOP_DOMAIN";
pub const PS_SHOP_DOMAIN_SSL: &str = "PS_SHOP_DOMAIN_SSL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShopUrlRecord {
    pub id: i64,
    pub domain: String,
    pub domain_ssl: String,
    pub physical_uri: String,
    pub main: bool,
}

pub fn read_main_shop_url(db: &dyn Database) -> Result<Option<ShopUrlRecord>> {
    let table = table_name(db, "shop_url")?;
    let row = db.get_row(&format!(
        "SELECT id_shop_url, domain, domain_ssl, physical_uri, main FROM {table} ORDER BY main DESC, id_shop_url ASC LIMIT 1"
    ))?;
    let Some(row) = row else {
        return Ok(None);
    };

    let id = row
        .get("id_shop_url")
        .ok_or_else(|| anyhow!("shop_url row has no id"))?
        .trim()
        .parse::<i64>()
        .map_err(|err| anyhow!("shop_url id is not numeric: {err}"))?;
    Ok(Some(ShopUrlRecord {
        id,
        domain: row.get("domain").unwrap_or_default().to_string(),
        domain_ssl: row.get("domain_ssl").unwrap_or_default().to_string(),
        physical_uri: row.get("physical_uri").unwrap_or("/").to_string(),
        main: row.get("main").is_some_and(|value| value.trim() == "1"),
    }))
}

pub fn write_main_shop_url(
    db: &dyn Database,
    domain: &str,
    physical_uri: Option<&str>,
) -> Result<ShopUrlRecord> {
    let domain = clean_domain(domain);
    if domain.is_empty() {
        bail!("refusing to write an empty shop domain");
    }
    let mut record =
        read_main_shop_url(db)?.ok_or_else(|| anyhow!("shop_url table has no rows"))?;

    let table = table_name(db, "shop_url")?;
    let mut assignments = vec![
        format!("domain = {}", quote(db, &domain)),
        format!("domain_ssl = {}", quote(db, &domain)),
    ];
    if let Some(physical_uri) = physical_uri {
        record.physical_uri = normalize_physical_uri(physical_uri);
        assignments.push(format!("physical_uri = {}", quote(db, &record.physical_uri)));
    }
    db.execute(&format!(
        "UPDATE {table} SET {} WHERE id_shop_url = {}",
        assignments.join(", "),
        record.id
    ))?;

    record.domain = domain.clone();
    record.domain_ssl = domain;
    log::info!(
        "shop url set to {}{}",
        record.domain,
        record.physical_uri
    );
    Ok(record)
}

pub fn get_configuration(db: &dyn Database, name: &str) -> Result<Option<String>> {
    let table = table_name(db, "configuration")?;
    db.get_scalar(&format!(
        "SELECT value FROM {table} WHERE name = {} ORDER BY id_configuration ASC LIMIT 1",
        quote(db, name)
    ))
}

pub fn set_configuration(db: &dyn Database, name: &str, value: &str) -> Result<()> {
    let table = table_name(db, "configuration")?;
    let now = quote(db, &sql_timestamp());
    let existing = db
        .get_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE name = {}",
            quote(db, name)
        ))?
        .and_then(|count| count.trim().parse::<u64>().ok())
        .unwrap_or(0);

    if existing > 0 {
        db.execute(&format!(
            "UPDATE {table} SET value = {}, date_upd = {now} WHERE name = {}",
            quote(db, value),
            quote(db, name)
        ))?;
    } else {
        db.execute(&format!(
            "INSERT INTO {table} (name, value, date_add, date_upd) VALUES ({}, {}, {now}, {now})",
            quote(db, name),
            quote(db, value)
        ))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestEnvironment {
    pub http_host: Option<String>,
    pub server_name: Option<String>,
}

impl RequestEnvironment {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|value| !value.trim().is_empty());
        Self {
            http_host: read("HTTP_HOST"),
            server_name: read("SERVER_NAME"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainSnapshot {
    pub shop_domain: Option<String>,
    pub shop_url_domain: Option<String>,
    pub physical_uri: Option<String>,
}

impl DomainSnapshot {
    pub fn capture(db: &dyn Database) -> Self {
        let shop_domain = get_configuration(db, PS_SHOP_DOMAIN)
            .map_err(|err| log::debug!("no stored shop domain: {err:#}"))
            .ok()
            .flatten();
        let record = read_main_shop_url(db)
            .map_err(|err| log::debug!("no shop url row: {err:#}"))
            .ok()
            .flatten();
        Self {
            shop_domain,
            shop_url_domain: record.as_ref().map(|record| record.domain.clone()),
            physical_uri: record.map(|record| record.physical_uri),
        }
    }
}

pub fn detect_current_domain(
    db: &dyn Database,
    env: &RequestEnvironment,
    captured: Option<&DomainSnapshot>,
) -> Option<String> {
    let accept = |value: Option<String>| {
        value
            .map(|value| clean_domain(&value))
            .filter(|domain| !domain.is_empty() && !is_local_domain(domain))
    };

    accept(env.http_host.clone())
        .or_else(|| accept(env.server_name.clone()))
        .or_else(|| accept(captured.and_then(|snapshot| snapshot.shop_domain.clone())))
        .or_else(|| accept(get_configuration(db, PS_SHOP_DOMAIN).ok().flatten()))
        .or_else(|| accept(captured.and_then(|snapshot| snapshot.shop_url_domain.clone())))
        .or_else(|| {
            accept(
                read_main_shop_url(db)
                    .ok()
                    .flatten()
                    .map(|record| record.domain),
            )
        })
}

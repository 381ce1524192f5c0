use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{clean_domain, normalize_physical_uri, parse_absolute_url, Scheme, TargetUrl};
use crate::MigrationError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub migrate_urls: bool,
    pub old_url: Option<String>,
    pub new_url: Option<String>,
    pub migrate_admin_dir: bool,
    pub old_admin_dir: Option<String>,
    pub new_admin_dir: Option<String>,
    pub preserve_db_config: bool,
    pub force_shop_url_update: bool,
    pub preserve_current_domain: bool,
    pub full_url_rewrite: bool,
    pub configurations: BTreeMap<String, String>,
    pub file_mappings: BTreeMap<String, String>,
    pub target_domain: Option<String>,
    pub source_domain: Option<String>,
    pub target_prefix: Option<String>,
    pub target_url: Option<String>,
    pub force_https: bool,
    pub self_module: Option<String>,
    pub database: Option<DatabaseSettings>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    Mysql,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub engine: DatabaseEngine,
    pub host: String,
    pub port: Option<u16>,
    pub name: String,
    pub user: String,
    pub password: String,
    pub prefix: String,
    pub path: Option<PathBuf>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::Mysql,
            host: "localhost".to_string(),
            port: None,
            name: String::new(),
            user: String::new(),
            password: String::new(),
            prefix: "ps_".to_string(),
            path: None,
        }
    }
}

impl MigrationConfig {
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.migrate_urls {
            let old_url = required_field("old_url", self.old_url.as_deref())?;
            let new_url = required_field("new_url", self.new_url.as_deref())?;
            for (field, value) in [("old_url", old_url), ("new_url", new_url)] {
                parse_absolute_url(value).map_err(|err| {
                    MigrationError::validation(format!("{field} is not a valid URL: {err:#}"))
                })?;
            }
        }

        if self.migrate_admin_dir {
            for (field, value) in [
                ("old_admin_dir", self.old_admin_dir.as_deref()),
                ("new_admin_dir", self.new_admin_dir.as_deref()),
            ] {
                let value = required_field(field, value)?;
                if !is_single_segment(value) {
                    return Err(MigrationError::validation(format!(
                        "{field} must be a single directory name: {value}"
                    )));
                }
            }
        }

        if let Some(target_url) = self.target_url.as_deref().filter(|v| !v.trim().is_empty()) {
            parse_absolute_url(target_url).map_err(|err| {
                MigrationError::validation(format!("target_url is not a valid URL: {err:#}"))
            })?;
        }

        for (source, destination) in &self.file_mappings {
            if source.trim().is_empty() || destination.trim().is_empty() {
                return Err(MigrationError::validation(
                    "file_mappings entries must not be empty",
                ));
            }
        }

        for key in self.configurations.keys() {
            if key.trim().is_empty() {
                return Err(MigrationError::validation(
                    "configurations keys must not be empty",
                ));
            }
        }

        Ok(())
    }

    pub fn resolved_target_domain(&self) -> Option<String> {
        [
            self.target_domain.as_deref(),
            self.new_url.as_deref(),
            self.target_url.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(clean_domain)
        .find(|domain| !domain.is_empty())
    }

    pub fn resolved_source_domain(&self) -> Option<String> {
        [self.source_domain.as_deref(), self.old_url.as_deref()]
            .into_iter()
            .flatten()
            .map(clean_domain)
            .find(|domain| !domain.is_empty())
    }

    pub fn resolved_target(&self) -> Result<TargetUrl> {
        let explicit = [self.target_url.as_deref(), self.new_url.as_deref()]
            .into_iter()
            .flatten()
            .find(|value| !value.trim().is_empty());

        let mut target = match explicit {
            Some(raw) => TargetUrl::parse(raw)?,
            None => {
                let domain = self
                    .target_domain
                    .as_deref()
                    .map(clean_domain)
                    .filter(|domain| !domain.is_empty())
                    .ok_or_else(|| {
                        MigrationError::validation(
                            "one of target_url, new_url or target_domain is required",
                        )
                    })?;
                TargetUrl {
                    scheme: Scheme::Http,
                    domain,
                    physical_uri: normalize_physical_uri(
                        self.target_prefix.as_deref().unwrap_or("/"),
                    ),
                }
            }
        };
        if self.force_https {
            target.scheme = Scheme::Https;
        }
        Ok(target)
    }

    pub fn source_prefix(&self) -> Option<String> {
        let old_url = self.old_url.as_deref()?;
        TargetUrl::parse(old_url)
            .ok()
            .map(|parsed| parsed.physical_uri)
    }

    pub fn admin_dir_rename(&self) -> Option<(&str, &str)> {
        if !self.migrate_admin_dir {
            return None;
        }
        let old = self.old_admin_dir.as_deref()?.trim();
        let new = self.new_admin_dir.as_deref()?.trim();
        if old.is_empty() || new.is_empty() || old == new {
            return None;
        }
        Some((old, new))
    }
}

fn required_field<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, MigrationError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(MigrationError::validation(format!(
            "{field} is required when its migration flag is enabled"
        ))),
    }
}

fn is_single_segment(value: &str) -> bool {
    !value.contains(['/', '\\']) && value != "." && value != ".."
}

pub fn parse_migration_config_toml(content: &str) -> Result<MigrationConfig> {
    toml::from_str(content).context("failed parsing migration config TOML")
}

pub fn parse_migration_config_json(content: &str) -> Result<MigrationConfig> {
    serde_json::from_str(content).context("failed parsing migration config JSON")
}

pub fn load_migration_config(path: &Path) -> Result<MigrationConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read migration config: {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
        parse_migration_config_json(&content)
    } else {
        parse_migration_config_toml(&content)
    };
    config.with_context(|| format!("invalid migration config: {}", path.display()))
}

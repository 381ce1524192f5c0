use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use relocate_core::{replace_in_one_pass, DatabaseSettings, MigrationConfig, Scheme};

pub const PARAMETERS_FILE: &str = "app/config/parameters.php";
pub const LEGACY_SETTINGS_FILE: &str = "config/settings.inc.php";
pub const HTACCESS_FILE: &str = ".htaccess";
pub const ROBOTS_FILE: &str = "robots.txt";

const QUOTED_VALUE: &str = r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbCredentials {
    pub host: String,
    pub port: Option<String>,
    pub name: String,
    pub user: String,
    pub password: String,
    pub prefix: String,
}

impl DbCredentials {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port.map(|port| port.to_string()),
            name: settings.name.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            prefix: settings.prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Host,
    Port,
    Name,
    User,
    Password,
    Prefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbConfigFile {
    Parameters,
    LegacySettings,
}

impl DbConfigFile {
    pub const ALL: [DbConfigFile; 2] = [DbConfigFile::Parameters, DbConfigFile::LegacySettings];

    pub fn relative_path(self) -> &'static str {
        match self {
            Self::Parameters => PARAMETERS_FILE,
            Self::LegacySettings => LEGACY_SETTINGS_FILE,
        }
    }

    fn keys(self) -> &'static [(&'static str, Field)] {
        match self {
            Self::Parameters => &[
                ("database_host", Field::Host),
                ("database_port", Field::Port),
                ("database_name", Field::Name),
                ("database_user", Field::User),
                ("database_password", Field::Password),
                ("database_prefix", Field::Prefix),
            ],
            Self::LegacySettings => &[
                ("_DB_SERVER_", Field::Host),
                ("_DB_NAME_", Field::Name),
                ("_DB_USER_", Field::User),
                ("_DB_PASSWD_", Field::Password),
                ("_DB_PREFIX_", Field::Prefix),
            ],
        }
    }

    fn assignment_regex(self, key: &str) -> Result<Regex> {
        let key = regex::escape(key);
        let pattern = match self {
            Self::Parameters => format!(r#"(['"]{key}['"]\s*=>\s*)({QUOTED_VALUE}|null|\d+)"#),
            Self::LegacySettings => {
                format!(r#"(define\(\s*['"]{key}['"]\s*,\s*)({QUOTED_VALUE})"#)
            }
        };
        Regex::new(&pattern).with_context(|| format!("invalid assignment pattern for {key}"))
    }

    fn value_for(self, field: Field, credentials: &DbCredentials) -> String {
        match (self, field) {
            (Self::LegacySettings, Field::Host) => match &credentials.port {
                Some(port) if !port.is_empty() => format!("{}:{port}", credentials.host),
                _ => credentials.host.clone(),
            },
            (_, Field::Host) => credentials.host.clone(),
            (_, Field::Port) => credentials.port.clone().unwrap_or_default(),
            (_, Field::Name) => credentials.name.clone(),
            (_, Field::User) => credentials.user.clone(),
            (_, Field::Password) => credentials.password.clone(),
            (_, Field::Prefix) => credentials.prefix.clone(),
        }
    }

    pub fn parse(self, content: &str) -> Result<Option<DbCredentials>> {
        let mut credentials = DbCredentials::default();
        let mut found_host = false;
        for (key, field) in self.keys() {
            let regex = self.assignment_regex(key)?;
            let Some(value) = regex
                .captures(content)
                .and_then(|caps| caps.get(2))
                .and_then(|raw| php_literal_value(raw.as_str()))
            else {
                continue;
            };
            match field {
                Field::Host => {
                    found_host = true;
                    if self == Self::LegacySettings {
                        if let Some((host, port)) = value.rsplit_once(':') {
                            credentials.host = host.to_string();
                            credentials.port = Some(port.to_string());
                            continue;
                        }
                    }
                    credentials.host = value;
                }
                Field::Port => credentials.port = Some(value).filter(|port| !port.is_empty()),
                Field::Name => credentials.name = value,
                Field::User => credentials.user = value,
                Field::Password => credentials.password = value,
                Field::Prefix => credentials.prefix = value,
            }
        }
        Ok(found_host.then_some(credentials))
    }

    pub fn patch(self, content: &str, credentials: &DbCredentials) -> Result<(String, usize)> {
        let mut patched = content.to_string();
        let mut replaced = 0;
        for (key, field) in self.keys() {
            let regex = self.assignment_regex(key)?;
            let literal = php_single_quoted(&self.value_for(*field, credentials));
            replaced += regex.find_iter(&patched).count();
            patched = regex
                .replace_all(&patched, |caps: &Captures| format!("{}{literal}", &caps[1]))
                .into_owned();
        }
        Ok((patched, replaced))
    }
}

fn php_literal_value(raw: &str) -> Option<String> {
    if raw == "null" {
        return None;
    }
    let Some(quote) = raw.chars().next().filter(|ch| *ch == '\'' || *ch == '"') else {
        return Some(raw.to_string());
    };
    let inner = raw.get(1..raw.len().saturating_sub(1))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some(next) if next == quote || next == '\\' => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

fn php_single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub fn live_credentials(
    installation_root: &Path,
    config: &MigrationConfig,
) -> Option<DbCredentials> {
    for file in DbConfigFile::ALL {
        let path = installation_root.join(file.relative_path());
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        match file.parse(&content) {
            Ok(Some(credentials)) => return Some(credentials),
            Ok(None) => {}
            Err(err) => log::warn!("failed to parse {}: {err:#}", path.display()),
        }
    }
    config.database.as_ref().map(DbCredentials::from_settings)
}

pub fn patch_db_config_file(
    path: &Path,
    file: DbConfigFile,
    credentials: &DbCredentials,
) -> Result<bool> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (patched, replaced) = file.patch(&content, credentials)?;
    if replaced == 0 || patched == content {
        return Ok(false);
    }
    fs::write(path, patched).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPatch {
    pub source_domain: String,
    pub source_prefix: String,
    pub target_domain: String,
    pub target_prefix: String,
    pub target_scheme: Scheme,
}

impl UrlPatch {
    pub fn from_config(config: &MigrationConfig) -> Option<Self> {
        let source_domain = config.resolved_source_domain()?;
        let target = config.resolved_target().ok()?;
        let source_prefix = config.source_prefix().unwrap_or_else(|| "/".to_string());
        if source_domain == target.domain && source_prefix == target.physical_uri {
            return None;
        }
        Some(Self {
            source_domain,
            source_prefix,
            target_domain: target.domain,
            target_prefix: target.physical_uri,
            target_scheme: target.scheme,
        })
    }

    pub fn apply(&self, content: &str) -> Result<String> {
        let old = &self.source_domain;
        let new = &self.target_domain;
        let scheme = self.target_scheme.as_str();
        let prefix_changed = self.source_prefix != self.target_prefix;
        let mut pairs = Vec::new();

        if prefix_changed {
            for old_scheme in ["http", "https"] {
                pairs.push((
                    format!("{old_scheme}://{old}{}", self.source_prefix),
                    format!("{scheme}://{new}{}", self.target_prefix),
                ));
            }
        }
        for old_scheme in ["http", "https"] {
            pairs.push((format!("{old_scheme}://{old}"), format!("{scheme}://{new}")));
        }
        let escaped_old = regex::escape(old);
        if escaped_old != *old {
            pairs.push((escaped_old, regex::escape(new)));
        }
        if !new.contains(old.as_str()) {
            pairs.push((old.clone(), new.clone()));
        }
        pairs.retain(|(from, to)| from != to);
        let mut out = replace_in_one_pass(content, &pairs);

        if prefix_changed {
            let old_prefix = regex::escape(&self.source_prefix);
            let new_prefix = self.target_prefix.clone();
            for pattern in [
                format!(r"(E=REWRITEBASE:){old_prefix}(\])"),
                format!(r"(?m)^(\s*RewriteBase\s+){old_prefix}(\s*)$"),
                format!(r"(?m)^((?:Dis)?[Aa]llow:\s*){old_prefix}()"),
            ] {
                let regex = Regex::new(&pattern)
                    .with_context(|| format!("invalid rewrite-base pattern {pattern}"))?;
                out = regex
                    .replace_all(&out, |caps: &Captures| {
                        format!("{}{new_prefix}{}", &caps[1], &caps[2])
                    })
                    .into_owned();
            }
        }
        Ok(out)
    }
}

pub fn patch_url_file(path: &Path, patch: &UrlPatch) -> Result<bool> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let patched = patch.apply(&content)?;
    if patched == content {
        return Ok(false);
    }
    fs::write(path, patched).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

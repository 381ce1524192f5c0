use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::database::validate_identifier;

pub const SCHEMA_REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationRole {
    Content,
    AbsoluteUrl,
    RewriteSlug,
}

impl LocationRole {
    pub fn rewrites_bare_domain(self) -> bool {
        !matches!(self, Self::Content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationScope {
    Core,
    Module,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaLocation {
    pub table: String,
    pub column: String,
    pub role: LocationRole,
    pub scope: LocationScope,
}

impl SchemaLocation {
    pub fn new(table: &str, column: &str, role: LocationRole, scope: LocationScope) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            role,
            scope,
        }
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    pub version: u32,
    #[serde(default)]
    pub locations: Vec<SchemaLocation>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaRegistry {
    pub fn builtin() -> Self {
        use LocationRole::{AbsoluteUrl, Content, RewriteSlug};
        use LocationScope::{Core, Module};

        let locations = [
            ("cms_lang", "content", Content, Core),
            ("cms_lang", "link_rewrite", RewriteSlug, Core),
            ("cms_category_lang", "description", Content, Core),
            ("product_lang", "description", Content, Core),
            ("product_lang", "description_short", Content, Core),
            ("product_lang", "link_rewrite", RewriteSlug, Core),
            ("category_lang", "description", Content, Core),
            ("category_lang", "link_rewrite", RewriteSlug, Core),
            ("manufacturer_lang", "description", Content, Core),
            ("supplier_lang", "description", Content, Core),
            ("meta_lang", "url_rewrite", RewriteSlug, Core),
            ("configuration_lang", "value", AbsoluteUrl, Core),
            ("info_lang", "text", Content, Module),
            ("linksmenutop_lang", "link", AbsoluteUrl, Module),
            ("homeslider_slides_lang", "url", AbsoluteUrl, Module),
            ("homeslider_slides_lang", "description", Content, Module),
            ("link_block_lang", "custom_content", Content, Module),
        ]
        .into_iter()
        .map(|(table, column, role, scope)| SchemaLocation::new(table, column, role, scope))
        .collect();

        Self {
            version: SCHEMA_REGISTRY_VERSION,
            locations,
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let registry: Self =
            toml::from_str(content).context("failed parsing schema registry TOML")?;
        if registry.version > SCHEMA_REGISTRY_VERSION {
            bail!(
                "schema registry version {} is newer than supported version {SCHEMA_REGISTRY_VERSION}",
                registry.version
            );
        }
        for location in &registry.locations {
            validate_identifier(&location.table)?;
            validate_identifier(&location.column)?;
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read schema registry: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid schema registry: {}", path.display()))
    }

    pub fn merge(&mut self, other: SchemaRegistry) {
        for location in other.locations {
            let known = self
                .locations
                .iter()
                .any(|existing| existing.table == location.table && existing.column == location.column);
            if !known {
                self.locations.push(location);
            }
        }
    }

    pub fn in_scope(&self, scope: LocationScope) -> impl Iterator<Item = &SchemaLocation> {
        self.locations
            .iter()
            .filter(move |location| location.scope == scope)
    }
}

use anyhow::{anyhow, Result};
use relocate_core::{
    clean_domain, normalize_physical_uri, replacement_token, MigrationConfig, MigrationError,
    TargetUrl, Warnings,
};
use serde::Serialize;

use crate::database::{column_name, like_contains, quote, table_name};
use crate::schema::{LocationRole, LocationScope, SchemaLocation, SchemaRegistry};
use crate::shop_url::{
    get_configuration, read_main_shop_url, set_configuration, write_main_shop_url,
    ShopUrlRecord, PS_SHOP_DOMAIN, PS_SHOP_DOMAIN_SSL,
};
use crate::Database;

pub const PS_SSL_ENABLED: &str = "PS_SSL_ENABLED";
pub const PS_SSL_ENABLED_EVERYWHERE: &str = "PS_SSL_ENABLED_EVERYWHERE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRewriteRequest {
    pub source_domain: String,
    pub source_prefix: String,
    pub target: TargetUrl,
}

impl UrlRewriteRequest {
    pub fn from_config(config: &MigrationConfig, db: &dyn Database) -> Result<Self> {
        let target = config.resolved_target()?;
        let stored = read_main_shop_url(db).ok().flatten();

        let source_domain = config
            .resolved_source_domain()
            .or_else(|| stored.as_ref().map(|record| clean_domain(&record.domain)))
            .filter(|domain| !domain.is_empty())
            .ok_or_else(|| {
                MigrationError::validation("cannot determine the source domain for URL rewriting")
            })?;
        let source_prefix = config.source_prefix().unwrap_or_else(|| {
            stored
                .map(|record| normalize_physical_uri(&record.physical_uri))
                .unwrap_or_else(|| "/".to_string())
        });

        Ok(Self {
            source_domain,
            source_prefix,
            target,
        })
    }

    pub fn replacement_pairs(&self, role: LocationRole) -> Vec<(String, String)> {
        let old = &self.source_domain;
        let new = &self.target.domain;
        let scheme = self.target.scheme.as_str();
        let mut pairs = Vec::new();

        if self.source_prefix != self.target.physical_uri {
            let old_base = format!("{old}{}", self.source_prefix);
            let new_base = format!("{new}{}", self.target.physical_uri);
            for old_scheme in ["http", "https"] {
                pairs.push((
                    format!("{old_scheme}://{old_base}"),
                    format!("{scheme}://{new_base}"),
                ));
            }
            if role.rewrites_bare_domain() {
                pairs.push((old_base, new_base));
            }
        }

        for old_scheme in ["http", "https"] {
            pairs.push((format!("{old_scheme}://{old}"), format!("{scheme}://{new}")));
        }

        // Bare text of a target that contains the source stays as it is.
        if role.rewrites_bare_domain() && !new.contains(old.as_str()) {
            pairs.push((old.clone(), new.clone()));
        }

        pairs.retain(|(from, to)| from != to);
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteStep {
    pub name: String,
    pub affected: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub steps: Vec<RewriteStep>,
    pub warnings: Warnings,
    pub shop_url: Option<ShopUrlRecord>,
    pub validated: bool,
}

impl RewriteReport {
    pub fn total_affected(&self) -> u64 {
        self.steps.iter().map(|step| step.affected).sum()
    }

    pub(crate) fn record(&mut self, name: impl Into<String>, affected: u64) {
        let name = name.into();
        log::info!("rewrite {name}: {affected} row(s)");
        self.steps.push(RewriteStep { name, affected });
    }
}

pub struct UrlRewriter<'a> {
    db: &'a dyn Database,
    registry: &'a SchemaRegistry,
}

impl<'a> UrlRewriter<'a> {
    pub fn new(db: &'a dyn Database, registry: &'a SchemaRegistry) -> Self {
        Self { db, registry }
    }

    pub fn run(&self, request: &UrlRewriteRequest) -> RewriteReport {
        let mut report = RewriteReport::default();
        log::info!(
            "rewriting urls {}{} -> {}",
            request.source_domain,
            request.source_prefix,
            request.target.base_url()
        );

        match self.rewrite_shop_url(request) {
            Ok(record) => {
                report.record("shop_url", 1);
                report.shop_url = Some(record);
            }
            Err(err) => report
                .warnings
                .rewrite(format!("shop url update failed: {err:#}")),
        }
        self.rewrite_after_shop_url(request, &mut report);
        report
    }

    pub fn rewrite_after_shop_url(
        &self,
        request: &UrlRewriteRequest,
        report: &mut RewriteReport,
    ) {
        self.rewrite_domain_keys(request, report);
        self.rewrite_configuration_values(request, report);
        self.rewrite_locations(request, LocationScope::Core, report);
        self.rewrite_locations(request, LocationScope::Module, report);
        self.update_ssl_flags(request, report);
        self.validate(request, report);
    }

    pub fn rewrite_shop_url(&self, request: &UrlRewriteRequest) -> Result<ShopUrlRecord> {
        write_main_shop_url(
            self.db,
            &request.target.domain,
            Some(&request.target.physical_uri),
        )
    }

    pub fn rewrite_domain_keys(&self, request: &UrlRewriteRequest, report: &mut RewriteReport) {
        for key in [PS_SHOP_DOMAIN, PS_SHOP_DOMAIN_SSL] {
            match set_configuration(self.db, key, &request.target.domain) {
                Ok(()) => report.record(key, 1),
                Err(err) => report
                    .warnings
                    .rewrite(format!("failed to set {key}: {err:#}")),
            }
        }
    }

    pub fn rewrite_configuration_values(
        &self,
        request: &UrlRewriteRequest,
        report: &mut RewriteReport,
    ) {
        let location = SchemaLocation::new(
            "configuration",
            "value",
            LocationRole::AbsoluteUrl,
            LocationScope::Core,
        );
        self.rewrite_location(request, &location, report);
    }

    pub fn rewrite_locations(
        &self,
        request: &UrlRewriteRequest,
        scope: LocationScope,
        report: &mut RewriteReport,
    ) {
        for location in self.registry.in_scope(scope) {
            self.rewrite_location(request, location, report);
        }
    }

    fn rewrite_location(
        &self,
        request: &UrlRewriteRequest,
        location: &SchemaLocation,
        report: &mut RewriteReport,
    ) {
        let full_table = format!("{}{}", self.db.prefix(), location.table);
        match self.db.table_exists(&full_table) {
            Ok(true) => {}
            Ok(false) => {
                if location.scope == LocationScope::Core {
                    report
                        .warnings
                        .rewrite(format!("table {full_table} not found; skipped"));
                } else {
                    log::debug!("module table {full_table} not installed; skipped");
                }
                return;
            }
            Err(err) => {
                report
                    .warnings
                    .rewrite(format!("failed to inspect table {full_table}: {err:#}"));
                return;
            }
        }

        let pairs = request.replacement_pairs(location.role);
        match self.replace_in_column(location, &pairs) {
            Ok(affected) => report.record(location.label(), affected),
            Err(err) => report.warnings.rewrite(format!(
                "rewrite of {} failed: {err:#}",
                location.label()
            )),
        }
    }

    // Pairs become tokens first, then tokens become targets, in a single UPDATE.
    fn replace_in_column(
        &self,
        location: &SchemaLocation,
        pairs: &[(String, String)],
    ) -> Result<u64> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let table = table_name(self.db, &location.table)?;
        let column = column_name(&location.column)?;
        self.db.execute(&format!(
            "UPDATE {table} SET {column} = {} WHERE {}",
            one_pass_replace_expr(self.db, &column, pairs),
            pairs
                .iter()
                .map(|(from, _)| format!("{column} LIKE {}", like_contains(self.db, from)))
                .collect::<Vec<_>>()
                .join(" OR ")
        ))
    }

    pub fn update_ssl_flags(&self, request: &UrlRewriteRequest, report: &mut RewriteReport) {
        let value = if request.target.scheme.is_secure() {
            "1"
        } else {
            "0"
        };
        for key in [PS_SSL_ENABLED, PS_SSL_ENABLED_EVERYWHERE] {
            match set_configuration(self.db, key, value) {
                Ok(()) => report.record(key, 1),
                Err(err) => report
                    .warnings
                    .rewrite(format!("failed to set {key}: {err:#}")),
            }
        }
    }

    pub fn validate(&self, request: &UrlRewriteRequest, report: &mut RewriteReport) {
        let expected = &request.target.domain;
        let mut mismatches = Vec::new();

        match read_main_shop_url(self.db) {
            Ok(Some(record)) => {
                if &record.domain != expected || &record.domain_ssl != expected {
                    mismatches.push(format!(
                        "shop url is {}/{} instead of {expected}",
                        record.domain, record.domain_ssl
                    ));
                }
            }
            Ok(None) => mismatches.push("shop url table is empty".to_string()),
            Err(err) => mismatches.push(format!("shop url unreadable: {err:#}")),
        }

        match get_configuration(self.db, PS_SHOP_DOMAIN) {
            Ok(Some(stored)) if &stored == expected => {}
            Ok(stored) => mismatches.push(format!(
                "{PS_SHOP_DOMAIN} is {} instead of {expected}",
                stored.unwrap_or_else(|| "unset".to_string())
            )),
            Err(err) => mismatches.push(format!("{PS_SHOP_DOMAIN} unreadable: {err:#}")),
        }

        report.validated = mismatches.is_empty();
        for mismatch in mismatches {
            report
                .warnings
                .rewrite(format!("validation: {mismatch}"));
        }
    }
}

pub(crate) fn one_pass_replace_expr(
    db: &dyn Database,
    column: &str,
    pairs: &[(String, String)],
) -> String {
    let mut expr = column.to_string();
    for (index, (from, _)) in pairs.iter().enumerate() {
        expr = format!(
            "REPLACE({expr}, {}, {})",
            quote(db, from),
            quote(db, &replacement_token(index))
        );
    }
    for (index, (_, to)) in pairs.iter().enumerate() {
        expr = format!(
            "REPLACE({expr}, {}, {})",
            quote(db, &replacement_token(index)),
            quote(db, to)
        );
    }
    expr
}

pub fn replace_admin_dir_segments(db: &dyn Database, old: &str, new: &str) -> Result<u64> {
    if old.is_empty() || new.is_empty() || old.contains('/') || new.contains('/') {
        return Err(anyhow!("admin directory names must be single path segments"));
    }
    let table = table_name(db, "configuration")?;
    let from = format!("/{old}/");
    let to = format!("/{new}/");
    db.execute(&format!(
        "UPDATE {table} SET value = REPLACE(value, {}, {}) WHERE value LIKE {}",
        quote(db, &from),
        quote(db, &to),
        like_contains(db, &from)
    ))
}

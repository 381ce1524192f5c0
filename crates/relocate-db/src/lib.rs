mod database;
mod dump;
mod mysql;
mod restorer;
mod rewriter;
mod schema;
mod shop_url;
mod sqlite;

pub use database::{column_name, like_contains, quote, table_name, validate_identifier, Database, Row};
pub use dump::{open_dump_reader, DumpTool};
pub use mysql::{MysqlCliDatabase, MysqlDumpTool};
pub use restorer::{DatabaseRestorer, RestorePhase, RestoreReport};
pub use rewriter::{
    replace_admin_dir_segments, RewriteReport, RewriteStep, UrlRewriteRequest, UrlRewriter,
    PS_SSL_ENABLED, PS_SSL_ENABLED_EVERYWHERE,
};
pub use schema::{
    LocationRole, LocationScope, SchemaLocation, SchemaRegistry, SCHEMA_REGISTRY_VERSION,
};
pub use shop_url::{
    detect_current_domain, get_configuration, read_main_shop_url, set_configuration,
    write_main_shop_url, DomainSnapshot, RequestEnvironment, ShopUrlRecord, PS_SHOP_DOMAIN,
    PS_SHOP_DOMAIN_SSL,
};
pub use sqlite::SqliteDatabase;

#[cfg(test)]
mod tests;

use super::*;
use std::cell::Cell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use relocate_core::{MigrationConfig, MigrationError, Scheme, TargetUrl, WarningKind};
use relocate_store::StoreLayout;

use crate::mysql::{
    build_drop_objects_script, build_mysql_restore_command, build_mysqldump_command,
    build_query_command, escape_mysql, parse_batch_output, parse_table_listing,
};
use crate::rewriter::one_pass_replace_expr;
use relocate_core::DatabaseSettings;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

const SCHEMA_SQL: &str = "
CREATE TABLE ps_shop_url (
    id_shop_url INTEGER PRIMARY KEY,
    id_shop INTEGER NOT NULL DEFAULT 1,
    domain TEXT NOT NULL,
    domain_ssl TEXT NOT NULL,
    physical_uri TEXT NOT NULL DEFAULT '/',
    virtual_uri TEXT NOT NULL DEFAULT '',
    main INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE ps_configuration (
    id_configuration INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    value TEXT,
    date_add TEXT,
    date_upd TEXT
);
CREATE TABLE ps_cms_lang (
    id_cms INTEGER NOT NULL,
    id_lang INTEGER NOT NULL,
    content TEXT,
    link_rewrite TEXT
);
";

const LIVE_DATA_SQL: &str = "
INSERT INTO ps_shop_url (id_shop_url, domain, domain_ssl, physical_uri, main)
    VALUES (1, 'live.example.net', 'live.example.net', '/', 1);
INSERT INTO ps_configuration (name, value) VALUES ('PS_SHOP_DOMAIN', 'live.example.net');
INSERT INTO ps_configuration (name, value) VALUES ('PS_SHOP_DOMAIN_SSL', 'live.example.net');
INSERT INTO ps_cms_lang (id_cms, id_lang, content, link_rewrite) VALUES (1, 1, 'live page', 'live');
CREATE TABLE ps_live_marker (id INTEGER PRIMARY KEY);
INSERT INTO ps_live_marker (id) VALUES (42);
";

const BACKUP_DATA_SQL: &str = "
INSERT INTO ps_shop_url (id_shop_url, domain, domain_ssl, physical_uri, main)
    VALUES (1, 'old.example.com', 'old.example.com', '/shop/', 1);
INSERT INTO ps_configuration (name, value) VALUES ('PS_SHOP_DOMAIN', 'old.example.com');
INSERT INTO ps_configuration (name, value) VALUES ('PS_SHOP_DOMAIN_SSL', 'old.example.com');
INSERT INTO ps_configuration (name, value)
    VALUES ('PS_LOGO_URL', 'http://old.example.com/shop/img/logo.png');
INSERT INTO ps_configuration (name, value)
    VALUES ('PS_ADMIN_LINK', 'https://old.example.com/shop/admin_old/index.php');
INSERT INTO ps_cms_lang (id_cms, id_lang, content, link_rewrite)
    VALUES (1, 1, '<a href=\"https://old.example.com/shop/about\">About</a>', 'about-us');
CREATE TABLE ps_info_lang (id_info INTEGER, id_lang INTEGER, text TEXT);
INSERT INTO ps_info_lang (id_info, id_lang, text)
    VALUES (1, 1, 'Visit http://old.example.com/shop/contact');
";

fn test_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "relocate-db-tests-{label}-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("must create test dir");
    dir
}

struct Fixture {
    layout: StoreLayout,
    db: SqliteDatabase,
    dump: PathBuf,
}

fn fixture(label: &str) -> Fixture {
    let root = test_dir(label);
    let layout = StoreLayout::new(root.join("workspace"), root.join("shop"));
    let db = SqliteDatabase::open(&root.join("live.sqlite"), "ps_")
        .expect("must open live db")
        .with_staging_dir(layout.tmp_dir());
    db.execute_batch(SCHEMA_SQL).expect("must create schema");
    db.execute_batch(LIVE_DATA_SQL).expect("must seed live data");

    let dump = root.join("db-backup.sql");
    fs::write(&dump, format!("{SCHEMA_SQL}{BACKUP_DATA_SQL}")).expect("must write dump");
    Fixture { layout, db, dump }
}

fn url_migration_config() -> MigrationConfig {
    MigrationConfig {
        migrate_urls: true,
        old_url: Some("http://old.example.com/shop/".to_string()),
        new_url: Some("https://new.example.org/".to_string()),
        ..MigrationConfig::default()
    }
}

fn snapshot_files(layout: &StoreLayout) -> Vec<String> {
    match fs::read_dir(layout.tmp_dir()) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("snapshot-"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn config_value(db: &SqliteDatabase, name: &str) -> Option<String> {
    get_configuration(db, name).expect("configuration readable")
}

#[test]
fn restore_with_target_domain_leaves_consistent_shop_url() {
    let fx = fixture("target-domain");
    let config = MigrationConfig {
        target_domain: Some("https://www.Shop.Example.com/".to_string()),
        force_shop_url_update: true,
        ..MigrationConfig::default()
    };

    let report = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect("restore must succeed");

    let record = read_main_shop_url(&fx.db)
        .expect("shop url readable")
        .expect("shop url row exists");
    assert_eq!(record.domain, "shop.example.com");
    assert_eq!(record.domain_ssl, "shop.example.com");
    assert_eq!(record.physical_uri, "/");
    assert_eq!(
        config_value(&fx.db, PS_SHOP_DOMAIN).as_deref(),
        Some("shop.example.com")
    );
    assert_eq!(report.shop_url, Some(record));
    assert_eq!(report.phases.last(), Some(&RestorePhase::Done));
}

#[test]
fn restore_without_url_migration_refreshes_shop_url_from_captured_domain() {
    let fx = fixture("refresh-captured");

    DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &MigrationConfig::default())
        .expect("restore must succeed");

    let record = read_main_shop_url(&fx.db)
        .expect("shop url readable")
        .expect("shop url row exists");
    assert_eq!(record.domain, "live.example.net");
    assert_eq!(record.domain_ssl, "live.example.net");
    assert_eq!(record.physical_uri, "/shop/");
    assert_eq!(
        config_value(&fx.db, PS_SHOP_DOMAIN).as_deref(),
        Some("live.example.net")
    );
}

#[test]
fn request_host_wins_over_stored_domains() {
    let fx = fixture("request-host");
    let env = RequestEnvironment {
        http_host: Some("localhost:8080".to_string()),
        server_name: Some("www.Host.Example.com".to_string()),
    };

    DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .with_environment(env)
        .restore(&fx.dump, &MigrationConfig::default())
        .expect("restore must succeed");

    let record = read_main_shop_url(&fx.db)
        .expect("shop url readable")
        .expect("shop url row exists");
    assert_eq!(record.domain, "host.example.com");
}

#[test]
fn inline_url_migration_rewrites_shop_url_and_configuration() {
    let fx = fixture("inline-urls");

    let report = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &url_migration_config())
        .expect("restore must succeed");

    let record = read_main_shop_url(&fx.db)
        .expect("shop url readable")
        .expect("shop url row exists");
    assert_eq!(record.domain, "new.example.org");
    assert_eq!(record.domain_ssl, "new.example.org");
    assert_eq!(record.physical_uri, "/");
    assert_eq!(
        config_value(&fx.db, "PS_LOGO_URL").as_deref(),
        Some("https://new.example.org/img/logo.png")
    );
    assert_eq!(
        config_value(&fx.db, PS_SHOP_DOMAIN_SSL).as_deref(),
        Some("new.example.org")
    );

    let content = fx
        .db
        .get_scalar("SELECT content FROM ps_cms_lang WHERE id_cms = 1")
        .expect("content readable");
    assert_eq!(
        content.as_deref(),
        Some("<a href=\"https://old.example.com/shop/about\">About</a>")
    );
    let rewrite = report.rewrite.expect("rewrite report present");
    assert_eq!(rewrite.steps[0].name, "shop_url");
}

#[test]
fn moving_into_subdirectory_of_same_domain_rewrites_once() {
    let fx = fixture("same-domain-subdir");
    let config = MigrationConfig {
        migrate_urls: true,
        full_url_rewrite: true,
        old_url: Some("https://old.example.com/shop/".to_string()),
        new_url: Some("https://old.example.com/shop/store/".to_string()),
        ..MigrationConfig::default()
    };

    DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect("restore must succeed");

    assert_eq!(
        config_value(&fx.db, "PS_ADMIN_LINK").as_deref(),
        Some("https://old.example.com/shop/store/admin_old/index.php")
    );
    assert_eq!(
        config_value(&fx.db, "PS_LOGO_URL").as_deref(),
        Some("https://old.example.com/shop/store/img/logo.png")
    );
    assert_eq!(
        fx.db
            .get_scalar("SELECT content FROM ps_cms_lang WHERE id_cms = 1")
            .expect("content readable")
            .as_deref(),
        Some("<a href=\"https://old.example.com/shop/store/about\">About</a>")
    );
}

#[test]
fn target_domain_extending_source_domain_rewrites_once() {
    let fx = fixture("extended-domain");
    let config = MigrationConfig {
        migrate_urls: true,
        old_url: Some("http://old.example.com/shop/".to_string()),
        new_url: Some("https://old.example.com.au/shop/".to_string()),
        ..MigrationConfig::default()
    };

    DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect("restore must succeed");

    assert_eq!(
        config_value(&fx.db, "PS_LOGO_URL").as_deref(),
        Some("https://old.example.com.au/shop/img/logo.png")
    );
    assert_eq!(
        config_value(&fx.db, "PS_ADMIN_LINK").as_deref(),
        Some("https://old.example.com.au/shop/admin_old/index.php")
    );
    assert_eq!(
        config_value(&fx.db, PS_SHOP_DOMAIN).as_deref(),
        Some("old.example.com.au")
    );
}

#[test]
fn one_pass_replace_expr_nests_tokens_before_targets() {
    let db = SqliteDatabase::open_in_memory("ps_").expect("memory db");
    let pairs = vec![
        ("http://a".to_string(), "https://a.b".to_string()),
        ("https://a".to_string(), "https://a.b".to_string()),
    ];

    let expr = one_pass_replace_expr(&db, "`value`", &pairs);
    let select = format!("SELECT {}", expr.replace("`value`", "'x https://a/y http://a/z'"));
    assert_eq!(
        db.get_scalar(&select).expect("select").as_deref(),
        Some("x https://a.b/y https://a.b/z")
    );
}

#[test]
fn failed_shop_url_write_in_full_rewrite_rolls_back() {
    let fx = fixture("full-rewrite-shop-url");
    fs::write(
        &fx.dump,
        format!("{SCHEMA_SQL}{BACKUP_DATA_SQL}DELETE FROM ps_shop_url;\n"),
    )
    .expect("must write dump");
    let config = MigrationConfig {
        full_url_rewrite: true,
        ..url_migration_config()
    };

    let err = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect_err("restore must fail");

    let rendered = format!("{err:#}");
    assert!(rendered.contains("failed to update the shop url record"));
    assert!(rendered.contains("rolled back"));
    assert_rolled_back(&fx);
}

#[test]
fn full_url_rewrite_updates_content_and_module_tables() {
    let fx = fixture("full-urls");
    let config = MigrationConfig {
        full_url_rewrite: true,
        ..url_migration_config()
    };

    let report = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect("restore must succeed");

    assert_eq!(
        fx.db
            .get_scalar("SELECT content FROM ps_cms_lang WHERE id_cms = 1")
            .expect("content readable")
            .as_deref(),
        Some("<a href=\"https://new.example.org/about\">About</a>")
    );
    assert_eq!(
        fx.db
            .get_scalar("SELECT text FROM ps_info_lang WHERE id_info = 1")
            .expect("module text readable")
            .as_deref(),
        Some("Visit https://new.example.org/contact")
    );
    assert_eq!(config_value(&fx.db, PS_SSL_ENABLED).as_deref(), Some("1"));
    assert_eq!(
        config_value(&fx.db, PS_SSL_ENABLED_EVERYWHERE).as_deref(),
        Some("1")
    );

    let rewrite = report.rewrite.expect("rewrite report present");
    assert!(rewrite.validated);
    assert!(rewrite.total_affected() >= 3);
    assert!(report
        .warnings
        .of_kind(WarningKind::Rewrite)
        .any(|warning| warning.message.contains("ps_product_lang not found")));
    assert!(!report
        .warnings
        .iter()
        .any(|warning| warning.message.contains("homeslider")));
}

#[test]
fn admin_dir_rename_replaces_only_whole_segments() {
    let fx = fixture("admin-segments");
    let config = MigrationConfig {
        migrate_admin_dir: true,
        old_admin_dir: Some("admin_old".to_string()),
        new_admin_dir: Some("admin_new".to_string()),
        ..MigrationConfig::default()
    };
    DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect("restore must succeed");

    assert_eq!(
        config_value(&fx.db, "PS_ADMIN_LINK").as_deref(),
        Some("https://old.example.com/shop/admin_new/index.php")
    );

    let db = SqliteDatabase::open_in_memory("ps_").expect("memory db");
    db.execute_batch(SCHEMA_SQL).expect("schema");
    db.execute_batch(
        "INSERT INTO ps_configuration (name, value) VALUES ('A', '/admin_old/x'), ('B', 'admin_old_archive/')",
    )
    .expect("seed");
    let affected = replace_admin_dir_segments(&db, "admin_old", "admin_new").expect("replace");
    assert_eq!(affected, 1);
    assert_eq!(config_value(&db, "A").as_deref(), Some("/admin_new/x"));
    assert_eq!(config_value(&db, "B").as_deref(), Some("admin_old_archive/"));
}

#[test]
fn configuration_overrides_update_and_insert() {
    let fx = fixture("overrides");
    let mut config = MigrationConfig::default();
    config
        .configurations
        .insert("PS_LOGO_URL".to_string(), "https://cdn.example/logo.png".to_string());
    config
        .configurations
        .insert("PS_BRAND_NEW".to_string(), "yes".to_string());

    DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect("restore must succeed");

    assert_eq!(
        config_value(&fx.db, "PS_LOGO_URL").as_deref(),
        Some("https://cdn.example/logo.png")
    );
    assert_eq!(config_value(&fx.db, "PS_BRAND_NEW").as_deref(), Some("yes"));
}

#[test]
fn preserve_current_domain_restores_captured_base_uri() {
    let fx = fixture("preserve");
    fx.db
        .execute("UPDATE ps_shop_url SET physical_uri = '/store/' WHERE id_shop_url = 1")
        .expect("update");
    let config = MigrationConfig {
        preserve_current_domain: true,
        ..MigrationConfig::default()
    };

    DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect("restore must succeed");

    let record = read_main_shop_url(&fx.db)
        .expect("shop url readable")
        .expect("shop url row exists");
    assert_eq!(record.domain, "live.example.net");
    assert_eq!(record.physical_uri, "/store/");
}

#[test]
fn successful_restore_removes_snapshot() {
    let fx = fixture("snapshot-success");

    let report = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &MigrationConfig::default())
        .expect("restore must succeed");

    let snapshot = report.snapshot_path.expect("snapshot path recorded");
    assert!(!snapshot.exists());
    assert!(snapshot_files(&fx.layout).is_empty());
    assert!(!fx.db.table_exists("ps_live_marker").expect("table check"));
}

fn assert_rolled_back(fx: &Fixture) {
    assert_eq!(
        config_value(&fx.db, PS_SHOP_DOMAIN).as_deref(),
        Some("live.example.net")
    );
    assert!(fx.db.table_exists("ps_live_marker").expect("table check"));
    assert!(!fx.db.table_exists("ps_info_lang").expect("table check"));
    assert!(snapshot_files(&fx.layout).is_empty());
}

#[test]
fn failure_during_rewrite_rolls_back_to_snapshot() {
    let fx = fixture("rollback-rewrite");
    let restorer = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout);

    let err = restorer
        .restore_with_hook(&fx.dump, &url_migration_config(), |phase| {
            if phase == RestorePhase::Rewrite {
                return Err(anyhow!("injected rewrite failure"));
            }
            Ok(())
        })
        .expect_err("restore must fail");

    let rendered = format!("{err:#}");
    assert!(rendered.contains("rolled back"));
    assert!(rendered.contains("injected rewrite failure"));
    assert_rolled_back(&fx);
}

#[test]
fn failure_during_cleanup_rolls_back_rewritten_database() {
    let fx = fixture("rollback-cleanup");
    let restorer = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout);
    let mut seen = Vec::new();

    let err = restorer
        .restore_with_hook(&fx.dump, &url_migration_config(), |phase| {
            seen.push(phase);
            if phase == RestorePhase::Cleanup {
                return Err(anyhow!("injected cleanup failure"));
            }
            Ok(())
        })
        .expect_err("restore must fail");

    assert_eq!(
        seen,
        vec![
            RestorePhase::Restore,
            RestorePhase::Rewrite,
            RestorePhase::Cleanup
        ]
    );
    assert!(format!("{err:#}").contains("injected cleanup failure"));
    assert_rolled_back(&fx);
}

#[test]
fn validation_failure_happens_before_any_mutation() {
    let fx = fixture("validation-first");
    let config = MigrationConfig {
        migrate_urls: true,
        old_url: None,
        new_url: Some("https://new.example.org/".to_string()),
        ..MigrationConfig::default()
    };

    let err = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&fx.dump, &config)
        .expect_err("restore must fail");

    assert!(matches!(
        err.downcast_ref::<MigrationError>(),
        Some(MigrationError::Validation(_))
    ));
    assert!(!fx.layout.tmp_dir().exists());
    assert!(fx.db.table_exists("ps_live_marker").expect("table check"));
}

#[test]
fn missing_dump_is_an_archive_error() {
    let fx = fixture("missing-dump");
    let missing = fx.dump.with_file_name("absent.sql");

    let err = DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&missing, &MigrationConfig::default())
        .expect_err("restore must fail");

    match err.downcast_ref::<MigrationError>() {
        Some(MigrationError::Archive { listing, .. }) => {
            assert!(listing.iter().any(|name| name == "db-backup.sql"));
        }
        other => panic!("expected archive error, got {other:?}"),
    }
}

struct FailingSnapshotTool {
    restores: Cell<u32>,
}

impl DumpTool for FailingSnapshotTool {
    fn dump(&self, dest: &Path) -> Result<()> {
        fs::write(dest, b"partial").expect("write partial snapshot");
        Err(anyhow!("mysqldump: access denied"))
    }

    fn restore(&self, _src: &Path) -> Result<()> {
        self.restores.set(self.restores.get() + 1);
        Ok(())
    }
}

#[test]
fn failed_snapshot_aborts_before_restore() {
    let fx = fixture("snapshot-failure");
    let tool = FailingSnapshotTool {
        restores: Cell::new(0),
    };

    let err = DatabaseRestorer::new(&fx.db, &tool, &fx.layout)
        .restore(&fx.dump, &MigrationConfig::default())
        .expect_err("restore must fail");

    assert!(format!("{err:#}").contains("nothing was changed"));
    assert_eq!(tool.restores.get(), 0);
    assert!(snapshot_files(&fx.layout).is_empty());
    assert!(fx.db.table_exists("ps_live_marker").expect("table check"));
}

struct BrokenRestoreTool<'a> {
    inner: &'a SqliteDatabase,
    restores: Cell<u32>,
}

impl DumpTool for BrokenRestoreTool<'_> {
    fn dump(&self, dest: &Path) -> Result<()> {
        self.inner.dump(dest)
    }

    fn restore(&self, _src: &Path) -> Result<()> {
        self.restores.set(self.restores.get() + 1);
        Err(MigrationError::Subprocess {
            program: "mysql".to_string(),
            status: "exit status 1".to_string(),
            stdout: String::new(),
            stderr: "ERROR 2006: server has gone away".to_string(),
        }
        .into())
    }
}

#[test]
fn failed_rollback_reports_undefined_state_and_keeps_error_kind() {
    let fx = fixture("rollback-failure");
    let tool = BrokenRestoreTool {
        inner: &fx.db,
        restores: Cell::new(0),
    };

    let err = DatabaseRestorer::new(&fx.db, &tool, &fx.layout)
        .restore(&fx.dump, &MigrationConfig::default())
        .expect_err("restore must fail");

    assert_eq!(tool.restores.get(), 2);
    assert!(format!("{err:#}").contains("database state is undefined"));
    assert!(matches!(
        err.downcast_ref::<MigrationError>(),
        Some(MigrationError::Subprocess { .. })
    ));
    assert!(snapshot_files(&fx.layout).is_empty());
}

#[test]
fn gzip_sql_dump_is_restored() {
    let fx = fixture("gzip-dump");
    let gz_path = fx.dump.with_file_name("db-backup.sql.gz");
    let raw = fs::read(&fx.dump).expect("read dump");
    let mut encoder = GzEncoder::new(
        fs::File::create(&gz_path).expect("create gz"),
        Compression::default(),
    );
    encoder.write_all(&raw).expect("compress");
    encoder.finish().expect("finish gz");

    DatabaseRestorer::new(&fx.db, &fx.db, &fx.layout)
        .restore(&gz_path, &url_migration_config())
        .expect("restore must succeed");

    assert!(fx.db.table_exists("ps_info_lang").expect("table check"));
    assert_eq!(
        read_main_shop_url(&fx.db)
            .expect("readable")
            .expect("row")
            .domain,
        "new.example.org"
    );
    let leftovers = fs::read_dir(fx.layout.tmp_dir())
        .expect("staging dir exists")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains("staged-dump"))
        .count();
    assert_eq!(leftovers, 0);

    let unstaged = SqliteDatabase::open_in_memory("ps_").expect("memory db");
    let err = unstaged.restore(&gz_path).expect_err("needs a staging dir");
    assert!(format!("{err:#}").contains("no staging directory"));
}

#[test]
fn set_configuration_inserts_missing_keys() {
    let db = SqliteDatabase::open_in_memory("ps_").expect("memory db");
    db.execute_batch(SCHEMA_SQL).expect("schema");

    set_configuration(&db, "PS_NEW_KEY", "it's new").expect("insert");
    assert_eq!(config_value(&db, "PS_NEW_KEY").as_deref(), Some("it's new"));
    set_configuration(&db, "PS_NEW_KEY", "updated").expect("update");
    assert_eq!(config_value(&db, "PS_NEW_KEY").as_deref(), Some("updated"));
    assert_eq!(
        db.get_scalar("SELECT COUNT(*) FROM ps_configuration WHERE name = 'PS_NEW_KEY'")
            .expect("count")
            .as_deref(),
        Some("1")
    );
}

#[test]
fn detect_current_domain_skips_local_hosts_and_empty_sources() {
    let db = SqliteDatabase::open_in_memory("ps_").expect("memory db");
    db.execute_batch(SCHEMA_SQL).expect("schema");
    db.execute_batch(
        "INSERT INTO ps_shop_url (id_shop_url, domain, domain_ssl, main) VALUES (1, 'shop.example.com', 'shop.example.com', 1);",
    )
    .expect("seed");

    let local_only = RequestEnvironment {
        http_host: Some("127.0.0.1:8080".to_string()),
        server_name: Some("dev.local".to_string()),
    };
    assert_eq!(
        detect_current_domain(&db, &local_only, None).as_deref(),
        Some("shop.example.com")
    );

    let captured = DomainSnapshot {
        shop_domain: Some("www.captured.example".to_string()),
        ..DomainSnapshot::default()
    };
    assert_eq!(
        detect_current_domain(&db, &local_only, Some(&captured)).as_deref(),
        Some("captured.example")
    );

    let empty = SqliteDatabase::open_in_memory("ps_").expect("memory db");
    assert_eq!(
        detect_current_domain(&empty, &RequestEnvironment::default(), None),
        None
    );
}

#[test]
fn replacement_pairs_handle_prefix_and_nested_domains() {
    let request = UrlRewriteRequest {
        source_domain: "example.com".to_string(),
        source_prefix: "/shop/".to_string(),
        target: TargetUrl {
            scheme: Scheme::Https,
            domain: "eu.example.com".to_string(),
            physical_uri: "/".to_string(),
        },
    };

    let content = request.replacement_pairs(LocationRole::Content);
    assert_eq!(
        content[0],
        (
            "http://example.com/shop/".to_string(),
            "https://eu.example.com/".to_string()
        )
    );
    assert!(content.iter().all(|(from, _)| from.contains("://")));

    let slugs = request.replacement_pairs(LocationRole::RewriteSlug);
    assert!(slugs.contains(&("example.com/shop/".to_string(), "eu.example.com/".to_string())));
    assert!(!slugs.contains(&("example.com".to_string(), "eu.example.com".to_string())));
}

#[test]
fn rewrite_request_prefers_explicit_target_url() {
    let db = SqliteDatabase::open_in_memory("ps_").expect("memory db");
    let config = MigrationConfig {
        source_domain: Some("old.example.com".to_string()),
        target_url: Some("http://Target.Example.com/sub".to_string()),
        target_domain: Some("ignored.example.com".to_string()),
        force_https: true,
        ..MigrationConfig::default()
    };

    let request = UrlRewriteRequest::from_config(&config, &db).expect("request");
    assert_eq!(request.target.domain, "target.example.com");
    assert_eq!(request.target.physical_uri, "/sub/");
    assert_eq!(request.target.scheme, Scheme::Https);
    assert_eq!(request.source_prefix, "/");
}

#[test]
fn schema_registry_merges_toml_locations() {
    let mut registry = SchemaRegistry::builtin();
    let before = registry.locations.len();
    let extra = SchemaRegistry::from_toml_str(
        r#"
version = 1

[[locations]]
table = "custom_banner_lang"
column = "html"
role = "content"
scope = "module"

[[locations]]
table = "cms_lang"
column = "content"
role = "content"
scope = "core"
"#,
    )
    .expect("registry parses");

    registry.merge(extra);
    assert_eq!(registry.locations.len(), before + 1);
    assert!(registry
        .in_scope(LocationScope::Module)
        .any(|location| location.label() == "custom_banner_lang.html"));
}

#[test]
fn schema_registry_rejects_newer_versions_and_bad_identifiers() {
    let newer = SchemaRegistry::from_toml_str("version = 99\n");
    assert!(newer.is_err());

    let injected = SchemaRegistry::from_toml_str(
        r#"
version = 1

[[locations]]
table = "cms_lang; DROP TABLE x"
column = "content"
role = "content"
scope = "core"
"#,
    );
    assert!(injected.is_err());
}

#[test]
fn identifiers_are_validated_and_prefixed() {
    let db = SqliteDatabase::open_in_memory("ps_").expect("memory db");
    assert_eq!(table_name(&db, "shop_url").expect("valid"), "`ps_shop_url`");
    assert!(table_name(&db, "shop url").is_err());
    assert!(column_name("value`").is_err());
    assert_eq!(quote(&db, "it's"), "'it''s'");
}

fn mysql_settings() -> DatabaseSettings {
    DatabaseSettings {
        host: "db.internal".to_string(),
        port: Some(3307),
        name: "shop".to_string(),
        user: "shop_user".to_string(),
        password: "s3cret".to_string(),
        ..DatabaseSettings::default()
    }
}

fn args_of(command: &std::process::Command) -> Vec<String> {
    command
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn mysqldump_command_uses_discrete_arguments() {
    let command = build_mysqldump_command(
        Path::new("mysqldump"),
        &mysql_settings(),
        Path::new("/tmp/snapshot.sql"),
    );
    assert_eq!(command.get_program(), "mysqldump");
    assert_eq!(
        args_of(&command),
        vec![
            "--host=db.internal",
            "--port=3307",
            "--user=shop_user",
            "--password=s3cret",
            "--default-character-set=utf8mb4",
            "--single-transaction",
            "--routines",
            "--triggers",
            "--add-drop-table",
            "--result-file=/tmp/snapshot.sql",
            "shop",
        ]
    );
    assert!(relocate_core::describe_command(&command).contains("--password=***"));
}

#[test]
fn mysql_restore_and_query_commands_target_the_database() {
    let settings = DatabaseSettings {
        password: String::new(),
        port: None,
        ..mysql_settings()
    };
    let restore = build_mysql_restore_command(Path::new("mysql"), &settings);
    assert_eq!(
        args_of(&restore),
        vec![
            "--host=db.internal",
            "--user=shop_user",
            "--default-character-set=utf8mb4",
            "shop",
        ]
    );

    let query = build_query_command(Path::new("mysql"), &settings, "SELECT 1", false);
    let args = args_of(&query);
    assert!(args.contains(&"--batch".to_string()));
    assert!(args.contains(&"--skip-column-names".to_string()));
    assert!(args.contains(&"--execute=SELECT 1".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("shop"));
}

#[test]
fn mysql_restore_prelude_drops_tables_the_dump_does_not_know() {
    let objects = parse_table_listing(
        "ps_configuration\tBASE TABLE\nps_info_lang\tBASE TABLE\nps_sales\tVIEW\nodd`name\tBASE TABLE\n\n",
    );
    assert_eq!(objects.len(), 4);
    assert!(objects[2].is_view);

    let script = build_drop_objects_script(&objects);
    let lines = script.lines().collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec![
            "SET FOREIGN_KEY_CHECKS=0;",
            "DROP VIEW IF EXISTS `ps_sales`;",
            "DROP TABLE IF EXISTS `ps_configuration`, `ps_info_lang`, `odd``name`;",
            "SET FOREIGN_KEY_CHECKS=1;",
        ]
    );

    let empty = build_drop_objects_script(&parse_table_listing(""));
    assert!(!empty.contains("DROP"));
}

#[test]
fn mysql_backends_require_a_database_name() {
    let settings = DatabaseSettings::default();
    assert!(MysqlCliDatabase::new(settings.clone()).is_err());
    assert!(MysqlDumpTool::new(settings).is_err());
}

#[test]
fn batch_output_parses_nulls_and_escapes() {
    let rows = parse_batch_output("id\tvalue\n1\tNULL\n2\ta\\tb\\nc\n");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("id"), Some("1"));
    assert_eq!(rows[0].get("value"), None);
    assert_eq!(rows[1].get("VALUE"), Some("a\tb\nc"));
    assert!(parse_batch_output("").is_empty());
}

#[test]
fn mysql_escaping_covers_quotes_and_control_characters() {
    assert_eq!(escape_mysql("it's"), "it\\'s");
    assert_eq!(escape_mysql("a\\b"), "a\\\\b");
    assert_eq!(escape_mysql("line\nbreak"), "line\\nbreak");
    assert_eq!(escape_mysql("nul\0"), "nul\\0");
}

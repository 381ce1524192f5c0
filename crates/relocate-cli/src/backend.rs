use anyhow::Result;
use relocate_core::{DatabaseEngine, DatabaseSettings, MigrationConfig, MigrationError};
use relocate_db::{Database, DumpTool, MysqlCliDatabase, MysqlDumpTool, SqliteDatabase};
use relocate_store::StoreLayout;

pub(crate) enum Backend {
    Sqlite(SqliteDatabase),
    Mysql {
        db: MysqlCliDatabase,
        tool: MysqlDumpTool,
    },
}

impl Backend {
    pub(crate) fn open(config: &MigrationConfig, layout: &StoreLayout) -> Result<Self> {
        let settings = config.database.clone().ok_or_else(|| {
            MigrationError::validation("a [database] section is required for this command")
        })?;
        Self::from_settings(settings, layout)
    }

    pub(crate) fn from_settings(settings: DatabaseSettings, layout: &StoreLayout) -> Result<Self> {
        match settings.engine {
            DatabaseEngine::Sqlite => {
                let path = settings.path.as_deref().ok_or_else(|| {
                    MigrationError::validation("database.path is required for the sqlite engine")
                })?;
                log::debug!("using sqlite database {}", path.display());
                let db = SqliteDatabase::open(path, settings.prefix.clone())?
                    .with_staging_dir(layout.tmp_dir());
                Ok(Self::Sqlite(db))
            }
            DatabaseEngine::Mysql => {
                log::debug!("using mysql database {} on {}", settings.name, settings.host);
                Ok(Self::Mysql {
                    db: MysqlCliDatabase::new(settings.clone())?,
                    tool: MysqlDumpTool::new(settings)?,
                })
            }
        }
    }

    pub(crate) fn database(&self) -> &dyn Database {
        match self {
            Self::Sqlite(db) => db,
            Self::Mysql { db, .. } => db,
        }
    }

    pub(crate) fn dump_tool(&self) -> &dyn DumpTool {
        match self {
            Self::Sqlite(db) => db,
            Self::Mysql { tool, .. } => tool,
        }
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use loam_rdb_core::{RdbError, RdbResult};

const DEFAULT_CONFIG_NAME: &str = "rdb.json";
pub const DEFAULT_SQLITE_NAME: &str = "rdb.sqlite";

pub const DEFAULT_OVERFLOW_THRESHOLD: usize = 512;
pub const DEFAULT_MIGRATION_ATTEMPTS: u32 = 3;
pub const DEFAULT_MIGRATION_BACKOFF_MS: u64 = 50;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

/// Tuning for dynamic schema handling.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Serialized byte length at which a value moves to the overflow table. Also the width of
    /// every attribute column.
    pub overflow_threshold: Option<usize>,
    pub migration_attempts: Option<u32>,
    pub migration_backoff_ms: Option<u64>,
}

impl SchemaConfig {
    pub fn with_defaults() -> Self {
        Self {
            overflow_threshold: Some(DEFAULT_OVERFLOW_THRESHOLD),
            migration_attempts: Some(DEFAULT_MIGRATION_ATTEMPTS),
            migration_backoff_ms: Some(DEFAULT_MIGRATION_BACKOFF_MS),
        }
    }

    pub fn overflow_threshold(&self) -> usize {
        self.overflow_threshold
            .unwrap_or(DEFAULT_OVERFLOW_THRESHOLD)
            .max(1)
    }

    pub fn migration_attempts(&self) -> u32 {
        self.migration_attempts
            .unwrap_or(DEFAULT_MIGRATION_ATTEMPTS)
            .max(1)
    }

    pub fn migration_backoff(&self) -> Duration {
        Duration::from_millis(
            self.migration_backoff_ms
                .unwrap_or(DEFAULT_MIGRATION_BACKOFF_MS),
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RdbConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub schema: Option<SchemaConfig>,
}

impl RdbConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            schema: Some(SchemaConfig::with_defaults()),
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> RdbResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| RdbError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| RdbError::storage(format!("read config: {err}")))?;
            let config: RdbConfig =
                serde_json::from_str(&raw).map_err(|err| RdbError::invalid(err.to_string()))?;
            return Ok(config);
        }
        let default = RdbConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| RdbError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| RdbError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> RdbResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SQLITE_NAME.to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(RdbError::invalid("config is not sqlite backend")),
        }
    }

    pub fn schema(&self) -> SchemaConfig {
        self.schema.clone().unwrap_or_default()
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => None,
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Some(url.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{RdbConfig, SchemaConfig, DEFAULT_OVERFLOW_THRESHOLD};

    #[test]
    fn load_or_init_writes_sqlite_default() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("data.sqlite");
        let config = RdbConfig::load_or_init(dir.path(), &db_path).expect("config");
        assert_eq!(config.backend_name(), "sqlite");
        assert!(dir.path().join("rdb.json").exists());
        assert_eq!(config.sqlite_path(dir.path()).expect("path"), db_path);
        assert_eq!(config.schema().overflow_threshold(), DEFAULT_OVERFLOW_THRESHOLD);
    }

    #[test]
    fn load_or_init_reads_existing_file() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("rdb.json"),
            r#"{"database":{"backend":"postgres","url":"postgres://localhost/rdb"},"schema":{"overflow_threshold":64}}"#,
        )
        .expect("write config");
        let config =
            RdbConfig::load_or_init(dir.path(), &dir.path().join("unused")).expect("config");
        assert_eq!(config.backend_name(), "postgres");
        assert_eq!(config.connection_url(), Some("postgres://localhost/rdb"));
        assert!(config.sqlite_path(dir.path()).is_err());
        assert_eq!(config.schema().overflow_threshold(), 64);
        assert_eq!(config.schema().migration_attempts(), 3);
    }

    #[test]
    fn schema_defaults_apply_when_missing() {
        let schema = SchemaConfig::default();
        assert_eq!(schema.overflow_threshold(), DEFAULT_OVERFLOW_THRESHOLD);
        assert_eq!(schema.migration_backoff().as_millis(), 50);
    }
}

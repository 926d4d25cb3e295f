use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use loam_rdb_core::{
    AttributeRegistry, Attributes, Entity, ListCondition, ListResult, RdbError, RdbResult,
    ResourceApi,
};

use crate::config::{DatabaseConfig, RdbConfig, SchemaConfig, DEFAULT_SQLITE_NAME};
use crate::extra::{ExtraValues, EXTRA_TABLE_SUFFIX};
use crate::meta::{MetaStore, DRIVER_IDENTITY, DRIVER_IDENTITY_KEY, RESOURCE_NAMES_KEY};
use crate::migration::Migrator;
use crate::query::{FilterTranslator, SortTranslator};
use crate::schema::{now_millis, InboundContext, ResourceSchema};

const META_TABLE: &str = "rdb_meta";
const MIGRATIONS_TABLE: &str = "seaql_migrations";

/// Resource storage over a sea-orm connection. Each resource gets its own table whose columns
/// grow as new attribute names are written.
#[derive(Clone)]
pub struct RdbStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    meta: MetaStore,
    settings: SchemaConfig,
    schemas: Arc<AsyncMutex<HashMap<String, Arc<ResourceSchema>>>>,
    resource_names: Arc<AsyncMutex<BTreeSet<String>>>,
    closed: Arc<AtomicBool>,
}

impl RdbStore {
    pub async fn connect(config: &RdbConfig, base_dir: &Path) -> RdbResult<Self> {
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        options.sqlx_logging(false);
        let conn = Database::connect(options).await?;
        let backend = conn.get_database_backend();
        Migrator::up(&conn, None).await?;

        let meta = MetaStore::new(conn.clone());
        meta.ensure(DRIVER_IDENTITY_KEY, &JsonValue::from(DRIVER_IDENTITY))
            .await?;
        let names: Vec<String> = meta.get_as(RESOURCE_NAMES_KEY).await?.unwrap_or_default();

        let store = Self {
            conn,
            backend,
            meta,
            settings: config.schema(),
            schemas: Arc::new(AsyncMutex::new(HashMap::new())),
            resource_names: Arc::new(AsyncMutex::new(names.iter().cloned().collect())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        for name in &names {
            store.schema(name).await?;
        }
        log::debug!(
            "rdb store connected on {:?} with {} resources",
            store.backend,
            names.len()
        );
        Ok(store)
    }

    /// Opens the store described by `rdb.json` in `base_dir`, writing a sqlite default there
    /// on first use.
    pub async fn open(base_dir: &Path) -> RdbResult<Self> {
        let config = RdbConfig::load_or_init(base_dir, &base_dir.join(DEFAULT_SQLITE_NAME))?;
        log::info!(
            "opening rdb store in {} on {}",
            base_dir.display(),
            config.backend_name()
        );
        Self::connect(&config, base_dir).await
    }

    pub async fn connect_sqlite(path: &Path) -> RdbResult<Self> {
        let config = RdbConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// Closes the pool. Every later call fails.
    pub async fn close(&self) -> RdbResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.conn.clone().close().await?;
        Ok(())
    }

    fn assert_open(&self) -> RdbResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RdbError::storage("rdb store is already closed"));
        }
        Ok(())
    }

    /// Initialized schema of `resource`, registering the name on first use.
    pub async fn schema(&self, resource: &str) -> RdbResult<Arc<ResourceSchema>> {
        self.assert_open()?;
        validate_resource_name(resource)?;
        let schema = {
            let mut schemas = self.schemas.lock().await;
            schemas
                .entry(resource.to_string())
                .or_insert_with(|| {
                    Arc::new(ResourceSchema::new(
                        resource,
                        self.conn.clone(),
                        self.meta.clone(),
                        self.settings.clone(),
                    ))
                })
                .clone()
        };
        schema.ensure_initialized().await?;
        self.remember_resource(resource).await?;
        Ok(schema)
    }

    async fn remember_resource(&self, resource: &str) -> RdbResult<()> {
        let mut names = self.resource_names.lock().await;
        if names.contains(resource) {
            return Ok(());
        }
        names.insert(resource.to_string());
        let listed: Vec<&String> = names.iter().collect();
        self.meta.set_as(RESOURCE_NAMES_KEY, &listed).await
    }

    async fn forget_resource(&self, resource: &str) -> RdbResult<()> {
        self.schemas.lock().await.remove(resource);
        let mut names = self.resource_names.lock().await;
        if names.remove(resource) {
            let listed: Vec<&String> = names.iter().collect();
            self.meta.set_as(RESOURCE_NAMES_KEY, &listed).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceApi for RdbStore {
    async fn create(&self, resource: &str, attributes: Attributes) -> RdbResult<Entity> {
        let schema = self.schema(resource).await?;
        schema
            .register_attributes(&ResourceSchema::detect_types(&attributes))
            .await?;
        let inbound = schema.inbound(&attributes, InboundContext::default())?;
        let id = Uuid::new_v4().simple().to_string();

        let txn = self.conn.begin().await?;
        schema.insert_row(&txn, &id, now_millis(), &inbound).await?;
        schema
            .extra()
            .reconcile(&txn, &id, &inbound.extra_values)
            .await?;
        txn.commit().await?;

        self.one(resource, &id).await?.ok_or_else(|| {
            RdbError::not_found(format!("created row {id} vanished from {resource}"))
        })
    }

    async fn one(&self, resource: &str, id: &str) -> RdbResult<Option<Entity>> {
        let schema = self.schema(resource).await?;
        let Some(row) = schema.find_row(&self.conn, id).await? else {
            return Ok(None);
        };
        let extras = schema.extra().load(&self.conn, id).await?;
        Ok(Some(schema.outbound(&row, &extras).await?))
    }

    async fn update(&self, resource: &str, id: &str, attributes: Attributes) -> RdbResult<Entity> {
        let schema = self.schema(resource).await?;
        let Some(row) = schema.find_row(&self.conn, id).await? else {
            return Err(RdbError::not_found(format!("data not found for id: {id}")));
        };
        schema
            .register_attributes(&ResourceSchema::detect_types(&attributes))
            .await?;

        let context = InboundContext {
            attribute_types: row.attribute_types,
            extra_values: schema.extra().load(&self.conn, id).await?,
        };
        let inbound = schema.inbound(&attributes, context)?;

        let txn = self.conn.begin().await?;
        if schema.update_row(&txn, id, now_millis(), &inbound).await? == 0 {
            return Err(RdbError::not_found(format!("data not found for id: {id}")));
        }
        schema
            .extra()
            .reconcile(&txn, id, &inbound.extra_values)
            .await?;
        txn.commit().await?;

        self.one(resource, id)
            .await?
            .ok_or_else(|| RdbError::not_found(format!("data not found for id: {id}")))
    }

    async fn destroy(&self, resource: &str, id: &str) -> RdbResult<u64> {
        let schema = self.schema(resource).await?;
        let txn = self.conn.begin().await?;
        schema.extra().delete_for(&txn, id).await?;
        let deleted = schema.delete_row(&txn, id).await?;
        txn.commit().await?;
        Ok(deleted.min(1))
    }

    async fn list(&self, resource: &str, condition: ListCondition) -> RdbResult<ListResult> {
        let schema = self.schema(resource).await?;
        let registry = schema.attributes().await;
        let filter = FilterTranslator::new(resource, &registry).translate(&condition.filter)?;
        let order = SortTranslator::new(resource, &registry).translate(&condition.sort);

        let total = schema.count_rows(&self.conn, filter.clone()).await?;
        let rows = schema
            .select_rows(&self.conn, filter, &order, condition.offset, condition.limit)
            .await?;
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let mut extras = schema.extra().load_many(&self.conn, &ids).await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            let row_extras: ExtraValues = extras.remove(&row.id).unwrap_or_default();
            entities.push(schema.outbound(row, &row_extras).await?);
        }
        Ok(ListResult {
            length: entities.len(),
            entities,
            offset: condition.offset,
            limit: condition.limit,
            total,
        })
    }

    async fn drop_resource(&self, resource: &str) -> RdbResult<()> {
        let schema = self.schema(resource).await?;
        schema.drop_all().await?;
        self.forget_resource(resource).await?;
        log::info!("dropped resource {resource}");
        Ok(())
    }

    async fn resources(&self) -> RdbResult<Vec<String>> {
        self.assert_open()?;
        Ok(self.resource_names.lock().await.iter().cloned().collect())
    }

    async fn attributes(&self, resource: &str) -> RdbResult<AttributeRegistry> {
        let schema = self.schema(resource).await?;
        Ok(schema.attributes().await)
    }
}

fn build_connection_url(config: &RdbConfig, base_dir: &Path) -> RdbResult<String> {
    match &config.database {
        DatabaseConfig::Sqlite { .. } => {
            let path = config.sqlite_path(base_dir)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| RdbError::storage(format!("create sqlite dir: {err}")))?;
            }
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        DatabaseConfig::Postgres { url } => Ok(url.clone()),
        DatabaseConfig::Mysql { url } => Ok(url.clone()),
    }
}

fn validate_resource_name(resource: &str) -> RdbResult<()> {
    if resource.trim().is_empty() {
        return Err(RdbError::invalid("resource name must not be empty"));
    }
    if resource == META_TABLE
        || resource == MIGRATIONS_TABLE
        || resource.ends_with(EXTRA_TABLE_SUFFIX)
    {
        return Err(RdbError::invalid(format!(
            "resource name '{resource}' collides with an internal table"
        )));
    }
    Ok(())
}

//! One resource's dynamic table: column migration, attribute registry and the translation
//! between caller attributes and stored rows.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use sea_orm::sea_query::{
    Alias, ColumnDef, Condition, Expr, Order, Query, SelectStatement, SimpleExpr, Table,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, QueryResult};
use time::OffsetDateTime;
use tokio::sync::{OnceCell, RwLock};

use loam_rdb_core::codec::{self, encoded_len};
use loam_rdb_core::naming::{
    attribute_for, column_for, is_internal_column, is_reserved_attribute, ATTRIBUTE_TYPES_COLUMN,
    AT_COLUMN, ID_COLUMN, NUM_COLUMN,
};
use loam_rdb_core::{
    decode_type_map, encode_type_map, AttributeDescriptor, AttributeRegistry, Attributes,
    DataType, Entity, RdbError, RdbResult, TypeMap, Value,
};

use crate::config::SchemaConfig;
use crate::db::{
    add_text_column, describe_columns, drop_table, exec, query_all, query_one, read_i64,
    read_opt_text,
};
use crate::extra::{ExtraValue, ExtraValueStore, ExtraValues, RESOURCE_ID_WIDTH};
use crate::locks::{NamedLocks, MIGRATION_LOCK, SYNC_LOCK};
use crate::meta::{attribute_names_key, attribute_types_key, legacy_attributes_key, MetaStore};
use crate::query::SortTerm;

/// Written to the main column when the value lives in the overflow table.
pub const EXTRA_SENTINEL: &str = r#"{"$extra":true}"#;

const FIXED_COLUMNS: [&str; 4] = [ID_COLUMN, AT_COLUMN, NUM_COLUMN, ATTRIBUTE_TYPES_COLUMN];
const NANOS_PER_MILLI: i128 = 1_000_000;

/// State carried over from the stored row when an update is translated.
#[derive(Clone, Debug, Default)]
pub struct InboundContext {
    pub attribute_types: TypeMap,
    pub extra_values: ExtraValues,
}

/// Translated write: column values for the main row, the overflow set the row should end up
/// with, and the merged type map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Inbound {
    pub fields: BTreeMap<String, Option<String>>,
    pub extra_values: ExtraValues,
    pub attribute_types: TypeMap,
}

/// A physical row as read back from the resource table.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRow {
    pub id: String,
    pub at: i64,
    pub num: i64,
    pub attribute_types: TypeMap,
    pub columns: BTreeMap<String, Option<String>>,
}

pub struct ResourceSchema {
    name: String,
    conn: DatabaseConnection,
    meta: MetaStore,
    extra: ExtraValueStore,
    settings: SchemaConfig,
    registry: RwLock<AttributeRegistry>,
    columns: RwLock<HashSet<String>>,
    initialized: OnceCell<()>,
    locks: NamedLocks,
}

impl ResourceSchema {
    pub fn new(
        name: &str,
        conn: DatabaseConnection,
        meta: MetaStore,
        settings: SchemaConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            conn,
            meta,
            extra: ExtraValueStore::new(name),
            settings,
            registry: RwLock::new(AttributeRegistry::new()),
            columns: RwLock::new(HashSet::new()),
            initialized: OnceCell::new(),
            locks: NamedLocks::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extra(&self) -> &ExtraValueStore {
        &self.extra
    }

    pub fn overflow_threshold(&self) -> usize {
        self.settings.overflow_threshold()
    }

    /// First caller creates the tables and seeds the registry; everyone else waits for that
    /// to finish and then returns immediately.
    pub async fn ensure_initialized(&self) -> RdbResult<()> {
        self.initialized
            .get_or_try_init(|| self.initialize())
            .await?;
        Ok(())
    }

    async fn initialize(&self) -> RdbResult<()> {
        let _guard = self.locks.acquire(SYNC_LOCK).await;
        self.create_table().await?;
        self.extra.ensure_table(&self.conn).await?;
        let physical = describe_columns(&self.conn, &self.name).await?;

        let names: Vec<String> = self
            .meta
            .get_as(&attribute_names_key(&self.name))
            .await?
            .unwrap_or_default();
        let types: TypeMap = self
            .meta
            .get_as(&attribute_types_key(&self.name))
            .await?
            .unwrap_or_default();
        let legacy: AttributeRegistry = self
            .meta
            .get_as(&legacy_attributes_key(&self.name))
            .await?
            .unwrap_or_default();

        let mut registry = AttributeRegistry::new();
        for (name, descriptor) in legacy {
            registry.insert(name, descriptor);
        }
        for name in names {
            let data_type = types
                .get(&name)
                .cloned()
                .or_else(|| registry.get(&name).map(|d| d.data_type.clone()))
                .unwrap_or(DataType::String);
            registry.insert(name.clone(), AttributeDescriptor::new(name, data_type));
        }
        for (name, data_type) in types {
            registry
                .entry(name.clone())
                .or_insert_with(|| AttributeDescriptor::new(name, data_type));
        }
        for column in physical.iter().filter(|c| !FIXED_COLUMNS.contains(&c.as_str())) {
            if is_internal_column(column) {
                continue;
            }
            let name = attribute_for(column);
            if !registry.contains_key(&name) {
                log::debug!("{}: column '{column}' has no recorded type", self.name);
                registry.insert(name.clone(), AttributeDescriptor::new(name, DataType::String));
            }
        }

        log::debug!(
            "{}: initialized with {} attributes, {} columns",
            self.name,
            registry.len(),
            physical.len()
        );
        *self.registry.write().await = registry;
        *self.columns.write().await = physical;
        Ok(())
    }

    async fn create_table(&self) -> RdbResult<()> {
        let create = Table::create()
            .table(Alias::new(&self.name))
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new(ID_COLUMN))
                    .string_len(RESOURCE_ID_WIDTH)
                    .not_null()
                    .primary_key(),
            )
            .col(ColumnDef::new(Alias::new(AT_COLUMN)).big_integer().not_null())
            .col(
                ColumnDef::new(Alias::new(NUM_COLUMN))
                    .big_integer()
                    .not_null()
                    .default(0),
            )
            .col(ColumnDef::new(Alias::new(ATTRIBUTE_TYPES_COLUMN)).text().null())
            .to_owned();
        exec(&self.conn, &create).await?;
        Ok(())
    }

    pub async fn attributes(&self) -> AttributeRegistry {
        self.registry.read().await.clone()
    }

    /// Types detected for every storable attribute of a write.
    pub fn detect_types(attributes: &Attributes) -> TypeMap {
        attributes
            .iter()
            .filter(|(name, _)| !is_reserved_attribute(name))
            .map(|(name, value)| (name.clone(), value.detect_type()))
            .collect()
    }

    /// Makes sure every attribute in `types` has a column and records its type. Returns the
    /// descriptors of those attributes after the update.
    pub async fn register_attributes(&self, types: &TypeMap) -> RdbResult<AttributeRegistry> {
        let _guard = self.locks.acquire(MIGRATION_LOCK).await;

        let missing: Vec<String> = {
            let columns = self.columns.read().await;
            types
                .keys()
                .map(|name| column_for(name))
                .filter(|column| !columns.contains(column))
                .collect()
        };
        if !missing.is_empty() {
            self.migrate(&missing).await?;
        }

        let (snapshot, changed) = {
            let mut registry = self.registry.write().await;
            let mut changed = false;
            for (name, data_type) in types {
                match registry.get(name) {
                    Some(current) if current.data_type == *data_type => {}
                    Some(_) if *data_type == DataType::Null => {}
                    _ => {
                        registry.insert(
                            name.clone(),
                            AttributeDescriptor::new(name.clone(), data_type.clone()),
                        );
                        changed = true;
                    }
                }
            }
            (registry.clone(), changed)
        };
        if changed {
            self.persist_registry(&snapshot).await?;
        }
        Ok(snapshot
            .into_iter()
            .filter(|(name, _)| types.contains_key(name))
            .collect())
    }

    /// Adds `missing` columns and re-reads the table until all of them are visible, retrying
    /// with jittered exponential backoff up to `migration_attempts` times in total.
    async fn migrate(&self, missing: &[String]) -> RdbResult<()> {
        let attempts = self.settings.migration_attempts();
        (|| self.migrate_once(missing))
            .retry(self.migration_backoff())
            .sleep(tokio::time::sleep)
            .when(|err: &RdbError| matches!(err, RdbError::Migration { .. }))
            .notify(|err: &RdbError, delay: Duration| {
                log::debug!("{}: {err}, retrying in {delay:?}", self.name);
            })
            .await
            .map_err(|err| match err {
                RdbError::Migration { message } => {
                    RdbError::migration(format!("after {attempts} attempts, {message}"))
                }
                other => other,
            })
    }

    fn migration_backoff(&self) -> ExponentialBuilder {
        let base = self.settings.migration_backoff();
        let retries = self.settings.migration_attempts().saturating_sub(1);
        ExponentialBuilder::default()
            .with_min_delay(base)
            .with_max_delay(base.saturating_mul(1 << 8))
            .with_factor(2.0)
            .with_max_times(retries as usize)
            .with_jitter()
    }

    async fn migrate_once(&self, missing: &[String]) -> RdbResult<()> {
        let width = u32::try_from(self.overflow_threshold()).unwrap_or(u32::MAX);
        let present = describe_columns(&self.conn, &self.name).await?;
        let mut last_error = None;
        for column in missing.iter().filter(|column| !present.contains(*column)) {
            match add_text_column(&self.conn, &self.name, column, width).await {
                Ok(true) => log::debug!("{}: added column '{column}'", self.name),
                Ok(false) => {}
                Err(err) => {
                    log::debug!("{}: adding column '{column}' failed: {err}", self.name);
                    last_error = Some(err.to_string());
                }
            }
        }
        let present = describe_columns(&self.conn, &self.name).await?;
        let pending: Vec<&String> = missing
            .iter()
            .filter(|column| !present.contains(*column))
            .collect();
        *self.columns.write().await = present;
        if pending.is_empty() {
            return Ok(());
        }
        Err(RdbError::migration(format!(
            "columns {pending:?} missing on '{}'{}",
            self.name,
            last_error
                .map(|err| format!(": {err}"))
                .unwrap_or_default()
        )))
    }

    async fn persist_registry(&self, registry: &AttributeRegistry) -> RdbResult<()> {
        let names_key = attribute_names_key(&self.name);
        let mut names: Vec<String> = self.meta.get_as(&names_key).await?.unwrap_or_default();
        for name in registry.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        let types: TypeMap = registry
            .iter()
            .map(|(name, descriptor)| (name.clone(), descriptor.data_type.clone()))
            .collect();
        self.meta.set_as(&names_key, &names).await?;
        self.meta
            .set_as(&attribute_types_key(&self.name), &types)
            .await?;
        Ok(())
    }

    /// Translates caller attributes into column values. Values whose encoding reaches the
    /// overflow threshold, or spells [`EXTRA_SENTINEL`] itself, are routed to the extra values
    /// and replaced by the sentinel.
    pub fn inbound(&self, attributes: &Attributes, context: InboundContext) -> RdbResult<Inbound> {
        let threshold = self.overflow_threshold();
        let InboundContext {
            mut attribute_types,
            mut extra_values,
        } = context;
        let mut fields = BTreeMap::new();
        for (name, value) in attributes {
            if is_reserved_attribute(name) {
                continue;
            }
            let data_type = value.detect_type();
            let column = column_for(name);
            attribute_types.insert(name.clone(), data_type.clone());
            if value.is_null() {
                fields.insert(column, None);
                extra_values.remove(name);
                continue;
            }
            let serialized = codec::serialize(value, &data_type)?;
            if encoded_len(&serialized) >= threshold || serialized == EXTRA_SENTINEL {
                extra_values.insert(name.clone(), ExtraValue::new(data_type, serialized));
                fields.insert(column, Some(EXTRA_SENTINEL.to_string()));
            } else {
                extra_values.remove(name);
                fields.insert(column, Some(serialized));
            }
        }
        Ok(Inbound {
            fields,
            extra_values,
            attribute_types,
        })
    }

    /// Rebuilds an entity from a stored row and its overflow values. Attributes known to the
    /// resource but absent from the row come back as explicit nulls.
    pub async fn outbound(&self, row: &StoredRow, extra_values: &ExtraValues) -> RdbResult<Entity> {
        let registry = self.registry.read().await;
        let mut attributes = Attributes::new();
        for (column, raw) in &row.columns {
            if column == ID_COLUMN || is_internal_column(column) {
                continue;
            }
            let name = attribute_for(column);
            let Some(raw) = raw else {
                attributes.insert(name, Value::Null);
                continue;
            };
            if raw == EXTRA_SENTINEL {
                if !extra_values.contains_key(&name) {
                    log::warn!(
                        "{}: row '{}' points '{name}' at a missing overflow value",
                        self.name,
                        row.id
                    );
                    attributes.insert(name, Value::Null);
                }
                continue;
            }
            let data_type = row
                .attribute_types
                .get(&name)
                .or_else(|| registry.get(&name).map(|d| &d.data_type))
                .cloned()
                .unwrap_or(DataType::String);
            attributes.insert(name, codec::deserialize(raw, &data_type)?);
        }
        for (name, extra) in extra_values {
            attributes.insert(
                name.clone(),
                codec::deserialize(&extra.value, &extra.data_type)?,
            );
        }
        for name in registry.keys() {
            attributes.entry(name.clone()).or_insert(Value::Null);
        }
        Ok(Entity {
            resource: self.name.clone(),
            id: row.id.clone(),
            at: millis_to_datetime(row.at)?,
            num: row.num,
            attributes,
        })
    }

    async fn select_columns(&self) -> Vec<String> {
        let columns = self.columns.read().await;
        let mut dynamic: Vec<String> = columns
            .iter()
            .filter(|column| !FIXED_COLUMNS.contains(&column.as_str()))
            .cloned()
            .collect();
        dynamic.sort();
        FIXED_COLUMNS
            .iter()
            .map(|column| column.to_string())
            .chain(dynamic)
            .collect()
    }

    fn select_statement(&self, columns: &[String]) -> SelectStatement {
        Query::select()
            .from(Alias::new(&self.name))
            .columns(columns.iter().map(Alias::new))
            .to_owned()
    }

    fn decode_row(&self, row: &QueryResult, columns: &[String]) -> RdbResult<StoredRow> {
        let id: String = row.try_get("", ID_COLUMN)?;
        let attribute_types = match read_opt_text(row, ATTRIBUTE_TYPES_COLUMN)? {
            Some(raw) => decode_type_map(&raw)?,
            None => TypeMap::new(),
        };
        let mut values = BTreeMap::new();
        for column in columns
            .iter()
            .filter(|column| !FIXED_COLUMNS.contains(&column.as_str()))
        {
            values.insert(column.clone(), read_opt_text(row, column)?);
        }
        Ok(StoredRow {
            id,
            at: read_i64(row, AT_COLUMN)?,
            num: read_i64(row, NUM_COLUMN)?,
            attribute_types,
            columns: values,
        })
    }

    pub async fn find_row<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> RdbResult<Option<StoredRow>> {
        let columns = self.select_columns().await;
        let select = self
            .select_statement(&columns)
            .and_where(Expr::col(Alias::new(ID_COLUMN)).eq(id))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| self.decode_row(&row, &columns))
            .transpose()
    }

    pub async fn select_rows<C: ConnectionTrait>(
        &self,
        conn: &C,
        condition: Condition,
        order: &[SortTerm],
        offset: u64,
        limit: Option<u64>,
    ) -> RdbResult<Vec<StoredRow>> {
        let columns = self.select_columns().await;
        let mut select = self.select_statement(&columns);
        select.cond_where(condition);
        for term in order {
            select.order_by(Alias::new(&term.column), term.direction.order());
        }
        select.order_by(Alias::new(ID_COLUMN), Order::Asc);
        if let Some(limit) = limit {
            select.limit(limit);
        }
        if offset > 0 {
            select.offset(offset);
        }
        query_all(conn, &select)
            .await?
            .iter()
            .map(|row| self.decode_row(row, &columns))
            .collect()
    }

    pub async fn count_rows<C: ConnectionTrait>(
        &self,
        conn: &C,
        condition: Condition,
    ) -> RdbResult<u64> {
        let select = Query::select()
            .from(Alias::new(&self.name))
            .expr_as(Expr::col(Alias::new(ID_COLUMN)).count(), Alias::new("total"))
            .cond_where(condition)
            .to_owned();
        let total = match query_one(conn, &select).await? {
            Some(row) => read_i64(&row, "total")?,
            None => 0,
        };
        Ok(u64::try_from(total).unwrap_or_default())
    }

    pub async fn insert_row<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        at: i64,
        inbound: &Inbound,
    ) -> RdbResult<()> {
        let mut columns = vec![
            Alias::new(ID_COLUMN),
            Alias::new(AT_COLUMN),
            Alias::new(NUM_COLUMN),
            Alias::new(ATTRIBUTE_TYPES_COLUMN),
        ];
        let mut values: Vec<SimpleExpr> = vec![
            id.into(),
            at.into(),
            0i64.into(),
            encode_type_map(&inbound.attribute_types).into(),
        ];
        for (column, value) in &inbound.fields {
            columns.push(Alias::new(column));
            values.push(value.clone().into());
        }
        let insert = Query::insert()
            .into_table(Alias::new(&self.name))
            .columns(columns)
            .values(values)
            .map_err(|err| RdbError::storage(err.to_string()))?
            .to_owned();
        exec(conn, &insert).await?;
        Ok(())
    }

    /// Writes `inbound` over the row and bumps its version. Returns the affected row count.
    pub async fn update_row<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        at: i64,
        inbound: &Inbound,
    ) -> RdbResult<u64> {
        let mut update = Query::update()
            .table(Alias::new(&self.name))
            .value(Alias::new(AT_COLUMN), at)
            .value(
                Alias::new(NUM_COLUMN),
                Expr::col(Alias::new(NUM_COLUMN)).add(1),
            )
            .value(
                Alias::new(ATTRIBUTE_TYPES_COLUMN),
                encode_type_map(&inbound.attribute_types),
            )
            .and_where(Expr::col(Alias::new(ID_COLUMN)).eq(id))
            .to_owned();
        for (column, value) in &inbound.fields {
            update.value(Alias::new(column), value.clone());
        }
        exec(conn, &update).await
    }

    pub async fn delete_row<C: ConnectionTrait>(&self, conn: &C, id: &str) -> RdbResult<u64> {
        let delete = Query::delete()
            .from_table(Alias::new(&self.name))
            .and_where(Expr::col(Alias::new(ID_COLUMN)).eq(id))
            .to_owned();
        exec(conn, &delete).await
    }

    /// Removes both tables and the persisted attribute metadata of this resource.
    pub async fn drop_all(&self) -> RdbResult<()> {
        let _guard = self.locks.acquire(MIGRATION_LOCK).await;
        self.extra.drop_table(&self.conn).await?;
        drop_table(&self.conn, &self.name).await?;
        for key in [
            attribute_names_key(&self.name),
            attribute_types_key(&self.name),
            legacy_attributes_key(&self.name),
        ] {
            self.meta.delete(&key).await?;
        }
        self.registry.write().await.clear();
        self.columns.write().await.clear();
        Ok(())
    }
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / NANOS_PER_MILLI) as i64
}

fn millis_to_datetime(millis: i64) -> RdbResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
        .map_err(|err| RdbError::storage(format!("invalid timestamp {millis}: {err}")))
}

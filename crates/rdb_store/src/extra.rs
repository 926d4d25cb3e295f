use std::collections::{BTreeMap, HashMap};

use sea_orm::sea_query::{
    Alias, ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, Query, Table,
};
use sea_orm::ConnectionTrait;

use loam_rdb_core::naming::ID_COLUMN;
use loam_rdb_core::{DataType, RdbResult};

use crate::db::{describe_columns, drop_table, exec, query_all, read_opt_text};

pub(crate) const EXTRA_TABLE_SUFFIX: &str = "__Extra";
const EXTRA_ID: &str = "id";
const RESOURCE_ID: &str = "resourceId";
const NAME: &str = "name";
const TYPE: &str = "type";
const VALUE: &str = "value";

pub(crate) const RESOURCE_ID_WIDTH: u32 = 64;
const NAME_WIDTH: u32 = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraValue {
    pub data_type: DataType,
    pub value: String,
}

impl ExtraValue {
    pub fn new(data_type: DataType, value: impl Into<String>) -> Self {
        Self {
            data_type,
            value: value.into(),
        }
    }
}

pub type ExtraValues = BTreeMap<String, ExtraValue>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Overflow table of one resource: values too large for their attribute column, keyed by
/// owning row and attribute name.
#[derive(Clone, Debug)]
pub struct ExtraValueStore {
    table: String,
    resource_table: String,
}

impl ExtraValueStore {
    pub fn new(resource_table: &str) -> Self {
        Self {
            table: format!("{resource_table}{EXTRA_TABLE_SUFFIX}"),
            resource_table: resource_table.to_string(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Creates the overflow table with its foreign key to the owning resource table.
    pub async fn ensure_table<C: ConnectionTrait>(&self, conn: &C) -> RdbResult<()> {
        let existed = !describe_columns(conn, &self.table).await?.is_empty();
        let create = Table::create()
            .table(Alias::new(&self.table))
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new(EXTRA_ID))
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(Alias::new(RESOURCE_ID))
                    .string_len(RESOURCE_ID_WIDTH)
                    .not_null(),
            )
            .col(ColumnDef::new(Alias::new(NAME)).string_len(NAME_WIDTH).not_null())
            .col(ColumnDef::new(Alias::new(TYPE)).string_len(16).not_null())
            .col(ColumnDef::new(Alias::new(VALUE)).text().not_null())
            .foreign_key(
                ForeignKey::create()
                    .name(format!("fk_{}_{RESOURCE_ID}", self.table))
                    .from(Alias::new(&self.table), Alias::new(RESOURCE_ID))
                    .to(Alias::new(&self.resource_table), Alias::new(ID_COLUMN))
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .to_owned();
        exec(conn, &create).await?;
        if existed {
            return Ok(());
        }
        let index = Index::create()
            .if_not_exists()
            .name(format!("uq_{}_{RESOURCE_ID}_{NAME}", self.table))
            .table(Alias::new(&self.table))
            .col(Alias::new(RESOURCE_ID))
            .col(Alias::new(NAME))
            .unique()
            .to_owned();
        exec(conn, &index).await?;
        Ok(())
    }

    pub async fn load<C: ConnectionTrait>(
        &self,
        conn: &C,
        resource_id: &str,
    ) -> RdbResult<ExtraValues> {
        let mut grouped = self.load_many(conn, &[resource_id.to_string()]).await?;
        Ok(grouped.remove(resource_id).unwrap_or_default())
    }

    pub async fn load_many<C: ConnectionTrait>(
        &self,
        conn: &C,
        resource_ids: &[String],
    ) -> RdbResult<HashMap<String, ExtraValues>> {
        let mut grouped: HashMap<String, ExtraValues> = HashMap::new();
        if resource_ids.is_empty() {
            return Ok(grouped);
        }
        let select = Query::select()
            .from(Alias::new(&self.table))
            .columns([
                Alias::new(RESOURCE_ID),
                Alias::new(NAME),
                Alias::new(TYPE),
                Alias::new(VALUE),
            ])
            .and_where(Expr::col(Alias::new(RESOURCE_ID)).is_in(resource_ids.iter().cloned()))
            .to_owned();
        for row in query_all(conn, &select).await? {
            let resource_id: String = row.try_get("", RESOURCE_ID)?;
            let name: String = row.try_get("", NAME)?;
            let code: String = row.try_get("", TYPE)?;
            let value = read_opt_text(&row, VALUE)?.unwrap_or_default();
            grouped
                .entry(resource_id)
                .or_default()
                .insert(name, ExtraValue::new(DataType::from_code(&code), value));
        }
        Ok(grouped)
    }

    /// Makes the stored overflow rows of `resource_id` match `desired` exactly.
    pub async fn reconcile<C: ConnectionTrait>(
        &self,
        conn: &C,
        resource_id: &str,
        desired: &ExtraValues,
    ) -> RdbResult<ReconcileReport> {
        let existing = self.load(conn, resource_id).await?;
        let mut report = ReconcileReport::default();

        let stale: Vec<String> = existing
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        if !stale.is_empty() {
            let delete = Query::delete()
                .from_table(Alias::new(&self.table))
                .and_where(Expr::col(Alias::new(RESOURCE_ID)).eq(resource_id))
                .and_where(Expr::col(Alias::new(NAME)).is_in(stale.iter().cloned()))
                .to_owned();
            exec(conn, &delete).await?;
            report.deleted = stale.len();
        }

        for (name, extra) in desired {
            match existing.get(name) {
                Some(current) if current == extra => {}
                Some(_) => {
                    let update = Query::update()
                        .table(Alias::new(&self.table))
                        .value(Alias::new(TYPE), extra.data_type.code())
                        .value(Alias::new(VALUE), extra.value.as_str())
                        .and_where(Expr::col(Alias::new(RESOURCE_ID)).eq(resource_id))
                        .and_where(Expr::col(Alias::new(NAME)).eq(name.as_str()))
                        .to_owned();
                    exec(conn, &update).await?;
                    report.updated += 1;
                }
                None => {
                    let insert = Query::insert()
                        .into_table(Alias::new(&self.table))
                        .columns([
                            Alias::new(RESOURCE_ID),
                            Alias::new(NAME),
                            Alias::new(TYPE),
                            Alias::new(VALUE),
                        ])
                        .values_panic([
                            resource_id.into(),
                            name.as_str().into(),
                            extra.data_type.code().into(),
                            extra.value.as_str().into(),
                        ])
                        .to_owned();
                    exec(conn, &insert).await?;
                    report.inserted += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn delete_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        resource_id: &str,
    ) -> RdbResult<u64> {
        let delete = Query::delete()
            .from_table(Alias::new(&self.table))
            .and_where(Expr::col(Alias::new(RESOURCE_ID)).eq(resource_id))
            .to_owned();
        exec(conn, &delete).await
    }

    pub async fn drop_table<C: ConnectionTrait>(&self, conn: &C) -> RdbResult<()> {
        drop_table(conn, &self.table).await
    }
}

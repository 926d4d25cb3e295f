use std::collections::HashSet;

use sea_orm::sea_query;
use sea_orm::sea_query::{Alias, ColumnDef, Table, Value as SeaValue};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement, StatementBuilder};
use sea_orm_migration::prelude::Iden;

use loam_rdb_core::{RdbError, RdbResult};

#[derive(Iden, Clone, Copy)]
pub enum RdbMeta {
    Table,
    Key,
    Type,
    Value,
}

pub(crate) fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> RdbResult<u64>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    let result = conn.execute(backend.build(stmt)).await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> RdbResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    let rows = conn.query_all(backend.build(stmt)).await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> RdbResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    let row = conn.query_one(backend.build(stmt)).await?;
    Ok(row)
}

/// Physical column names of `table`, empty when the table does not exist.
pub(crate) async fn describe_columns<C>(conn: &C, table: &str) -> RdbResult<HashSet<String>>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Postgres => {
            "SELECT column_name::text AS name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1"
        }
        DatabaseBackend::MySql => {
            "SELECT COLUMN_NAME AS name FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ?"
        }
        _ => "SELECT name FROM pragma_table_info(?)",
    };
    let rows = conn
        .query_all(Statement::from_sql_and_values(
            backend,
            sql,
            [SeaValue::from(table.to_string())],
        ))
        .await?;
    let mut columns = HashSet::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("", "name")?;
        columns.insert(name);
    }
    Ok(columns)
}

/// Adds a bounded text column unless it is already there. A failed `ALTER` is only reported
/// when the column is still missing afterwards, since a concurrent writer may have added it.
pub(crate) async fn add_text_column<C>(
    conn: &C,
    table: &str,
    column: &str,
    width: u32,
) -> RdbResult<bool>
where
    C: ConnectionTrait,
{
    if describe_columns(conn, table).await?.contains(column) {
        return Ok(false);
    }
    let alter = Table::alter()
        .table(Alias::new(table))
        .add_column(ColumnDef::new(Alias::new(column)).string_len(width).null())
        .to_owned();
    if let Err(err) = exec(conn, &alter).await {
        if describe_columns(conn, table).await?.contains(column) {
            log::debug!("column {table}.{column} appeared concurrently: {err}");
            return Ok(false);
        }
        return Err(err);
    }
    Ok(true)
}

pub(crate) async fn drop_table<C>(conn: &C, table: &str) -> RdbResult<()>
where
    C: ConnectionTrait,
{
    let drop = Table::drop()
        .table(Alias::new(table))
        .if_exists()
        .to_owned();
    exec(conn, &drop).await?;
    Ok(())
}

pub(crate) fn read_opt_text(row: &QueryResult, column: &str) -> RdbResult<Option<String>> {
    if let Ok(value) = row.try_get::<Option<String>>("", column) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>>("", column) {
        return Ok(value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()));
    }
    Err(RdbError::storage(format!("unreadable column '{column}'")))
}

pub(crate) fn read_i64(row: &QueryResult, column: &str) -> RdbResult<i64> {
    Ok(row.try_get::<i64>("", column)?)
}

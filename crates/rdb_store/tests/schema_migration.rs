use std::collections::HashSet;

use loam_rdb_store::{
    attributes_from_json, DataType, RdbConfig, RdbError, RdbResult, RdbStore, ResourceApi,
    SchemaConfig, TypeMap, Value,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use serde_json::json;
use tempfile::tempdir;

async fn physical_columns(store: &RdbStore, table: &str) -> RdbResult<HashSet<String>> {
    let rows = store
        .connection()
        .query_all(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT name FROM pragma_table_info(?)",
            [sea_orm::Value::from(table.to_string())],
        ))
        .await?;
    let mut columns = HashSet::new();
    for row in rows {
        columns.insert(row.try_get::<String>("", "name")?);
    }
    Ok(columns)
}

#[tokio::test]
async fn register_adds_escaped_columns_once() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = RdbStore::connect_sqlite(&dir.path().join("rdb.sqlite")).await?;
    let schema = store.schema("Thing").await?;

    let types: TypeMap = [
        ("a.b".to_string(), DataType::String),
        ("$price".to_string(), DataType::Number),
    ]
    .into_iter()
    .collect();
    let registered = schema.register_attributes(&types).await?;
    assert_eq!(registered.len(), 2);
    assert_eq!(registered["$price"].data_type, DataType::Number);
    let again = schema.register_attributes(&types).await?;
    assert_eq!(again, registered);

    let columns = physical_columns(&store, "Thing").await?;
    assert!(columns.contains("a\u{ff0e}b"));
    assert!(columns.contains("\u{ff04}price"));
    for fixed in ["id", "__at", "__num", "__attributeTypes"] {
        assert!(columns.contains(fixed), "missing {fixed}");
    }
    assert!(physical_columns(&store, "Thing__Extra").await?.contains("resourceId"));

    let created = store
        .create("Thing", attributes_from_json(json!({"a.b": "v", "$price": 12})))
        .await?;
    assert_eq!(created.get("a.b"), Some(&Value::from("v")));
    assert_eq!(created.get("$price"), Some(&Value::from(12)));
    Ok(())
}

#[tokio::test]
async fn rows_with_json_type_tags_still_load() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = RdbStore::connect_sqlite(&dir.path().join("rdb.sqlite")).await?;
    store
        .create("Thing", attributes_from_json(json!({"label": "new", "size": 1})))
        .await?;

    store
        .connection()
        .execute(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            r#"INSERT INTO "Thing" ("id", "__at", "__num", "__attributeTypes", "label", "size")
               VALUES (?, ?, ?, ?, ?, ?)"#,
            [
                sea_orm::Value::from("legacy1"),
                sea_orm::Value::from(0i64),
                sea_orm::Value::from(3i64),
                sea_orm::Value::from(r#"{"label":"STR","size":"NUM"}"#),
                sea_orm::Value::from("old"),
                sea_orm::Value::from("000000000000000000000042"),
            ],
        ))
        .await?;

    let legacy = store.one("Thing", "legacy1").await?.expect("legacy row");
    assert_eq!(legacy.get("label"), Some(&Value::from("old")));
    assert_eq!(legacy.get("size"), Some(&Value::from(42)));
    assert_eq!(legacy.num, 3);

    let updated = store
        .update("Thing", "legacy1", attributes_from_json(json!({"label": "renewed"})))
        .await?;
    assert_eq!(updated.get("size"), Some(&Value::from(42)));
    assert_eq!(updated.num, 4);

    let raw = store
        .connection()
        .query_one(Statement::from_string(
            DatabaseBackend::Sqlite,
            r#"SELECT "__attributeTypes" FROM "Thing" WHERE "id" = 'legacy1'"#,
        ))
        .await?
        .expect("row");
    let tags: String = raw.try_get("", "__attributeTypes")?;
    assert_eq!(tags, "label=STR&size=NUM");
    Ok(())
}

#[tokio::test]
async fn legacy_attribute_meta_seeds_the_registry() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("rdb.sqlite");
    {
        let store = RdbStore::connect_sqlite(&path).await?;
        store
            .meta()
            .set(
                "resource/Archive/attributes",
                &json!({"title": {"name": "title", "type": "string"}}),
            )
            .await?;
        store.meta().set("resource/resourceNames", &json!(["Archive"])).await?;
        store.close().await?;
    }

    let store = RdbStore::connect_sqlite(&path).await?;
    let attributes = store.attributes("Archive").await?;
    assert_eq!(attributes["title"].data_type, DataType::String);
    Ok(())
}

#[tokio::test]
async fn columns_that_never_appear_fail_after_bounded_retries() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let mut config = RdbConfig::default_sqlite("rdb.sqlite");
    config.schema = Some(SchemaConfig {
        migration_attempts: Some(2),
        migration_backoff_ms: Some(1),
        ..SchemaConfig::with_defaults()
    });
    let store = RdbStore::connect(&config, dir.path()).await?;
    let schema = store.schema("Ghost").await?;
    store
        .connection()
        .execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            r#"DROP TABLE "Ghost""#,
        ))
        .await?;

    let types: TypeMap = [("title".to_string(), DataType::String)].into_iter().collect();
    let err = schema
        .register_attributes(&types)
        .await
        .expect_err("column cannot be added");
    assert!(matches!(err, RdbError::Migration { .. }), "{err}");
    assert!(err.to_string().contains("after 2 attempts"), "{err}");
    assert!(err.to_string().contains("title"), "{err}");
    assert!(!schema.attributes().await.contains_key("title"));
    Ok(())
}

use loam_rdb_store::{
    attributes_from_json, ListCondition, RdbResult, RdbStore, ResourceApi, Value, EXTRA_SENTINEL,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use serde_json::json;
use tempfile::tempdir;

async fn overflow_names(store: &RdbStore, resource: &str, id: &str) -> RdbResult<Vec<String>> {
    let schema = store.schema(resource).await?;
    let extras = schema.extra().load(store.connection(), id).await?;
    Ok(extras.into_keys().collect())
}

#[tokio::test]
async fn large_values_roundtrip_through_overflow() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = RdbStore::connect_sqlite(&dir.path().join("rdb.sqlite")).await?;
    let body = "x".repeat(600);
    let created = store
        .create(
            "Doc",
            attributes_from_json(json!({"body": body, "title": "short"})),
        )
        .await?;
    assert_eq!(created.get("body"), Some(&Value::from(body.as_str())));
    assert_eq!(created.get("title"), Some(&Value::from("short")));
    assert_eq!(overflow_names(&store, "Doc", &created.id).await?, vec!["body"]);

    let raw = store
        .connection()
        .query_one(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            r#"SELECT "body" FROM "Doc" WHERE "id" = ?"#,
            [sea_orm::Value::from(created.id.clone())],
        ))
        .await?
        .expect("raw row");
    let stored: String = raw.try_get("", "body")?;
    assert_eq!(stored, EXTRA_SENTINEL);

    let listed = store.list("Doc", ListCondition::default()).await?;
    assert_eq!(listed.entities[0].get("body"), Some(&Value::from(body.as_str())));
    Ok(())
}

#[tokio::test]
async fn sentinel_text_is_kept_as_a_value() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = RdbStore::connect_sqlite(&dir.path().join("rdb.sqlite")).await?;
    let created = store
        .create("Doc", attributes_from_json(json!({"note": EXTRA_SENTINEL})))
        .await?;
    assert_eq!(created.get("note"), Some(&Value::from(EXTRA_SENTINEL)));
    assert_eq!(overflow_names(&store, "Doc", &created.id).await?, vec!["note"]);

    let updated = store
        .update("Doc", &created.id, attributes_from_json(json!({"note": "plain"})))
        .await?;
    assert_eq!(updated.get("note"), Some(&Value::from("plain")));
    assert!(overflow_names(&store, "Doc", &created.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn threshold_is_inclusive() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = RdbStore::connect_sqlite(&dir.path().join("rdb.sqlite")).await?;
    let below = store
        .create("Doc", attributes_from_json(json!({"body": "y".repeat(511)})))
        .await?;
    let at = store
        .create("Doc", attributes_from_json(json!({"body": "y".repeat(512)})))
        .await?;
    assert!(overflow_names(&store, "Doc", &below.id).await?.is_empty());
    assert_eq!(overflow_names(&store, "Doc", &at.id).await?, vec!["body"]);
    Ok(())
}

#[tokio::test]
async fn shrinking_or_clearing_prunes_overflow_rows() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = RdbStore::connect_sqlite(&dir.path().join("rdb.sqlite")).await?;
    let big = "z".repeat(700);
    let created = store
        .create("Doc", attributes_from_json(json!({"body": big, "note": big})))
        .await?;
    assert_eq!(
        overflow_names(&store, "Doc", &created.id).await?.len(),
        2
    );

    let updated = store
        .update("Doc", &created.id, attributes_from_json(json!({"body": "small"})))
        .await?;
    assert_eq!(updated.get("body"), Some(&Value::from("small")));
    assert_eq!(updated.get("note"), Some(&Value::from(big.as_str())));
    assert_eq!(overflow_names(&store, "Doc", &created.id).await?, vec!["note"]);

    let cleared = store
        .update("Doc", &created.id, attributes_from_json(json!({"note": null})))
        .await?;
    assert_eq!(cleared.get("note"), Some(&Value::Null));
    assert!(overflow_names(&store, "Doc", &created.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn large_objects_keep_their_structure() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = RdbStore::connect_sqlite(&dir.path().join("rdb.sqlite")).await?;
    let items: Vec<String> = (0..100).map(|index| format!("item-{index}")).collect();
    let payload = json!({"items": items, "nested": {"ok": true}});
    let created = store
        .create("Doc", attributes_from_json(json!({"payload": payload.clone()})))
        .await?;
    let read = store.one("Doc", &created.id).await?.expect("row");
    assert_eq!(read.get("payload"), Some(&Value::Object(payload)));
    Ok(())
}

#[tokio::test]
async fn destroy_removes_overflow_rows() -> RdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = RdbStore::connect_sqlite(&dir.path().join("rdb.sqlite")).await?;
    let created = store
        .create("Doc", attributes_from_json(json!({"body": "w".repeat(900)})))
        .await?;
    assert_eq!(store.destroy("Doc", &created.id).await?, 1);
    assert!(overflow_names(&store, "Doc", &created.id).await?.is_empty());
    Ok(())
}

use std::fmt;
use std::str::FromStr;

use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::DatabaseConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Number, Value as JsonValue};

use loam_rdb_core::{RdbError, RdbResult};

use crate::db::{col_name, exec, query_one, RdbMeta};

pub const DRIVER_IDENTITY_KEY: &str = "driver";
pub const DRIVER_IDENTITY: &str = "loam-rdb";
pub const RESOURCE_NAMES_KEY: &str = "resource/resourceNames";

pub fn attribute_names_key(resource: &str) -> String {
    format!("resource/{resource}/attributeNames")
}

pub fn attribute_types_key(resource: &str) -> String {
    format!("resource/{resource}/attributeTypes")
}

/// Combined `{name: {name, type}}` map written by older builds. Read on load, never written.
pub fn legacy_attributes_key(resource: &str) -> String {
    format!("resource/{resource}/attributes")
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetaType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl MetaType {
    pub fn of(value: &JsonValue) -> Self {
        match value {
            JsonValue::String(_) => MetaType::String,
            JsonValue::Number(_) => MetaType::Number,
            JsonValue::Bool(_) => MetaType::Boolean,
            JsonValue::Array(_) => MetaType::Array,
            JsonValue::Object(_) => MetaType::Object,
            JsonValue::Null => MetaType::Null,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            MetaType::String => "string",
            MetaType::Number => "number",
            MetaType::Boolean => "boolean",
            MetaType::Array => "array",
            MetaType::Object => "object",
            MetaType::Null => "null",
        }
    }

    pub fn from_tag(tag: &str) -> RdbResult<Self> {
        match tag {
            "string" => Ok(MetaType::String),
            "number" => Ok(MetaType::Number),
            "boolean" => Ok(MetaType::Boolean),
            "array" => Ok(MetaType::Array),
            "object" => Ok(MetaType::Object),
            "null" => Ok(MetaType::Null),
            other => Err(RdbError::storage(format!("unknown meta type '{other}'"))),
        }
    }

    fn compatible_with(self, other: MetaType) -> bool {
        self == other || self == MetaType::Null || other == MetaType::Null
    }
}

impl fmt::Display for MetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Typed key/value entries in the shared `rdb_meta` table.
#[derive(Clone)]
pub struct MetaStore {
    conn: DatabaseConnection,
}

impl MetaStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, key: &str) -> RdbResult<Option<JsonValue>> {
        let Some((meta_type, raw)) = self.read(key).await? else {
            return Ok(None);
        };
        decode(key, meta_type, &raw).map(Some)
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> RdbResult<Option<T>> {
        match self.get(key).await? {
            Some(JsonValue::Null) | None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| RdbError::storage(format!("meta entry '{key}': {err}"))),
        }
    }

    /// Creates or updates `key`. Changing the recorded type of an existing entry is refused.
    pub async fn set(&self, key: &str, value: &JsonValue) -> RdbResult<()> {
        let meta_type = MetaType::of(value);
        if let Some((current, _)) = self.read(key).await? {
            if !current.compatible_with(meta_type) {
                return Err(RdbError::conflict(format!(
                    "meta entry '{key}' holds {current}, refusing to store {meta_type}"
                )));
            }
        }
        let insert = Query::insert()
            .into_table(RdbMeta::Table)
            .columns([RdbMeta::Key, RdbMeta::Type, RdbMeta::Value])
            .values_panic([
                key.into(),
                meta_type.tag().into(),
                encode(value).into(),
            ])
            .on_conflict(
                OnConflict::column(RdbMeta::Key)
                    .update_columns([RdbMeta::Type, RdbMeta::Value])
                    .to_owned(),
            )
            .to_owned();
        exec(&self.conn, &insert).await?;
        Ok(())
    }

    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T) -> RdbResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|err| RdbError::invalid(format!("meta entry '{key}': {err}")))?;
        self.set(key, &value).await
    }

    /// Asserts `key` holds `expected`, writing it when the entry does not exist yet.
    pub async fn ensure(&self, key: &str, expected: &JsonValue) -> RdbResult<()> {
        match self.get(key).await? {
            None => self.set(key, expected).await,
            Some(current) if &current == expected => Ok(()),
            Some(current) => Err(RdbError::conflict(format!(
                "expects {expected} on '{key}', but found {current}"
            ))),
        }
    }

    pub async fn delete(&self, key: &str) -> RdbResult<u64> {
        let delete = Query::delete()
            .from_table(RdbMeta::Table)
            .and_where(Expr::col(RdbMeta::Key).eq(key))
            .to_owned();
        exec(&self.conn, &delete).await
    }

    async fn read(&self, key: &str) -> RdbResult<Option<(MetaType, String)>> {
        let select = Query::select()
            .from(RdbMeta::Table)
            .columns([RdbMeta::Type, RdbMeta::Value])
            .and_where(Expr::col(RdbMeta::Key).eq(key))
            .limit(1)
            .to_owned();
        let Some(row) = query_one(&self.conn, &select).await? else {
            return Ok(None);
        };
        let tag: String = row.try_get("", &col_name(RdbMeta::Type))?;
        let raw: String = row.try_get("", &col_name(RdbMeta::Value))?;
        Ok(Some((MetaType::from_tag(&tag)?, raw)))
    }
}

fn encode(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn decode(key: &str, meta_type: MetaType, raw: &str) -> RdbResult<JsonValue> {
    let corrupt = || RdbError::storage(format!("meta entry '{key}' is not a valid {meta_type}"));
    match meta_type {
        MetaType::String => Ok(JsonValue::String(raw.to_string())),
        MetaType::Number => Number::from_str(raw)
            .map(JsonValue::Number)
            .map_err(|_| corrupt()),
        MetaType::Boolean => match raw {
            "true" => Ok(JsonValue::Bool(true)),
            "false" => Ok(JsonValue::Bool(false)),
            _ => Err(corrupt()),
        },
        MetaType::Array | MetaType::Object => {
            let parsed: JsonValue = serde_json::from_str(raw).map_err(|_| corrupt())?;
            if MetaType::of(&parsed) == meta_type {
                Ok(parsed)
            } else {
                Err(corrupt())
            }
        }
        MetaType::Null => Ok(JsonValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode, encode, MetaType};

    #[test]
    fn tags_roundtrip_values_exactly() {
        for value in [
            json!("123"),
            json!(123),
            json!(1.5),
            json!(true),
            json!(["a", "b"]),
            json!({"a": {"type": "STR"}}),
            json!(null),
        ] {
            let meta_type = MetaType::of(&value);
            let decoded = decode("k", meta_type, &encode(&value)).expect("decode");
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn string_and_number_stay_distinct() {
        assert_eq!(encode(&json!("123")), encode(&json!(123)));
        assert_eq!(
            decode("k", MetaType::String, "123").expect("string"),
            json!("123")
        );
        assert_eq!(decode("k", MetaType::Number, "123").expect("number"), json!(123));
    }

    #[test]
    fn corrupt_entries_are_reported() {
        assert!(decode("k", MetaType::Number, "abc").is_err());
        assert!(decode("k", MetaType::Array, "{}").is_err());
        assert!(MetaType::from_tag("blob").is_err());
    }
}

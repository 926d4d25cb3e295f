use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::naming::{AS_ATTRIBUTE, AT_ATTRIBUTE, ID_COLUMN, NUM_ATTRIBUTE};
use crate::{DataType, RdbResult, Value};

pub type Attributes = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

pub type AttributeRegistry = BTreeMap<String, AttributeDescriptor>;

/// A stored entity as returned by reads.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub resource: String,
    pub id: String,
    pub at: OffsetDateTime,
    pub num: i64,
    pub attributes: Attributes,
}

impl Entity {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

impl Serialize for Entity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.attributes.len() + 4))?;
        map.serialize_entry(AS_ATTRIBUTE, &self.resource)?;
        map.serialize_entry(AT_ATTRIBUTE, &Value::Date(self.at))?;
        map.serialize_entry(NUM_ATTRIBUTE, &self.num)?;
        map.serialize_entry(ID_COLUMN, &self.id)?;
        for (name, value) in &self.attributes {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Sort expression: `"name"`, `"-name"`, comma-joined lists of either, or several of those.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SortInput")]
pub struct Sort(pub Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum SortInput {
    One(String),
    Many(Vec<String>),
}

impl From<SortInput> for Sort {
    fn from(value: SortInput) -> Self {
        match value {
            SortInput::One(token) => Sort(vec![token]),
            SortInput::Many(tokens) => Sort(tokens),
        }
    }
}

impl From<&str> for Sort {
    fn from(value: &str) -> Self {
        Sort(vec![value.to_string()])
    }
}

impl From<Vec<&str>> for Sort {
    fn from(value: Vec<&str>) -> Self {
        Sort(value.into_iter().map(str::to_string).collect())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListCondition {
    #[serde(default)]
    pub filter: JsonValue,
    #[serde(default)]
    pub sort: Sort,
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
}

impl ListCondition {
    pub fn filtered(filter: JsonValue) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sorted(sort: impl Into<Sort>) -> Self {
        Self {
            sort: sort.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListResult {
    pub entities: Vec<Entity>,
    pub offset: u64,
    pub limit: Option<u64>,
    pub length: usize,
    pub total: u64,
}

#[async_trait]
pub trait ResourceApi {
    async fn create(&self, resource: &str, attributes: Attributes) -> RdbResult<Entity>;
    async fn one(&self, resource: &str, id: &str) -> RdbResult<Option<Entity>>;
    async fn update(&self, resource: &str, id: &str, attributes: Attributes) -> RdbResult<Entity>;
    async fn destroy(&self, resource: &str, id: &str) -> RdbResult<u64>;
    async fn list(&self, resource: &str, condition: ListCondition) -> RdbResult<ListResult>;
    async fn drop_resource(&self, resource: &str) -> RdbResult<()>;
    async fn resources(&self) -> RdbResult<Vec<String>>;
    async fn attributes(&self, resource: &str) -> RdbResult<AttributeRegistry>;
}

/// Builds an attribute map from a JSON object, ignoring anything that is not an object.
pub fn attributes_from_json(json: JsonValue) -> Attributes {
    match json {
        JsonValue::Object(map) => map
            .into_iter()
            .map(|(name, value)| (name, Value::from_json(value)))
            .collect(),
        _ => Attributes::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::OffsetDateTime;

    use super::{attributes_from_json, Entity, ListCondition, Sort};
    use crate::Value;

    #[test]
    fn entity_serializes_with_meta_attributes() {
        let entity = Entity {
            resource: "User".to_string(),
            id: "u1".to_string(),
            at: OffsetDateTime::UNIX_EPOCH,
            num: 2,
            attributes: attributes_from_json(json!({"name": "alpha", "age": null})),
        };
        let json = entity.to_json();
        assert_eq!(json["$$as"], "User");
        assert_eq!(json["$$num"], 2);
        assert_eq!(json["$$at"], "1970-01-01T00:00:00Z");
        assert_eq!(json["id"], "u1");
        assert_eq!(json["name"], "alpha");
        assert!(json["age"].is_null());
        assert_eq!(entity.get("name"), Some(&Value::from("alpha")));
    }

    #[test]
    fn list_condition_accepts_sort_string_or_list() {
        let condition: ListCondition =
            serde_json::from_value(json!({"sort": "-age,name"})).expect("string sort");
        assert_eq!(condition.sort, Sort(vec!["-age,name".to_string()]));
        let condition: ListCondition =
            serde_json::from_value(json!({"sort": ["-age", "name"], "limit": 5}))
                .expect("list sort");
        assert_eq!(condition.sort, Sort::from(vec!["-age", "name"]));
        assert_eq!(condition.limit, Some(5));
        assert!(condition.filter.is_null());
    }
}

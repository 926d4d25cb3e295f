use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::{RdbError, RdbResult};

/// Recorded type of an attribute value.
///
/// Stored on disk by its short code (`STR`, `NUM`, ...). Codes this build does not know are kept
/// verbatim in [`DataType::Unknown`] so rows written by newer writers still load.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum DataType {
    String,
    Boolean,
    Number,
    Ref,
    Entity,
    Date,
    Object,
    Id,
    Null,
    Unknown(String),
}

impl DataType {
    pub fn code(&self) -> &str {
        match self {
            DataType::String => "STR",
            DataType::Boolean => "BOOL",
            DataType::Number => "NUM",
            DataType::Ref => "REF",
            DataType::Entity => "ENT",
            DataType::Date => "DATE",
            DataType::Object => "OBJ",
            DataType::Id => "ID",
            DataType::Null => "NUL",
            DataType::Unknown(code) => code.as_str(),
        }
    }

    /// Resolves a short code, falling back to the long lowercase names older writers used.
    pub fn from_code(code: &str) -> Self {
        match code {
            "STR" | "string" => DataType::String,
            "BOOL" | "boolean" => DataType::Boolean,
            "NUM" | "number" => DataType::Number,
            "REF" | "ref" => DataType::Ref,
            "ENT" | "entity" => DataType::Entity,
            "DATE" | "date" => DataType::Date,
            "OBJ" | "object" => DataType::Object,
            "ID" | "id" => DataType::Id,
            "NUL" | "null" => DataType::Null,
            other => DataType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        Ok(DataType::from_code(&code))
    }
}

/// Cross-resource reference, rendered as `<ResourceName>#<id>`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ResourceRef {
    pub resource: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.id)
    }
}

impl FromStr for ResourceRef {
    type Err = RdbError;

    fn from_str(value: &str) -> RdbResult<Self> {
        match value.rsplit_once('#') {
            Some((resource, id)) if !resource.is_empty() && !id.is_empty() => {
                Ok(ResourceRef::new(resource, id))
            }
            _ => Err(RdbError::invalid(format!("invalid reference '{value}'"))),
        }
    }
}

/// Attribute value as seen by callers of the driver.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Stored as epoch milliseconds. Build through `Value::from` to drop the sub-millisecond
    /// part up front; otherwise it is lost on the first write.
    Date(OffsetDateTime),
    Ref(ResourceRef),
    Object(JsonValue),
}

impl Value {
    pub fn detect_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Boolean,
            Value::Number(_) => DataType::Number,
            Value::String(_) => DataType::String,
            Value::Date(_) => DataType::Date,
            Value::Ref(_) => DataType::Ref,
            Value::Object(json) if entity_ref_of(json).is_some() => DataType::Entity,
            Value::Object(_) => DataType::Object,
        }
    }

    /// Maps a JSON document into a value. `{"$ref": "A#1"}` becomes a reference; arrays and
    /// other objects stay structured.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(value) => Value::Bool(value),
            JsonValue::Number(value) => Value::Number(value),
            JsonValue::String(value) => Value::String(value),
            JsonValue::Object(map) => match ref_shorthand(&map) {
                Some(reference) => Value::Ref(reference),
                None => Value::Object(JsonValue::Object(map)),
            },
            array @ JsonValue::Array(_) => Value::Object(array),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(value) => JsonValue::Bool(*value),
            Value::Number(value) => JsonValue::Number(value.clone()),
            Value::String(value) => JsonValue::String(value.clone()),
            Value::Date(value) => match value.format(&Rfc3339) {
                Ok(text) => JsonValue::String(text),
                Err(_) => JsonValue::from(epoch_millis(value)),
            },
            Value::Ref(reference) => {
                let mut map = JsonMap::new();
                map.insert("$ref".to_string(), JsonValue::String(reference.to_string()));
                JsonValue::Object(map)
            }
            Value::Object(value) => value.clone(),
        }
    }

    /// Plain textual form used when a value has to be stored under a type it does not carry.
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(value) => value.to_string(),
            Value::Number(value) => value.to_string(),
            Value::String(value) => value.clone(),
            Value::Date(_) => match self.to_json() {
                JsonValue::String(text) => text,
                other => other.to_string(),
            },
            Value::Ref(reference) => reference.to_string(),
            Value::Object(value) => value.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Reads the `$$as`/`id` pair of an embedded entity document.
pub fn entity_ref_of(json: &JsonValue) -> Option<ResourceRef> {
    let map = json.as_object()?;
    let resource = map.get("$$as")?.as_str()?;
    let id = match map.get("id")? {
        JsonValue::String(id) => id.clone(),
        JsonValue::Number(id) => id.to_string(),
        _ => return None,
    };
    Some(ResourceRef::new(resource, id))
}

/// `{"$ref": "Resource#id"}` with no other keys.
pub fn ref_shorthand(map: &JsonMap<String, JsonValue>) -> Option<ResourceRef> {
    if map.len() != 1 {
        return None;
    }
    map.get("$ref")?.as_str()?.parse().ok()
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Value::from_json(JsonValue::deserialize(deserializer)?))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Number::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(Number::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Number(Number::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        let truncated = value
            .replace_nanosecond(u32::from(value.millisecond()) * 1_000_000)
            .unwrap_or(value);
        Value::Date(truncated)
    }
}

fn epoch_millis(value: &OffsetDateTime) -> i64 {
    (value.unix_timestamp_nanos() / 1_000_000) as i64
}

impl From<ResourceRef> for Value {
    fn from(value: ResourceRef) -> Self {
        Value::Ref(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::{OffsetDateTime, UtcOffset};

    use super::{DataType, ResourceRef, Value};

    #[test]
    fn detects_types_from_values() {
        assert_eq!(Value::Null.detect_type(), DataType::Null);
        assert_eq!(Value::from(true).detect_type(), DataType::Boolean);
        assert_eq!(Value::from(12).detect_type(), DataType::Number);
        assert_eq!(Value::from("x").detect_type(), DataType::String);
        assert_eq!(
            Value::from(ResourceRef::new("User", "1")).detect_type(),
            DataType::Ref
        );
        assert_eq!(
            Value::Object(json!({"$$as": "User", "id": "u1", "name": "a"})).detect_type(),
            DataType::Entity
        );
        assert_eq!(Value::Object(json!([1, 2])).detect_type(), DataType::Object);
    }

    #[test]
    fn ref_shorthand_parses_from_json() {
        let value = Value::from_json(json!({"$ref": "Org#o-1"}));
        assert_eq!(value, Value::Ref(ResourceRef::new("Org", "o-1")));
        assert_eq!(value.to_json(), json!({"$ref": "Org#o-1"}));
    }

    #[test]
    fn unknown_codes_pass_through() {
        let data_type = DataType::from_code("VEC");
        assert_eq!(data_type, DataType::Unknown("VEC".to_string()));
        assert_eq!(data_type.code(), "VEC");
        assert_eq!(DataType::from_code("number"), DataType::Number);
    }

    #[test]
    fn dates_fall_back_to_epoch_millis() {
        let offset = UtcOffset::from_hms(1, 0, 30).expect("offset");
        let date = OffsetDateTime::from_unix_timestamp_nanos(1_500_250_000_000)
            .expect("date")
            .to_offset(offset);
        assert_eq!(Value::Date(date).to_json(), json!(1_500_250));

        let utc = OffsetDateTime::from_unix_timestamp(0).expect("epoch");
        assert_eq!(Value::Date(utc).to_json(), json!("1970-01-01T00:00:00Z"));
    }

    #[test]
    fn dates_are_truncated_to_milliseconds() {
        let precise = OffsetDateTime::from_unix_timestamp_nanos(1_000_999_999).expect("date");
        let Value::Date(date) = Value::from(precise) else {
            panic!("not a date");
        };
        assert_eq!(date.unix_timestamp_nanos(), 1_000_000_000);
    }

    #[test]
    fn rejects_malformed_references() {
        assert!("no-hash".parse::<ResourceRef>().is_err());
        assert!("#id".parse::<ResourceRef>().is_err());
        let parsed: ResourceRef = "a.b#c#d".parse().expect("ref");
        assert_eq!(parsed.resource, "a.b#c");
        assert_eq!(parsed.id, "d");
    }
}

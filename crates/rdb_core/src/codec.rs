//! Column encoding of attribute values.
//!
//! Everything lands in a text column. Numbers and dates are zero padded to [`PADDED_WIDTH`]
//! characters so the backend's string ordering follows value ordering for non-negative input.
//! `STRING` and `OBJECT` text is byte encoded: every UTF-8 byte becomes one code point, so the
//! column only ever holds code points below 256. Reads re-pack the bytes and keep the raw text
//! when that fails, which covers text written by tools that store plain UTF-8.

use std::str::FromStr;

use serde_json::{Number, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::value::entity_ref_of;
use crate::{DataType, RdbError, RdbResult, ResourceRef, Value};

pub const PADDED_WIDTH: usize = 24;

const NANOS_PER_MILLI: i128 = 1_000_000;

pub fn serialize(value: &Value, data_type: &DataType) -> RdbResult<String> {
    match data_type {
        DataType::Ref => Ok(match value {
            Value::Ref(reference) => reference.to_string(),
            other => other.to_plain_string(),
        }),
        DataType::Entity => Ok(match value {
            Value::Ref(reference) => reference.to_string(),
            Value::Object(json) => match entity_ref_of(json) {
                Some(reference) => reference.to_string(),
                None => json.to_string(),
            },
            other => other.to_plain_string(),
        }),
        DataType::Date => pad(&date_millis(value)?.to_string()),
        DataType::Number => pad(&value.to_plain_string()),
        DataType::Object => serde_json::to_string(&value.to_json())
            .map(|json| encode_text(&json))
            .map_err(|err| RdbError::invalid(err.to_string())),
        DataType::String => Ok(encode_text(&value.to_plain_string())),
        DataType::Id
        | DataType::Boolean
        | DataType::Null
        | DataType::Unknown(_) => Ok(value.to_plain_string()),
    }
}

/// Serializes a value that may be a list. Lists are encoded element by element unless the
/// target type is `OBJECT`, which always encodes atomically.
pub fn serialize_elements(value: &Value, data_type: &DataType) -> RdbResult<Vec<String>> {
    match (value, data_type) {
        (Value::Object(JsonValue::Array(items)), data_type) if *data_type != DataType::Object => {
            items
                .iter()
                .map(|item| serialize(&Value::from_json(item.clone()), data_type))
                .collect()
        }
        (value, data_type) => Ok(vec![serialize(value, data_type)?]),
    }
}

pub fn deserialize(raw: &str, data_type: &DataType) -> RdbResult<Value> {
    match data_type {
        DataType::Id => Ok(Value::String(raw.to_string())),
        DataType::String => Ok(Value::String(
            decode_text(raw).unwrap_or_else(|| raw.to_string()),
        )),
        DataType::Ref | DataType::Entity => raw
            .parse::<ResourceRef>()
            .map(Value::Ref)
            .map_err(|_| RdbError::deserialize(raw, data_type)),
        DataType::Date => {
            let millis = i128::from_str(strip_padding(raw).as_str())
                .map_err(|_| RdbError::deserialize(raw, data_type))?;
            OffsetDateTime::from_unix_timestamp_nanos(millis * NANOS_PER_MILLI)
                .map(Value::Date)
                .map_err(|_| RdbError::deserialize(raw, data_type))
        }
        DataType::Number => Number::from_str(strip_padding(raw).as_str())
            .map(Value::Number)
            .map_err(|_| RdbError::deserialize(raw, data_type)),
        DataType::Object => {
            let decoded = decode_text(raw)
                .and_then(|text| serde_json::from_str::<JsonValue>(&text).ok());
            match decoded {
                Some(json) => Ok(Value::Object(json)),
                None => serde_json::from_str::<JsonValue>(raw)
                    .map(Value::Object)
                    .map_err(|_| RdbError::deserialize(raw, data_type)),
            }
        }
        DataType::Boolean => match raw {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(RdbError::deserialize(raw, data_type)),
        },
        DataType::Null => Ok(Value::Null),
        DataType::Unknown(_) => Ok(Value::String(raw.to_string())),
    }
}

/// Byte length of a serialized value, which is what the column width bounds.
pub fn encoded_len(serialized: &str) -> usize {
    serialized.len()
}

fn pad(raw: &str) -> RdbResult<String> {
    if raw.len() > PADDED_WIDTH {
        return Err(RdbError::out_of_range(format!(
            "'{raw}' does not fit in {PADDED_WIDTH} characters"
        )));
    }
    Ok(format!("{raw:0>PADDED_WIDTH$}"))
}

fn strip_padding(raw: &str) -> String {
    let stripped = raw.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else if stripped.starts_with('.') {
        format!("0{stripped}")
    } else {
        stripped.to_string()
    }
}

/// Epoch milliseconds of a date given as a date, an integer or an RFC 3339 string.
pub fn date_millis(value: &Value) -> RdbResult<i128> {
    match value {
        Value::Date(date) => Ok(date.unix_timestamp_nanos() / NANOS_PER_MILLI),
        Value::Number(number) => number
            .as_i64()
            .map(i128::from)
            .or_else(|| number.as_f64().map(|millis| millis.trunc() as i128))
            .ok_or_else(|| RdbError::invalid(format!("invalid date '{number}'"))),
        Value::String(text) => OffsetDateTime::parse(text, &Rfc3339)
            .map(|date| date.unix_timestamp_nanos() / NANOS_PER_MILLI)
            .or_else(|_| i128::from_str(text))
            .map_err(|_| RdbError::invalid(format!("invalid date '{text}'"))),
        other => Err(RdbError::invalid(format!(
            "cannot encode {} as date",
            other.to_plain_string()
        ))),
    }
}

/// Byte encoding of `STRING`/`OBJECT` text. ASCII is unchanged.
pub fn encode_text(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }
    text.bytes().map(char::from).collect()
}

/// Inverse of [`encode_text`]. `None` when `raw` holds a code point above 255 or the bytes
/// are not UTF-8.
fn decode_text(raw: &str) -> Option<String> {
    if raw.is_ascii() {
        return Some(raw.to_string());
    }
    let bytes = raw
        .chars()
        .map(|ch| u8::try_from(u32::from(ch)).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

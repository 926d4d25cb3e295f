//! Encoding of the per-row attribute type map.
//!
//! Current rows store `name=CODE&name=CODE` with `%`, `&` and `=` percent-escaped inside names.
//! Rows from older writers hold a JSON object instead; the first character tells them apart.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::{DataType, RdbError, RdbResult};

pub type TypeMap = BTreeMap<String, DataType>;

enum TypeTagFormat<'a> {
    Empty,
    LegacyJson(&'a str),
    Compact(&'a str),
}

impl<'a> TypeTagFormat<'a> {
    fn sniff(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        match trimmed.chars().next() {
            None => TypeTagFormat::Empty,
            Some('{') => TypeTagFormat::LegacyJson(trimmed),
            Some(_) => TypeTagFormat::Compact(trimmed),
        }
    }
}

pub fn encode_type_map(types: &TypeMap) -> String {
    types
        .iter()
        .map(|(name, data_type)| format!("{}={}", escape(name), escape(data_type.code())))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn decode_type_map(raw: &str) -> RdbResult<TypeMap> {
    match TypeTagFormat::sniff(raw) {
        TypeTagFormat::Empty => Ok(TypeMap::new()),
        TypeTagFormat::LegacyJson(text) => decode_legacy(text),
        TypeTagFormat::Compact(text) => decode_compact(text),
    }
}

fn decode_legacy(text: &str) -> RdbResult<TypeMap> {
    let parsed: BTreeMap<String, JsonValue> = serde_json::from_str(text)
        .map_err(|err| RdbError::invalid(format!("invalid attribute types '{text}': {err}")))?;
    Ok(parsed
        .into_iter()
        .filter_map(|(name, code)| {
            code.as_str()
                .map(|code| (name, DataType::from_code(code)))
        })
        .collect())
}

fn decode_compact(text: &str) -> RdbResult<TypeMap> {
    let mut types = TypeMap::new();
    for pair in text.split('&').filter(|pair| !pair.is_empty()) {
        let (name, code) = pair
            .split_once('=')
            .ok_or_else(|| RdbError::invalid(format!("invalid attribute type entry '{pair}'")))?;
        types.insert(unescape(name)?, DataType::from_code(&unescape(code)?));
    }
    Ok(types)
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            '&' => escaped.push_str("%26"),
            '=' => escaped.push_str("%3D"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape(value: &str) -> RdbResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(index) = rest.find('%') {
        out.push_str(&rest[..index]);
        let code = rest
            .get(index + 1..index + 3)
            .ok_or_else(|| RdbError::invalid(format!("truncated escape in '{value}'")))?;
        let byte = u8::from_str_radix(code, 16)
            .map_err(|_| RdbError::invalid(format!("invalid escape '%{code}' in '{value}'")))?;
        out.push(char::from(byte));
        rest = &rest[index + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

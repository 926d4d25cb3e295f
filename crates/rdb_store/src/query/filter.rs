use sea_orm::sea_query::{Alias, Condition, Expr, SimpleExpr, Value as SeaValue};
use serde_json::{Map as JsonMap, Value as JsonValue};

use loam_rdb_core::codec;
use loam_rdb_core::naming::ID_COLUMN;
use loam_rdb_core::value::ref_shorthand;
use loam_rdb_core::{AttributeRegistry, RdbError, RdbResult, Value};

use super::{known_names, Target};

/// Id no row can carry. Comparing against it turns a predicate into "matches nothing".
pub const INVALID_FILTER_CONDITION_ID: &str = "____theInvalidFilterConditionID";

const OR: &str = "$or";
const AND: &str = "$and";

/// Translates the filter DSL of one resource into a sea-query [`Condition`].
///
/// Unknown attribute names and operators never fail the query; they become a predicate that
/// matches nothing and are reported through `log::warn!`.
pub struct FilterTranslator<'a> {
    resource: &'a str,
    registry: &'a AttributeRegistry,
}

impl<'a> FilterTranslator<'a> {
    pub fn new(resource: &'a str, registry: &'a AttributeRegistry) -> Self {
        Self { resource, registry }
    }

    pub fn translate(&self, filter: &JsonValue) -> RdbResult<Condition> {
        match filter {
            JsonValue::Null => Ok(Condition::all()),
            JsonValue::Array(filters) if filters.is_empty() => Ok(Condition::all()),
            JsonValue::Array(filters) => self.any_of(filters),
            JsonValue::Object(map) => self.translate_object(map),
            other => Err(RdbError::invalid(format!(
                "filter for {} must be an object or a list, got {other}",
                self.resource
            ))),
        }
    }

    fn translate_object(&self, map: &JsonMap<String, JsonValue>) -> RdbResult<Condition> {
        let mut all = Condition::all();
        for (key, value) in map {
            all = match key.as_str() {
                OR => all.add(self.any_of(filter_list(OR, value)?)?),
                AND => {
                    for filter in filter_list(AND, value)? {
                        all = all.add(self.translate(filter)?);
                    }
                    all
                }
                name => all.add(self.translate_attribute(name, value)?),
            };
        }
        Ok(all)
    }

    fn any_of(&self, filters: &[JsonValue]) -> RdbResult<Condition> {
        let mut any = Condition::any();
        for filter in filters {
            any = any.add(self.translate(filter)?);
        }
        Ok(any)
    }

    fn translate_attribute(&self, name: &str, value: &JsonValue) -> RdbResult<Condition> {
        let Some(target) = Target::resolve(name, self.registry) else {
            self.warn(format_args!("Unknown filter \"{name}\" for {}", self.resource));
            return Ok(never_match());
        };
        match value {
            JsonValue::Array(items) => {
                let mut any = Condition::any();
                for item in items {
                    any = any.add(self.translate_value(&target, item)?);
                }
                Ok(any)
            }
            other => self.translate_value(&target, other),
        }
    }

    fn translate_value(&self, target: &Target, value: &JsonValue) -> RdbResult<Condition> {
        match value {
            JsonValue::Object(map) if is_operator_map(map) => {
                let mut all = Condition::all();
                for (operator, operand) in map {
                    all = all.add(self.translate_operator(target, operator, operand)?);
                }
                Ok(all)
            }
            other => Ok(Condition::all().add(self.equals(target, other)?)),
        }
    }

    fn translate_operator(
        &self,
        target: &Target,
        operator: &str,
        operand: &JsonValue,
    ) -> RdbResult<Condition> {
        let column = Expr::col(Alias::new(target.column()));
        let expr = match operator {
            "$eq" => self.equals(target, operand)?,
            "$ne" if operand.is_null() => column.is_not_null(),
            "$ne" => column.ne(self.operand(target, operand)?),
            "$gt" => column.gt(self.operand(target, operand)?),
            "$gte" => column.gte(self.operand(target, operand)?),
            "$lt" => column.lt(self.operand(target, operand)?),
            "$lte" => column.lte(self.operand(target, operand)?),
            "$like" => column.like(self.pattern(target, operand)),
            "$notLike" => column.not_like(self.pattern(target, operand)),
            "$in" => column.is_in(self.operands(target, operand)?),
            "$notIn" => column.is_not_in(self.operands(target, operand)?),
            unknown => {
                self.warn(format_args!(
                    "Unknown filter operator \"{unknown}\" on \"{}\" for {}",
                    target.column(),
                    self.resource
                ));
                return Ok(never_match());
            }
        };
        Ok(Condition::all().add(expr))
    }

    fn equals(&self, target: &Target, operand: &JsonValue) -> RdbResult<SimpleExpr> {
        let column = Expr::col(Alias::new(target.column()));
        if operand.is_null() {
            return Ok(column.is_null());
        }
        Ok(column.eq(self.operand(target, operand)?))
    }

    /// Encodes a comparison operand the way the column stores it.
    fn operand(&self, target: &Target, operand: &JsonValue) -> RdbResult<SeaValue> {
        match target {
            Target::Text { data_type, .. } => {
                let value = Value::from_json(operand.clone());
                Ok(SeaValue::from(codec::serialize(&value, data_type)?))
            }
            Target::Timestamp => {
                let millis = codec::date_millis(&Value::from_json(operand.clone()))?;
                i64::try_from(millis).map(SeaValue::from).map_err(|_| {
                    RdbError::out_of_range(format!("timestamp {millis} is out of range"))
                })
            }
            Target::Version => {
                let version = match operand {
                    JsonValue::Number(number) => number.as_i64(),
                    JsonValue::String(text) => text.trim().parse().ok(),
                    _ => None,
                };
                version.map(SeaValue::from).ok_or_else(|| {
                    RdbError::invalid(format!("version filter expects an integer, got {operand}"))
                })
            }
        }
    }

    fn operands(&self, target: &Target, operand: &JsonValue) -> RdbResult<Vec<SeaValue>> {
        match operand {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.operand(target, item))
                .collect(),
            single => Ok(vec![self.operand(target, single)?]),
        }
    }

    fn pattern(&self, target: &Target, operand: &JsonValue) -> String {
        let pattern = match operand {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        };
        if !pattern.contains(['%', '_']) {
            self.warn(format_args!(
                "$like on \"{}\" for {} has no wildcard: {pattern}",
                target.column(),
                self.resource
            ));
        }
        codec::encode_text(&pattern)
    }

    fn warn(&self, message: std::fmt::Arguments<'_>) {
        if !known_names(self.registry).is_empty() {
            log::warn!("{message}");
        }
    }
}

fn never_match() -> Condition {
    Condition::all().add(Expr::col(Alias::new(ID_COLUMN)).eq(INVALID_FILTER_CONDITION_ID))
}

fn is_operator_map(map: &JsonMap<String, JsonValue>) -> bool {
    !map.is_empty() && ref_shorthand(map).is_none() && map.keys().all(|key| key.starts_with('$'))
}

fn filter_list<'v>(combinator: &str, value: &'v JsonValue) -> RdbResult<&'v [JsonValue]> {
    match value {
        JsonValue::Array(filters) => Ok(filters),
        JsonValue::Object(_) => Ok(std::slice::from_ref(value)),
        other => Err(RdbError::invalid(format!(
            "{combinator} expects a list of filters, got {other}"
        ))),
    }
}

//! Translation of the filter and sort DSL into sea-query conditions.

mod filter;
mod sort;

pub use filter::{FilterTranslator, INVALID_FILTER_CONDITION_ID};
pub use sort::{SortDirection, SortTerm, SortTranslator};

use loam_rdb_core::naming::{
    column_for, AT_ATTRIBUTE, AT_COLUMN, ID_COLUMN, NUM_ATTRIBUTE, NUM_COLUMN,
};
use loam_rdb_core::{AttributeRegistry, DataType};

/// Column an attribute name resolves to, and how its operands are encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    Text { column: String, data_type: DataType },
    Timestamp,
    Version,
}

impl Target {
    pub(crate) fn resolve(name: &str, registry: &AttributeRegistry) -> Option<Self> {
        match name {
            ID_COLUMN => Some(Target::Text {
                column: ID_COLUMN.to_string(),
                data_type: DataType::Id,
            }),
            AT_ATTRIBUTE => Some(Target::Timestamp),
            NUM_ATTRIBUTE => Some(Target::Version),
            name => registry.get(name).map(|descriptor| Target::Text {
                column: column_for(name),
                data_type: descriptor.data_type.clone(),
            }),
        }
    }

    pub(crate) fn column(&self) -> &str {
        match self {
            Target::Text { column, .. } => column,
            Target::Timestamp => AT_COLUMN,
            Target::Version => NUM_COLUMN,
        }
    }
}

/// Names a caller could use in a filter or sort, listed in warnings.
pub(crate) fn known_names(registry: &AttributeRegistry) -> Vec<&str> {
    registry
        .keys()
        .map(String::as_str)
        .filter(|name| *name != ID_COLUMN && !name.starts_with('_'))
        .collect()
}

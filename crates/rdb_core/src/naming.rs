//! Attribute name ↔ physical column name mapping.

pub const ID_COLUMN: &str = "id";
pub const AT_COLUMN: &str = "__at";
pub const NUM_COLUMN: &str = "__num";
pub const ATTRIBUTE_TYPES_COLUMN: &str = "__attributeTypes";

pub const AS_ATTRIBUTE: &str = "$$as";
pub const AT_ATTRIBUTE: &str = "$$at";
pub const NUM_ATTRIBUTE: &str = "$$num";

const INTERNAL_PREFIX: &str = "__";
const META_PREFIX: &str = "$$";
const ESCAPED_DOLLAR: char = '\u{FF04}';
const ESCAPED_DOT: char = '\u{FF0E}';

/// Physical column for an attribute name. Meta attributes map to fixed columns; everything
/// else has `$` and `.` swapped for full-width code points.
pub fn column_for(name: &str) -> String {
    match name {
        AT_ATTRIBUTE => AT_COLUMN.to_string(),
        NUM_ATTRIBUTE => NUM_COLUMN.to_string(),
        _ => name
            .chars()
            .map(|ch| match ch {
                '$' => ESCAPED_DOLLAR,
                '.' => ESCAPED_DOT,
                other => other,
            })
            .collect(),
    }
}

pub fn attribute_for(column: &str) -> String {
    match column {
        AT_COLUMN => AT_ATTRIBUTE.to_string(),
        NUM_COLUMN => NUM_ATTRIBUTE.to_string(),
        _ => column
            .chars()
            .map(|ch| match ch {
                ESCAPED_DOLLAR => '$',
                ESCAPED_DOT => '.',
                other => other,
            })
            .collect(),
    }
}

/// Names the driver manages itself and never stores as user attributes.
pub fn is_reserved_attribute(name: &str) -> bool {
    name == ID_COLUMN || name.starts_with(META_PREFIX) || name.starts_with(INTERNAL_PREFIX)
}

pub fn is_internal_column(column: &str) -> bool {
    column.starts_with(INTERNAL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_characters_symmetrically() {
        let column = column_for("$price.usd");
        assert!(!column.contains('$'));
        assert!(!column.contains('.'));
        assert_eq!(attribute_for(&column), "$price.usd");
        assert_eq!(column_for("plain"), "plain");
    }

    #[test]
    fn meta_attributes_use_fixed_columns() {
        assert_eq!(column_for(AT_ATTRIBUTE), AT_COLUMN);
        assert_eq!(column_for(NUM_ATTRIBUTE), NUM_COLUMN);
        assert_eq!(attribute_for(NUM_COLUMN), NUM_ATTRIBUTE);
        assert!(is_internal_column(ATTRIBUTE_TYPES_COLUMN));
        assert!(is_reserved_attribute("$$num"));
        assert!(is_reserved_attribute("__extras"));
        assert!(is_reserved_attribute("id"));
        assert!(!is_reserved_attribute("$price"));
    }
}

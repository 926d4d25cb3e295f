use sea_orm::sea_query::Order;

use loam_rdb_core::{AttributeRegistry, Sort};

use super::{known_names, Target};

const DESCENDING_PREFIX: char = '-';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn order(self) -> Order {
        match self {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortTerm {
    pub column: String,
    pub direction: SortDirection,
}

/// Resolves sort tokens (`"name"`, `"-name"`, comma separated or listed) to physical columns.
pub struct SortTranslator<'a> {
    resource: &'a str,
    registry: &'a AttributeRegistry,
}

impl<'a> SortTranslator<'a> {
    pub fn new(resource: &'a str, registry: &'a AttributeRegistry) -> Self {
        Self { resource, registry }
    }

    pub fn translate(&self, sort: &Sort) -> Vec<SortTerm> {
        sort.0
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter_map(|token| self.resolve(token))
            .collect()
    }

    fn resolve(&self, token: &str) -> Option<SortTerm> {
        let (name, direction) = match token.strip_prefix(DESCENDING_PREFIX) {
            Some(name) => (name, SortDirection::Desc),
            None => (token, SortDirection::Asc),
        };
        match Target::resolve(name, self.registry) {
            Some(target) => Some(SortTerm {
                column: target.column().to_string(),
                direction,
            }),
            None => {
                if !known_names(self.registry).is_empty() {
                    log::warn!("Unknown sort \"{name}\" for {}", self.resource);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use loam_rdb_core::{AttributeDescriptor, AttributeRegistry, DataType, Sort};

    use super::{SortDirection, SortTerm, SortTranslator};

    fn registry() -> AttributeRegistry {
        ["name", "age", "a.b"]
            .into_iter()
            .map(|name| (name.to_string(), AttributeDescriptor::new(name, DataType::String)))
            .collect()
    }

    fn term(column: &str, direction: SortDirection) -> SortTerm {
        SortTerm {
            column: column.to_string(),
            direction,
        }
    }

    #[test]
    fn comma_separated_tokens_keep_their_order() {
        let registry = registry();
        let terms = SortTranslator::new("User", &registry).translate(&Sort::from("-age,name"));
        assert_eq!(
            terms,
            vec![term("age", SortDirection::Desc), term("name", SortDirection::Asc)]
        );
    }

    #[test]
    fn list_entries_and_meta_attributes_resolve() {
        let registry = registry();
        let terms = SortTranslator::new("User", &registry)
            .translate(&Sort::from(vec!["-$$at", "id,a.b"]));
        assert_eq!(
            terms,
            vec![
                term("__at", SortDirection::Desc),
                term("id", SortDirection::Asc),
                term("a\u{ff0e}b", SortDirection::Asc),
            ]
        );
    }

    #[test]
    fn unknown_tokens_are_dropped() {
        let registry = registry();
        let terms = SortTranslator::new("User", &registry)
            .translate(&Sort::from("nickname, -name,,"));
        assert_eq!(terms, vec![term("name", SortDirection::Desc)]);
    }
}

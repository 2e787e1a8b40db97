//! Property filters and left-associative filter chains.
//!
//! A [`FilterChain`] is evaluated strictly left to right: each filter's
//! [`BooleanOperator`] combines it with the result of everything before it,
//! so `a AND b OR c` means `(a AND b) OR c` and `a OR b AND c` means
//! `(a OR b) AND c`. There is no operator precedence. The compiled Cypher
//! spells the grouping out with parentheses so the store cannot reinterpret
//! it.
//!
//! Evaluation follows Cypher's three-valued logic: a comparison against an
//! absent property is unknown, and an unknown result never matches.

use arbor_core::{ArborError, Params, PropertyMap, Result, Value, ValueKind};

use crate::cypher::escape_identifier;
use crate::mapper::{NodeDescriptor, PropertyField, RelationshipDescriptor};

/// How a filter compares a stored property against its literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    StartingWith,
    EndingWith,
    Containing,
    /// Property is present. Takes no value.
    Exists,
    /// Property is absent. Takes no value.
    IsNull,
}

impl ComparisonOperator {
    pub fn is_unary(self) -> bool {
        matches!(self, Self::Exists | Self::IsNull)
    }

    fn is_textual(self) -> bool {
        matches!(self, Self::StartingWith | Self::EndingWith | Self::Containing)
    }

    fn cypher(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanEqual => "<=",
            Self::StartingWith => "STARTS WITH",
            Self::EndingWith => "ENDS WITH",
            Self::Containing => "CONTAINS",
            Self::Exists => "IS NOT NULL",
            Self::IsNull => "IS NULL",
        }
    }
}

/// How a filter joins the chain built so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BooleanOperator {
    #[default]
    And,
    Or,
}

impl BooleanOperator {
    fn cypher(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    fn combine(self, left: Option<bool>, right: Option<bool>) -> Option<bool> {
        match self {
            Self::And => match (left, right) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Self::Or => match (left, right) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        }
    }
}

/// A single property predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    field: String,
    operator: ComparisonOperator,
    value: Option<Value>,
    boolean: BooleanOperator,
    negated: bool,
}

impl Filter {
    pub fn new(
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
            boolean: BooleanOperator::default(),
            negated: false,
        }
    }

    /// A filter for [`ComparisonOperator::Exists`] or [`ComparisonOperator::IsNull`].
    pub fn unary(field: impl Into<String>, operator: ComparisonOperator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
            boolean: BooleanOperator::default(),
            negated: false,
        }
    }

    pub fn with_boolean(mut self, boolean: BooleanOperator) -> Self {
        self.boolean = boolean;
        self
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> ComparisonOperator {
        self.operator
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn boolean(&self) -> BooleanOperator {
        self.boolean
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Three-valued evaluation against one property bag.
    pub fn evaluate(&self, props: &PropertyMap) -> Option<bool> {
        let stored = props.get(&self.field);
        let result = match self.operator {
            ComparisonOperator::Exists => Some(stored.is_some()),
            ComparisonOperator::IsNull => Some(stored.is_none()),
            op => {
                let (stored, literal) = (stored?, self.value.as_ref()?);
                match op {
                    ComparisonOperator::Equals => Some(
                        stored.compare(literal) == Some(std::cmp::Ordering::Equal),
                    ),
                    ComparisonOperator::GreaterThan => stored.compare(literal).map(|o| o.is_gt()),
                    ComparisonOperator::GreaterThanEqual => {
                        stored.compare(literal).map(|o| o.is_ge())
                    }
                    ComparisonOperator::LessThan => stored.compare(literal).map(|o| o.is_lt()),
                    ComparisonOperator::LessThanEqual => stored.compare(literal).map(|o| o.is_le()),
                    _ => match (stored.as_str(), literal.as_str()) {
                        (Some(s), Some(l)) => Some(match op {
                            ComparisonOperator::StartingWith => s.starts_with(l),
                            ComparisonOperator::EndingWith => s.ends_with(l),
                            _ => s.contains(l),
                        }),
                        _ => None,
                    },
                }
            }
        };
        if self.negated {
            result.map(|b| !b)
        } else {
            result
        }
    }

    fn to_cypher(&self, alias: &str, index: usize, params: &mut Params) -> String {
        let property = format!("{alias}.{}", escape_identifier(&self.field));
        let predicate = if self.operator.is_unary() {
            format!("{property} {}", self.operator.cypher())
        } else {
            let name = format!("f{index}");
            let predicate = format!("{property} {} ${name}", self.operator.cypher());
            params.insert(name, self.value.clone());
            predicate
        };
        if self.negated {
            format!("NOT ({predicate})")
        } else {
            predicate
        }
    }

    fn validate(&self, owner: &str, fields: &[PropertyField]) -> Result<()> {
        let field = fields.iter().find(|f| f.name == self.field).ok_or_else(|| {
            ArborError::Mapping(format!(
                "filter on {owner}.{} which is not a declared property",
                self.field
            ))
        })?;

        match (&self.value, self.operator.is_unary()) {
            (None, true) => Ok(()),
            (Some(_), true) => Err(ArborError::Mapping(format!(
                "{:?} on {} takes no value",
                self.operator, self.field
            ))),
            (None, false) => Err(ArborError::Mapping(format!(
                "{:?} on {} needs a value",
                self.operator, self.field
            ))),
            (Some(v), false) => {
                let numeric = |k: ValueKind| matches!(k, ValueKind::Int | ValueKind::Float);
                let compatible = if self.operator.is_textual() {
                    field.kind == ValueKind::String && v.kind() == ValueKind::String
                } else {
                    v.kind() == field.kind || (numeric(v.kind()) && numeric(field.kind))
                };
                if compatible {
                    Ok(())
                } else {
                    Err(ArborError::Mapping(format!(
                        "{:?} on {}.{} ({}) cannot take a {} value",
                        self.operator,
                        owner,
                        self.field,
                        field.kind,
                        v.kind()
                    )))
                }
            }
        }
    }
}

/// Builds a [`FilterChain`] from filters in caller order.
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    filters: Vec<Filter>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `(field, operator, value, boolean operator)` tuple.
    pub fn push(
        mut self,
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<Value>,
        boolean: BooleanOperator,
    ) -> Self {
        self.filters
            .push(Filter::new(field, operator, value).with_boolean(boolean));
        self
    }

    pub fn and(
        self,
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.push(field, operator, value, BooleanOperator::And)
    }

    pub fn or(
        self,
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.push(field, operator, value, BooleanOperator::Or)
    }

    /// Append a prepared filter as-is.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(self) -> FilterChain {
        FilterChain {
            filters: self.filters,
        }
    }
}

/// Immutable, ordered predicate chain. An empty chain matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Left-to-right three-valued evaluation. The first filter's boolean
    /// operator is ignored.
    pub fn evaluate(&self, props: &PropertyMap) -> Option<bool> {
        let mut iter = self.filters.iter();
        let Some(first) = iter.next() else {
            return Some(true);
        };
        iter.fold(first.evaluate(props), |acc, f| {
            f.boolean.combine(acc, f.evaluate(props))
        })
    }

    /// Whether a property bag passes the chain; unknown does not pass.
    pub fn matches(&self, props: &PropertyMap) -> bool {
        self.evaluate(props) == Some(true)
    }

    /// Check every filter against the target node type.
    pub fn validate(&self, descriptor: &NodeDescriptor) -> Result<()> {
        self.filters
            .iter()
            .try_for_each(|f| f.validate(descriptor.label, &descriptor.properties))
    }

    /// Check every filter against the target relationship type.
    pub fn validate_relationship(&self, descriptor: &RelationshipDescriptor) -> Result<()> {
        self.filters
            .iter()
            .try_for_each(|f| f.validate(descriptor.label, &descriptor.properties))
    }

    /// Compile into a `WHERE` expression over `alias`, binding literals into
    /// `params`. Returns `None` for an empty chain.
    pub fn to_cypher(&self, alias: &str, params: &mut Params) -> Option<String> {
        let mut iter = self.filters.iter().enumerate();
        let (_, first) = iter.next()?;
        let mut expr = first.to_cypher(alias, 0, params);
        for (i, f) in iter {
            let term = f.to_cypher(alias, i, params);
            expr = format!("({expr} {} {term})", f.boolean.cypher());
        }
        Some(expr)
    }
}

impl From<Filter> for FilterChain {
    fn from(filter: Filter) -> Self {
        Self {
            filters: vec![filter],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(name: &str, year: i64) -> PropertyMap {
        let mut p = PropertyMap::new();
        p.insert("name".to_string(), Value::from(name));
        p.insert("birthYear".to_string(), Value::from(year));
        p
    }

    fn person() -> NodeDescriptor {
        NodeDescriptor::new("Person")
            .property(PropertyField::required("name", ValueKind::String))
            .property(PropertyField::required("birthYear", ValueKind::Int))
    }

    #[test]
    fn single_filter_compiles_without_grouping() {
        let chain = FilterChain::from(Filter::new("birthYear", ComparisonOperator::Equals, 1977));
        let mut params = Params::new();
        let expr = chain.to_cypher("n", &mut params).unwrap();
        assert_eq!(expr, "n.`birthYear` = $f0");
        assert_eq!(params.get("f0"), Some(&Some(Value::from(1977))));
    }

    #[test]
    fn chain_compiles_left_associatively() {
        let chain = FilterBuilder::new()
            .and("birthYear", ComparisonOperator::Equals, 1977)
            .or("name", ComparisonOperator::GreaterThan, "M")
            .and("birthYear", ComparisonOperator::LessThan, 1980)
            .build();
        let mut params = Params::new();
        let expr = chain.to_cypher("n", &mut params).unwrap();
        assert_eq!(
            expr,
            "((n.`birthYear` = $f0 OR n.`name` > $f1) AND n.`birthYear` < $f2)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn empty_chain_compiles_to_nothing_and_matches_all() {
        let chain = FilterChain::empty();
        assert!(chain.to_cypher("n", &mut Params::new()).is_none());
        assert!(chain.matches(&props("anyone", 1900)));
    }

    #[test]
    fn evaluation_ignores_conventional_precedence() {
        // a OR b AND c: precedence would give a OR (b AND c), which is true
        // for a=true,c=false. Left-to-right gives (a OR b) AND c = false.
        let chain = FilterBuilder::new()
            .and("name", ComparisonOperator::Equals, "Jesse Lucas")
            .or("birthYear", ComparisonOperator::Equals, 1900)
            .and("birthYear", ComparisonOperator::GreaterThan, 2000)
            .build();
        assert!(!chain.matches(&props("Jesse Lucas", 1977)));

        let mut params = Params::new();
        assert_eq!(
            chain.to_cypher("n", &mut params).unwrap(),
            "((n.`name` = $f0 OR n.`birthYear` = $f1) AND n.`birthYear` > $f2)"
        );
    }

    #[test]
    fn four_term_chain_folds_in_order() {
        // ((F AND T) OR T) AND F = F ; ((F AND T) OR T) OR F = T
        let base = FilterBuilder::new()
            .and("birthYear", ComparisonOperator::Equals, 1)
            .and("name", ComparisonOperator::StartingWith, "K")
            .or("name", ComparisonOperator::EndingWith, "Leigh");
        let p = props("Kelly Leigh", 1977);

        let and_false = base
            .clone()
            .and("birthYear", ComparisonOperator::LessThan, 1900)
            .build();
        assert!(!and_false.matches(&p));

        let or_false = base.or("birthYear", ComparisonOperator::LessThan, 1900).build();
        assert!(or_false.matches(&p));
    }

    #[test]
    fn absent_property_is_unknown_not_false() {
        let mut p = PropertyMap::new();
        p.insert("name".to_string(), Value::from("Carol Maureen"));

        let gt = Filter::new("birthYear", ComparisonOperator::GreaterThan, 1900);
        assert_eq!(gt.evaluate(&p), None);
        assert_eq!(gt.clone().negate().evaluate(&p), None);

        // unknown OR true = true; unknown AND true = unknown
        let or = FilterBuilder::new()
            .filter(gt.clone())
            .or("name", ComparisonOperator::Containing, "Maureen")
            .build();
        assert!(or.matches(&p));

        let and = FilterBuilder::new()
            .filter(gt)
            .and("name", ComparisonOperator::Containing, "Maureen")
            .build();
        assert_eq!(and.evaluate(&p), None);
        assert!(!and.matches(&p));
    }

    #[test]
    fn unary_operators() {
        let p = props("Gail Ann", 1942);
        assert!(FilterChain::from(Filter::unary("name", ComparisonOperator::Exists)).matches(&p));
        let ongoing = FilterChain::from(Filter::unary("yearDivorced", ComparisonOperator::IsNull));
        assert!(ongoing.matches(&p));

        let mut params = Params::new();
        let expr = FilterChain::from(Filter::unary("name", ComparisonOperator::Exists).negate())
            .to_cypher("n", &mut params)
            .unwrap();
        assert_eq!(expr, "NOT (n.`name` IS NOT NULL)");
        assert!(params.is_empty());
    }

    #[test]
    fn mismatched_kinds_never_match() {
        let p = props("Esme Alexis", 1981);
        let eq = Filter::new("birthYear", ComparisonOperator::Equals, "1981");
        assert_eq!(eq.evaluate(&p), Some(false));
        let gt = Filter::new("birthYear", ComparisonOperator::GreaterThan, "1900");
        assert_eq!(gt.evaluate(&p), None);
    }

    #[test]
    fn validate_against_descriptor() {
        let d = person();
        assert!(FilterBuilder::new()
            .and("birthYear", ComparisonOperator::GreaterThan, 1970.5)
            .or("name", ComparisonOperator::StartingWith, "J")
            .build()
            .validate(&d)
            .is_ok());

        let unknown = FilterChain::from(Filter::new("age", ComparisonOperator::Equals, 40));
        assert!(matches!(unknown.validate(&d), Err(ArborError::Mapping(_))));

        let wrong_kind = FilterChain::from(Filter::new("name", ComparisonOperator::Equals, 40));
        assert!(matches!(wrong_kind.validate(&d), Err(ArborError::Mapping(_))));

        let textual_on_int =
            FilterChain::from(Filter::new("birthYear", ComparisonOperator::Containing, "19"));
        assert!(textual_on_int.validate(&d).is_err());
    }

    #[test]
    fn validate_against_relationship_properties() {
        let married = RelationshipDescriptor::new("MARRIED", "Person", "Person")
            .property(PropertyField::required("yearMarried", ValueKind::Int))
            .property(PropertyField::optional("yearDivorced", ValueKind::Int));

        let chain = FilterBuilder::new()
            .and("yearMarried", ComparisonOperator::GreaterThan, 1970)
            .filter(Filter::unary("yearDivorced", ComparisonOperator::IsNull))
            .build();
        assert!(chain.validate_relationship(&married).is_ok());

        let on_node_field = FilterChain::from(Filter::new("name", ComparisonOperator::Equals, "a"));
        assert!(matches!(
            on_node_field.validate_relationship(&married),
            Err(ArborError::Mapping(_))
        ));
    }

    #[test]
    fn builder_preserves_order() {
        let chain = FilterBuilder::new()
            .or("name", ComparisonOperator::Equals, "a")
            .and("name", ComparisonOperator::Equals, "b")
            .push("birthYear", ComparisonOperator::LessThanEqual, 3, BooleanOperator::Or)
            .build();
        let fields: Vec<_> = chain
            .filters()
            .iter()
            .map(|f| (f.field().to_string(), f.boolean()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("name".to_string(), BooleanOperator::Or),
                ("name".to_string(), BooleanOperator::And),
                ("birthYear".to_string(), BooleanOperator::Or),
            ]
        );
    }
}

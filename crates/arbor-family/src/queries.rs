//! The lookups the loader demonstrates.

use arbor_core::{Params, Result, Value};
use arbor_ogm::{
    ComparisonOperator, EntityGraph, Filter, FilterBuilder, FilterChain, RelationshipRef, Session,
};

use crate::married::Married;

use crate::person::Person;

/// Wives of the named husband, over the stored `MARRIED` relationships.
pub const SPOUSES_OF: &str = "MATCH (w:Person)-[:MARRIED]->(h:Person {name:$name}) RETURN w";

pub fn born_in(year: i64) -> FilterChain {
    Filter::new("birthYear", ComparisonOperator::Equals, year).into()
}

/// `birthYear = year OR name > letter`.
pub fn born_in_or_named_after(year: i64, letter: &str) -> FilterChain {
    FilterBuilder::new()
        .and("birthYear", ComparisonOperator::Equals, year)
        .or("name", ComparisonOperator::GreaterThan, letter)
        .build()
}

/// Marriages that began before `year`.
pub fn married_before(year: i64) -> FilterChain {
    Filter::new("yearMarried", ComparisonOperator::LessThan, year).into()
}

/// Load the marriages that began before `year`, with both spouses, into `graph`.
pub async fn marriages_before(
    session: &mut Session,
    graph: &mut EntityGraph,
    year: i64,
) -> Result<Vec<RelationshipRef<Married>>> {
    session
        .load_all_relationships::<Married>(graph, married_before(year))
        .await
}

/// Everyone at some point married to `husband`, sorted by name.
pub async fn spouses_of(session: &mut Session, husband: &str) -> Result<Vec<Person>> {
    let mut params = Params::new();
    params.insert("name".to_string(), Some(Value::from(husband)));

    let mut wives = session.query::<Person>(SPOUSES_OF, &params).await?.collect_all()?;
    wives.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::FamilyDataset;
    use arbor_ogm::{NodeEntity, RelationshipEntity};

    fn matching(chain: &FilterChain) -> Vec<String> {
        let data = FamilyDataset::build();
        let mut names: Vec<String> = data
            .persons()
            .filter(|p| chain.matches(&p.properties()))
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn single_filter_by_birth_year() {
        assert_eq!(matching(&born_in(1977)), vec!["Jesse Lucas", "Kelly Leigh"]);
    }

    #[test]
    fn birth_year_or_name_after_letter() {
        assert_eq!(
            matching(&born_in_or_named_after(1977, "M")),
            vec![
                "Jesse Lucas",
                "Kelly Leigh",
                "Michael Blevins",
                "Michael Zane",
                "Scott Christoper",
                "Steven Lester",
            ]
        );
    }

    #[test]
    fn chains_validate_against_person() {
        let descriptor = Person::descriptor();
        assert!(born_in_or_named_after(1977, "M").validate(&descriptor).is_ok());
    }

    #[test]
    fn marriages_before_year() {
        let data = FamilyDataset::build();
        let chain = married_before(1975);
        assert!(chain.validate_relationship(&Married::descriptor()).is_ok());
        assert!(chain.validate(&Person::descriptor()).is_err());

        let years: Vec<i64> = data
            .marriages
            .iter()
            .filter_map(|m| data.graph.relationship(*m))
            .filter(|m| chain.matches(&m.properties()))
            .map(|m| m.year_married)
            .collect();
        assert_eq!(years, vec![1964, 1973]);
    }

    #[test]
    fn spouse_query_parameters_resolve() {
        let names = arbor_ogm::executor::parameter_names(SPOUSES_OF);
        assert_eq!(names, vec!["name"]);
    }
}

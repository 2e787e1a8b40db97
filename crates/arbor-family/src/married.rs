//! `MARRIED` relationships, from wife to husband.

use arbor_core::{ArborError, EntityId, PropertyMap, Result, Value, ValueKind};
use arbor_ogm::{
    Endpoints, NodeKey, NodeRef, PropertyField, RelationshipDescriptor, RelationshipEntity,
};

use crate::person::{self, Person};

pub const LABEL: &str = "MARRIED";

#[derive(Debug, Clone, PartialEq)]
pub struct Married {
    pub id: Option<EntityId>,
    pub wife: NodeRef<Person>,
    pub husband: NodeRef<Person>,
    pub year_married: i64,
    /// None while the marriage lasts.
    pub year_divorced: Option<i64>,
}

impl Married {
    pub fn new(
        wife: NodeRef<Person>,
        husband: NodeRef<Person>,
        year_married: i64,
        year_divorced: Option<i64>,
    ) -> Self {
        Self {
            id: None,
            wife,
            husband,
            year_married,
            year_divorced,
        }
    }
}

impl RelationshipEntity for Married {
    fn descriptor() -> RelationshipDescriptor {
        RelationshipDescriptor::new(LABEL, person::LABEL, person::LABEL)
            .property(PropertyField::required("yearMarried", ValueKind::Int))
            .property(PropertyField::optional("yearDivorced", ValueKind::Int))
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: Option<EntityId>) {
        self.id = id;
    }

    fn properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("yearMarried".to_string(), Value::from(self.year_married));
        if let Some(year) = self.year_divorced {
            props.insert("yearDivorced".to_string(), Value::from(year));
        }
        props
    }

    fn start(&self) -> NodeKey {
        self.wife.key()
    }

    fn end(&self) -> NodeKey {
        self.husband.key()
    }

    fn hydrate(id: EntityId, endpoints: Endpoints, properties: &PropertyMap) -> Result<Self> {
        let year_married = properties
            .get("yearMarried")
            .and_then(Value::as_int)
            .ok_or_else(|| ArborError::Constraint("MARRIED.yearMarried is required".to_string()))?;

        Ok(Self {
            id: Some(id),
            wife: endpoints.start()?,
            husband: endpoints.end()?,
            year_married,
            year_divorced: properties.get("yearDivorced").and_then(Value::as_int),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_ogm::EntityGraph;

    #[test]
    fn ongoing_marriage_omits_divorce_year() {
        let mut graph = EntityGraph::new();
        let carol = graph.insert(Person::new("Carol Maureen", 1945));
        let steve = graph.insert(Person::new("Steven Lester", 1950));

        let married = Married::new(carol, steve, 1976, None);
        let props = married.properties();
        assert_eq!(props.len(), 1);
        assert!(Married::descriptor().conform(&props).is_ok());
        assert_eq!(married.start(), carol.key());
        assert_eq!(married.end(), steve.key());
    }
}

//! `Person` nodes and their `PARENT` edges.

use arbor_core::{ArborError, EntityId, PropertyMap, Result, Value, ValueKind};
use arbor_ogm::{EdgeField, NodeDescriptor, NodeEntity, NodeKey, NodeRef, PropertyField};

pub const LABEL: &str = "Person";

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: Option<EntityId>,
    pub name: String,
    pub birth_year: i64,
    /// Owned: saving a person saves their children and the `PARENT` edges.
    pub children: Vec<NodeRef<Person>>,
}

impl Person {
    pub fn new(name: impl Into<String>, birth_year: i64) -> Self {
        Self {
            id: None,
            name: name.into(),
            birth_year,
            children: Vec::new(),
        }
    }
}

impl NodeEntity for Person {
    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(LABEL)
            .property(PropertyField::required("name", ValueKind::String))
            .property(PropertyField::required("birthYear", ValueKind::Int))
            .edge(EdgeField::outgoing("children", "PARENT", LABEL))
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: Option<EntityId>) {
        self.id = id;
    }

    fn properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("name".to_string(), Value::from(self.name.as_str()));
        props.insert("birthYear".to_string(), Value::from(self.birth_year));
        props
    }

    fn owned_edges(&self) -> Vec<(&'static str, Vec<NodeKey>)> {
        vec![("children", self.children.iter().map(NodeRef::key).collect())]
    }

    fn hydrate(id: EntityId, properties: &PropertyMap) -> Result<Self> {
        let name = properties
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ArborError::Constraint("Person.name is required".to_string()))?;
        let birth_year = properties
            .get("birthYear")
            .and_then(Value::as_int)
            .ok_or_else(|| ArborError::Constraint("Person.birthYear is required".to_string()))?;

        Ok(Self {
            id: Some(id),
            name: name.to_string(),
            birth_year,
            children: Vec::new(),
        })
    }
}

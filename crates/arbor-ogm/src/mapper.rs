//! Explicit entity descriptors and the mapping registry.
//!
//! Each domain type describes its graph shape once: label, scalar property
//! fields, and owned edges for nodes; edge label, endpoint labels and scalar
//! properties for relationships. Descriptors are collected into named
//! [`EntityNamespace`]s and frozen into a [`MappingRegistry`] when the session
//! factory is built. Nothing is inferred from instance state.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;

use arbor_core::{ArborError, EntityId, PropertyMap, Result, ValueKind};

use crate::entity::{ErasedNode, NodeEntity, RelationshipEntity};

// ── Descriptors ──────────────────────────────────────────────────

/// A declared scalar property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyField {
    pub name: &'static str,
    pub kind: ValueKind,
    pub optional: bool,
}

impl PropertyField {
    pub const fn required(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    pub const fn optional(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }
}

/// Which way an owned edge points, seen from the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A typed collection of owned edges on a node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeField {
    /// Field name the entity reports its targets under.
    pub field: &'static str,
    /// Relationship type written to the store, e.g. "PARENT".
    pub label: &'static str,
    /// Label of the target node type.
    pub target: &'static str,
    pub direction: Direction,
}

impl EdgeField {
    pub const fn outgoing(field: &'static str, label: &'static str, target: &'static str) -> Self {
        Self {
            field,
            label,
            target,
            direction: Direction::Outgoing,
        }
    }

    pub const fn incoming(field: &'static str, label: &'static str, target: &'static str) -> Self {
        Self {
            field,
            label,
            target,
            direction: Direction::Incoming,
        }
    }
}

/// Graph shape of a node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub label: &'static str,
    pub properties: Vec<PropertyField>,
    pub edges: Vec<EdgeField>,
}

impl NodeDescriptor {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            properties: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn property(mut self, field: PropertyField) -> Self {
        self.properties.push(field);
        self
    }

    pub fn edge(mut self, edge: EdgeField) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn field(&self, name: &str) -> Option<&PropertyField> {
        self.properties.iter().find(|f| f.name == name)
    }

    pub fn edge_field(&self, name: &str) -> Option<&EdgeField> {
        self.edges.iter().find(|e| e.field == name)
    }

    /// Check a property bag against the declared fields.
    pub fn conform(&self, props: &PropertyMap) -> Result<()> {
        conform(self.label, &self.properties, props)
    }
}

/// Graph shape of a relationship type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    pub label: &'static str,
    /// Label of the start node type.
    pub start: &'static str,
    /// Label of the end node type.
    pub end: &'static str,
    pub properties: Vec<PropertyField>,
}

impl RelationshipDescriptor {
    pub fn new(label: &'static str, start: &'static str, end: &'static str) -> Self {
        Self {
            label,
            start,
            end,
            properties: Vec::new(),
        }
    }

    pub fn property(mut self, field: PropertyField) -> Self {
        self.properties.push(field);
        self
    }

    pub fn conform(&self, props: &PropertyMap) -> Result<()> {
        conform(self.label, &self.properties, props)
    }
}

// ── Namespaces ───────────────────────────────────────────────────

pub(crate) type HydrateNode = fn(EntityId, &PropertyMap) -> Result<Box<dyn ErasedNode>>;

fn hydrate_boxed<T: NodeEntity>(
    id: EntityId,
    props: &PropertyMap,
) -> Result<Box<dyn ErasedNode>> {
    Ok(Box::new(T::hydrate(id, props)?))
}

struct NodeMapping {
    type_id: TypeId,
    type_name: &'static str,
    descriptor: NodeDescriptor,
    hydrate: HydrateNode,
}

struct RelationshipMapping {
    type_id: TypeId,
    type_name: &'static str,
    descriptor: RelationshipDescriptor,
}

/// A named group of entity types the mapper should recognize.
pub struct EntityNamespace {
    name: String,
    nodes: Vec<NodeMapping>,
    relationships: Vec<RelationshipMapping>,
}

impl EntityNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a node type. Its descriptor is derived here, once.
    pub fn node<T: NodeEntity>(mut self) -> Self {
        self.nodes.push(NodeMapping {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            descriptor: T::descriptor(),
            hydrate: hydrate_boxed::<T>,
        });
        self
    }

    /// Register a relationship type. Its descriptor is derived here, once.
    pub fn relationship<T: RelationshipEntity>(mut self) -> Self {
        self.relationships.push(RelationshipMapping {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            descriptor: T::descriptor(),
        });
        self
    }
}

// ── Registry ─────────────────────────────────────────────────────

/// Frozen, validated set of descriptors keyed by Rust type.
#[derive(Default)]
pub struct MappingRegistry {
    nodes: HashMap<TypeId, NodeDescriptor>,
    relationships: HashMap<TypeId, RelationshipDescriptor>,
    labels: HashMap<&'static str, TypeId>,
    hydrators: HashMap<TypeId, HydrateNode>,
}

impl fmt::Debug for MappingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingRegistry")
            .field("nodes", &self.nodes)
            .field("relationships", &self.relationships)
            .finish()
    }
}

impl MappingRegistry {
    /// Merge and validate the descriptors of every namespace.
    pub fn from_namespaces(namespaces: &[EntityNamespace]) -> Result<Self> {
        let mut registry = Self::default();
        let mut labels: HashMap<&'static str, TypeId> = HashMap::new();

        for ns in namespaces {
            for m in &ns.nodes {
                if registry.nodes.contains_key(&m.type_id) {
                    continue;
                }
                validate_node(m.type_name, &m.descriptor)?;
                if let Some(other) = labels.insert(m.descriptor.label, m.type_id) {
                    if other != m.type_id {
                        return Err(ArborError::Mapping(format!(
                            "label {} in namespace {} is already mapped by another type",
                            m.descriptor.label, ns.name
                        )));
                    }
                }
                registry.nodes.insert(m.type_id, m.descriptor.clone());
                registry.hydrators.insert(m.type_id, m.hydrate);
            }

            for m in &ns.relationships {
                if registry.relationships.contains_key(&m.type_id) {
                    continue;
                }
                validate_relationship(m.type_name, &m.descriptor)?;
                registry.relationships.insert(m.type_id, m.descriptor.clone());
            }
        }

        // Cross-references can only be checked once every namespace is merged.
        for node in registry.nodes.values() {
            for edge in &node.edges {
                if !labels.contains_key(edge.target) {
                    return Err(ArborError::Mapping(format!(
                        "edge {}.{} targets unregistered label {}",
                        node.label, edge.field, edge.target
                    )));
                }
            }
        }
        for rel in registry.relationships.values() {
            for endpoint in [rel.start, rel.end] {
                if !labels.contains_key(endpoint) {
                    return Err(ArborError::Mapping(format!(
                        "relationship {} references unregistered label {endpoint}",
                        rel.label
                    )));
                }
            }
        }

        registry.labels = labels;
        tracing::debug!(
            nodes = registry.nodes.len(),
            relationships = registry.relationships.len(),
            namespaces = namespaces.len(),
            "Mapping registry built"
        );
        Ok(registry)
    }

    pub fn node<T: NodeEntity>(&self) -> Result<&NodeDescriptor> {
        self.node_by_type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub fn relationship<T: RelationshipEntity>(&self) -> Result<&RelationshipDescriptor> {
        self.relationship_by_type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub(crate) fn node_by_type(&self, type_id: TypeId, type_name: &str) -> Result<&NodeDescriptor> {
        self.nodes.get(&type_id).ok_or_else(|| {
            ArborError::Mapping(format!("no node descriptor registered for {type_name}"))
        })
    }

    /// Descriptor and hydrator of the node type mapped to `label`.
    pub(crate) fn node_by_label(&self, label: &str) -> Option<(&NodeDescriptor, HydrateNode)> {
        let type_id = self.labels.get(label)?;
        Some((self.nodes.get(type_id)?, *self.hydrators.get(type_id)?))
    }

    pub(crate) fn relationship_by_type(
        &self,
        type_id: TypeId,
        type_name: &str,
    ) -> Result<&RelationshipDescriptor> {
        self.relationships.get(&type_id).ok_or_else(|| {
            ArborError::Mapping(format!("no relationship descriptor registered for {type_name}"))
        })
    }
}

fn validate_node(type_name: &str, d: &NodeDescriptor) -> Result<()> {
    if d.label.is_empty() {
        return Err(ArborError::Mapping(format!("{type_name} has an empty label")));
    }
    validate_fields(d.label, &d.properties)?;

    let mut seen = HashSet::new();
    for edge in &d.edges {
        if edge.field.is_empty() || edge.label.is_empty() {
            return Err(ArborError::Mapping(format!(
                "{} declares an edge with an empty field or label",
                d.label
            )));
        }
        if !seen.insert(edge.field) {
            return Err(ArborError::Mapping(format!(
                "{} declares edge field {} twice",
                d.label, edge.field
            )));
        }
    }
    Ok(())
}

fn validate_relationship(type_name: &str, d: &RelationshipDescriptor) -> Result<()> {
    if d.label.is_empty() {
        return Err(ArborError::Mapping(format!("{type_name} has an empty edge label")));
    }
    validate_fields(d.label, &d.properties)
}

fn validate_fields(owner: &str, fields: &[PropertyField]) -> Result<()> {
    let mut seen = HashSet::new();
    for f in fields {
        if f.name.is_empty() {
            return Err(ArborError::Mapping(format!("{owner} declares an unnamed property")));
        }
        if !seen.insert(f.name) {
            return Err(ArborError::Mapping(format!(
                "{owner} declares property {} twice",
                f.name
            )));
        }
    }
    Ok(())
}

fn conform(owner: &str, fields: &[PropertyField], props: &PropertyMap) -> Result<()> {
    for (name, value) in props {
        let field = fields.iter().find(|f| f.name == name).ok_or_else(|| {
            ArborError::Mapping(format!("{owner} has no declared property {name}"))
        })?;
        if value.kind() != field.kind {
            return Err(ArborError::Mapping(format!(
                "{owner}.{name} is declared {} but holds {}",
                field.kind,
                value.kind()
            )));
        }
    }
    for field in fields.iter().filter(|f| !f.optional) {
        if !props.contains_key(field.name) {
            return Err(ArborError::Constraint(format!(
                "{owner}.{} is required but absent",
                field.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::{Cell, Link};
    use arbor_core::Value;

    fn cell_namespace() -> EntityNamespace {
        EntityNamespace::new("testing").node::<Cell>().relationship::<Link>()
    }

    #[test]
    fn registry_resolves_registered_types() {
        let registry = MappingRegistry::from_namespaces(&[cell_namespace()]).unwrap();
        assert_eq!(registry.node::<Cell>().unwrap().label, "Cell");
        assert_eq!(registry.relationship::<Link>().unwrap().label, "LINK");
    }

    #[test]
    fn unregistered_type_is_mapping_error() {
        let registry = MappingRegistry::from_namespaces(&[EntityNamespace::new("empty")]).unwrap();
        let err = registry.node::<Cell>().unwrap_err();
        assert!(matches!(err, ArborError::Mapping(_)));
    }

    #[test]
    fn relationship_to_unregistered_label_is_rejected() {
        let ns = EntityNamespace::new("rels-only").relationship::<Link>();
        let err = MappingRegistry::from_namespaces(&[ns]).unwrap_err();
        assert!(err.to_string().contains("unregistered label Cell"));
    }

    #[test]
    fn same_type_in_two_namespaces_is_merged() {
        let a = EntityNamespace::new("a").node::<Cell>();
        let b = EntityNamespace::new("b").node::<Cell>().relationship::<Link>();
        assert!(MappingRegistry::from_namespaces(&[a, b]).is_ok());
    }

    #[test]
    fn conform_checks_kinds_and_required_fields() {
        let d = NodeDescriptor::new("Thing")
            .property(PropertyField::required("name", ValueKind::String))
            .property(PropertyField::optional("rank", ValueKind::Int));

        let mut props = PropertyMap::new();
        props.insert("name".to_string(), Value::from("a"));
        assert!(d.conform(&props).is_ok());

        props.insert("rank".to_string(), Value::from("high"));
        assert!(matches!(d.conform(&props), Err(ArborError::Mapping(_))));

        props.remove("rank");
        props.remove("name");
        assert!(matches!(d.conform(&props), Err(ArborError::Constraint(_))));

        props.insert("name".to_string(), Value::from("a"));
        props.insert("colour".to_string(), Value::from("red"));
        assert!(matches!(d.conform(&props), Err(ArborError::Mapping(_))));
    }

    #[test]
    fn node_types_resolve_by_label() {
        let registry = MappingRegistry::from_namespaces(&[cell_namespace()]).unwrap();
        let (descriptor, hydrate) = registry.node_by_label("Cell").unwrap();
        assert_eq!(descriptor.label, "Cell");
        assert!(registry.node_by_label("LINK").is_none());

        let mut props = PropertyMap::new();
        props.insert("name".to_string(), Value::from("c"));
        let node = hydrate(EntityId(4), &props).unwrap();
        assert_eq!(node.entity_type(), TypeId::of::<Cell>());
        assert_eq!(node.id(), Some(EntityId(4)));
    }

    #[test]
    fn duplicate_property_is_invalid() {
        let d = NodeDescriptor::new("Thing")
            .property(PropertyField::required("name", ValueKind::String))
            .property(PropertyField::optional("name", ValueKind::String));
        assert!(validate_node("Thing", &d).is_err());
    }
}

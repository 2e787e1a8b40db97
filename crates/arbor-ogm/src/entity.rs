//! Entity traits and the arena that owns an object graph.
//!
//! Entities never point at each other directly. An [`EntityGraph`] owns every
//! node and relationship object; references between them are typed arena
//! handles ([`NodeRef`]). Arena keys double as object identity for the
//! cascade visited-set, so shared and cyclic references need no reference
//! counting.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use arbor_core::{ArborError, EntityId, PropertyMap, Result};

use crate::mapper::{NodeDescriptor, RelationshipDescriptor};

// ── Traits ───────────────────────────────────────────────────────

/// A domain type persisted as a labelled graph node.
pub trait NodeEntity: Any + Send + Sync + Sized {
    /// The type's graph shape. Called once, at registration.
    fn descriptor() -> NodeDescriptor;

    fn id(&self) -> Option<EntityId>;

    fn set_id(&mut self, id: Option<EntityId>);

    /// Current scalar properties. Absent optionals are omitted.
    fn properties(&self) -> PropertyMap;

    /// Owned edge targets, grouped by the edge field declared in the descriptor.
    fn owned_edges(&self) -> Vec<(&'static str, Vec<NodeKey>)> {
        Vec::new()
    }

    /// Rebuild an instance from stored properties. Owned edges start empty.
    fn hydrate(id: EntityId, properties: &PropertyMap) -> Result<Self>;
}

/// A domain type persisted as a directed, labelled edge between two nodes.
pub trait RelationshipEntity: Any + Send + Sync + Sized {
    fn descriptor() -> RelationshipDescriptor;

    fn id(&self) -> Option<EntityId>;

    fn set_id(&mut self, id: Option<EntityId>);

    fn properties(&self) -> PropertyMap;

    fn start(&self) -> NodeKey;

    fn end(&self) -> NodeKey;

    /// Rebuild an instance from stored properties. Both endpoints are
    /// already in the arena the relationship is loaded into.
    fn hydrate(id: EntityId, endpoints: Endpoints, properties: &PropertyMap) -> Result<Self>;
}

/// Arena positions of a loaded relationship's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    start: (NodeKey, TypeId),
    end: (NodeKey, TypeId),
}

impl Endpoints {
    pub(crate) fn new(start: (NodeKey, TypeId), end: (NodeKey, TypeId)) -> Self {
        Self { start, end }
    }

    /// Typed handle to the start node. Fails if it is not a `T`.
    pub fn start<T: NodeEntity>(&self) -> Result<NodeRef<T>> {
        typed_endpoint(self.start, "start")
    }

    /// Typed handle to the end node. Fails if it is not a `T`.
    pub fn end<T: NodeEntity>(&self) -> Result<NodeRef<T>> {
        typed_endpoint(self.end, "end")
    }
}

fn typed_endpoint<T: NodeEntity>(
    (key, type_id): (NodeKey, TypeId),
    role: &str,
) -> Result<NodeRef<T>> {
    if type_id == TypeId::of::<T>() {
        Ok(NodeRef {
            key,
            _marker: PhantomData,
        })
    } else {
        Err(ArborError::Mapping(format!(
            "{role} node {key:?} is not a {}",
            std::any::type_name::<T>()
        )))
    }
}

/// An identity change a session made inside its open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    /// Assigned when the entity was created.
    Assigned(EntityKey),
    /// Cleared when the node was deleted; holds the identity it had.
    Cleared(NodeKey, EntityId),
}

// ── Keys and handles ─────────────────────────────────────────────

/// Arena position of a node entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub(crate) usize);

/// Arena position of a relationship entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipKey(pub(crate) usize);

/// Any entity held by an [`EntityGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Node(NodeKey),
    Relationship(RelationshipKey),
}

impl From<NodeKey> for EntityKey {
    fn from(key: NodeKey) -> Self {
        Self::Node(key)
    }
}

impl From<RelationshipKey> for EntityKey {
    fn from(key: RelationshipKey) -> Self {
        Self::Relationship(key)
    }
}

/// Typed handle to a node entity in an [`EntityGraph`].
pub struct NodeRef<T> {
    key: NodeKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> NodeRef<T> {
    pub fn key(&self) -> NodeKey {
        self.key
    }
}

impl<T> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeRef<T> {}

impl<T> PartialEq for NodeRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for NodeRef<T> {}

impl<T> Hash for NodeRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> fmt::Debug for NodeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({})", self.key.0)
    }
}

impl<T> From<NodeRef<T>> for EntityKey {
    fn from(r: NodeRef<T>) -> Self {
        Self::Node(r.key)
    }
}

/// Typed handle to a relationship entity in an [`EntityGraph`].
pub struct RelationshipRef<T> {
    key: RelationshipKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RelationshipRef<T> {
    pub fn key(&self) -> RelationshipKey {
        self.key
    }
}

impl<T> Clone for RelationshipRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RelationshipRef<T> {}

impl<T> PartialEq for RelationshipRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for RelationshipRef<T> {}

impl<T> fmt::Debug for RelationshipRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelationshipRef({})", self.key.0)
    }
}

impl<T> From<RelationshipRef<T>> for EntityKey {
    fn from(r: RelationshipRef<T>) -> Self {
        Self::Relationship(r.key)
    }
}

// ── Type-erased slots ────────────────────────────────────────────

pub(crate) trait ErasedNode: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn entity_type(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
    fn id(&self) -> Option<EntityId>;
    fn set_id(&mut self, id: Option<EntityId>);
    fn properties(&self) -> PropertyMap;
    fn owned_edges(&self) -> Vec<(&'static str, Vec<NodeKey>)>;
}

impl<T: NodeEntity> ErasedNode for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn entity_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn id(&self) -> Option<EntityId> {
        NodeEntity::id(self)
    }

    fn set_id(&mut self, id: Option<EntityId>) {
        NodeEntity::set_id(self, id);
    }

    fn properties(&self) -> PropertyMap {
        NodeEntity::properties(self)
    }

    fn owned_edges(&self) -> Vec<(&'static str, Vec<NodeKey>)> {
        NodeEntity::owned_edges(self)
    }
}

pub(crate) trait ErasedRelationship: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn entity_type(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
    fn id(&self) -> Option<EntityId>;
    fn set_id(&mut self, id: Option<EntityId>);
    fn properties(&self) -> PropertyMap;
    fn start(&self) -> NodeKey;
    fn end(&self) -> NodeKey;
}

impl<T: RelationshipEntity> ErasedRelationship for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn entity_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn id(&self) -> Option<EntityId> {
        RelationshipEntity::id(self)
    }

    fn set_id(&mut self, id: Option<EntityId>) {
        RelationshipEntity::set_id(self, id);
    }

    fn properties(&self) -> PropertyMap {
        RelationshipEntity::properties(self)
    }

    fn start(&self) -> NodeKey {
        RelationshipEntity::start(self)
    }

    fn end(&self) -> NodeKey {
        RelationshipEntity::end(self)
    }
}

// ── Arena ────────────────────────────────────────────────────────

/// Owner of an in-memory object graph.
///
/// Keys are stable for the lifetime of the graph; entities are never removed,
/// only their identities cleared.
#[derive(Default)]
pub struct EntityGraph {
    nodes: Vec<Box<dyn ErasedNode>>,
    relationships: Vec<Box<dyn ErasedRelationship>>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node entity and get its handle.
    pub fn insert<T: NodeEntity>(&mut self, node: T) -> NodeRef<T> {
        let key = NodeKey(self.nodes.len());
        self.nodes.push(Box::new(node));
        NodeRef {
            key,
            _marker: PhantomData,
        }
    }

    /// Add a relationship entity and get its handle.
    pub fn relate<T: RelationshipEntity>(&mut self, rel: T) -> RelationshipRef<T> {
        let key = RelationshipKey(self.relationships.len());
        self.relationships.push(Box::new(rel));
        RelationshipRef {
            key,
            _marker: PhantomData,
        }
    }

    pub fn get<T: NodeEntity>(&self, r: NodeRef<T>) -> Option<&T> {
        self.nodes.get(r.key.0)?.as_any().downcast_ref()
    }

    pub fn get_mut<T: NodeEntity>(&mut self, r: NodeRef<T>) -> Option<&mut T> {
        self.nodes.get_mut(r.key.0)?.as_any_mut().downcast_mut()
    }

    pub fn relationship<T: RelationshipEntity>(&self, r: RelationshipRef<T>) -> Option<&T> {
        self.relationships.get(r.key.0)?.as_any().downcast_ref()
    }

    pub fn relationship_mut<T: RelationshipEntity>(
        &mut self,
        r: RelationshipRef<T>,
    ) -> Option<&mut T> {
        self.relationships.get_mut(r.key.0)?.as_any_mut().downcast_mut()
    }

    /// Store identity of any entity, if it has been persisted.
    pub fn id_of(&self, key: impl Into<EntityKey>) -> Option<EntityId> {
        match key.into() {
            EntityKey::Node(k) => self.nodes.get(k.0)?.id(),
            EntityKey::Relationship(k) => self.relationships.get(k.0)?.id(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Undo the identity changes of a discarded transaction, newest first:
    /// assigned identities are forgotten and cleared ones restored.
    pub fn revert(&mut self, changes: &[IdentityChange]) {
        for change in changes.iter().rev() {
            match *change {
                IdentityChange::Assigned(EntityKey::Node(k)) => {
                    if let Some(node) = self.nodes.get_mut(k.0) {
                        node.set_id(None);
                    }
                }
                IdentityChange::Assigned(EntityKey::Relationship(k)) => {
                    if let Some(rel) = self.relationships.get_mut(k.0) {
                        rel.set_id(None);
                    }
                }
                IdentityChange::Cleared(k, id) => {
                    if let Some(node) = self.nodes.get_mut(k.0) {
                        node.set_id(Some(id));
                    }
                }
            }
        }
    }

    /// Key of the node holding store identity `id`, if it is in this graph.
    pub fn find_node(&self, id: EntityId) -> Option<NodeKey> {
        self.nodes
            .iter()
            .position(|n| n.id() == Some(id))
            .map(NodeKey)
    }

    /// Handle to the `T` relationship holding store identity `id`.
    pub fn find_relationship<T: RelationshipEntity>(
        &self,
        id: EntityId,
    ) -> Option<RelationshipRef<T>> {
        self.relationships
            .iter()
            .position(|r| r.id() == Some(id) && r.entity_type() == TypeId::of::<T>())
            .map(|i| RelationshipRef {
                key: RelationshipKey(i),
                _marker: PhantomData,
            })
    }

    pub(crate) fn insert_erased(&mut self, node: Box<dyn ErasedNode>) -> NodeKey {
        let key = NodeKey(self.nodes.len());
        self.nodes.push(node);
        key
    }

    pub(crate) fn node_slot(&self, key: NodeKey) -> Option<&dyn ErasedNode> {
        self.nodes.get(key.0).map(|b| b.as_ref())
    }

    pub(crate) fn node_slot_mut(&mut self, key: NodeKey) -> Option<&mut dyn ErasedNode> {
        match self.nodes.get_mut(key.0) {
            Some(b) => Some(b.as_mut()),
            None => None,
        }
    }

    pub(crate) fn relationship_slot(
        &self,
        key: RelationshipKey,
    ) -> Option<&dyn ErasedRelationship> {
        self.relationships.get(key.0).map(|b| b.as_ref())
    }

    pub(crate) fn relationship_slot_mut(
        &mut self,
        key: RelationshipKey,
    ) -> Option<&mut dyn ErasedRelationship> {
        match self.relationships.get_mut(key.0) {
            Some(b) => Some(b.as_mut()),
            None => None,
        }
    }
}

impl fmt::Debug for EntityGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityGraph")
            .field("nodes", &self.nodes.len())
            .field("relationships", &self.relationships.len())
            .finish()
    }
}

/// Small entity types for unit tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use arbor_core::{ArborError, Value, ValueKind};

    use super::*;
    use crate::mapper::{EdgeField, PropertyField};

    /// A node with a name and an outgoing `NEXT` edge collection.
    #[derive(Debug)]
    pub(crate) struct Cell {
        pub id: Option<EntityId>,
        pub name: String,
        pub next: Vec<NodeRef<Cell>>,
    }

    impl Cell {
        pub fn new(name: &str) -> Self {
            Self {
                id: None,
                name: name.to_string(),
                next: Vec::new(),
            }
        }
    }

    impl NodeEntity for Cell {
        fn descriptor() -> NodeDescriptor {
            NodeDescriptor::new("Cell")
                .property(PropertyField::required("name", ValueKind::String))
                .edge(EdgeField::outgoing("next", "NEXT", "Cell"))
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
            props
        }

        fn owned_edges(&self) -> Vec<(&'static str, Vec<NodeKey>)> {
            vec![("next", self.next.iter().map(|r| r.key()).collect())]
        }

        fn hydrate(id: EntityId, properties: &PropertyMap) -> Result<Self> {
            let name = properties
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ArborError::Constraint("Cell.name is required".to_string()))?;
            Ok(Self {
                id: Some(id),
                name: name.to_string(),
                next: Vec::new(),
            })
        }
    }

    /// A weighted edge between two cells.
    #[derive(Debug)]
    pub(crate) struct Link {
        pub id: Option<EntityId>,
        pub from: NodeRef<Cell>,
        pub to: NodeRef<Cell>,
        pub weight: Option<i64>,
    }

    impl RelationshipEntity for Link {
        fn descriptor() -> RelationshipDescriptor {
            RelationshipDescriptor::new("LINK", "Cell", "Cell")
                .property(PropertyField::optional("weight", ValueKind::Int))
        }

        fn id(&self) -> Option<EntityId> {
            self.id
        }

        fn set_id(&mut self, id: Option<EntityId>) {
            self.id = id;
        }

        fn properties(&self) -> PropertyMap {
            let mut props = PropertyMap::new();
            if let Some(w) = self.weight {
                props.insert("weight".to_string(), Value::from(w));
            }
            props
        }

        fn start(&self) -> NodeKey {
            self.from.key()
        }

        fn end(&self) -> NodeKey {
            self.to.key()
        }

        fn hydrate(id: EntityId, endpoints: Endpoints, properties: &PropertyMap) -> Result<Self> {
            Ok(Self {
                id: Some(id),
                from: endpoints.start()?,
                to: endpoints.end()?,
                weight: properties.get("weight").and_then(Value::as_int),
            })
        }
    }
}

//! Arbor OGM: typed object-graph mapping over Neo4j.
//!
//! Domain types describe themselves once through explicit descriptors; a
//! [`SessionFactory`] built from those descriptors hands out [`Session`]s,
//! which persist object graphs with cascading saves inside transactions and
//! read entities back through filter chains or raw parameterized Cypher.

pub mod cascade;
pub mod client;
pub mod cypher;
pub mod entity;
pub mod executor;
pub mod filter;
pub mod mapper;
pub mod session;

pub use arbor_core::{ArborError, EntityId, Params, PropertyMap, Result, StoreConfig, Value};
pub use client::SessionFactory;
pub use entity::{
    Endpoints, EntityGraph, EntityKey, IdentityChange, NodeEntity, NodeKey, NodeRef,
    RelationshipEntity, RelationshipKey, RelationshipRef,
};
pub use executor::{Entities, QueryExecutor};
pub use filter::{BooleanOperator, ComparisonOperator, Filter, FilterBuilder, FilterChain};
pub use mapper::{
    Direction, EdgeField, EntityNamespace, MappingRegistry, NodeDescriptor, PropertyField,
    RelationshipDescriptor,
};
pub use session::{SaveSummary, Session, TransactionState};

//! arbor-core: Shared types, configuration, and error handling for Arbor.
//!
//! This crate provides the foundational pieces used by the mapper and its callers:
//! - Identity and value types (EntityId, Value, PropertyMap) for graph entities
//! - Statement parameter snapshots
//! - Store connection configuration
//! - The common error type

pub mod config;
pub mod error;
pub mod types;

pub use config::StoreConfig;
pub use error::{ArborError, Result};
pub use types::{EntityId, Params, PropertyMap, SessionId, Value, ValueKind};

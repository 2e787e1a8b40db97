//! Neo4j connection management and the session factory.

use std::fmt;
use std::sync::Arc;

use neo4rs::{ConfigBuilder, Graph};
use tokio::sync::OnceCell;

use arbor_core::{ArborError, Result, StoreConfig};

use crate::mapper::{EntityNamespace, MappingRegistry};
use crate::session::Session;

/// State shared by a factory and every session it opened.
pub(crate) struct FactoryInner {
    pub(crate) config: StoreConfig,
    pub(crate) registry: MappingRegistry,
    graph: OnceCell<Graph>,
}

impl FactoryInner {
    /// The connected store, established on first use and shared afterwards.
    pub(crate) async fn graph(&self) -> Result<Graph> {
        self.graph
            .get_or_try_init(|| connect(&self.config))
            .await
            .cloned()
    }
}

async fn connect(config: &StoreConfig) -> Result<Graph> {
    let neo_config = ConfigBuilder::default()
        .uri(&config.uri)
        .user(&config.user)
        .password(&config.password)
        .max_connections(config.max_connections as usize)
        .fetch_size(config.fetch_size)
        .build()
        .map_err(|e| ArborError::Connection(e.to_string()))?;

    let graph = Graph::connect(neo_config)
        .await
        .map_err(|e| ArborError::Connection(e.to_string()))?;

    tracing::info!(uri = %config.uri, "Connected to Neo4j");
    Ok(graph)
}

/// Produces independent sessions over one store configuration.
///
/// Construction validates the mapping registry but never contacts the
/// store; the first session operation that needs it connects. Clone is
/// cheap (inner Arc) and clones may be used from any task.
#[derive(Clone)]
pub struct SessionFactory {
    inner: Arc<FactoryInner>,
}

impl SessionFactory {
    /// Build a factory from store settings and the entity namespaces to map.
    pub fn new(config: StoreConfig, namespaces: &[EntityNamespace]) -> Result<Self> {
        let registry = MappingRegistry::from_namespaces(namespaces)?;
        tracing::debug!(
            uri = %config.uri,
            namespaces = ?namespaces.iter().map(EntityNamespace::name).collect::<Vec<_>>(),
            "Session factory ready"
        );
        Ok(Self {
            inner: Arc::new(FactoryInner {
                config,
                registry,
                graph: OnceCell::new(),
            }),
        })
    }

    pub fn open_session(&self) -> Session {
        Session::new(Arc::clone(&self.inner))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.inner.registry
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("uri", &self.inner.config.uri)
            .field("connected", &self.inner.graph.initialized())
            .finish()
    }
}

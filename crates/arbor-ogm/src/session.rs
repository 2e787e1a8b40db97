//! Transaction-scoped unit of work over the mapped store.
//!
//! A [`Session`] is used by one caller at a time (every operation takes
//! `&mut self`). Writes require an explicit transaction; reads run inside the
//! open transaction when there is one, so a session sees its own uncommitted
//! writes, and in auto-commit mode otherwise.

use std::mem;
use std::ops::AddAssign;
use std::sync::Arc;

use neo4rs::{Graph, Row, Txn};

use arbor_core::{ArborError, EntityId, Params, Result, SessionId};

use crate::cascade::{self, WriteStep};
use crate::client::FactoryInner;
use crate::cypher::{self, Statement};
use crate::entity::{
    EntityGraph, EntityKey, IdentityChange, NodeEntity, NodeRef, RelationshipEntity,
    RelationshipRef,
};
use crate::executor::{self, Column, Entities, QueryExecutor, Target};
use crate::filter::FilterChain;
use crate::mapper::{MappingRegistry, RelationshipDescriptor};

/// Lifecycle of the session's current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
}

/// What a cascading save wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_merged: usize,
    pub relationships_written: usize,
}

impl AddAssign for SaveSummary {
    fn add_assign(&mut self, other: Self) {
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.edges_merged += other.edges_merged;
        self.relationships_written += other.relationships_written;
    }
}

/// A unit of work against the store. Obtain one from
/// [`SessionFactory::open_session`](crate::SessionFactory::open_session).
pub struct Session {
    id: SessionId,
    factory: Arc<FactoryInner>,
    graph: Option<Graph>,
    txn: Option<Txn>,
    state: TransactionState,
    /// Identity changes made inside the open transaction.
    provisional: Vec<IdentityChange>,
    /// Changes from discarded transactions, oldest first, until taken.
    discarded: Vec<IdentityChange>,
}

impl Session {
    pub(crate) fn new(factory: Arc<FactoryInner>) -> Self {
        Self {
            id: SessionId::new(),
            factory,
            graph: None,
            txn: None,
            state: TransactionState::NotStarted,
            provisional: Vec::new(),
            discarded: Vec::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.state
    }

    // ── Transactions ─────────────────────────────────────────────

    /// Start a transaction. Fails if one is already active.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        if self.state == TransactionState::Active {
            return Err(ArborError::TransactionState(
                "a transaction is already active on this session".to_string(),
            ));
        }
        let graph = self.store().await?;
        let txn = graph
            .start_txn()
            .await
            .map_err(|e| executor::store_error(e, &Statement::new("BEGIN")))?;

        self.txn = Some(txn);
        self.state = TransactionState::Active;
        tracing::debug!(session = %self.id, "Transaction started");
        Ok(())
    }

    /// Apply every write since `begin_transaction`, all or nothing.
    ///
    /// On failure nothing was applied; the session has no active transaction
    /// and the identities assigned in it are available from
    /// [`take_discarded_identities`](Self::take_discarded_identities).
    pub async fn commit(&mut self) -> Result<()> {
        let txn = self.take_active("commit")?;
        match txn.commit().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                let changes = mem::take(&mut self.provisional).len();
                tracing::info!(
                    session = %self.id,
                    identity_changes = changes,
                    "Transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                self.discard_provisional();
                tracing::warn!(
                    session = %self.id,
                    error = %e,
                    "Commit failed; transaction discarded"
                );
                Err(executor::store_error(e, &Statement::new("COMMIT")))
            }
        }
    }

    /// Discard every write since `begin_transaction`.
    pub async fn rollback(&mut self) -> Result<()> {
        let txn = self.take_active("roll back")?;
        self.state = TransactionState::RolledBack;
        let changes = self.provisional.len();
        self.discard_provisional();
        tracing::warn!(
            session = %self.id,
            identity_changes = changes,
            "Transaction rolled back"
        );
        txn.rollback()
            .await
            .map_err(|e| executor::store_error(e, &Statement::new("ROLLBACK")))
    }

    /// Identity changes made inside every transaction discarded since the
    /// last call. Pass them to [`EntityGraph::revert`].
    pub fn take_discarded_identities(&mut self) -> Vec<IdentityChange> {
        mem::take(&mut self.discarded)
    }

    fn discard_provisional(&mut self) {
        self.discarded.append(&mut self.provisional);
    }

    fn take_active(&mut self, action: &str) -> Result<Txn> {
        match (self.state, self.txn.take()) {
            (TransactionState::Active, Some(txn)) => Ok(txn),
            _ => Err(ArborError::TransactionState(format!(
                "cannot {action}: no active transaction"
            ))),
        }
    }

    fn require_active(&self, action: &str) -> Result<()> {
        if self.state == TransactionState::Active && self.txn.is_some() {
            Ok(())
        } else {
            Err(ArborError::TransactionState(format!(
                "{action} requires an active transaction"
            )))
        }
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Cascading upsert of `root` and everything reachable through owned edges.
    ///
    /// Each reachable node is written once; owned edges follow their
    /// endpoints; a relationship root is written after both endpoints hold
    /// identities. On error the transaction stays active and should be
    /// rolled back.
    pub async fn save(
        &mut self,
        graph: &mut EntityGraph,
        root: impl Into<EntityKey>,
    ) -> Result<SaveSummary> {
        self.require_active("save")?;
        let root = root.into();
        let registry = &self.factory.registry;
        let plan = cascade::plan(graph, registry, root)?;

        let Some(txn) = self.txn.as_mut() else {
            return Err(ArborError::TransactionState(
                "save requires an active transaction".to_string(),
            ));
        };
        let mut exec = QueryExecutor::new(Target::Txn(txn));
        let mut summary = SaveSummary::default();

        for step in plan.steps {
            match step {
                WriteStep::Node { key, create } => {
                    let slot = graph.node_slot(key).ok_or_else(|| {
                        ArborError::Constraint(format!("node {key:?} is not in this graph"))
                    })?;
                    let descriptor = registry.node_by_type(slot.entity_type(), slot.type_name())?;
                    let props = slot.properties();
                    descriptor.conform(&props)?;

                    if create {
                        let stmt =
                            cypher::create_node(descriptor.label, &descriptor.properties, &props);
                        let id = exec.returning_id(&stmt).await?.ok_or_else(|| {
                            let message = "create returned no identity";
                            ArborError::query(message, &stmt.text, &stmt.params)
                        })?;
                        if let Some(slot) = graph.node_slot_mut(key) {
                            slot.set_id(Some(id));
                        }
                        self.provisional.push(IdentityChange::Assigned(key.into()));
                        summary.nodes_created += 1;
                    } else {
                        let id = slot.id().ok_or_else(|| {
                            let message = format!("{} lost its identity", descriptor.label);
                            ArborError::Constraint(message)
                        })?;
                        let stmt = cypher::update_node(
                            descriptor.label,
                            id,
                            &descriptor.properties,
                            &props,
                        );
                        if exec.returning_id(&stmt).await?.is_none() {
                            return Err(ArborError::Constraint(format!(
                                "{} {id} no longer exists in the store",
                                descriptor.label
                            )));
                        }
                        summary.nodes_updated += 1;
                    }
                }
                WriteStep::Edge { from, to, label } => {
                    let (Some(from_id), Some(to_id)) = (graph.id_of(from), graph.id_of(to)) else {
                        return Err(ArborError::Constraint(format!(
                            "{label} edge endpoints must be persisted first"
                        )));
                    };
                    let stmt = cypher::merge_edge(label, from_id, to_id);
                    let written = exec.returning_id(&stmt).await?;
                    edge_written(label, (from_id, to_id), written)?;
                    summary.edges_merged += 1;
                }
                WriteStep::Relationship { key, create } => {
                    let slot = graph.relationship_slot(key).ok_or_else(|| {
                        ArborError::Constraint(format!("relationship {key:?} is not in this graph"))
                    })?;
                    let descriptor =
                        registry.relationship_by_type(slot.entity_type(), slot.type_name())?;
                    let ends = (graph.id_of(slot.start()), graph.id_of(slot.end()));
                    let (Some(start), Some(end)) = ends else {
                        return Err(ArborError::Constraint(format!(
                            "{} cannot be saved until both endpoints have identities",
                            descriptor.label
                        )));
                    };
                    let props = slot.properties();
                    descriptor.conform(&props)?;

                    if create {
                        let stmt = cypher::create_relationship(
                            descriptor.label,
                            start,
                            end,
                            &descriptor.properties,
                            &props,
                        );
                        let id = exec.returning_id(&stmt).await?.ok_or_else(|| {
                            let message = "create returned no identity";
                            ArborError::query(message, &stmt.text, &stmt.params)
                        })?;
                        if let Some(slot) = graph.relationship_slot_mut(key) {
                            slot.set_id(Some(id));
                        }
                        self.provisional.push(IdentityChange::Assigned(key.into()));
                    } else {
                        let id = slot.id().ok_or_else(|| {
                            let message = format!("{} lost its identity", descriptor.label);
                            ArborError::Constraint(message)
                        })?;
                        let stmt = cypher::update_relationship(
                            descriptor.label,
                            id,
                            &descriptor.properties,
                            &props,
                        );
                        if exec.returning_id(&stmt).await?.is_none() {
                            return Err(ArborError::Constraint(format!(
                                "{} {id} no longer exists in the store",
                                descriptor.label
                            )));
                        }
                    }
                    summary.relationships_written += 1;
                }
            }
        }

        tracing::debug!(
            session = %self.id,
            created = summary.nodes_created,
            updated = summary.nodes_updated,
            edges = summary.edges_merged,
            relationships = summary.relationships_written,
            "Cascading save complete"
        );
        Ok(summary)
    }

    /// Detach-delete a persisted node and clear its identity.
    ///
    /// Returns false when the node was never persisted or is already gone.
    /// The cleared identity is restored by [`EntityGraph::revert`] if the
    /// transaction is discarded.
    pub async fn delete<T: NodeEntity>(
        &mut self,
        graph: &mut EntityGraph,
        node: NodeRef<T>,
    ) -> Result<bool> {
        self.require_active("delete")?;
        self.factory.registry.node::<T>()?;
        let Some(id) = graph.id_of(node) else {
            return Ok(false);
        };

        let deleted = self.executor().await?.count(&cypher::delete_node(id)).await?;
        if let Some(entity) = graph.get_mut(node) {
            entity.set_id(None);
            self.provisional.push(IdentityChange::Cleared(node.key(), id));
        }
        Ok(deleted > 0)
    }

    /// Remove every node and relationship from the store.
    ///
    /// Refused unless `allow_purge` is configured. Runs inside the active
    /// transaction if there is one, otherwise in its own transaction, so the
    /// store is either fully purged or untouched.
    pub async fn purge_database(&mut self) -> Result<()> {
        if !self.factory.config.allow_purge {
            tracing::warn!(session = %self.id, "Purge refused: allow_purge is not set");
            return Err(ArborError::PurgeNotPermitted);
        }
        let stmt = cypher::purge();

        if let Some(txn) = self.txn.as_mut() {
            QueryExecutor::new(Target::Txn(txn)).rows(&stmt).await?;
            tracing::info!(session = %self.id, "Database purge staged in active transaction");
            return Ok(());
        }

        let graph = self.store().await?;
        let mut txn = graph
            .start_txn()
            .await
            .map_err(|e| executor::store_error(e, &stmt))?;
        if let Err(e) = QueryExecutor::new(Target::Txn(&mut txn)).rows(&stmt).await {
            if let Err(rollback) = txn.rollback().await {
                tracing::warn!(
                    session = %self.id,
                    error = %rollback,
                    "Rollback after failed purge also failed"
                );
            }
            return Err(e);
        }
        txn.commit()
            .await
            .map_err(|e| executor::store_error(e, &stmt))?;
        tracing::info!(session = %self.id, "Database purged");
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────

    /// All `T` whose stored properties satisfy `filters`, hydrated lazily.
    pub async fn load_all<T: NodeEntity>(
        &mut self,
        filters: impl Into<FilterChain>,
    ) -> Result<Entities<T>> {
        let chain = filters.into();
        let descriptor = self.factory.registry.node::<T>()?.clone();
        chain.validate(&descriptor)?;

        let stmt = cypher::match_nodes(descriptor.label, &chain);
        let rows = self.executor().await?.rows(&stmt).await?;
        Ok(Entities::new(rows, descriptor, Column::Alias(cypher::NODE_ALIAS), stmt))
    }

    /// One `T` by store identity.
    pub async fn load<T: NodeEntity>(&mut self, id: EntityId) -> Result<Option<T>> {
        let descriptor = self.factory.registry.node::<T>()?.clone();
        let stmt = cypher::node_by_id(descriptor.label, id);
        let rows = self.executor().await?.rows(&stmt).await?;
        Entities::new(rows, descriptor, Column::Alias(cypher::NODE_ALIAS), stmt)
            .next()
            .transpose()
    }

    /// Number of `T` whose stored properties satisfy `filters`.
    pub async fn count<T: NodeEntity>(&mut self, filters: impl Into<FilterChain>) -> Result<i64> {
        let chain = filters.into();
        let descriptor = self.factory.registry.node::<T>()?;
        chain.validate(descriptor)?;

        let stmt = cypher::count_nodes(descriptor.label, &chain);
        self.executor().await?.count(&stmt).await
    }

    /// Run a raw statement with named parameters and hydrate each row into `T`.
    ///
    /// Each row must hold exactly one node column.
    pub async fn query<T: NodeEntity>(
        &mut self,
        statement: &str,
        params: &Params,
    ) -> Result<Entities<T>> {
        let descriptor = self.factory.registry.node::<T>()?.clone();
        let stmt = executor::raw_statement(statement, params);
        executor::check_parameters(&stmt)?;

        let rows = self.executor().await?.rows(&stmt).await?;
        Ok(Entities::new(rows, descriptor, Column::Only, stmt))
    }

    /// All `R` whose stored properties satisfy `filters`, added to `graph`.
    ///
    /// Endpoints already in `graph` (matched by identity) are reused; missing
    /// ones are loaded and added too. A relationship already in `graph` is
    /// returned as is.
    pub async fn load_all_relationships<R: RelationshipEntity>(
        &mut self,
        graph: &mut EntityGraph,
        filters: impl Into<FilterChain>,
    ) -> Result<Vec<RelationshipRef<R>>> {
        let chain = filters.into();
        let factory = Arc::clone(&self.factory);
        let descriptor = factory.registry.relationship::<R>()?;
        chain.validate_relationship(descriptor)?;

        let stmt = cypher::match_relationships(descriptor, &chain);
        let rows = self.executor().await?.rows(&stmt).await?;
        let column = Column::Alias(cypher::RELATIONSHIP_ALIAS);
        self.attach_relationships(graph, &factory.registry, descriptor, column, &stmt, rows)
            .await
    }

    /// Run a raw statement whose rows each hold one relationship column and
    /// add the relationships to `graph` the way
    /// [`load_all_relationships`](Self::load_all_relationships) does.
    pub async fn query_relationships<R: RelationshipEntity>(
        &mut self,
        graph: &mut EntityGraph,
        statement: &str,
        params: &Params,
    ) -> Result<Vec<RelationshipRef<R>>> {
        let factory = Arc::clone(&self.factory);
        let descriptor = factory.registry.relationship::<R>()?;
        let stmt = executor::raw_statement(statement, params);
        executor::check_parameters(&stmt)?;

        let rows = self.executor().await?.rows(&stmt).await?;
        self.attach_relationships(graph, &factory.registry, descriptor, Column::Only, &stmt, rows)
            .await
    }

    async fn attach_relationships<R: RelationshipEntity>(
        &mut self,
        graph: &mut EntityGraph,
        registry: &MappingRegistry,
        descriptor: &RelationshipDescriptor,
        column: Column,
        stmt: &Statement,
        rows: Vec<Row>,
    ) -> Result<Vec<RelationshipRef<R>>> {
        let mut loaded = Vec::with_capacity(rows.len());
        for row in &rows {
            let rel: neo4rs::Relation = executor::row_column(row, column)
                .map_err(|message| ArborError::query(message, &stmt.text, &stmt.params))?;
            if rel.typ() != descriptor.label {
                return Err(ArborError::Mapping(format!(
                    "expected a {} relationship, found {}",
                    descriptor.label,
                    rel.typ()
                )));
            }

            let id = EntityId(rel.id());
            if let Some(existing) = graph.find_relationship::<R>(id) {
                loaded.push(existing);
                continue;
            }
            let ends = (EntityId(rel.start_node_id()), EntityId(rel.end_node_id()));
            for node_id in [ends.0, ends.1] {
                if graph.find_node(node_id).is_none() {
                    self.load_endpoint(graph, registry, node_id).await?;
                }
            }

            let props = executor::relation_properties(&rel, descriptor)?;
            let entity: R = executor::hydrate_relationship(graph, descriptor, id, ends, &props)?;
            loaded.push(graph.relate(entity));
        }
        tracing::debug!(
            session = %self.id,
            relationship = descriptor.label,
            loaded = loaded.len(),
            "Relationships loaded"
        );
        Ok(loaded)
    }

    async fn load_endpoint(
        &mut self,
        graph: &mut EntityGraph,
        registry: &MappingRegistry,
        id: EntityId,
    ) -> Result<()> {
        let stmt = cypher::node_by_identity(id);
        let row = self.executor().await?.first(&stmt).await?.ok_or_else(|| {
            ArborError::Constraint(format!("endpoint node {id} no longer exists in the store"))
        })?;
        let node: neo4rs::Node = executor::row_column(&row, Column::Alias(cypher::NODE_ALIAS))
            .map_err(|message| ArborError::query(message, &stmt.text, &stmt.params))?;
        graph.insert_erased(executor::hydrate_any(registry, &node)?);
        Ok(())
    }

    // ── Plumbing ─────────────────────────────────────────────────

    async fn store(&mut self) -> Result<Graph> {
        if let Some(graph) = &self.graph {
            return Ok(graph.clone());
        }
        let graph = self.factory.graph().await?;
        self.graph = Some(graph.clone());
        Ok(graph)
    }

    /// Executor over the open transaction, or auto-commit when there is none.
    async fn executor(&mut self) -> Result<QueryExecutor<'_>> {
        if self.txn.is_none() && self.graph.is_none() {
            self.graph = Some(self.factory.graph().await?);
        }
        match (self.txn.as_mut(), self.graph.as_ref()) {
            (Some(txn), _) => Ok(QueryExecutor::new(Target::Txn(txn))),
            (None, Some(graph)) => Ok(QueryExecutor::new(Target::Graph(graph))),
            (None, None) => Err(ArborError::Connection("store is not connected".to_string())),
        }
    }
}

/// A merged edge returns its identity; no row means an endpoint is gone.
fn edge_written(
    label: &str,
    (from, to): (EntityId, EntityId),
    written: Option<EntityId>,
) -> Result<EntityId> {
    written.ok_or_else(|| {
        ArborError::Constraint(format!(
            "{label} edge from {from} to {to} was not written: \
             an endpoint no longer exists in the store"
        ))
    })
}

//! Statement binding, submission, and row hydration.
//!
//! Every statement, generated or raw, is bound and submitted here. Named
//! parameters are resolved against the supplied map before anything reaches
//! the store; an unresolved `$name` is rejected instead of being passed
//! through. Node rows are hydrated through the entity's descriptor, the same
//! way for filtered loads and raw queries.

use std::collections::HashMap;
use std::marker::PhantomData;

use neo4rs::{BoltType, Graph, Row, Txn};

use arbor_core::{ArborError, EntityId, Params, PropertyMap, Result, Value, ValueKind};

use crate::cypher::Statement;
use crate::entity::{EntityGraph, Endpoints, ErasedNode, NodeEntity, RelationshipEntity};
use crate::mapper::{MappingRegistry, NodeDescriptor, PropertyField, RelationshipDescriptor};

// ── Parameter binding ────────────────────────────────────────────

/// Names of all `$parameters` referenced by a statement, in first-use order.
///
/// String literals, backtick-quoted identifiers and comments are skipped.
pub fn parameter_names(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            quote @ ('\'' | '"' | '`') => {
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' && quote != '`' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '$' => {
                i += 1;
                let name: String = if chars.get(i) == Some(&'`') {
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != '`' {
                        i += 1;
                    }
                    let name = chars[start..i.min(chars.len())].iter().collect();
                    i += 1;
                    name
                } else {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    chars[start..i].iter().collect()
                };
                if !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
            }
            _ => i += 1,
        }
    }
    names
}

/// Reject a statement that references a parameter it does not supply.
pub fn check_parameters(statement: &Statement) -> Result<()> {
    let missing: Vec<String> = parameter_names(&statement.text)
        .into_iter()
        .filter(|name| !statement.params.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(ArborError::query(
            format!("unresolved parameter(s): ${}", missing.join(", $")),
            &statement.text,
            &statement.params,
        ));
    }
    Ok(())
}

/// Bind `params` into a store query, rejecting unresolved parameter names.
pub fn bind(statement: &Statement) -> Result<neo4rs::Query> {
    check_parameters(statement)?;
    let query = statement
        .params
        .iter()
        .fold(neo4rs::query(&statement.text), |q, (name, value)| {
            q.param(name, to_bolt(value.as_ref()))
        });
    Ok(query)
}

fn to_bolt(value: Option<&Value>) -> BoltType {
    match value {
        None => BoltType::Null(neo4rs::BoltNull),
        Some(Value::Bool(b)) => BoltType::from(*b),
        Some(Value::Int(i)) => BoltType::from(*i),
        Some(Value::Float(f)) => BoltType::from(*f),
        Some(Value::String(s)) => BoltType::from(s.clone()),
    }
}

pub(crate) fn store_error(err: neo4rs::Error, statement: &Statement) -> ArborError {
    match err {
        neo4rs::Error::IOError { .. }
        | neo4rs::Error::ConnectionError
        | neo4rs::Error::AuthenticationError(_) => ArborError::Connection(err.to_string()),
        other => ArborError::query(other.to_string(), &statement.text, &statement.params),
    }
}

// ── Execution ────────────────────────────────────────────────────

/// Where statements go: the session's open transaction, or auto-commit.
pub(crate) enum Target<'a> {
    Txn(&'a mut Txn),
    Graph(&'a Graph),
}

/// Submits bound statements to one target.
pub struct QueryExecutor<'a> {
    target: Target<'a>,
}

impl<'a> QueryExecutor<'a> {
    pub(crate) fn new(target: Target<'a>) -> Self {
        Self { target }
    }

    /// Execute a statement and collect every returned row.
    pub async fn rows(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        let query = bind(statement)?;
        tracing::debug!(
            statement = %statement.text,
            params = statement.params.len(),
            "Executing statement"
        );

        let result = match &mut self.target {
            Target::Txn(txn) => collect_in_txn(txn, query).await,
            Target::Graph(graph) => collect_autocommit(graph, query).await,
        };
        result.map_err(|e| store_error(e, statement))
    }

    /// Execute a statement and return its first row, if any.
    pub async fn first(&mut self, statement: &Statement) -> Result<Option<Row>> {
        Ok(self.rows(statement).await?.into_iter().next())
    }

    /// Execute a write statement that returns `id` and read that identity.
    pub async fn returning_id(&mut self, statement: &Statement) -> Result<Option<EntityId>> {
        match self.first(statement).await? {
            Some(row) => {
                let id: i64 = row.get("id").map_err(|e| {
                    ArborError::query(
                        format!("statement did not return an id: {e}"),
                        &statement.text,
                        &statement.params,
                    )
                })?;
                Ok(Some(EntityId(id)))
            }
            None => Ok(None),
        }
    }

    /// Execute a statement that returns a single `count` column.
    pub async fn count(&mut self, statement: &Statement) -> Result<i64> {
        let row = self.first(statement).await?;
        read_count(row.as_ref(), statement)
    }
}

/// No row counts as zero; a row without a numeric `count` column is an error.
fn read_count(row: Option<&Row>, statement: &Statement) -> Result<i64> {
    match row {
        Some(row) => row.get::<i64>("count").map_err(|e| {
            ArborError::query(
                format!("statement did not return a count: {e}"),
                &statement.text,
                &statement.params,
            )
        }),
        None => Ok(0),
    }
}

async fn collect_in_txn(
    txn: &mut Txn,
    query: neo4rs::Query,
) -> std::result::Result<Vec<Row>, neo4rs::Error> {
    let mut stream = txn.execute(query).await?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await? {
        rows.push(row);
    }
    Ok(rows)
}

async fn collect_autocommit(
    graph: &Graph,
    query: neo4rs::Query,
) -> std::result::Result<Vec<Row>, neo4rs::Error> {
    let mut stream = graph.execute(query).await?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next().await? {
        rows.push(row);
    }
    Ok(rows)
}

// ── Hydration ────────────────────────────────────────────────────

/// Which column of a row holds the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Column {
    /// The alias used by generated statements.
    Alias(&'static str),
    /// Whatever single column a raw statement returns.
    Only,
}

/// Read declared fields from a stored entity through `get`.
fn read_properties(
    owner: &str,
    fields: &[PropertyField],
    present: &[&str],
    get: impl Fn(&str, ValueKind) -> Option<Value>,
) -> Result<PropertyMap> {
    let mut props = PropertyMap::new();
    for field in fields {
        if !present.contains(&field.name) {
            continue;
        }
        let value = get(field.name, field.kind).ok_or_else(|| {
            ArborError::Mapping(format!(
                "stored {owner}.{} is not a {}",
                field.name, field.kind
            ))
        })?;
        props.insert(field.name.to_string(), value);
    }
    Ok(props)
}

fn node_properties(
    node: &neo4rs::Node,
    owner: &str,
    fields: &[PropertyField],
) -> Result<PropertyMap> {
    read_properties(owner, fields, &node.keys(), |name, kind| match kind {
        ValueKind::Bool => node.get::<bool>(name).ok().map(Value::Bool),
        ValueKind::Int => node.get::<i64>(name).ok().map(Value::Int),
        ValueKind::Float => node.get::<f64>(name).ok().map(Value::Float),
        ValueKind::String => node.get::<String>(name).ok().map(Value::String),
    })
}

pub(crate) fn relation_properties(
    rel: &neo4rs::Relation,
    descriptor: &RelationshipDescriptor,
) -> Result<PropertyMap> {
    read_properties(descriptor.label, &descriptor.properties, &rel.keys(), |name, kind| {
        match kind {
            ValueKind::Bool => rel.get::<bool>(name).ok().map(Value::Bool),
            ValueKind::Int => rel.get::<i64>(name).ok().map(Value::Int),
            ValueKind::Float => rel.get::<f64>(name).ok().map(Value::Float),
            ValueKind::String => rel.get::<String>(name).ok().map(Value::String),
        }
    })
}

/// Build an entity from stored properties after checking them against the descriptor.
pub(crate) fn hydrate<T: NodeEntity>(
    descriptor: &NodeDescriptor,
    id: EntityId,
    props: &PropertyMap,
) -> Result<T> {
    descriptor.conform(props)?;
    T::hydrate(id, props)
}

/// Rebuild a stored node of any registered type, chosen by its labels.
pub(crate) fn hydrate_any(
    registry: &MappingRegistry,
    node: &neo4rs::Node,
) -> Result<Box<dyn ErasedNode>> {
    let labels = node.labels();
    let (descriptor, hydrate) = labels
        .iter()
        .find_map(|label| registry.node_by_label(label))
        .ok_or_else(|| {
            ArborError::Mapping(format!("no node type registered for labels {labels:?}"))
        })?;
    let props = node_properties(node, descriptor.label, &descriptor.properties)?;
    descriptor.conform(&props)?;
    hydrate(EntityId(node.id()), &props)
}

/// Build a relationship whose endpoints are already in `graph`.
pub(crate) fn hydrate_relationship<R: RelationshipEntity>(
    graph: &EntityGraph,
    descriptor: &RelationshipDescriptor,
    id: EntityId,
    (start, end): (EntityId, EntityId),
    props: &PropertyMap,
) -> Result<R> {
    let endpoint = |node_id: EntityId, role: &str| {
        graph
            .find_node(node_id)
            .and_then(|key| Some((key, graph.node_slot(key)?.entity_type())))
            .ok_or_else(|| {
                ArborError::Constraint(format!(
                    "{} {id} {role} node {node_id} is not loaded",
                    descriptor.label
                ))
            })
    };
    let endpoints = Endpoints::new(endpoint(start, "start")?, endpoint(end, "end")?);
    descriptor.conform(props)?;
    R::hydrate(id, endpoints, props)
}

/// Take the entity column out of a row.
pub(crate) fn row_column<'r, T>(row: &'r Row, column: Column) -> std::result::Result<T, String>
where
    T: serde::Deserialize<'r>,
{
    match column {
        Column::Alias(alias) => row.get::<T>(alias).map_err(|e| e.to_string()),
        Column::Only => {
            let mut columns: HashMap<String, T> = row
                .to()
                .map_err(|e| format!("rows must contain exactly one entity column: {e}"))?;
            if columns.len() != 1 {
                return Err(format!(
                    "rows must contain exactly one entity column, found {}",
                    columns.len()
                ));
            }
            let value = columns.drain().next().map(|(_, value)| value);
            value.ok_or_else(|| "row has no columns".to_string())
        }
    }
}

/// Lazily hydrated entities from a fetched row set.
///
/// Rows are fetched up front; each row is mapped into `T` only when the
/// iterator reaches it.
pub struct Entities<T> {
    rows: std::vec::IntoIter<Row>,
    descriptor: NodeDescriptor,
    column: Column,
    statement: Statement,
    _marker: PhantomData<fn() -> T>,
}

impl<T: NodeEntity> Entities<T> {
    pub(crate) fn new(
        rows: Vec<Row>,
        descriptor: NodeDescriptor,
        column: Column,
        statement: Statement,
    ) -> Self {
        Self {
            rows: rows.into_iter(),
            descriptor,
            column,
            statement,
            _marker: PhantomData,
        }
    }

    /// Hydrate every remaining row, stopping at the first failure.
    pub fn collect_all(self) -> Result<Vec<T>> {
        self.collect()
    }

    fn map_row(&self, row: &Row) -> Result<T> {
        let node: neo4rs::Node = row_column(row, self.column).map_err(|message| {
            ArborError::query(message, &self.statement.text, &self.statement.params)
        })?;
        let props = node_properties(&node, self.descriptor.label, &self.descriptor.properties)?;
        hydrate(&self.descriptor, EntityId(node.id()), &props)
    }
}

impl<T: NodeEntity> Iterator for Entities<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(self.map_row(&row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<T: NodeEntity> ExactSizeIterator for Entities<T> {}

/// Snapshot used when a raw statement's parameters are reported back.
pub(crate) fn raw_statement(text: &str, params: &Params) -> Statement {
    Statement {
        text: text.to_string(),
        params: params.clone(),
    }
}

//! Cypher statement builders for mapped entities.
//!
//! Every statement the session submits is built here. Labels and property
//! names come from descriptors and are backtick-escaped; all values travel
//! as parameters, never as interpolated text.

use arbor_core::{EntityId, Params, PropertyMap, Value};

use crate::filter::FilterChain;
use crate::mapper::{PropertyField, RelationshipDescriptor};

/// Variable bound to the matched node in generated reads.
pub const NODE_ALIAS: &str = "n";

/// Variable bound to the matched relationship in generated reads.
pub const RELATIONSHIP_ALIAS: &str = "r";

/// Statement text plus its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: Params,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Params::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), Some(value.into()));
        self
    }
}

/// Quote a label or property name as a Cypher identifier.
pub fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Build `SET` assignments for declared fields. With `clear_absent`, absent
/// fields are assigned `null`, which removes them from the stored entity.
fn set_clause(
    alias: &str,
    fields: &[PropertyField],
    props: &PropertyMap,
    clear_absent: bool,
    params: &mut Params,
) -> Option<String> {
    let assignments: Vec<String> = fields
        .iter()
        .enumerate()
        .filter_map(|(i, field)| {
            let value = props.get(field.name).cloned();
            if value.is_none() && !clear_absent {
                return None;
            }
            let name = format!("p{i}");
            let assignment = format!("{alias}.{} = ${name}", escape_identifier(field.name));
            params.insert(name, value);
            Some(assignment)
        })
        .collect();

    if assignments.is_empty() {
        None
    } else {
        Some(format!(" SET {}", assignments.join(", ")))
    }
}

pub fn create_node(label: &str, fields: &[PropertyField], props: &PropertyMap) -> Statement {
    let mut params = Params::new();
    let set = set_clause("n", fields, props, false, &mut params).unwrap_or_default();
    Statement {
        text: format!(
            "CREATE (n:{}){set} RETURN id(n) AS id",
            escape_identifier(label)
        ),
        params,
    }
}

pub fn update_node(
    label: &str,
    id: EntityId,
    fields: &[PropertyField],
    props: &PropertyMap,
) -> Statement {
    let mut params = Params::new();
    let set = set_clause("n", fields, props, true, &mut params).unwrap_or_default();
    params.insert("id".to_string(), Some(Value::Int(id.0)));
    Statement {
        text: format!(
            "MATCH (n:{}) WHERE id(n) = $id{set} RETURN id(n) AS id",
            escape_identifier(label)
        ),
        params,
    }
}

/// Idempotent owned edge between two persisted nodes.
pub fn merge_edge(label: &str, from: EntityId, to: EntityId) -> Statement {
    Statement::new(format!(
        "MATCH (a), (b) WHERE id(a) = $from AND id(b) = $to \
         MERGE (a)-[r:{}]->(b) RETURN id(r) AS id",
        escape_identifier(label)
    ))
    .param("from", from.0)
    .param("to", to.0)
}

pub fn create_relationship(
    label: &str,
    start: EntityId,
    end: EntityId,
    fields: &[PropertyField],
    props: &PropertyMap,
) -> Statement {
    let mut params = Params::new();
    let set = set_clause("r", fields, props, false, &mut params).unwrap_or_default();
    params.insert("start".to_string(), Some(Value::Int(start.0)));
    params.insert("end".to_string(), Some(Value::Int(end.0)));
    Statement {
        text: format!(
            "MATCH (a), (b) WHERE id(a) = $start AND id(b) = $end \
             CREATE (a)-[r:{}]->(b){set} RETURN id(r) AS id",
            escape_identifier(label)
        ),
        params,
    }
}

pub fn update_relationship(
    label: &str,
    id: EntityId,
    fields: &[PropertyField],
    props: &PropertyMap,
) -> Statement {
    let mut params = Params::new();
    let set = set_clause("r", fields, props, true, &mut params).unwrap_or_default();
    params.insert("id".to_string(), Some(Value::Int(id.0)));
    Statement {
        text: format!(
            "MATCH ()-[r:{}]->() WHERE id(r) = $id{set} RETURN id(r) AS id",
            escape_identifier(label)
        ),
        params,
    }
}

fn where_clause(alias: &str, chain: &FilterChain, params: &mut Params) -> String {
    chain
        .to_cypher(alias, params)
        .map(|expr| format!(" WHERE {expr}"))
        .unwrap_or_default()
}

/// All nodes with `label` passing `chain`, returned as column `n`.
pub fn match_nodes(label: &str, chain: &FilterChain) -> Statement {
    let mut params = Params::new();
    let filter = where_clause(NODE_ALIAS, chain, &mut params);
    Statement {
        text: format!(
            "MATCH ({NODE_ALIAS}:{}){filter} RETURN {NODE_ALIAS}",
            escape_identifier(label)
        ),
        params,
    }
}

pub fn count_nodes(label: &str, chain: &FilterChain) -> Statement {
    let mut params = Params::new();
    let filter = where_clause(NODE_ALIAS, chain, &mut params);
    Statement {
        text: format!(
            "MATCH ({NODE_ALIAS}:{}){filter} RETURN count({NODE_ALIAS}) AS count",
            escape_identifier(label)
        ),
        params,
    }
}

pub fn node_by_id(label: &str, id: EntityId) -> Statement {
    Statement::new(format!(
        "MATCH ({NODE_ALIAS}:{}) WHERE id({NODE_ALIAS}) = $id RETURN {NODE_ALIAS}",
        escape_identifier(label)
    ))
    .param("id", id.0)
}

/// Any node by identity, whatever its label.
pub fn node_by_identity(id: EntityId) -> Statement {
    Statement::new(format!(
        "MATCH ({NODE_ALIAS}) WHERE id({NODE_ALIAS}) = $id RETURN {NODE_ALIAS}"
    ))
    .param("id", id.0)
}

/// All relationships of a type between its declared endpoint labels,
/// passing `chain`, returned as column `r`.
pub fn match_relationships(descriptor: &RelationshipDescriptor, chain: &FilterChain) -> Statement {
    let mut params = Params::new();
    let filter = where_clause(RELATIONSHIP_ALIAS, chain, &mut params);
    Statement {
        text: format!(
            "MATCH (:{})-[{RELATIONSHIP_ALIAS}:{}]->(:{}){filter} RETURN {RELATIONSHIP_ALIAS}",
            escape_identifier(descriptor.start),
            escape_identifier(descriptor.label),
            escape_identifier(descriptor.end)
        ),
        params,
    }
}

pub fn delete_node(id: EntityId) -> Statement {
    Statement::new("MATCH (n) WHERE id(n) = $id DETACH DELETE n RETURN count(*) AS count")
        .param("id", id.0)
}

pub fn purge() -> Statement {
    Statement::new("MATCH (n) DETACH DELETE n")
}

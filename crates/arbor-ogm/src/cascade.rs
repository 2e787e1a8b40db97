//! Cascading save planning.
//!
//! A save starting at one entity writes every node reachable through owned
//! edges, exactly once, followed by the owned edges themselves and finally
//! the root relationship (if the root is one). Planning is pure: it reads
//! the arena and the registry and never touches the store, so the order and
//! the visited-set behaviour can be checked without a database.

use std::collections::HashSet;

use arbor_core::{ArborError, Result};

use crate::entity::{EntityGraph, EntityKey, NodeKey, RelationshipKey};
use crate::mapper::{Direction, MappingRegistry};

/// One write in a cascading save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStep {
    /// Create (no identity yet) or update a node.
    Node { key: NodeKey, create: bool },
    /// Merge an owned edge. Both endpoints are written by earlier steps.
    Edge {
        from: NodeKey,
        to: NodeKey,
        label: &'static str,
    },
    /// Create or update a relationship entity. Endpoints are written first.
    Relationship { key: RelationshipKey, create: bool },
}

/// Ordered writes for one `save` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavePlan {
    pub steps: Vec<WriteStep>,
}

impl SavePlan {
    pub fn node_writes(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.steps.iter().filter_map(|s| match s {
            WriteStep::Node { key, .. } => Some(*key),
            _ => None,
        })
    }

    pub fn edge_writes(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, WriteStep::Edge { .. }))
            .count()
    }
}

/// Plan a cascading save rooted at `root`.
pub fn plan(graph: &EntityGraph, registry: &MappingRegistry, root: EntityKey) -> Result<SavePlan> {
    let mut walk = Walk {
        graph,
        registry,
        visited: HashSet::new(),
        nodes: Vec::new(),
        edges: Vec::new(),
        seen_edges: HashSet::new(),
    };

    let relationship = match root {
        EntityKey::Node(key) => {
            walk.visit(key)?;
            None
        }
        EntityKey::Relationship(key) => {
            let rel = graph.relationship_slot(key).ok_or_else(|| {
                ArborError::Constraint(format!("relationship {key:?} is not in this graph"))
            })?;
            let descriptor = registry.relationship_by_type(rel.entity_type(), rel.type_name())?;

            for (endpoint, expected, role) in [
                (rel.start(), descriptor.start, "start"),
                (rel.end(), descriptor.end, "end"),
            ] {
                let node = graph.node_slot(endpoint).ok_or_else(|| {
                    ArborError::Constraint(format!(
                        "{} {role} node {endpoint:?} is not in this graph",
                        descriptor.label
                    ))
                })?;
                let label = registry.node_by_type(node.entity_type(), node.type_name())?.label;
                if label != expected {
                    return Err(ArborError::Mapping(format!(
                        "{} {role} must be {expected}, found {label}",
                        descriptor.label
                    )));
                }
                walk.visit(endpoint)?;
            }
            Some(WriteStep::Relationship {
                key,
                create: rel.id().is_none(),
            })
        }
    };

    let mut steps = walk.nodes;
    steps.extend(walk.edges);
    steps.extend(relationship);
    Ok(SavePlan { steps })
}

struct Walk<'a> {
    graph: &'a EntityGraph,
    registry: &'a MappingRegistry,
    visited: HashSet<NodeKey>,
    nodes: Vec<WriteStep>,
    edges: Vec<WriteStep>,
    seen_edges: HashSet<(NodeKey, NodeKey, &'static str)>,
}

impl Walk<'_> {
    /// Depth-first over owned edges, iteratively so long chains cannot
    /// overflow the stack. Nodes are recorded in discovery order.
    fn visit(&mut self, start: NodeKey) -> Result<()> {
        let mut stack = vec![start];

        while let Some(key) = stack.pop() {
            if !self.visited.insert(key) {
                continue;
            }
            let node = self.graph.node_slot(key).ok_or_else(|| {
                ArborError::Constraint(format!("node {key:?} is not in this graph"))
            })?;
            let descriptor = self
                .registry
                .node_by_type(node.entity_type(), node.type_name())?;

            self.nodes.push(WriteStep::Node {
                key,
                create: node.id().is_none(),
            });

            let mut discovered = Vec::new();
            for (field, targets) in node.owned_edges() {
                let edge = descriptor.edge_field(field).ok_or_else(|| {
                    ArborError::Mapping(format!(
                        "{} reports undeclared edge field {field}",
                        descriptor.label
                    ))
                })?;
                for target in targets {
                    let target_node = self.graph.node_slot(target).ok_or_else(|| {
                        ArborError::Constraint(format!(
                            "{}.{field} points at {target:?}, which is not in this graph",
                            descriptor.label
                        ))
                    })?;
                    let target_label = self
                        .registry
                        .node_by_type(target_node.entity_type(), target_node.type_name())?
                        .label;
                    if target_label != edge.target {
                        return Err(ArborError::Mapping(format!(
                            "{}.{field} must point at {}, found {target_label}",
                            descriptor.label, edge.target
                        )));
                    }

                    let (from, to) = match edge.direction {
                        Direction::Outgoing => (key, target),
                        Direction::Incoming => (target, key),
                    };
                    if self.seen_edges.insert((from, to, edge.label)) {
                        self.edges.push(WriteStep::Edge {
                            from,
                            to,
                            label: edge.label,
                        });
                    }
                    discovered.push(target);
                }
            }
            // Reversed so the first declared target is visited first.
            stack.extend(discovered.into_iter().rev());
        }
        Ok(())
    }
}

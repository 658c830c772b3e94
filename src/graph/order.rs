// src/graph/order.rs

//! Deterministic execution order
//!
//! Kahn's algorithm over the direct edges: a node becomes ready once every
//! dependency is ordered, and among ready nodes the lowest id goes first.
//! Levels group nodes by the length of their longest dependency chain;
//! nodes of one level never depend on each other.

use crate::error::{Error, Result};
use crate::graph::{Node, NodeId};
use std::collections::{BTreeSet, HashMap};

/// Topological order of the nodes, dependencies before consumers
pub fn topological_order(nodes: &[Node]) -> Result<Vec<NodeId>> {
    let mut remaining: HashMap<NodeId, usize> = HashMap::new();
    let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

    for node in nodes {
        let targets: BTreeSet<NodeId> = node.edges.iter().map(|e| e.target).collect();
        remaining.insert(node.id, targets.len());
        for target in targets {
            dependents.entry(target).or_default().push(node.id);
        }
    }

    let mut ready: BTreeSet<NodeId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        for dependent in dependents.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<String> = nodes
            .iter()
            .filter(|n| !order.contains(&n.id))
            .map(Node::label)
            .collect();
        return Err(Error::DependencyCycle(stuck.join(", ")));
    }
    Ok(order)
}

/// Group an order into levels of mutually independent nodes
pub fn levels(nodes: &[Node], order: &[NodeId]) -> Vec<Vec<NodeId>> {
    let mut depth: HashMap<NodeId, usize> = HashMap::new();
    let mut levels: Vec<Vec<NodeId>> = Vec::new();

    for id in order {
        let node = &nodes[id.0];
        let level = node
            .edges
            .iter()
            .filter_map(|e| depth.get(&e.target))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(*id, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(*id);
    }
    levels
}

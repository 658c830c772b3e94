// src/graph/propagate.rs

//! Trait propagation
//!
//! Every node learns the full set of dependencies it sees and with which
//! traits. For a consumer `N` with edge `e` to `D`, and `D` seeing `X` with
//! traits `t`:
//!
//! - `X` is only reachable when `t.visible`
//! - headers: `e.headers && t.headers && t.transitive_headers`
//! - libs: `e.libs && t.libs && t.transitive_libs`
//! - run: `t.run`; build: `e.build || t.build`
//!
//! Tool edges carry neither headers nor libs, so nothing reached through
//! the build context ever lands on a host consumer's compile or link line.

use crate::graph::{Node, NodeId, TransitiveDep, Traits};
use std::collections::HashMap;

fn through(edge: &Traits, dep: &Traits) -> Traits {
    Traits {
        headers: edge.headers && dep.headers && dep.transitive_headers,
        libs: edge.libs && dep.libs && dep.transitive_libs,
        run: dep.run,
        visible: edge.visible,
        build: edge.build || dep.build,
        transitive_headers: edge.transitive_headers && dep.transitive_headers,
        transitive_libs: edge.transitive_libs && dep.transitive_libs,
    }
}

/// Fill `Node::dependencies` for every node
///
/// `order` must list dependencies before consumers.
pub fn propagate(nodes: &mut [Node], order: &[NodeId]) {
    let position: HashMap<NodeId, usize> =
        order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    for id in order {
        let mut seen: Vec<TransitiveDep> = Vec::new();
        let mut index: HashMap<NodeId, usize> = HashMap::new();
        let mut add = |dep: TransitiveDep| match index.get(&dep.node) {
            Some(&i) => {
                seen[i].traits.merge(&dep.traits);
                seen[i].direct |= dep.direct;
            }
            None => {
                index.insert(dep.node, seen.len());
                seen.push(dep);
            }
        };

        let node = &nodes[id.0];
        for edge in &node.edges {
            add(TransitiveDep {
                node: edge.target,
                traits: edge.traits,
                direct: true,
            });
            for inner in &nodes[edge.target.0].dependencies {
                if !inner.traits.visible {
                    continue;
                }
                add(TransitiveDep {
                    node: inner.node,
                    traits: through(&edge.traits, &inner.traits),
                    direct: false,
                });
            }
        }

        seen.sort_by_key(|d| position.get(&d.node).copied().unwrap_or(usize::MAX));
        nodes[id.0].dependencies = seen;
    }
}

// src/graph/mod.rs

//! Dependency graph
//!
//! Nodes are recipe instantiations under one effective configuration; the
//! context tag (host or build) is part of a node's identity, so the same
//! reference may appear once per context. Edges carry [`Traits`].
//!
//! The graph is built by [`GraphBuilder`], then closed over with trait
//! propagation ([`propagate`]) and ordered ([`order`]) so the lifecycle
//! controller can walk it level by level.

pub mod builder;
pub mod order;
pub mod propagate;

pub use builder::GraphBuilder;

use crate::package_id::PackageIdInfo;
use crate::recipe::hooks::{DependencyView, NodeState, Requirement};
use crate::recipe::{Recipe, RecipeRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// Which side of a cross build a node lives on
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Context {
    /// Artifacts the user consumes
    Host,
    /// Tools run during the build
    Build,
}

/// Index of a node in its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Requirement traits of an edge, or aggregated over every path to a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traits {
    /// The consumer compiles against the dependency's headers
    pub headers: bool,
    /// The consumer links the dependency's libraries
    pub libs: bool,
    /// The dependency must be present at run time
    pub run: bool,
    /// The dependency propagates beyond this edge
    pub visible: bool,
    /// The edge lives in the build context
    pub build: bool,
    pub transitive_headers: bool,
    pub transitive_libs: bool,
}

impl Traits {
    /// Merge traits reaching the same node over another path
    pub fn merge(&mut self, other: &Traits) {
        self.headers |= other.headers;
        self.libs |= other.libs;
        self.run |= other.run;
        self.visible |= other.visible;
        self.build |= other.build;
        self.transitive_headers |= other.transitive_headers;
        self.transitive_libs |= other.transitive_libs;
    }
}

/// Status of a node after graph building
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Ok,
    /// `validate` rejected the configuration
    Invalid(String),
}

/// A direct requirement edge
#[derive(Debug, Clone)]
pub struct Edge {
    pub target: NodeId,
    pub traits: Traits,
    /// The requirement that produced the edge
    pub requirement: Requirement,
}

/// A dependency reachable from a node, after propagation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitiveDep {
    pub node: NodeId,
    pub traits: Traits,
    /// Whether the node requires it directly
    pub direct: bool,
}

/// A recipe instantiated under one configuration
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Reference including the recipe revision
    pub reference: RecipeRef,
    pub recipe: Arc<Recipe>,
    pub state: NodeState,
    /// Direct requirements in declaration order
    pub edges: Vec<Edge>,
    /// Every dependency the node sees, in topological order
    pub dependencies: Vec<TransitiveDep>,
    pub status: NodeStatus,
    pub package_id: Option<String>,
    /// Package id inputs after the recipe's `package_id` hook
    pub id_info: Option<PackageIdInfo>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn context(&self) -> Context {
        self.state.context
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.status, NodeStatus::Invalid(_))
    }

    /// `name/version (context)` for messages
    pub fn label(&self) -> String {
        format!("{}/{} ({})", self.reference.name, self.reference.version, self.state.context)
    }
}

/// A closed, ordered dependency graph
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) roots: Vec<NodeId>,
    /// Dependencies before consumers
    pub(crate) order: Vec<NodeId>,
    /// Antichains of `order`; nodes of one level are independent
    pub(crate) levels: Vec<Vec<NodeId>>,
}

impl DepGraph {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Topological order, dependencies first
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Execution levels
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    /// Nodes of a recipe name, in any context
    pub fn find(&self, name: &str) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.name() == name).collect()
    }

    /// The single node of a name in a context
    pub fn find_in(&self, name: &str, context: Context) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.name() == name && n.context() == context)
    }

    /// Nodes whose configuration was rejected
    pub fn invalid_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.is_invalid()).collect()
    }

    /// Nodes that (transitively) require `id`
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies.iter().any(|d| d.node == id))
            .map(|n| n.id)
            .collect()
    }

    /// Hook-facing views of a node's dependencies, without package info
    pub fn dependency_views(&self, id: NodeId) -> Vec<DependencyView> {
        self.node(id)
            .dependencies
            .iter()
            .map(|dep| {
                let node = self.node(dep.node);
                DependencyView {
                    reference: node.reference.clone(),
                    context: node.context(),
                    package_type: node.state.package_type,
                    traits: dep.traits,
                    direct: dep.direct,
                    settings: node.state.settings.clone(),
                    options: node.state.options.clone(),
                    package_id: node.package_id.clone(),
                    package: None,
                }
            })
            .collect()
    }
}

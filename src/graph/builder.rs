// src/graph/builder.rs

//! Graph construction
//!
//! Expansion is depth first. Each node is instantiated with its effective
//! settings and options, its `requirements`/`build_requirements` hooks are
//! called, and every requirement is resolved to an existing node or a new
//! one that is expanded in turn. `validate` runs once a node's direct
//! dependencies are known.
//!
//! Coalescing rules:
//! - visible requirements share one node per `(name, context)`; a second
//!   requirement with an incompatible version is a version conflict
//! - non-visible requirements (tools) share a node when reference, context,
//!   settings and options are all identical
//!
//! Override requirements pin a version for `(name, context)` across the
//! whole graph and add no edge. A pin that contradicts an already created
//! node restarts the expansion with every pin collected so far.

use crate::error::{Error, ErrorContext, ErrorKind, Result};
use crate::graph::{
    order, propagate, Context, DepGraph, Edge, Node, NodeId, NodeStatus, Traits,
};
use crate::package_id;
use crate::profile::{is_specific_pattern, Profile};
use crate::recipe::hooks::{
    ConfigureContext, DependencyView, NodeState, Requirement, RequirementsContext, Stage,
    ValidateContext,
};
use crate::recipe::{Implements, PackageType, RecipeRegistry, RequirementRef, ResolvedRecipe};
use crate::settings::{Options, Settings};
use crate::version::{Version, VersionReq};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Upper bound on expansion restarts caused by overrides
const MAX_PASSES: usize = 8;

/// Builds dependency graphs from root requests
pub struct GraphBuilder<'a> {
    registry: &'a RecipeRegistry,
    host: &'a Profile,
    build: &'a Profile,
    base: Settings,
}

impl<'a> GraphBuilder<'a> {
    /// Builder over the embedded settings vocabulary
    pub fn new(registry: &'a RecipeRegistry, host: &'a Profile, build: &'a Profile) -> Result<Self> {
        Ok(Self {
            registry,
            host,
            build,
            base: Settings::with_defaults()?,
        })
    }

    /// Use another settings vocabulary
    pub fn with_base_settings(mut self, base: Settings) -> Self {
        self.base = base;
        self
    }

    fn profile(&self, context: Context) -> &'a Profile {
        match context {
            Context::Host => self.host,
            Context::Build => self.build,
        }
    }

    /// Build, close and order the graph of one or more root requests
    pub fn build(&self, roots: &[RequirementRef]) -> Result<DepGraph> {
        let mut pins: BTreeMap<(String, Context), Version> = BTreeMap::new();

        for pass in 0..MAX_PASSES {
            let mut expansion = Expansion::new(self, pins.clone());
            let result = expansion.run(roots);
            if expansion.new_pin {
                debug!("Override pins changed, restarting expansion (pass {})", pass + 1);
                pins = expansion.pins;
                continue;
            }
            result?;
            let graph = expansion.finish()?;
            info!(
                "Resolved graph: {} node(s) in {} level(s)",
                graph.len(),
                graph.levels().len()
            );
            return Ok(graph);
        }
        Err(Error::Internal(format!(
            "overrides did not settle after {} expansion passes",
            MAX_PASSES
        )))
    }

    /// Build the graph of a single root given as `name/version` or `name/[range]`
    pub fn build_one(&self, root: &str) -> Result<DepGraph> {
        self.build(&[RequirementRef::parse(root)?])
    }
}

fn node_error(error: Error, state: &NodeState, revision: Option<&str>, stage: Stage) -> Error {
    if error.context().is_some() {
        return error;
    }
    let reference = match revision {
        Some(rev) => format!("{}/{}#{}", state.name, state.version, rev),
        None => format!("{}/{}", state.name, state.version),
    };
    error.in_node(ErrorContext {
        reference,
        context: state.context,
        package_id: None,
        stage: Some(stage),
    })
}

struct Snapshot {
    nodes: usize,
    stack: usize,
    visible: HashMap<(String, Context), NodeId>,
    pins: BTreeMap<(String, Context), Version>,
    new_pin: bool,
}

/// One expansion pass
struct Expansion<'b, 'a> {
    builder: &'b GraphBuilder<'a>,
    nodes: Vec<Node>,
    /// Who first required each node, for conflict messages
    origins: Vec<String>,
    visible: HashMap<(String, Context), NodeId>,
    pins: BTreeMap<(String, Context), Version>,
    new_pin: bool,
    stack: Vec<NodeId>,
    roots: Vec<NodeId>,
}

impl<'b, 'a> Expansion<'b, 'a> {
    fn new(builder: &'b GraphBuilder<'a>, pins: BTreeMap<(String, Context), Version>) -> Self {
        Self {
            builder,
            nodes: Vec::new(),
            origins: Vec::new(),
            visible: HashMap::new(),
            pins,
            new_pin: false,
            stack: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn run(&mut self, roots: &[RequirementRef]) -> Result<()> {
        for root in roots {
            let key = (root.name.clone(), Context::Host);
            if let Some(&existing) = self.visible.get(&key) {
                self.roots.push(existing);
                continue;
            }
            let resolved = self.resolve(&root.name, &root.version, Context::Host)?;
            let node = self.instantiate(resolved, Context::Host, true, &BTreeMap::new())?;
            let id = self.push(node, "the request".to_string());
            self.visible.insert(key, id);
            self.roots.push(id);
            self.expand(id)?;
        }
        Ok(())
    }

    fn resolve(&self, name: &str, req: &VersionReq, context: Context) -> Result<ResolvedRecipe> {
        match self.pins.get(&(name.to_string(), context)) {
            Some(pinned) => self
                .builder
                .registry
                .find(name, &VersionReq::Exact(pinned.clone())),
            None => self.builder.registry.find(name, req),
        }
    }

    /// Create a node with its effective settings and options
    fn instantiate(
        &self,
        resolved: ResolvedRecipe,
        context: Context,
        is_root: bool,
        edge_options: &BTreeMap<String, String>,
    ) -> Result<Node> {
        let ResolvedRecipe { version, recipe } = resolved;
        let meta = &recipe.metadata;
        let name = meta.name.as_str();
        let profile = self.builder.profile(context);

        let mut settings = profile.settings_for(&self.builder.base, name, &version, is_root)?;
        settings.constrain(&meta.settings);
        let settings_build =
            self.builder
                .build
                .settings_for(&self.builder.base, name, &version, is_root)?;

        let mut state = NodeState {
            name: name.to_string(),
            version: version.clone(),
            context,
            package_type: meta.package_type,
            settings,
            settings_build,
            options: Options::from_defs(meta.options.clone()),
            conf: profile.conf.clone(),
            is_root,
        };
        let revision = Some(recipe.revision.as_str());

        if recipe.implements(Implements::AutoSharedFpic) && state.setting("os") == Some("Windows") {
            state.options.rm_safe("fPIC");
        }
        recipe
            .hooks
            .config_options(&mut ConfigureContext { node: &mut state })
            .map_err(|e| node_error(e, &state, revision, Stage::Configure))?;

        assign_options(&mut state, profile, edge_options)
            .map_err(|e| node_error(e, &state, revision, Stage::Configure))?;

        recipe
            .hooks
            .configure(&mut ConfigureContext { node: &mut state })
            .map_err(|e| node_error(e, &state, revision, Stage::Configure))?;

        if recipe.implements(Implements::AutoSharedFpic) {
            if state.options.get_bool("shared") {
                state.options.rm_safe("fPIC");
            }
            if state.package_type == PackageType::HeaderLibrary {
                state.options.rm_safe("shared");
                state.options.rm_safe("fPIC");
            }
        }
        if state.package_type == PackageType::Library && state.options.get("shared").is_some() {
            state.package_type = if state.options.get_bool("shared") {
                PackageType::SharedLibrary
            } else {
                PackageType::StaticLibrary
            };
        }

        Ok(Node {
            id: NodeId(usize::MAX),
            reference: recipe.reference(&version),
            recipe,
            state,
            edges: Vec::new(),
            dependencies: Vec::new(),
            status: NodeStatus::Ok,
            package_id: None,
            id_info: None,
        })
    }

    fn push(&mut self, mut node: Node, origin: String) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        debug!("New node {} {}", id, node.label());
        self.nodes.push(node);
        self.origins.push(origin);
        id
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: self.nodes.len(),
            stack: self.stack.len(),
            visible: self.visible.clone(),
            pins: self.pins.clone(),
            new_pin: self.new_pin,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.nodes.truncate(snapshot.nodes);
        self.origins.truncate(snapshot.nodes);
        self.stack.truncate(snapshot.stack);
        self.visible = snapshot.visible;
        self.pins = snapshot.pins;
        self.new_pin = snapshot.new_pin;
    }

    fn check_cycle(&self, target: NodeId) -> Result<()> {
        if let Some(pos) = self.stack.iter().position(|id| *id == target) {
            let mut path: Vec<String> = self.stack[pos..]
                .iter()
                .map(|id| self.nodes[id.0].label())
                .collect();
            path.push(self.nodes[target.0].label());
            return Err(Error::DependencyCycle(path.join(" -> ")));
        }
        Ok(())
    }

    fn expand(&mut self, id: NodeId) -> Result<()> {
        self.stack.push(id);
        let recipe = self.nodes[id.0].recipe.clone();
        let state = self.nodes[id.0].state.clone();
        let revision = Some(recipe.revision.as_str());

        let mut ctx = RequirementsContext::new(&state);
        recipe
            .hooks
            .requirements(&mut ctx)
            .and_then(|_| recipe.hooks.build_requirements(&mut ctx))
            .map_err(|e| node_error(e, &state, revision, Stage::Requirements))?;
        let mut requirements = ctx.into_requirements();

        let profile = self.builder.profile(state.context);
        for reference in profile.tool_requires_for(&state.name, &state.version, state.is_root) {
            let tool = Requirement::tool(reference)?;
            let declared = requirements
                .iter()
                .any(|r| r.build && r.reference.name == tool.reference.name);
            if tool.reference.name != state.name && !declared {
                requirements.push(tool);
            }
        }

        let mut edges = Vec::new();
        for req in &requirements {
            let target_context = if req.build { Context::Build } else { state.context };
            if req.is_override {
                self.pin(req, target_context)
                    .map_err(|e| node_error(e, &state, revision, Stage::Requirements))?;
                continue;
            }
            let edge = self
                .require(id, req, target_context)
                .map_err(|e| node_error(e, &state, revision, Stage::Requirements))?;
            edges.extend(edge);
        }

        let views: Vec<DependencyView> = edges.iter().map(|e| self.direct_view(e)).collect();
        let validation = recipe.hooks.validate(&ValidateContext {
            node: &state,
            dependencies: &views,
        });
        match validation {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::InvalidConfiguration => {
                warn!("{}/{} is invalid: {}", state.name, state.version, e);
                self.nodes[id.0].status = NodeStatus::Invalid(e.to_string());
            }
            Err(e) => return Err(node_error(e, &state, revision, Stage::Validate)),
        }

        self.nodes[id.0].edges = edges;
        self.stack.pop();
        Ok(())
    }

    fn direct_view(&self, edge: &Edge) -> DependencyView {
        let node = &self.nodes[edge.target.0];
        DependencyView {
            reference: node.reference.clone(),
            context: node.context(),
            package_type: node.state.package_type,
            traits: edge.traits,
            direct: true,
            settings: node.state.settings.clone(),
            options: node.state.options.clone(),
            package_id: None,
            package: None,
        }
    }

    fn pin(&mut self, req: &Requirement, context: Context) -> Result<()> {
        let name = req.reference.name.clone();
        let version = match &req.reference.version {
            VersionReq::Exact(v) => v.clone(),
            range => self.builder.registry.find(&name, range)?.version,
        };
        let key = (name, context);
        match self.pins.get(&key) {
            Some(existing) if *existing != version => {
                warn!(
                    "Ignoring override {}/{}: already pinned to {}",
                    key.0, version, existing
                );
            }
            Some(_) => {}
            None => {
                debug!("Pinning {}/{} ({})", key.0, version, context);
                let contradicts = self
                    .nodes
                    .iter()
                    .any(|n| n.name() == key.0 && n.context() == context && n.reference.version != version);
                if contradicts {
                    self.new_pin = true;
                }
                self.pins.insert(key, version);
            }
        }
        Ok(())
    }

    /// Resolve one requirement to an edge; optional ones may be dropped
    fn require(
        &mut self,
        consumer: NodeId,
        req: &Requirement,
        context: Context,
    ) -> Result<Option<Edge>> {
        if !req.optional {
            return self.resolve_edge(consumer, req, context, None).map(Some);
        }

        let snapshot = self.snapshot();
        let first_error = match self.resolve_edge(consumer, req, context, None) {
            Ok(edge) if !self.nodes[edge.target.0].is_invalid() => return Ok(Some(edge)),
            Ok(edge) => format!("{} is invalid", self.nodes[edge.target.0].label()),
            Err(e) if droppable(&e) => e.to_string(),
            Err(e) => return Err(e),
        };
        debug!("Optional requirement {} failed: {}", req.reference, first_error);

        let key = (req.reference.name.clone(), context);
        let pinned = snapshot.pins.contains_key(&key);
        let coalesced = req.visible && snapshot.visible.contains_key(&key);
        self.restore(snapshot);

        if !pinned && !coalesced && req.reference.version.is_range() {
            let mut candidates: Vec<Version> = self
                .builder
                .registry
                .versions_of(&req.reference.name)?
                .into_iter()
                .filter(|v| req.reference.version.matches(v))
                .collect();
            candidates.sort();
            candidates.reverse();
            for version in candidates.into_iter().skip(1) {
                let snapshot = self.snapshot();
                match self.resolve_edge(consumer, req, context, Some(&version)) {
                    Ok(edge) if !self.nodes[edge.target.0].is_invalid() => {
                        info!("Using {}/{} for optional requirement", req.reference.name, version);
                        return Ok(Some(edge));
                    }
                    Ok(_) => {}
                    Err(e) if droppable(&e) => {}
                    Err(e) => return Err(e),
                }
                self.restore(snapshot);
            }
        }

        warn!(
            "Dropping optional requirement {} of {}: {}",
            req.reference,
            self.nodes[consumer.0].label(),
            first_error
        );
        Ok(None)
    }

    fn edge(&self, target: NodeId, req: &Requirement) -> Edge {
        let traits: Traits = req.traits_for(self.nodes[target.0].state.package_type);
        Edge {
            target,
            traits,
            requirement: req.clone(),
        }
    }

    fn warn_option_conflicts(&self, consumer: NodeId, target: NodeId, req: &Requirement) {
        let node = &self.nodes[target.0];
        for (name, value) in &req.options {
            if let Some(current) = node.state.options.get(name) {
                if current != crate::settings::options::normalize_value(value) {
                    warn!(
                        "{} requires {}:{}={}, but {} was already configured with {}",
                        self.nodes[consumer.0].label(),
                        node.name(),
                        name,
                        value,
                        node.label(),
                        current
                    );
                }
            }
        }
    }

    fn resolve_edge(
        &mut self,
        consumer: NodeId,
        req: &Requirement,
        context: Context,
        forced: Option<&Version>,
    ) -> Result<Edge> {
        let name = req.reference.name.clone();
        let key = (name.clone(), context);

        if req.visible || self.visible.contains_key(&key) {
            if let Some(&existing) = self.visible.get(&key) {
                let existing_version = self.nodes[existing.0].reference.version.clone();
                let compatible = match (forced, self.pins.get(&key)) {
                    (Some(v), _) => *v == existing_version,
                    (None, Some(pinned)) => *pinned == existing_version,
                    (None, None) => req.reference.version.matches(&existing_version),
                };
                if compatible || self.pins.contains_key(&key) {
                    self.check_cycle(existing)?;
                    self.warn_option_conflicts(consumer, existing, req);
                    return Ok(self.edge(existing, req));
                }
                if req.visible {
                    return Err(Error::VersionConflict {
                        name,
                        existing: existing_version.to_string(),
                        existing_by: self.origins[existing.0].clone(),
                        requested: req.reference.version.to_string(),
                        requested_by: self.nodes[consumer.0].label(),
                    });
                }
            }
        }

        let resolved = match forced {
            Some(v) => self
                .builder
                .registry
                .find(&name, &VersionReq::Exact(v.clone()))?,
            None => self.resolve(&name, &req.reference.version, context)?,
        };
        let candidate = self.instantiate(resolved, context, false, &req.options)?;

        let on_stack = self.stack.iter().copied().find(|id| {
            let n = &self.nodes[id.0];
            n.name() == candidate.name() && n.context() == context
        });
        if let Some(ancestor) = on_stack {
            self.check_cycle(ancestor)?;
        }

        let same = self.nodes.iter().find(|n| {
            n.reference == candidate.reference
                && n.context() == context
                && n.state.settings == candidate.state.settings
                && n.state.options == candidate.state.options
        });
        if let Some(existing) = same.map(|n| n.id) {
            if req.visible {
                self.visible.insert(key, existing);
            }
            return Ok(self.edge(existing, req));
        }

        let id = self.push(candidate, self.nodes[consumer.0].label());
        if req.visible {
            self.visible.insert(key, id);
        }
        self.expand(id)?;
        Ok(self.edge(id, req))
    }

    /// Drop unreachable nodes, order, propagate traits and hash
    fn finish(self) -> Result<DepGraph> {
        let mut reachable: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if reachable.insert(id) {
                queue.extend(self.nodes[id.0].edges.iter().map(|e| e.target));
            }
        }

        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        let mut nodes: Vec<Node> = Vec::with_capacity(reachable.len());
        for node in self.nodes {
            if reachable.contains(&node.id) {
                remap.insert(node.id, NodeId(nodes.len()));
                nodes.push(node);
            } else {
                debug!("Compacting away unreachable {}", node.label());
            }
        }
        for node in &mut nodes {
            node.id = remap[&node.id];
            for edge in &mut node.edges {
                edge.target = remap[&edge.target];
            }
        }
        let mut roots: Vec<NodeId> = Vec::new();
        for root in self.roots.iter().map(|r| remap[r]) {
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        let order = order::topological_order(&nodes)?;
        propagate::propagate(&mut nodes, &order);
        let levels = order::levels(&nodes, &order);

        let mut graph = DepGraph {
            nodes,
            roots,
            order,
            levels,
        };
        package_id::compute_package_ids(&mut graph)?;
        Ok(graph)
    }
}

/// Failures an optional requirement may swallow
fn droppable(error: &Error) -> bool {
    let kind = error.root().kind();
    kind.is_recoverable() || kind == ErrorKind::RecipeNotFound
}

/// Apply option values: profile patterns, then edge options, then
/// package-specific patterns
fn assign_options(
    state: &mut NodeState,
    profile: &Profile,
    edge_options: &BTreeMap<String, String>,
) -> Result<()> {
    let scoped = profile.options_for(&state.name, &state.version, state.is_root);
    let (specific, generic): (Vec<_>, Vec<_>) = scoped
        .into_iter()
        .partition(|o| is_specific_pattern(o.pattern.as_deref()));

    let mut set = |state: &mut NodeState, name: &str, value: &str| -> Result<()> {
        if !state.options.set_if_declared(name, value)? {
            debug!(
                "{}/{} does not declare option '{}', ignoring",
                state.name, state.version, name
            );
        }
        Ok(())
    };
    for o in generic {
        set(state, &o.key, &o.value)?;
    }
    for (name, value) in edge_options {
        set(state, name, value)?;
    }
    for o in specific {
        set(state, &o.key, &o.value)?;
    }
    Ok(())
}

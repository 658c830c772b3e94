// src/package_id.rs

//! Package identity
//!
//! A package id is the SHA-1 of a canonical JSON document holding the
//! node's settings and options (after the recipe's `package_id` hook) and
//! one entry per direct dependency, projected through the edge's
//! propagation mode. Keys are sorted, so the id only depends on values.
//!
//! Missing and explicitly defaulted entries hash differently: an option
//! removed by the hook is absent from the document, while an option left
//! at its default is present with its value.

use crate::error::Result;
use crate::graph::{DepGraph, NodeId, Traits};
use crate::hash;
use crate::recipe::{Implements, PackageType};
use crate::settings::{Options, Settings};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Settings of a dependency that affect binary compatibility
const ABI_SETTINGS: &[&str] = &["os", "arch", "compiler", "compiler.libcxx", "build_type"];

/// How a dependency contributes to its consumer's id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PackageIdMode {
    /// `major.minor` plus the dependency's ABI settings
    SemverMode,
    /// The dependency's full package id
    FullVersionMode,
    /// `major.minor` only
    MinorMode,
    /// `major.minor.patch`
    PatchMode,
    /// Not part of the id
    UnrelatedMode,
}

impl PackageIdMode {
    /// Default mode of an edge
    pub fn default_for(traits: &Traits, dep_type: PackageType) -> Self {
        if traits.build {
            return Self::UnrelatedMode;
        }
        match dep_type {
            PackageType::BuildScripts | PackageType::PythonRequire => Self::UnrelatedMode,
            PackageType::HeaderLibrary => Self::MinorMode,
            _ => Self::SemverMode,
        }
    }
}

/// A direct dependency as seen by the id computation
#[derive(Debug, Clone)]
pub struct RequireIdInfo {
    pub name: String,
    pub mode: PackageIdMode,
    pub version: Version,
    pub dep_package_id: Option<String>,
    /// ABI relevant settings of the dependency
    pub dep_abi_settings: Vec<(String, String)>,
}

impl RequireIdInfo {
    fn projection(&self) -> Option<Value> {
        let value = match self.mode {
            PackageIdMode::UnrelatedMode => return None,
            PackageIdMode::SemverMode => {
                let settings: Map<String, Value> = self
                    .dep_abi_settings
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                json!({ "version": self.version.upto(2), "settings": settings })
            }
            PackageIdMode::FullVersionMode => json!({
                "version": self.version.as_str(),
                "package_id": self.dep_package_id,
            }),
            PackageIdMode::MinorMode => json!({ "version": self.version.upto(2) }),
            PackageIdMode::PatchMode => json!({ "version": self.version.upto(3) }),
        };
        Some(value)
    }
}

/// Inputs of a package id, handed to the recipe's `package_id` hook
#[derive(Debug, Clone)]
pub struct PackageIdInfo {
    pub settings: Settings,
    pub options: Options,
    pub requires: Vec<RequireIdInfo>,
    pub package_type: PackageType,
}

impl PackageIdInfo {
    pub fn new(settings: Settings, options: Options, package_type: PackageType) -> Self {
        Self {
            settings,
            options,
            requires: Vec::new(),
            package_type,
        }
    }

    /// Drop every input; all configurations share one id
    pub fn clear(&mut self) {
        self.settings.clear();
        self.options.clear();
        self.requires.clear();
    }

    /// Change the propagation mode of a dependency
    pub fn set_mode(&mut self, name: &str, mode: PackageIdMode) {
        for require in self.requires.iter_mut().filter(|r| r.name == name) {
            require.mode = mode;
        }
    }

    /// Canonical document the id is hashed from
    pub fn serialize(&self) -> String {
        let settings: Map<String, Value> = self
            .settings
            .values()
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let options: Map<String, Value> = self
            .options
            .values()
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let requires: Map<String, Value> = self
            .requires
            .iter()
            .filter_map(|r| r.projection().map(|p| (r.name.clone(), p)))
            .collect();

        // serde_json maps are BTreeMaps without preserve_order
        json!({
            "settings": settings,
            "options": options,
            "requires": requires,
        })
        .to_string()
    }

    pub fn package_id(&self) -> String {
        hash::sha1(self.serialize().as_bytes())
    }
}

/// Compute the id of every node, dependencies first
pub fn compute_package_ids(graph: &mut DepGraph) -> Result<()> {
    let order: Vec<NodeId> = graph.order().to_vec();
    for id in order {
        let node = graph.node(id);
        let mut info = PackageIdInfo::new(
            node.state.settings.clone(),
            node.state.options.clone(),
            node.state.package_type,
        );

        for edge in &node.edges {
            let dep = graph.node(edge.target);
            let mode = edge.requirement.package_id_mode.unwrap_or_else(|| {
                PackageIdMode::default_for(&edge.traits, dep.state.package_type)
            });
            let dep_abi_settings = ABI_SETTINGS
                .iter()
                .filter_map(|path| {
                    dep.state
                        .settings
                        .get_safe(path, None)
                        .map(|v| (path.to_string(), v.to_string()))
                })
                .collect();
            info.requires.push(RequireIdInfo {
                name: dep.name().to_string(),
                mode,
                version: dep.reference.version.clone(),
                dep_package_id: dep.package_id.clone(),
                dep_abi_settings,
            });
        }
        info.requires.sort_by(|a, b| a.name.cmp(&b.name));

        if node.recipe.implements(Implements::AutoHeaderOnly)
            && node.state.package_type == PackageType::HeaderLibrary
        {
            info.clear();
        }
        node.recipe
            .hooks
            .package_id(&mut info)
            .map_err(|e| e.in_node(node_context(graph, id)))?;

        let package_id = info.package_id();
        debug!("{} has package id {}", node.label(), package_id);
        let node = graph.node_mut(id);
        node.package_id = Some(package_id);
        node.id_info = Some(info);
    }
    Ok(())
}

fn node_context(graph: &DepGraph, id: NodeId) -> crate::error::ErrorContext {
    let node = graph.node(id);
    crate::error::ErrorContext {
        reference: node.reference.to_string(),
        context: node.context(),
        package_id: None,
        stage: Some(crate::recipe::hooks::Stage::PackageId),
    }
}

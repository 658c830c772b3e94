// src/cpp_info.rs

//! Consumption information
//!
//! What a package publishes for its consumers: include and library
//! directories, link lists, flags, and build-system naming properties.
//! Packages shipping several logical libraries describe them as
//! components; components may require each other (`"other"`) or
//! components of dependencies (`"dep::comp"`).
//!
//! Directories are relative to the package folder.

use crate::conf::Conf;
use crate::environment::Environment;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

fn include_dirs() -> Vec<String> {
    vec!["include".to_string()]
}

fn lib_dirs() -> Vec<String> {
    vec!["lib".to_string()]
}

fn bin_dirs() -> Vec<String> {
    vec!["bin".to_string()]
}

/// Naming properties read by the generators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Properties {
    pub cmake_file_name: Option<String>,
    pub cmake_target_name: Option<String>,
    pub cmake_target_aliases: Vec<String>,
    /// `config`, `module`, `both` or `none`
    pub cmake_find_mode: Option<String>,
    pub cmake_build_modules: Vec<String>,
    pub pkg_config_name: Option<String>,
    pub pkg_config_custom_content: Option<String>,
    pub component_version: Option<String>,
    /// Properties the generators do not know about
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// One logical library, or the package as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Component {
    pub includedirs: Vec<String>,
    pub libdirs: Vec<String>,
    pub bindirs: Vec<String>,
    pub resdirs: Vec<String>,
    pub builddirs: Vec<String>,
    pub frameworkdirs: Vec<String>,
    /// Link order
    pub libs: Vec<String>,
    pub system_libs: Vec<String>,
    pub frameworks: Vec<String>,
    pub defines: Vec<String>,
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub sharedlinkflags: Vec<String>,
    pub exelinkflags: Vec<String>,
    /// Components this one links
    pub requires: Vec<String>,
    pub properties: Properties,
}

impl Default for Component {
    fn default() -> Self {
        Self {
            includedirs: include_dirs(),
            libdirs: lib_dirs(),
            bindirs: bin_dirs(),
            resdirs: Vec::new(),
            builddirs: Vec::new(),
            frameworkdirs: Vec::new(),
            libs: Vec::new(),
            system_libs: Vec::new(),
            frameworks: Vec::new(),
            defines: Vec::new(),
            cflags: Vec::new(),
            cxxflags: Vec::new(),
            sharedlinkflags: Vec::new(),
            exelinkflags: Vec::new(),
            requires: Vec::new(),
            properties: Properties::default(),
        }
    }
}

fn extend_unique(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

impl Component {
    /// A component without any default directory
    pub fn empty() -> Self {
        Self {
            includedirs: Vec::new(),
            libdirs: Vec::new(),
            bindirs: Vec::new(),
            ..Default::default()
        }
    }

    /// Append another component's information, keeping first occurrences
    pub fn merge(&mut self, other: &Component) {
        extend_unique(&mut self.includedirs, &other.includedirs);
        extend_unique(&mut self.libdirs, &other.libdirs);
        extend_unique(&mut self.bindirs, &other.bindirs);
        extend_unique(&mut self.resdirs, &other.resdirs);
        extend_unique(&mut self.builddirs, &other.builddirs);
        extend_unique(&mut self.frameworkdirs, &other.frameworkdirs);
        extend_unique(&mut self.libs, &other.libs);
        extend_unique(&mut self.system_libs, &other.system_libs);
        extend_unique(&mut self.frameworks, &other.frameworks);
        extend_unique(&mut self.defines, &other.defines);
        extend_unique(&mut self.cflags, &other.cflags);
        extend_unique(&mut self.cxxflags, &other.cxxflags);
        extend_unique(&mut self.sharedlinkflags, &other.sharedlinkflags);
        extend_unique(&mut self.exelinkflags, &other.exelinkflags);
        extend_unique(&mut self.properties.cmake_build_modules, &other.properties.cmake_build_modules);
    }

    /// Every directory this component declares
    pub fn all_dirs(&self) -> impl Iterator<Item = &String> {
        self.includedirs
            .iter()
            .chain(&self.libdirs)
            .chain(&self.bindirs)
            .chain(&self.resdirs)
            .chain(&self.builddirs)
            .chain(&self.frameworkdirs)
    }
}

/// Consumption info of one package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CppInfo {
    /// Package level information; with components it only carries
    /// properties and the directories of the package as a whole
    #[serde(flatten)]
    pub root: Component,
    #[serde(default)]
    pub components: BTreeMap<String, Component>,
}

impl CppInfo {
    pub fn has_components(&self) -> bool {
        !self.components.is_empty()
    }

    /// Component names in link order: each before the components it requires
    pub fn component_order(&self) -> Result<Vec<String>> {
        let mut order: Vec<String> = Vec::new();
        let mut visiting: BTreeSet<&str> = BTreeSet::new();

        fn visit<'a>(
            info: &'a CppInfo,
            name: &'a str,
            visiting: &mut BTreeSet<&'a str>,
            done: &mut Vec<String>,
        ) -> Result<()> {
            if done.iter().any(|n| n == name) {
                return Ok(());
            }
            if !visiting.insert(name) {
                return Err(Error::ParseError(format!(
                    "components require each other in a cycle through '{}'",
                    name
                )));
            }
            if let Some(component) = info.components.get(name) {
                for required in component.requires.iter().filter(|r| !r.contains("::")) {
                    visit(info, required, visiting, done)?;
                }
            }
            visiting.remove(name);
            done.push(name.to_string());
            Ok(())
        }

        for name in self.components.keys() {
            visit(self, name, &mut visiting, &mut order)?;
        }
        // Post order lists requirements first; links want the reverse
        order.reverse();
        Ok(order)
    }

    /// Check component requirements against the package's own components
    /// and its direct dependency names
    pub fn check_component_requires(&self, dependencies: &[&str]) -> Result<()> {
        let all = self
            .components
            .iter()
            .map(|(name, c)| (Some(name.as_str()), c))
            .chain(std::iter::once((None, &self.root)));
        for (owner, component) in all {
            for required in &component.requires {
                let ok = match required.split_once("::") {
                    Some((dep, _)) => dependencies.contains(&dep),
                    None => self.components.contains_key(required),
                };
                if !ok {
                    return Err(Error::ParseError(format!(
                        "component '{}' requires unknown '{}'",
                        owner.unwrap_or("<root>"),
                        required
                    )));
                }
            }
        }
        Ok(())
    }

    /// Root and every component merged, in link order
    pub fn aggregated(&self) -> Result<Component> {
        if !self.has_components() {
            return Ok(self.root.clone());
        }
        let mut result = Component::empty();
        for name in self.component_order()? {
            if let Some(component) = self.components.get(&name) {
                result.merge(component);
            }
        }
        result.merge(&self.root);
        result.properties = self.root.properties.clone();
        Ok(result)
    }

    /// Directories declared anywhere in this info
    pub fn covered_dirs(&self) -> BTreeSet<String> {
        self.components
            .values()
            .chain(std::iter::once(&self.root))
            .flat_map(Component::all_dirs)
            .map(|d| d.trim_end_matches('/').to_string())
            .collect()
    }
}

/// Everything a package publishes for downstream consumers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionInfo {
    pub cpp_info: CppInfo,
    pub buildenv_info: Environment,
    pub runenv_info: Environment,
    pub conf_info: Conf,
}

/// A packaged and sealed node
#[derive(Debug, Clone)]
pub struct PublishedPackage {
    pub folder: PathBuf,
    pub info: Arc<ConsumptionInfo>,
}

impl PublishedPackage {
    /// Absolute directories of the aggregated info
    pub fn absolute(&self, dirs: &[String]) -> Vec<PathBuf> {
        dirs.iter().map(|d| self.folder.join(d)).collect()
    }
}

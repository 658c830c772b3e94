// src/generators/mod.rs

//! Toolchain and dependency file generators
//!
//! Generators are pure functions of a node's resolved state and the
//! consumption info of its sealed dependencies; they write files into the
//! generators folder and never invoke a build tool.
//!
//! Only host-context dependencies reached through a non-build edge feed
//! include paths and link lines. Build-context dependencies (tools)
//! contribute executables and build modules only.

pub mod autotools;
pub mod cmake;
pub mod env;
pub mod meson;
pub mod pkgconfig;

use crate::conf::keys;
use crate::cpp_info::{Component, CppInfo, PublishedPackage};
use crate::environment::Environment;
use crate::error::Result;
use crate::graph::Context;
use crate::recipe::{DependencyView, NodeState};
use crate::settings::Settings;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a generator reads
#[derive(Debug, Clone, Copy)]
pub struct GeneratorInput<'a> {
    pub node: &'a NodeState,
    /// Dependencies in topological order, dependencies first
    pub dependencies: &'a [DependencyView],
    pub generators_folder: &'a Path,
    pub build_folder: &'a Path,
    pub package_folder: &'a Path,
    /// Composed build environment
    pub buildenv: &'a Environment,
}

/// A sealed dependency seen by a generator
#[derive(Debug, Clone)]
pub struct ResolvedDep<'a> {
    pub view: &'a DependencyView,
    pub package: &'a PublishedPackage,
    /// Root and components merged in link order
    pub aggregated: Component,
}

impl<'a> ResolvedDep<'a> {
    pub fn name(&self) -> &str {
        self.view.name()
    }

    pub fn cpp_info(&self) -> &'a CppInfo {
        &self.package.info.cpp_info
    }

    pub fn folder(&self) -> &'a Path {
        &self.package.folder
    }

    /// Absolute paths of relative package directories
    pub fn abs(&self, dirs: &[String]) -> Vec<String> {
        self.package
            .absolute(dirs)
            .into_iter()
            .map(|p| p.display().to_string())
            .collect()
    }
}

impl<'a> GeneratorInput<'a> {
    fn resolved(&self, keep: impl Fn(&DependencyView) -> bool) -> Result<Vec<ResolvedDep<'a>>> {
        let mut deps = Vec::new();
        for view in self.dependencies.iter().filter(|d| keep(d)) {
            let Some(package) = &view.package else {
                debug!("{} has no published package yet, skipped", view.reference);
                continue;
            };
            deps.push(ResolvedDep {
                view,
                package,
                aggregated: package.info.cpp_info.aggregated()?,
            });
        }
        Ok(deps)
    }

    /// Host dependencies whose headers the node compiles against
    pub fn include_deps(&self) -> Result<Vec<ResolvedDep<'a>>> {
        self.resolved(|d| is_host_edge(d) && d.traits.headers)
    }

    /// Host dependencies the node links, consumers before their dependencies
    pub fn link_deps(&self) -> Result<Vec<ResolvedDep<'a>>> {
        let mut deps = self.resolved(|d| is_host_edge(d) && d.traits.libs)?;
        deps.reverse();
        Ok(deps)
    }

    /// Host dependencies described to the build system
    pub fn host_deps(&self) -> Result<Vec<ResolvedDep<'a>>> {
        self.resolved(|d| is_host_edge(d) && (d.traits.headers || d.traits.libs))
    }

    /// Host dependencies needed at run time
    pub fn run_deps(&self) -> Result<Vec<ResolvedDep<'a>>> {
        self.resolved(|d| is_host_edge(d) && d.traits.run)
    }

    /// Tools of the build context
    pub fn tool_deps(&self) -> Result<Vec<ResolvedDep<'a>>> {
        self.resolved(|d| !is_host_edge(d))
    }

    /// Write one generated file
    pub fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        fs::create_dir_all(self.generators_folder)?;
        let path = self.generators_folder.join(name);
        fs::write(&path, content)?;
        debug!("Generated {}", path.display());
        Ok(path)
    }
}

fn is_host_edge(dep: &DependencyView) -> bool {
    dep.context == Context::Host && !dep.traits.build
}

/// C and C++ compiler executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compilers {
    pub cc: String,
    pub cxx: String,
}

/// Compilers for a settings set, `tools.build:compiler_executables` first
pub fn compilers(settings: &Settings, node: &NodeState) -> Compilers {
    let configured = node.conf.get_map(keys::COMPILER_EXECUTABLES);
    let (cc, cxx) = match settings.get_safe("compiler", None) {
        Some("gcc") => ("gcc", "g++"),
        Some("clang") | Some("apple-clang") => ("clang", "clang++"),
        Some("msvc") => ("cl", "cl"),
        Some("intel-cc") => ("icx", "icpx"),
        _ => ("cc", "c++"),
    };
    Compilers {
        cc: configured.get("c").cloned().unwrap_or_else(|| cc.to_string()),
        cxx: configured.get("cpp").cloned().unwrap_or_else(|| cxx.to_string()),
    }
}

/// Whether the node builds shared libraries
pub fn is_shared(node: &NodeState) -> Option<bool> {
    node.options
        .is_declared("shared")
        .then(|| node.options.get_bool("shared"))
}

/// Whether position independent code is requested
pub fn wants_pic(node: &NodeState) -> bool {
    (node.options.is_declared("fPIC") && node.options.get_bool("fPIC"))
        || is_shared(node) == Some(true)
}

/// `compiler.cppstd` split into standard and GNU extensions
pub fn cppstd(node: &NodeState) -> Option<(String, bool)> {
    let value = node.setting("compiler.cppstd")?;
    match value.strip_prefix("gnu") {
        Some(std) => Some((std.to_string(), true)),
        None => Some((value.to_string(), false)),
    }
}

/// Compiler flags from the profile configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfFlags {
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub sharedlinkflags: Vec<String>,
    pub exelinkflags: Vec<String>,
    pub defines: Vec<String>,
}

impl ConfFlags {
    pub fn from_node(node: &NodeState) -> Self {
        Self {
            cflags: node.conf.get_list(keys::CFLAGS),
            cxxflags: node.conf.get_list(keys::CXXFLAGS),
            sharedlinkflags: node.conf.get_list(keys::SHAREDLINKFLAGS),
            exelinkflags: node.conf.get_list(keys::EXELINKFLAGS),
            defines: node.conf.get_list(keys::DEFINES),
        }
    }
}

/// Quote for single-quoted Meson strings
pub fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the generator tests

    use super::*;
    use crate::conf::Conf;
    use crate::cpp_info::ConsumptionInfo;
    use crate::graph::Traits;
    use crate::recipe::{PackageType, RecipeRef};
    use crate::settings::{OptionDef, Options};
    use crate::version::Version;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    pub fn node(host: &[(&str, &str)], build: &[(&str, &str)]) -> NodeState {
        let mut settings = Settings::with_defaults().unwrap();
        settings.update(host.iter().copied()).unwrap();
        let mut settings_build = Settings::with_defaults().unwrap();
        settings_build.update(build.iter().copied()).unwrap();
        NodeState {
            name: "app".into(),
            version: Version::parse("1.0").unwrap(),
            context: Context::Host,
            package_type: PackageType::Library,
            settings,
            settings_build,
            options: Options::from_defs(BTreeMap::from([
                ("shared".to_string(), OptionDef::boolean(false)),
                ("fPIC".to_string(), OptionDef::boolean(true)),
            ])),
            conf: Conf::new(),
            is_root: true,
        }
    }

    pub fn dep(name: &str, context: Context, traits: Traits, cpp_info: CppInfo) -> DependencyView {
        let mut buildenv_info = Environment::new();
        buildenv_info.prepend_path("PATH", &format!("/cache/{}/bin", name));
        DependencyView {
            reference: RecipeRef::new(name, Version::parse("1.0").unwrap()),
            context,
            package_type: PackageType::StaticLibrary,
            traits,
            direct: true,
            settings: Settings::with_defaults().unwrap(),
            options: Options::default(),
            package_id: Some("0".repeat(40)),
            package: Some(PublishedPackage {
                folder: PathBuf::from(format!("/cache/{}", name)),
                info: Arc::new(ConsumptionInfo {
                    cpp_info,
                    buildenv_info,
                    ..Default::default()
                }),
            }),
        }
    }

    pub fn lib(libs: &[&str]) -> CppInfo {
        let mut info = CppInfo::default();
        info.root.libs = libs.iter().map(|s| s.to_string()).collect();
        info
    }

    pub fn host() -> Traits {
        Traits {
            headers: true,
            libs: true,
            visible: true,
            ..Default::default()
        }
    }

    pub fn tool() -> Traits {
        Traits {
            run: true,
            build: true,
            ..Default::default()
        }
    }
}

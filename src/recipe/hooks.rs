// src/recipe/hooks.rs

//! Lifecycle hooks and the contexts the engine hands to them
//!
//! A recipe is passive: the engine owns the lifecycle and calls the hooks of
//! [`RecipeHooks`] with a context describing the node's resolved state. Hooks
//! only touch the directories and metadata their context exposes. Every hook
//! has a default: `source` fetches the data-file sources and applies the
//! data-file patches, the others do nothing.

use crate::conf::Conf;
use crate::cpp_info::{CppInfo, PublishedPackage};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::graph::{Context, Traits};
use crate::layout::files;
use crate::package_id::{PackageIdInfo, PackageIdMode};
use crate::recipe::format::SourceData;
use crate::recipe::reference::{RecipeRef, RequirementRef};
use crate::recipe::PackageType;
use crate::settings::{Options, Settings};
use crate::source::{self, SourceFetcher};
use crate::build::Backend;
use crate::build::runner::CommandRunner;
use crate::generators::GeneratorInput;
use crate::version::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};

/// Lifecycle stage, used to label errors and log files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Configure,
    Requirements,
    Validate,
    ValidateBuild,
    Source,
    Generate,
    Build,
    Package,
    PackageInfo,
    PackageId,
}

/// Resolved state of one node, as seen by its hooks
#[derive(Debug, Clone)]
pub struct NodeState {
    pub name: String,
    pub version: Version,
    pub context: Context,
    pub package_type: PackageType,
    /// Settings of the node's own context
    pub settings: Settings,
    /// Settings of the build context, for cross-building decisions
    pub settings_build: Settings,
    pub options: Options,
    /// Tool configuration from the node's profile
    pub conf: Conf,
    /// Whether the node is a root of the graph
    pub is_root: bool,
}

impl NodeState {
    /// Reference without revision
    pub fn reference(&self) -> RecipeRef {
        RecipeRef::new(self.name.clone(), self.version.clone())
    }

    /// Shorthand for `settings.get_safe(path, None)`
    pub fn setting(&self, path: &str) -> Option<&str> {
        self.settings.get_safe(path, None)
    }

    /// Whether host and build platforms differ
    pub fn is_cross_building(&self) -> bool {
        ["os", "arch"].iter().any(|s| {
            let host = self.settings.get_safe(s, None);
            let build = self.settings_build.get_safe(s, None);
            host.is_some() && build.is_some() && host != build
        })
    }
}

/// A dependency of a node, as seen by its hooks and generators
#[derive(Debug, Clone)]
pub struct DependencyView {
    pub reference: RecipeRef,
    pub context: Context,
    pub package_type: PackageType,
    /// Traits aggregated over every path to this dependency
    pub traits: Traits,
    /// Whether the dependency is a direct requirement
    pub direct: bool,
    pub settings: Settings,
    pub options: Options,
    pub package_id: Option<String>,
    /// Package folder and consumption info, once the dependency is sealed
    pub package: Option<PublishedPackage>,
}

impl DependencyView {
    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn version(&self) -> &Version {
        &self.reference.version
    }
}

/// A requirement declared by a recipe
#[derive(Debug, Clone)]
pub struct Requirement {
    pub reference: RequirementRef,
    pub headers: bool,
    pub libs: bool,
    /// `None` derives from the dependency package type
    pub run: Option<bool>,
    pub visible: bool,
    pub build: bool,
    /// `None` means no
    pub transitive_headers: Option<bool>,
    /// `None` derives from the dependency package type
    pub transitive_libs: Option<bool>,
    /// Pins the version for the whole graph instead of adding an edge
    pub is_override: bool,
    /// Failures drop the edge instead of failing the consumer
    pub optional: bool,
    pub package_id_mode: Option<PackageIdMode>,
    /// Options requested for the dependency
    pub options: BTreeMap<String, String>,
}

impl Requirement {
    /// A regular host requirement
    pub fn host(reference: &str) -> Result<Self> {
        Ok(Self {
            reference: RequirementRef::parse(reference)?,
            headers: true,
            libs: true,
            run: None,
            visible: true,
            build: false,
            transitive_headers: None,
            transitive_libs: None,
            is_override: false,
            optional: false,
            package_id_mode: None,
            options: BTreeMap::new(),
        })
    }

    /// A tool requirement living in the build context
    pub fn tool(reference: &str) -> Result<Self> {
        let mut r = Self::host(reference)?;
        r.headers = false;
        r.libs = false;
        r.run = Some(true);
        r.visible = false;
        r.build = true;
        Ok(r)
    }

    pub fn transitive_headers(&mut self, value: bool) -> &mut Self {
        self.transitive_headers = Some(value);
        self
    }

    pub fn transitive_libs(&mut self, value: bool) -> &mut Self {
        self.transitive_libs = Some(value);
        self
    }

    pub fn run(&mut self, value: bool) -> &mut Self {
        self.run = Some(value);
        self
    }

    pub fn visible(&mut self, value: bool) -> &mut Self {
        self.visible = value;
        self
    }

    pub fn headers(&mut self, value: bool) -> &mut Self {
        self.headers = value;
        self
    }

    pub fn libs(&mut self, value: bool) -> &mut Self {
        self.libs = value;
        self
    }

    pub fn force_override(&mut self) -> &mut Self {
        self.is_override = true;
        self
    }

    pub fn optional(&mut self) -> &mut Self {
        self.optional = true;
        self
    }

    pub fn package_id_mode(&mut self, mode: PackageIdMode) -> &mut Self {
        self.package_id_mode = Some(mode);
        self
    }

    pub fn option(&mut self, name: &str, value: &str) -> &mut Self {
        self.options.insert(name.to_string(), value.to_string());
        self
    }

    /// Resolve the edge traits against the dependency's package type
    pub fn traits_for(&self, dep_type: PackageType) -> Traits {
        let links_statically = matches!(
            dep_type,
            PackageType::StaticLibrary | PackageType::HeaderLibrary
        );
        let has_binaries = matches!(
            dep_type,
            PackageType::SharedLibrary | PackageType::Application
        );
        let mut traits = Traits {
            headers: self.headers,
            libs: self.libs,
            run: self.run.unwrap_or(has_binaries),
            visible: self.visible,
            build: self.build,
            transitive_headers: self.transitive_headers.unwrap_or(false),
            transitive_libs: self.transitive_libs.unwrap_or(links_statically),
        };
        if dep_type == PackageType::HeaderLibrary {
            traits.libs = false;
        }
        if self.build {
            traits.headers = false;
            traits.libs = false;
        }
        traits
    }
}

/// Context of `config_options` and `configure`
pub struct ConfigureContext<'a> {
    pub node: &'a mut NodeState,
}

/// Context of `requirements` and `build_requirements`
pub struct RequirementsContext<'a> {
    pub node: &'a NodeState,
    requirements: Vec<Requirement>,
}

impl<'a> RequirementsContext<'a> {
    pub fn new(node: &'a NodeState) -> Self {
        Self {
            node,
            requirements: Vec::new(),
        }
    }

    /// Declare a host requirement
    pub fn requires(&mut self, reference: &str) -> Result<&mut Requirement> {
        self.add(Requirement::host(reference)?);
        Ok(self.last())
    }

    /// Declare a tool requirement
    pub fn tool_requires(&mut self, reference: &str) -> Result<&mut Requirement> {
        self.add(Requirement::tool(reference)?);
        Ok(self.last())
    }

    /// Declare a prepared requirement
    pub fn add(&mut self, requirement: Requirement) {
        self.requirements.push(requirement);
    }

    fn last(&mut self) -> &mut Requirement {
        let index = self.requirements.len() - 1;
        &mut self.requirements[index]
    }

    /// Requirements in declaration order
    pub fn into_requirements(self) -> Vec<Requirement> {
        self.requirements
    }
}

/// Context of `validate` and `validate_build`
pub struct ValidateContext<'a> {
    pub node: &'a NodeState,
    pub dependencies: &'a [DependencyView],
}

impl ValidateContext<'_> {
    /// A dependency by name
    pub fn dependency(&self, name: &str) -> Option<&DependencyView> {
        self.dependencies.iter().find(|d| d.name() == name)
    }

    /// Build an invalid-configuration error for this node
    pub fn invalid(&self, message: impl Into<String>) -> Error {
        Error::InvalidConfiguration(format!(
            "{}/{}: {}",
            self.node.name,
            self.node.version,
            message.into()
        ))
    }
}

/// Context of `source`
///
/// Sources are shared by every configuration of a recipe revision, so the
/// context only exposes the reference, not settings or options.
pub struct SourceContext<'a> {
    pub reference: &'a RecipeRef,
    pub source_folder: &'a Path,
    pub recipe_folder: Option<&'a Path>,
    pub data: &'a SourceData,
    pub fetcher: &'a SourceFetcher,
}

impl SourceContext<'_> {
    /// Fetch the data-file sources of this version, parts serially
    pub fn get_data_sources(&self) -> Result<()> {
        let Some(entry) = self.data.sources_for(&self.reference.version) else {
            return Ok(());
        };
        let mut specs = Vec::new();
        if let Some(main) = entry.main()? {
            specs.push(main);
        }
        for (name, part) in &entry.parts {
            specs.push(part.spec(name)?);
        }
        for spec in specs {
            let dest = match &spec.destination {
                Some(sub) => self.source_folder.join(sub),
                None => self.source_folder.to_path_buf(),
            };
            self.fetcher.get(&spec, &dest)?;
        }
        Ok(())
    }

    /// Apply the data-file patches of this version in declared order
    pub fn apply_data_patches(&self) -> Result<()> {
        let patches = self.data.patches_for(&self.reference.version);
        if patches.is_empty() {
            return Ok(());
        }
        source::apply_patches(patches, self.source_folder, self.recipe_folder)
    }

    /// Replace text in a source file; a missing search string is an error
    pub fn replace_in_file(&self, relative: &str, search: &str, replace: &str) -> Result<()> {
        source::replace_in_file(&self.source_folder.join(relative), search, replace, true)
            .map(|_| ())
    }
}

/// Context of `generate`, `build` and `package`
pub struct StageContext<'a> {
    pub node: &'a NodeState,
    pub dependencies: &'a [DependencyView],
    pub source_folder: PathBuf,
    pub build_folder: PathBuf,
    pub generators_folder: PathBuf,
    pub package_folder: PathBuf,
    pub recipe_folder: Option<PathBuf>,
    pub data: &'a SourceData,
    /// Build environment composed from the build-context dependencies
    pub buildenv: &'a Environment,
    pub runner: &'a CommandRunner,
    pub fetcher: &'a SourceFetcher,
    /// Job-count hint for parallel build tools
    pub jobs: usize,
}

impl StageContext<'_> {
    /// Run a shell command in the build folder
    pub fn run(&self, command: &str) -> Result<()> {
        self.runner.run_shell(command, &self.build_folder)
    }

    /// Run a shell command in a given folder
    pub fn run_in(&self, command: &str, cwd: &Path) -> Result<()> {
        self.runner.run_shell(command, cwd)
    }

    /// Inputs for the toolchain generators
    pub fn generator_input(&self) -> GeneratorInput<'_> {
        GeneratorInput {
            node: self.node,
            dependencies: self.dependencies,
            generators_folder: &self.generators_folder,
            build_folder: &self.build_folder,
            package_folder: &self.package_folder,
            buildenv: self.buildenv,
        }
    }

    /// Copy files matching `pattern` from `src` into the package folder
    pub fn copy_to_package(&self, pattern: &str, src: &Path, dst: &str) -> Result<Vec<PathBuf>> {
        files::copy(pattern, src, &self.package_folder.join(dst), true, &[])
    }
}

/// Context of `package_info`
pub struct PackageInfoContext<'a> {
    pub node: &'a NodeState,
    pub package_folder: &'a Path,
    pub cpp_info: &'a mut CppInfo,
    pub buildenv_info: &'a mut Environment,
    pub runenv_info: &'a mut Environment,
    pub conf_info: &'a mut Conf,
}

/// The callables of a recipe
///
/// Implementations must be `Send + Sync`: independent nodes run on
/// parallel threads.
pub trait RecipeHooks: Send + Sync {
    /// Remove options that make no sense for the platform
    fn config_options(&self, _ctx: &mut ConfigureContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Adjust settings and options once they are known
    fn configure(&self, _ctx: &mut ConfigureContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Declare host requirements
    fn requirements(&self, _ctx: &mut RequirementsContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Declare tool requirements
    fn build_requirements(&self, _ctx: &mut RequirementsContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Reject unsupported configurations with an invalid-configuration error
    fn validate(&self, _ctx: &ValidateContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Like `validate`, but only checked when building from source
    fn validate_build(&self, _ctx: &ValidateContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Acquire sources into the source folder
    fn source(&self, ctx: &mut SourceContext<'_>) -> Result<()> {
        ctx.get_data_sources()?;
        ctx.apply_data_patches()
    }

    /// Write toolchain and dependency files into the generators folder
    fn generate(&self, _ctx: &mut StageContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Compile
    fn build(&self, _ctx: &mut StageContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Copy artifacts into the package folder
    fn package(&self, _ctx: &mut StageContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Describe how consumers use the package
    fn package_info(&self, _ctx: &mut PackageInfoContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Delete or narrow the inputs of the package id
    fn package_id(&self, _info: &mut PackageIdInfo) -> Result<()> {
        Ok(())
    }

    /// Backend that produces the package, when the recipe commits to one
    ///
    /// Packaging fixups tied to a build tool (Meson's `libxyz.a` naming on
    /// MSVC) only apply when this names that tool.
    fn build_backend(&self) -> Option<Backend> {
        None
    }
}

// src/recipe/mod.rs

//! Recipe model
//!
//! A recipe is a declarative record ([`RecipeMetadata`] plus the per-version
//! [`SourceData`]) and a set of lifecycle callables ([`RecipeHooks`]). The
//! engine owns the lifecycle; recipes are passive values it invokes.
//!
//! Recipes come from two places:
//! - `recipe.toml` + `sources.toml` folders in a recipe index, turned into
//!   hooks by [`declarative::DeclarativeRecipe`]
//! - programmatic [`RecipeHooks`] implementations registered with the
//!   [`RecipeRegistry`]

pub mod condition;
pub mod declarative;
pub mod format;
pub mod hooks;
pub mod reference;
pub mod registry;

pub use format::{PatchSpec, RecipeDocument, SourceData, VersionSources};
pub use hooks::{
    ConfigureContext, DependencyView, NodeState, PackageInfoContext, RecipeHooks, Requirement,
    RequirementsContext, SourceContext, Stage, StageContext, ValidateContext,
};
pub use reference::{RecipeRef, RequirementRef};
pub use registry::{RecipeRegistry, RecipeValidation};

use crate::hash;
use crate::settings::OptionDef;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// What kind of artifact a recipe produces
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PackageType {
    Application,
    /// Shared or static, decided by the `shared` option
    Library,
    SharedLibrary,
    StaticLibrary,
    HeaderLibrary,
    BuildScripts,
    PythonRequire,
    #[default]
    Unknown,
}

impl PackageType {
    /// Whether consumers link against the package
    pub fn is_library(self) -> bool {
        matches!(
            self,
            Self::Library | Self::SharedLibrary | Self::StaticLibrary | Self::HeaderLibrary
        )
    }
}

/// Well-known implicit option relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Implements {
    /// Drop `fPIC` on Windows and when `shared=True`
    AutoSharedFpic,
    /// Clear the package id inputs of header-only packages
    AutoHeaderOnly,
}

/// Declarative part of a recipe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    pub name: String,
    /// Fixed version, for recipes that only build one version
    pub version: Option<Version>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub topics: Vec<String>,
    pub package_type: PackageType,
    /// Top-level settings the recipe consumes
    pub settings: Vec<String>,
    pub options: BTreeMap<String, OptionDef>,
    pub implements: Vec<Implements>,
    pub languages: Vec<String>,
    /// Package paths exempt from layout cleanup
    pub retain: Vec<String>,
}

impl RecipeMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, package_type: PackageType) -> Self {
        self.package_type = package_type;
        self
    }

    pub fn with_settings(mut self, settings: &[&str]) -> Self {
        self.settings = settings.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_option(mut self, name: &str, def: OptionDef) -> Self {
        self.options.insert(name.to_string(), def);
        self
    }

    pub fn with_implements(mut self, implements: Implements) -> Self {
        self.implements.push(implements);
        self
    }

    pub fn with_license(mut self, license: &str) -> Self {
        self.license = Some(license.to_string());
        self
    }
}

/// A loaded recipe
#[derive(Clone)]
pub struct Recipe {
    pub metadata: RecipeMetadata,
    /// Per-version sources and patches
    pub data: SourceData,
    /// Folder the recipe was loaded from; patch files resolve against it
    pub folder: Option<PathBuf>,
    /// Recipe revision
    pub revision: String,
    pub hooks: Arc<dyn RecipeHooks>,
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("name", &self.metadata.name)
            .field("revision", &self.revision)
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

impl Recipe {
    /// A programmatic recipe; the revision digests its declarative part
    pub fn new(metadata: RecipeMetadata, hooks: Arc<dyn RecipeHooks>) -> Self {
        let mut recipe = Self {
            metadata,
            data: SourceData::default(),
            folder: None,
            revision: String::new(),
            hooks,
        };
        recipe.revision = recipe.declared_digest();
        recipe
    }

    /// Attach source data, updating the revision
    pub fn with_data(mut self, data: SourceData) -> Self {
        self.data = data;
        self.revision = self.declared_digest();
        self
    }

    /// Override the revision
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    fn declared_digest(&self) -> String {
        let metadata = serde_json::to_string(&self.metadata).unwrap_or_default();
        let data = serde_json::to_string(&self.data).unwrap_or_default();
        hash::sha256_parts([metadata, data])
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn implements(&self, implements: Implements) -> bool {
        self.metadata.implements.contains(&implements)
    }

    /// Full reference of this recipe at a version
    pub fn reference(&self, version: &Version) -> RecipeRef {
        RecipeRef {
            name: self.metadata.name.clone(),
            version: version.clone(),
            revision: Some(self.revision.clone()),
        }
    }
}

/// A recipe picked for a concrete version
#[derive(Debug, Clone)]
pub struct ResolvedRecipe {
    pub version: Version,
    pub recipe: Arc<Recipe>,
}

// src/lib.rs

//! Pantry recipe engine
//!
//! Evaluates C/C++ package recipes and turns them into relocatable binary
//! packages plus the consumption info downstream builds link against.
//!
//! # Architecture
//!
//! - Recipes are declarative records plus lifecycle hooks ([`recipe`])
//! - Settings and options are typed and constrained ([`settings`])
//! - Dependencies resolve across host and build contexts ([`graph`])
//! - Package ids are hashes of the effective inputs ([`package_id`])
//! - The [`lifecycle::Controller`] drives nodes through source, generate,
//!   build, package and package_info, reusing cached binaries

pub mod build;
pub mod conf;
pub mod config;
pub mod cpp_info;
pub mod environment;
pub mod error;
pub mod generators;
pub mod graph;
pub mod hash;
pub mod layout;
pub mod lifecycle;
pub mod package_id;
pub mod profile;
pub mod recipe;
pub mod settings;
pub mod source;
pub mod version;

pub use build::{Backend, BackendOptions};
pub use conf::{Conf, ConfValue};
pub use config::{BuildPolicy, EngineConfig};
pub use cpp_info::{Component, ConsumptionInfo, CppInfo, PublishedPackage};
pub use environment::Environment;
pub use error::{Disposition, Error, ErrorContext, ErrorKind, Result};
pub use graph::{Context, DepGraph, GraphBuilder, NodeId, Traits};
pub use lifecycle::{CancelToken, Controller, Outcome, RunReport};
pub use package_id::{PackageIdInfo, PackageIdMode, compute_package_ids};
pub use profile::Profile;
pub use recipe::{PackageType, Recipe, RecipeHooks, RecipeMetadata, RecipeRef, RecipeRegistry, RequirementRef};
pub use settings::{OptionDef, Options, Settings};
pub use version::{Version, VersionRange};

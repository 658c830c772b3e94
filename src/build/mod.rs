// src/build/mod.rs

//! Build driver
//!
//! A [`Backend`] is one way of turning sources into an installed tree:
//! CMake, Meson, Autotools, plain Make, a pre-built binary download, or
//! nothing at all. Each backend offers three operations used by the
//! declarative recipe hooks and available to programmatic recipes:
//!
//! - [`Backend::generate`] writes toolchain and dependency files
//! - [`Backend::configure_and_build`] runs the build tool
//! - [`Backend::install`] installs into the package folder
//!
//! Commands run through the stage's [`runner::CommandRunner`].

pub mod backend;
pub mod runner;

pub use runner::{CommandRunner, RunOptions};

use crate::error::{Error, Result};
use crate::generators::{self, GeneratorInput};
use crate::layout::files;
use crate::recipe::StageContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

/// Build system driving a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    CMake,
    Meson,
    Autotools,
    Make,
    /// Download platform binaries instead of compiling
    Prebuilt,
    /// The recipe's own hooks do everything
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    NoBuild,
}

/// Recipe-provided parameters of a backend
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Source subdirectory holding the top-level build file
    pub subdir: Option<String>,
    /// CMake generator name
    pub generator: Option<String>,
    pub cache_variables: BTreeMap<String, String>,
    pub configure_args: Vec<String>,
    pub targets: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl BackendOptions {
    /// Runner options for commands of this backend
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout: self.timeout,
            env: self.env.clone(),
        }
    }
}

impl Backend {
    /// Write the generator files this backend reads
    ///
    /// Environment scripts and pkg-config files are written for every
    /// backend; toolchain files only for the backend that uses them.
    pub fn generate(&self, input: &GeneratorInput<'_>, opts: &BackendOptions) -> Result<Vec<PathBuf>> {
        let mut written = generators::env::write_env_scripts(input)?;
        written.extend(generators::pkgconfig::write(input)?);
        match self {
            Self::CMake => written.extend(generators::cmake::write(input, &opts.cache_variables)?),
            Self::Meson => written.extend(generators::meson::write(input)?),
            Self::Autotools | Self::Make => written.extend(generators::autotools::write(input)?),
            Self::Prebuilt | Self::NoBuild => {}
        }
        debug!("{} generator wrote {} file(s)", self, written.len());
        Ok(written)
    }

    /// Configure and compile
    pub fn configure_and_build(&self, ctx: &StageContext<'_>, opts: &BackendOptions) -> Result<()> {
        let plan = backend::BuildPaths::new(ctx, opts);
        let mut run = opts.run_options();
        match self {
            Self::CMake => {
                ctx.runner.run_argv(&backend::cmake_configure(ctx.node, &plan, opts), &ctx.build_folder, &run)?;
                ctx.runner.run_argv(&backend::cmake_build(ctx.node, &plan, opts), &ctx.build_folder, &run)
            }
            Self::Meson => {
                ctx.runner.run_argv(&backend::meson_setup(ctx.node, &plan, opts), &ctx.build_folder, &run)?;
                ctx.runner.run_argv(&backend::meson_compile(&plan, opts), &ctx.build_folder, &run)
            }
            Self::Autotools => {
                run.env = toolchain_env(ctx, opts);
                ctx.runner.run_argv(&backend::autotools_configure(ctx.node, &plan, opts), &ctx.build_folder, &run)?;
                ctx.runner.run_argv(&backend::make(&plan, &opts.targets, None), &ctx.build_folder, &run)
            }
            Self::Make => {
                run.env = toolchain_env(ctx, opts);
                ctx.runner.run_argv(&backend::make(&plan, &opts.targets, None), &plan.source, &run)
            }
            Self::Prebuilt => fetch_prebuilt(ctx),
            Self::NoBuild => Ok(()),
        }
    }

    /// Install into the package folder
    pub fn install(&self, ctx: &StageContext<'_>, opts: &BackendOptions) -> Result<()> {
        let plan = backend::BuildPaths::new(ctx, opts);
        let mut run = opts.run_options();
        match self {
            Self::CMake => ctx.runner.run_argv(&backend::cmake_install(ctx.node, &plan), &ctx.build_folder, &run),
            Self::Meson => ctx.runner.run_argv(&backend::meson_install(&plan), &ctx.build_folder, &run),
            Self::Autotools => {
                run.env = toolchain_env(ctx, opts);
                let targets = vec!["install".to_string()];
                ctx.runner.run_argv(&backend::make(&plan, &targets, None), &ctx.build_folder, &run)
            }
            Self::Make => {
                run.env = toolchain_env(ctx, opts);
                let targets = vec!["install".to_string()];
                let prefix = format!("PREFIX={}", ctx.package_folder.display());
                ctx.runner.run_argv(&backend::make(&plan, &targets, Some(prefix)), &plan.source, &run)
            }
            Self::Prebuilt => {
                let copied = files::copy("*", &ctx.build_folder, &ctx.package_folder, true, &[])?;
                info!("Installed {} pre-built file(s)", copied.len());
                Ok(())
            }
            Self::NoBuild => Ok(()),
        }
    }
}

/// Toolchain variables for Make-based builds, recipe env on top
fn toolchain_env(ctx: &StageContext<'_>, opts: &BackendOptions) -> BTreeMap<String, String> {
    let mut env = generators::autotools::environment(&ctx.generator_input());
    env.extend(opts.env.clone());
    env
}

/// Download and unpack the binaries of the node's platform into the build folder
fn fetch_prebuilt(ctx: &StageContext<'_>) -> Result<()> {
    let os = ctx.node.setting("os").unwrap_or_default();
    let arch = ctx.node.setting("arch").unwrap_or_default();
    let entry = ctx
        .data
        .sources_for(&ctx.node.version)
        .and_then(|e| e.for_platform(os, arch))
        .ok_or_else(|| {
            Error::InvalidConfiguration(format!(
                "{}/{}: no pre-built binaries for {}-{}",
                ctx.node.name, ctx.node.version, os, arch
            ))
        })?;
    let spec = entry.spec(&format!("{}-{}", os, arch))?;
    info!("Fetching pre-built binaries for {}-{}", os, arch);
    ctx.fetcher.get(&spec, &ctx.build_folder)
}

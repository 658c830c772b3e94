// src/lifecycle/mod.rs

//! Lifecycle controller
//!
//! The [`Controller`] walks a closed [`DepGraph`] level by level and drives
//! every node through its stages:
//!
//! 1. reject nodes whose configuration `validate` refused
//! 2. look the package id up in the binary cache
//! 3. on a miss: `validate_build`, `source` (once per recipe revision),
//!    `generate`, `build`, `package`, normalization and atomic publication
//! 4. `package_info` on the published folder, then seal the node
//!
//! A node starts only after every dependency is sealed. A failing node
//! skips its dependents; without `keep_going` no further node is started.

pub mod cache;
pub mod cancel;
pub mod lock;
pub mod scheduler;

pub use cache::Cache;
pub use cancel::CancelToken;
pub use scheduler::Scheduler;

use crate::build::CommandRunner;
use crate::conf::keys;
use crate::config::{BuildPolicy, EngineConfig};
use crate::cpp_info::{ConsumptionInfo, PublishedPackage};
use crate::environment::Environment;
use crate::error::{Disposition, Error, ErrorContext, ErrorKind, Result};
use crate::graph::{Context, DepGraph, Node, NodeId};
use crate::layout::{self, NormalizeOptions, files, manifest::MANIFEST_FILE, PackageRecord};
use crate::profile::Profile;
use crate::recipe::{DependencyView, PackageInfoContext, SourceContext, Stage, StageContext, ValidateContext};
use crate::source::SourceFetcher;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tracing::{debug, error, info, warn};

/// What happened to one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    /// Binary taken from the cache
    Cached,
    /// Built from source in this run
    Built,
    Failed,
    /// Not driven: a dependency failed or the run stopped
    Skipped,
    /// Configuration rejected by the recipe
    Invalid,
}

/// Result of one node
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub id: NodeId,
    pub reference: String,
    pub context: Context,
    pub package_id: Option<String>,
    pub outcome: Outcome,
    /// Sealed package, for cached and built nodes
    pub package: Option<PublishedPackage>,
}

/// Result of a run
#[derive(Debug, Default)]
pub struct RunReport {
    /// Nodes in topological order
    pub nodes: Vec<NodeReport>,
    pub errors: Vec<Error>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
            && self
                .nodes
                .iter()
                .all(|n| matches!(n.outcome, Outcome::Cached | Outcome::Built))
    }

    /// Report of the node of a name in a context
    pub fn node(&self, name: &str, context: Context) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| {
            n.context == context && n.reference.split('/').next() == Some(name)
        })
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.nodes.iter().filter(|n| n.outcome == outcome).count()
    }

    /// Kind of the first error, used for the exit status
    pub fn first_error_kind(&self) -> Option<ErrorKind> {
        self.errors.first().map(Error::kind)
    }
}

/// Per-run state shared between worker threads
#[derive(Default)]
struct RunState {
    sealed: Mutex<BTreeMap<NodeId, PublishedPackage>>,
    errors: Mutex<Vec<Error>>,
}

/// Drives dependency graphs through the lifecycle
///
/// Owns the process-wide resources of a run: the cache, the source fetcher
/// and the cancel token.
pub struct Controller {
    config: EngineConfig,
    cache: Cache,
    fetcher: SourceFetcher,
    cancel: CancelToken,
}

fn error_context(node: &Node, stage: Stage) -> ErrorContext {
    ErrorContext {
        reference: node.reference.to_string(),
        context: node.context(),
        package_id: node.package_id.clone(),
        stage: Some(stage),
    }
}

fn outcome_for(error: &Error) -> Outcome {
    match error.kind() {
        ErrorKind::InvalidConfiguration | ErrorKind::InvalidSetting => Outcome::Invalid,
        _ => Outcome::Failed,
    }
}

/// Whether a dependency is a tool of the build context
fn is_tool(view: &DependencyView) -> bool {
    view.context == Context::Build || view.traits.build
}

impl Controller {
    pub fn new(config: EngineConfig, cancel: CancelToken) -> Result<Self> {
        let cache = Cache::open(&config.cache_root)?;
        let fetcher = SourceFetcher::new(cache.downloads(), config.download.clone(), cancel.clone())?;
        Ok(Self {
            config,
            cache,
            fetcher,
            cancel,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Drive every node of the graph
    ///
    /// Node failures are collected in the report; the returned error is
    /// reserved for failures of the run itself.
    pub fn run(&self, graph: &DepGraph, host: &Profile, build: &Profile) -> Result<RunReport> {
        let scheduler = Scheduler::new(self.config.max_concurrency)?;
        let halt = CancelToken::new();
        let state = RunState::default();
        info!(
            "Driving {} node(s) in {} level(s), {} at a time",
            graph.len(),
            graph.levels().len(),
            scheduler.max_concurrency()
        );

        let results = scheduler.run(graph.levels(), &halt, |id| {
            if self.cancel.is_cancelled() {
                halt.cancel();
                return (Outcome::Skipped, None);
            }
            let node = graph.node(id);
            let profile = match node.context() {
                Context::Host => host,
                Context::Build => build,
            };
            match self.drive(graph, id, profile, &state) {
                Ok(result) => result,
                Err(e) => {
                    error!("{}: {}", node.label(), e);
                    let outcome = outcome_for(&e);
                    let disposition = e.kind().disposition();
                    if disposition == Disposition::RunFatal || !self.config.keep_going {
                        halt.cancel();
                    }
                    state.errors.lock().push(e);
                    (outcome, None)
                }
            }
        });

        let mut by_id: BTreeMap<NodeId, (Outcome, Option<PublishedPackage>)> = results
            .into_iter()
            .map(|(id, result)| (id, result.unwrap_or((Outcome::Skipped, None))))
            .collect();
        let nodes = graph
            .order()
            .iter()
            .map(|id| {
                let node = graph.node(*id);
                let (outcome, package) = by_id.remove(id).unwrap_or((Outcome::Skipped, None));
                NodeReport {
                    id: *id,
                    reference: node.reference.to_string(),
                    context: node.context(),
                    package_id: node.package_id.clone(),
                    outcome,
                    package,
                }
            })
            .collect();
        let report = RunReport {
            nodes,
            errors: state.errors.into_inner(),
        };
        info!(
            "Run finished: {} built, {} cached, {} failed, {} invalid, {} skipped",
            report.count(Outcome::Built),
            report.count(Outcome::Cached),
            report.count(Outcome::Failed),
            report.count(Outcome::Invalid),
            report.count(Outcome::Skipped)
        );
        Ok(report)
    }

    /// Acquire the sources of one node into the cache
    pub fn source(&self, graph: &DepGraph, id: NodeId) -> Result<PathBuf> {
        let node = graph.node(id);
        self.acquire_sources(node)
            .map_err(|e| e.in_node(error_context(node, Stage::Source)))
    }

    fn acquire_sources(&self, node: &Node) -> Result<PathBuf> {
        let recipe = &node.recipe;
        self.cache.ensure_sources(&node.reference, |dest| {
            let mut ctx = SourceContext {
                reference: &node.reference,
                source_folder: dest,
                recipe_folder: recipe.folder.as_deref(),
                data: &recipe.data,
                fetcher: &self.fetcher,
            };
            recipe.hooks.source(&mut ctx)
        })
    }

    fn drive(
        &self,
        graph: &DepGraph,
        id: NodeId,
        profile: &Profile,
        state: &RunState,
    ) -> Result<(Outcome, Option<PublishedPackage>)> {
        let node = graph.node(id);
        if let crate::graph::NodeStatus::Invalid(message) = &node.status {
            return Err(Error::InvalidConfiguration(message.clone()).in_node(error_context(node, Stage::Validate)));
        }

        let mut views = graph.dependency_views(id);
        {
            let sealed = state.sealed.lock();
            for (view, dep) in views.iter_mut().zip(&node.dependencies) {
                match sealed.get(&dep.node) {
                    Some(package) => view.package = Some(package.clone()),
                    None => {
                        debug!("{}: dependency {} is not available", node.label(), view.reference);
                        return Ok((Outcome::Skipped, None));
                    }
                }
            }
        }

        let package_id = node
            .package_id
            .clone()
            .ok_or_else(|| Error::Internal(format!("{} has no package id", node.label())))?;

        let (outcome, folder) = {
            let _lock = self.cache.package_lock(&node.reference, &package_id)?;
            let cached = match self.config.policy {
                BuildPolicy::Always => None,
                _ => self.cache.lookup(&node.reference, &package_id)?,
            };
            match cached {
                Some(folder) => {
                    info!("{}: using cached package {}", node.label(), package_id);
                    (Outcome::Cached, folder)
                }
                None if self.config.policy == BuildPolicy::Never => {
                    return Err(Error::MissingBinary(format!("{}:{}", node.reference, package_id))
                        .in_node(error_context(node, Stage::PackageId)));
                }
                None => {
                    let folder = self.build_from_source(node, &views, &package_id, profile)?;
                    (Outcome::Built, folder)
                }
            }
        };

        let info = self
            .package_info(node, &views, &folder)
            .map_err(|e| e.in_node(error_context(node, Stage::PackageInfo)))?;
        if outcome == Outcome::Built {
            layout::uncovered_files(&folder, &info.cpp_info)?;
        }
        self.cache.store_info(&folder, &info)?;
        let package = PublishedPackage {
            folder,
            info: Arc::new(info),
        };
        state.sealed.lock().insert(id, package.clone());
        Ok((outcome, Some(package)))
    }

    /// Run `package_info` and seal the result
    fn package_info(&self, node: &Node, views: &[DependencyView], folder: &Path) -> Result<ConsumptionInfo> {
        let mut info = ConsumptionInfo::default();
        let mut ctx = PackageInfoContext {
            node: &node.state,
            package_folder: folder,
            cpp_info: &mut info.cpp_info,
            buildenv_info: &mut info.buildenv_info,
            runenv_info: &mut info.runenv_info,
            conf_info: &mut info.conf_info,
        };
        node.recipe.hooks.package_info(&mut ctx)?;
        let direct: Vec<&str> = views.iter().filter(|v| v.direct).map(|v| v.name()).collect();
        info.cpp_info.check_component_requires(&direct)?;
        // Validate the component graph once, before consumers read it
        info.cpp_info.aggregated()?;
        Ok(info)
    }

    fn timeout(&self, node: &Node) -> Option<Duration> {
        match node.state.conf.get_int(keys::BUILD_TIMEOUT) {
            Some(secs) if secs > 0 => Some(Duration::from_secs(secs as u64)),
            Some(_) => None,
            None => self.config.build_timeout(),
        }
    }

    /// Build environment: tool contributions in topological order, then the profile
    fn buildenv(views: &[DependencyView], profile: &Profile) -> Environment {
        let mut env = Environment::new();
        for view in views.iter().filter(|v| is_tool(v)) {
            if let Some(package) = &view.package {
                env.compose(&package.info.buildenv_info);
            }
        }
        env.compose(&profile.buildenv);
        env
    }

    fn runner(
        &self,
        node: &Node,
        package_id: &str,
        stage: Stage,
        env: &BTreeMap<String, Option<String>>,
    ) -> CommandRunner {
        let log = self.cache.log_file(&node.reference, node.context(), package_id, stage);
        if log.exists() {
            let _ = fs::remove_file(&log);
        }
        CommandRunner::new(log, self.cancel.clone())
            .with_env(env.clone())
            .with_timeout(self.timeout(node))
            .with_log_tail(self.config.log_tail)
    }

    fn build_from_source(
        &self,
        node: &Node,
        views: &[DependencyView],
        package_id: &str,
        profile: &Profile,
    ) -> Result<PathBuf> {
        let recipe = &node.recipe;
        let hooks = &recipe.hooks;
        let ctx_for = |stage| error_context(node, stage);

        hooks
            .validate_build(&ValidateContext {
                node: &node.state,
                dependencies: views,
            })
            .map_err(|e| e.in_node(ctx_for(Stage::ValidateBuild)))?;

        info!("{}: building package {}", node.label(), package_id);
        let sources = self
            .acquire_sources(node)
            .map_err(|e| e.in_node(ctx_for(Stage::Source)))?;
        self.cancel.check()?;

        let workspace = self.cache.build_workspace(&node.reference, package_id);
        if workspace.exists() {
            fs::remove_dir_all(&workspace)?;
        }
        let source_folder = workspace.join("src");
        let build_folder = workspace.join("build");
        let generators_folder = build_folder.join("generators");
        files::copy("*", &sources, &source_folder, true, &[MANIFEST_FILE.to_string()])?;
        fs::create_dir_all(&generators_folder)?;

        let staging = self.cache.package_staging(&node.reference, package_id)?;
        let result = self.run_stages(
            node,
            views,
            profile,
            package_id,
            StageFolders {
                source: source_folder,
                build: build_folder,
                generators: generators_folder,
                package: staging.clone(),
            },
        );
        if let Err(e) = result {
            if staging.exists() {
                let _ = fs::remove_dir_all(&staging);
            }
            warn!("{}: build folder kept at {}", node.label(), workspace.display());
            return Err(e);
        }

        let record = PackageRecord {
            reference: node.reference.to_string(),
            context: node.context().to_string(),
            package_id: package_id.to_string(),
            package_revision: String::new(),
            settings: node.state.settings.values().clone(),
            options: node.state.options.values().clone(),
            requires: views
                .iter()
                .filter(|v| v.direct)
                .map(|v| format!("{}:{}", v.reference, v.package_id.as_deref().unwrap_or("-")))
                .collect(),
            created_at: Utc::now(),
        };
        let published = self.cache.publish(&staging, record)?;
        fs::remove_dir_all(&workspace)?;
        Ok(published)
    }

    fn run_stages(
        &self,
        node: &Node,
        views: &[DependencyView],
        profile: &Profile,
        package_id: &str,
        folders: StageFolders,
    ) -> Result<()> {
        let recipe = &node.recipe;
        let buildenv = Self::buildenv(views, profile);
        let env = buildenv.evaluate(|name| std::env::var(name).ok());
        let ctx_for = |stage| error_context(node, stage);

        for stage in [Stage::Generate, Stage::Build, Stage::Package] {
            self.cancel.check().map_err(|e| e.in_node(ctx_for(stage)))?;
            let runner = self.runner(node, package_id, stage, &env);
            let mut ctx = StageContext {
                node: &node.state,
                dependencies: views,
                source_folder: folders.source.clone(),
                build_folder: folders.build.clone(),
                generators_folder: folders.generators.clone(),
                package_folder: folders.package.clone(),
                recipe_folder: recipe.folder.clone(),
                data: &recipe.data,
                buildenv: &buildenv,
                runner: &runner,
                fetcher: &self.fetcher,
                jobs: self.config.jobs(),
            };
            debug!("{}: {}", node.label(), stage);
            let result = match stage {
                Stage::Generate => recipe.hooks.generate(&mut ctx),
                Stage::Build => recipe.hooks.build(&mut ctx),
                _ => recipe.hooks.package(&mut ctx),
            };
            result.map_err(|e| e.in_node(ctx_for(stage)))?;
        }

        let opts = NormalizeOptions::for_node(&node.state, recipe.hooks.build_backend(), &recipe.metadata.retain);
        let report = layout::normalize(&folders.package, &opts).map_err(|e| e.in_node(ctx_for(Stage::Package)))?;
        debug!(
            "{}: normalization removed {} and renamed {} file(s)",
            node.label(),
            report.removed.len(),
            report.renamed.len()
        );
        Ok(())
    }
}

/// Working folders of one build
struct StageFolders {
    source: PathBuf,
    build: PathBuf,
    generators: PathBuf,
    package: PathBuf,
}

/// Nodes whose package is not in the cache
pub fn missing_packages(cache: &Cache, graph: &DepGraph) -> Result<BTreeSet<NodeId>> {
    let mut missing = BTreeSet::new();
    for node in graph.nodes() {
        let Some(package_id) = &node.package_id else {
            continue;
        };
        if cache.lookup(&node.reference, package_id)?.is_none() {
            missing.insert(node.id);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_names() {
        assert_eq!(Outcome::Cached.to_string(), "cached");
        assert_eq!(serde_json::to_string(&Outcome::Invalid).unwrap(), "\"invalid\"");
    }

    #[test]
    fn test_outcome_for_kind() {
        assert_eq!(outcome_for(&Error::InvalidConfiguration("x".into())), Outcome::Invalid);
        assert_eq!(
            outcome_for(&Error::BuildFailed {
                message: "make".into(),
                log_tail: String::new()
            }),
            Outcome::Failed
        );
    }

    #[test]
    fn test_report_lookup() {
        let report = RunReport {
            nodes: vec![NodeReport {
                id: NodeId(0),
                reference: "zlib/1.3.1#abc".into(),
                context: Context::Host,
                package_id: None,
                outcome: Outcome::Built,
                package: None,
            }],
            errors: Vec::new(),
        };
        assert!(report.is_success());
        assert_eq!(report.node("zlib", Context::Host).map(|n| n.outcome), Some(Outcome::Built));
        assert!(report.node("zlib", Context::Build).is_none());
    }
}

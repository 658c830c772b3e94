// tests/common/mod.rs

//! Shared fixtures for integration tests: scratch caches, programmatic
//! recipes that record what the engine handed them, and local archives
//! served through `file://` URLs.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use pantry::error::Result;
use pantry::generators::autotools;
use pantry::recipe::{
    PackageInfoContext, RequirementsContext, SourceData, StageContext, VersionSources,
};
use pantry::recipe::format::Urls;
use pantry::{
    CancelToken, Context, Controller, DepGraph, EngineConfig, GraphBuilder, PackageIdInfo,
    PackageType, Profile, Recipe, RecipeHooks, RecipeMetadata, RecipeRegistry, RunReport,
    compute_package_ids,
};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// What a recipe saw while building
#[derive(Debug, Clone, Default)]
pub struct BuildObservation {
    pub compiler: Option<String>,
    /// `LIBS` as the autotools generator computes it
    pub libs: String,
    /// `PATH` of the composed build environment
    pub path: Option<String>,
}

/// Shared record of the builds of one recipe
#[derive(Debug, Default)]
pub struct Probe {
    builds: AtomicUsize,
    observations: Mutex<Vec<BuildObservation>>,
}

impl Probe {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn observations(&self) -> Vec<BuildObservation> {
        self.observations.lock().clone()
    }
}

/// Programmatic recipe packaging a header, a library or an executable
#[derive(Default)]
pub struct TestRecipe {
    pub requires: Vec<String>,
    pub tools: Vec<String>,
    /// Extra files written into the package, relative path and content
    pub files: Vec<(String, String)>,
    pub clear_package_id: bool,
    pub removed_settings: Vec<String>,
    /// Shell command run by the build hook
    pub command: Option<String>,
    pub skip_license: bool,
    pub probe: Arc<Probe>,
}

impl TestRecipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requires(mut self, reference: &str) -> Self {
        self.requires.push(reference.to_string());
        self
    }

    pub fn tool(mut self, reference: &str) -> Self {
        self.tools.push(reference.to_string());
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    pub fn clear_package_id(mut self) -> Self {
        self.clear_package_id = true;
        self
    }

    pub fn remove_setting(mut self, path: &str) -> Self {
        self.removed_settings.push(path.to_string());
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    pub fn failing(self) -> Self {
        self.command("echo compiling; exit 3")
    }

    pub fn without_license(mut self) -> Self {
        self.skip_license = true;
        self
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }
}

fn write_file(root: &Path, relative: &str, content: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

impl RecipeHooks for TestRecipe {
    fn requirements(&self, ctx: &mut RequirementsContext<'_>) -> Result<()> {
        for r in &self.requires {
            ctx.requires(r)?;
        }
        Ok(())
    }

    fn build_requirements(&self, ctx: &mut RequirementsContext<'_>) -> Result<()> {
        for r in &self.tools {
            ctx.tool_requires(r)?;
        }
        Ok(())
    }

    fn build(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        self.probe.builds.fetch_add(1, Ordering::SeqCst);
        let vars = autotools::environment(&ctx.generator_input());
        self.probe.observations.lock().push(BuildObservation {
            compiler: ctx.node.setting("compiler").map(str::to_string),
            libs: vars.get("LIBS").cloned().unwrap_or_default(),
            path: ctx.buildenv.value("PATH", None),
        });
        match &self.command {
            Some(command) => ctx.run(command),
            None => Ok(()),
        }
    }

    fn package(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let name = ctx.node.name.clone();
        let package = &ctx.package_folder;
        if !self.skip_license {
            write_file(package, "licenses/LICENSE", &format!("{} license\n", name))?;
        }
        match ctx.node.package_type {
            PackageType::HeaderLibrary => {
                write_file(package, &format!("include/{}/{}.hpp", name, name), "#pragma once\n")?;
            }
            PackageType::Application => {
                write_file(package, &format!("bin/{}", name), "#!/bin/sh\n")?;
            }
            _ => {
                write_file(package, &format!("include/{}.h", name), "#pragma once\n")?;
                write_file(package, &format!("lib/lib{}.a", name), "!<arch>\n")?;
            }
        }
        for (path, content) in &self.files {
            write_file(package, path, content)?;
        }
        Ok(())
    }

    fn package_info(&self, ctx: &mut PackageInfoContext<'_>) -> Result<()> {
        let name = ctx.node.name.clone();
        match ctx.node.package_type {
            PackageType::HeaderLibrary => {
                ctx.cpp_info.root.libdirs.clear();
                ctx.cpp_info.root.bindirs.clear();
            }
            PackageType::Application => {
                ctx.cpp_info.root.libs.push(name);
                let bin = ctx.package_folder.join("bin");
                ctx.buildenv_info.prepend_path("PATH", &bin.display().to_string());
            }
            _ => ctx.cpp_info.root.libs.push(name),
        }
        Ok(())
    }

    fn package_id(&self, info: &mut PackageIdInfo) -> Result<()> {
        if self.clear_package_id {
            info.clear();
        }
        for path in &self.removed_settings {
            info.settings.rm_safe(path);
        }
        Ok(())
    }
}

pub fn meta(name: &str, package_type: PackageType) -> RecipeMetadata {
    RecipeMetadata::new(name)
        .with_type(package_type)
        .with_settings(&["os", "arch", "compiler", "build_type"])
        .with_license("MIT")
}

/// A Linux x86_64 profile
pub fn profile(compiler: &str, version: &str, build_type: &str) -> Profile {
    Profile::parse(
        &format!(
            "[settings]\nos=Linux\narch=x86_64\ncompiler={}\ncompiler.version={}\nbuild_type={}\n",
            compiler, version, build_type
        ),
        None,
    )
    .unwrap()
}

/// Scratch cache plus a registry of programmatic recipes
pub struct Workspace {
    pub dir: TempDir,
    pub registry: RecipeRegistry,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            registry: RecipeRegistry::empty(),
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            cache_root: self.cache_root(),
            max_concurrency: 2,
            ..EngineConfig::default()
        }
    }

    pub fn controller(&self) -> Controller {
        Controller::new(self.config(), CancelToken::new()).unwrap()
    }

    pub fn add(&self, metadata: RecipeMetadata, versions: &[&str], recipe: TestRecipe) -> Arc<Probe> {
        let probe = recipe.probe();
        self.registry
            .register(Recipe::new(metadata, Arc::new(recipe)), versions)
            .unwrap();
        probe
    }

    pub fn add_with_data(
        &self,
        metadata: RecipeMetadata,
        version: &str,
        data: SourceData,
        recipe: TestRecipe,
    ) -> Arc<Probe> {
        let probe = recipe.probe();
        let recipe = Recipe::new(metadata, Arc::new(recipe)).with_data(data);
        self.registry.register(recipe, &[version]).unwrap();
        probe
    }

    pub fn graph(&self, root: &str, host: &Profile, build: &Profile) -> Result<DepGraph> {
        let mut graph = GraphBuilder::new(&self.registry, host, build)?.build_one(root)?;
        compute_package_ids(&mut graph)?;
        Ok(graph)
    }

    pub fn create(&self, root: &str, host: &Profile, build: &Profile) -> RunReport {
        let graph = self.graph(root, host, build).unwrap();
        self.controller().run(&graph, host, build).unwrap()
    }

    /// Write bytes next to the cache and return their `file://` URL
    pub fn serve(&self, name: &str, bytes: &[u8]) -> String {
        let path = self.dir.path().join("served").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        url::Url::from_file_path(&path).unwrap().to_string()
    }
}

/// Package id of the root node of a run
pub fn root_id(graph: &DepGraph) -> String {
    let root = graph.roots()[0];
    graph.node(root).package_id.clone().unwrap()
}

/// Package id of a named node
pub fn id_of(graph: &DepGraph, name: &str, context: Context) -> String {
    graph.find_in(name, context).unwrap().package_id.clone().unwrap()
}

/// A `.tar.gz` whose entries live under `root/`
pub fn tar_gz(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", root, path), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Data file declaring one archive for a version
pub fn source_data(version: &str, url: &str, sha256: &str) -> SourceData {
    let mut data = SourceData::default();
    data.sources.insert(
        version.to_string(),
        VersionSources {
            url: Some(Urls::One(url.to_string())),
            sha256: Some(sha256.to_string()),
            strip_root: true,
            ..Default::default()
        },
    );
    data
}

/// Every file of a folder, relative and sorted
pub fn files_under(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

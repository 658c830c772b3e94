// src/recipe/registry.rs

//! Recipe registry
//!
//! Recipes are looked up by name in one or more index directories:
//!
//! ```text
//! <index>/zlib/config.toml        [versions."1.3.1"] folder = "all"
//! <index>/zlib/all/recipe.toml
//! <index>/zlib/all/sources.toml
//! <index>/zlib/all/patches/...
//! ```
//!
//! Without `config.toml`, subdirectories named like versions are recipe
//! folders, and a `recipe.toml` directly under `<index>/<name>/` serves the
//! versions its `sources.toml` (or `package.version`) declares.
//!
//! Programmatic recipes registered with [`RecipeRegistry::register`] take
//! precedence over index entries of the same name and version.

use crate::error::{Error, Result};
use crate::hash;
use crate::recipe::declarative::DeclarativeRecipe;
use crate::recipe::format::{RecipeDocument, SourceData};
use crate::recipe::reference::validate_name;
use crate::recipe::{Recipe, ResolvedRecipe};
use crate::settings;
use crate::version::{Version, VersionReq};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

const RECIPE_FILE: &str = "recipe.toml";
const SOURCES_FILE: &str = "sources.toml";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize)]
struct IndexConfig {
    #[serde(default)]
    versions: BTreeMap<String, IndexVersion>,
}

#[derive(Debug, Deserialize)]
struct IndexVersion {
    folder: String,
}

#[derive(Debug, Clone)]
enum Entry {
    Folder(PathBuf),
    Registered(Arc<Recipe>),
}

struct CachedRecipe {
    /// Files the revision was computed from
    inputs: Vec<PathBuf>,
    mtime: Option<SystemTime>,
    recipe: Arc<Recipe>,
}

/// Result of [`RecipeRegistry::validate_recipe`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl RecipeValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Locates and loads recipes
pub struct RecipeRegistry {
    roots: Vec<PathBuf>,
    cache: Mutex<HashMap<PathBuf, CachedRecipe>>,
    registered: RwLock<HashMap<String, BTreeMap<Version, Arc<Recipe>>>>,
}

fn newest_mtime(files: &[PathBuf]) -> Option<SystemTime> {
    files
        .iter()
        .filter_map(|f| fs::metadata(f).and_then(|m| m.modified()).ok())
        .max()
}

/// Patch files declared by a data file, relative to the recipe folder
fn declared_patches(data: &SourceData) -> BTreeSet<&str> {
    data.patches
        .values()
        .flatten()
        .map(|p| p.patch_file.as_str())
        .collect()
}

impl RecipeRegistry {
    /// Registry over index directories, searched in order
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            cache: Mutex::new(HashMap::new()),
            registered: RwLock::new(HashMap::new()),
        }
    }

    /// Registry without index directories
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Register a programmatic recipe for the given versions
    pub fn register(&self, recipe: Recipe, versions: &[&str]) -> Result<()> {
        validate_name(recipe.name())?;
        let recipe = Arc::new(recipe);
        let mut registered = self.registered.write();
        let entry = registered.entry(recipe.name().to_string()).or_default();
        for v in versions {
            entry.insert(Version::parse(v)?, Arc::clone(&recipe));
        }
        debug!("Registered recipe {} for {} version(s)", recipe.name(), versions.len());
        Ok(())
    }

    fn index_entries(&self, name: &str) -> Result<BTreeMap<Version, Entry>> {
        let mut entries = BTreeMap::new();
        for root in &self.roots {
            let dir = root.join(name);
            if !dir.is_dir() {
                continue;
            }
            for (version, folder) in Self::scan(&dir)? {
                entries.entry(version).or_insert(Entry::Folder(folder));
            }
        }
        if let Some(versions) = self.registered.read().get(name) {
            for (version, recipe) in versions {
                entries.insert(version.clone(), Entry::Registered(Arc::clone(recipe)));
            }
        }
        Ok(entries)
    }

    /// Versions and recipe folders of one name directory
    fn scan(dir: &Path) -> Result<Vec<(Version, PathBuf)>> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.is_file() {
            let config: IndexConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
            return config
                .versions
                .into_iter()
                .map(|(v, entry)| Ok((Version::parse(&v)?, dir.join(entry.folder))))
                .collect();
        }

        if dir.join(RECIPE_FILE).is_file() {
            let doc = RecipeDocument::parse(&fs::read_to_string(dir.join(RECIPE_FILE))?)?;
            let mut versions = match &doc.package.version {
                Some(v) => vec![Version::parse(v)?],
                None => Vec::new(),
            };
            let sources = dir.join(SOURCES_FILE);
            if sources.is_file() {
                versions.extend(SourceData::parse(&fs::read_to_string(&sources)?)?.versions());
            }
            return Ok(versions.into_iter().map(|v| (v, dir.to_path_buf())).collect());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.join(RECIPE_FILE).is_file() {
                continue;
            }
            let Some(version) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| Version::parse(n).ok())
            else {
                continue;
            };
            found.push((version, path));
        }
        Ok(found)
    }

    /// Available versions of a recipe, ascending
    pub fn versions_of(&self, name: &str) -> Result<Vec<Version>> {
        Ok(self.index_entries(name)?.into_keys().collect())
    }

    /// Find the recipe serving the highest version accepted by `req`
    pub fn find(&self, name: &str, req: &VersionReq) -> Result<ResolvedRecipe> {
        let entries = self.index_entries(name)?;
        if entries.is_empty() {
            return Err(Error::RecipeNotFound(name.to_string()));
        }
        let version = req.select(entries.keys()).cloned().ok_or_else(|| {
            Error::VersionUnsatisfiable {
                name: name.to_string(),
                range: req.to_string(),
                available: entries
                    .keys()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        })?;
        let recipe = match &entries[&version] {
            Entry::Registered(recipe) => Arc::clone(recipe),
            Entry::Folder(folder) => self.load(folder)?,
        };
        Ok(ResolvedRecipe { version, recipe })
    }

    /// Load a recipe folder, reusing the cached recipe while it is unchanged
    pub fn load(&self, folder: &Path) -> Result<Arc<Recipe>> {
        let key = fs::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf());
        if let Some(cached) = self.cache.lock().get(&key) {
            if cached.mtime == newest_mtime(&cached.inputs) {
                return Ok(Arc::clone(&cached.recipe));
            }
        }

        let (recipe, inputs) = Self::load_uncached(&key)?;
        let recipe = Arc::new(recipe);
        debug!("Loaded recipe {} from {}", recipe.name(), key.display());
        self.cache.lock().insert(
            key,
            CachedRecipe {
                mtime: newest_mtime(&inputs),
                inputs,
                recipe: Arc::clone(&recipe),
            },
        );
        Ok(recipe)
    }

    /// Load a recipe folder, returning the recipe and the files it was read from
    ///
    /// The revision covers `recipe.toml`, `sources.toml` and the content of
    /// every declared patch. A declared patch that does not exist is left to
    /// [`RecipeRegistry::validate_recipe`].
    fn load_uncached(folder: &Path) -> Result<(Recipe, Vec<PathBuf>)> {
        let recipe_path = folder.join(RECIPE_FILE);
        let recipe_text = fs::read(&recipe_path).map_err(|e| {
            Error::RecipeNotFound(format!("{}: {}", recipe_path.display(), e))
        })?;
        let sources_text = match fs::read(folder.join(SOURCES_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let as_str = |bytes: &[u8], file: &str| {
            std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|_| Error::ParseError(format!("{} is not valid UTF-8", file)))
        };
        let doc = RecipeDocument::parse(&as_str(&recipe_text, RECIPE_FILE)?)
            .map_err(|e| Error::ParseError(format!("{}: {}", recipe_path.display(), e)))?;
        let data = SourceData::parse(&as_str(&sources_text, SOURCES_FILE)?)?;

        let declarative = DeclarativeRecipe::new(doc)?;
        let metadata = declarative.metadata()?;

        let mut inputs = vec![recipe_path, folder.join(SOURCES_FILE)];
        let mut parts = vec![recipe_text, sources_text];
        for patch in declared_patches(&data) {
            let path = folder.join(patch);
            parts.push(patch.as_bytes().to_vec());
            match fs::read(&path) {
                Ok(content) => parts.push(hash::sha256(&content).into_bytes()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            inputs.push(path);
        }

        let recipe = Recipe {
            metadata,
            data,
            folder: Some(folder.to_path_buf()),
            revision: hash::sha256_parts(&parts),
            hooks: Arc::new(declarative),
        };
        Ok((recipe, inputs))
    }

    /// Check the shape of a recipe
    pub fn validate_recipe(recipe: &Recipe) -> RecipeValidation {
        let mut report = RecipeValidation::default();
        let meta = &recipe.metadata;

        if meta.name.is_empty() {
            report.errors.push("recipe has an empty name".to_string());
        } else if let Err(e) = validate_name(&meta.name) {
            report.errors.push(e.to_string());
        }
        if meta.license.is_none() {
            report.warnings.push("no license declared".to_string());
        }
        if meta.description.is_none() {
            report.warnings.push("no description".to_string());
        }

        for (name, def) in &meta.options {
            if let Err(e) = def.check_default(name) {
                report.errors.push(e.to_string());
            }
        }

        match settings::default_vocabulary() {
            Ok(vocabulary) => {
                for s in &meta.settings {
                    if !vocabulary.contains_key(s) {
                        report.errors.push(format!("unknown setting '{}'", s));
                    }
                }
            }
            Err(e) => report.errors.push(e.to_string()),
        }

        for (version, entry) in &recipe.data.sources {
            let mut all = vec![("main".to_string(), entry)];
            all.extend(entry.parts.iter().map(|(n, p)| (format!("part '{}'", n), p)));
            all.extend(entry.platforms.iter().map(|(n, p)| (format!("platform '{}'", n), p)));
            for (label, source) in all {
                if source.url.is_some() && source.sha256.is_none() {
                    report
                        .errors
                        .push(format!("{} source of {} has no sha256", label, version));
                }
            }
            if entry.url.is_none() && entry.parts.is_empty() && entry.platforms.is_empty() {
                report.errors.push(format!("sources of {} declare no url", version));
            }
        }

        if let Some(folder) = &recipe.folder {
            for (version, patches) in &recipe.data.patches {
                for patch in patches {
                    if !folder.join(&patch.patch_file).is_file() {
                        report.errors.push(format!(
                            "patch {} of {} does not exist",
                            patch.patch_file, version
                        ));
                    }
                }
            }
        }

        for w in &report.warnings {
            warn!("{}: {}", meta.name, w);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::hooks::RecipeHooks;
    use crate::recipe::RecipeMetadata;
    use tempfile::TempDir;

    fn write_recipe(dir: &Path, name: &str, extra: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(RECIPE_FILE),
            format!("[package]\nname = \"{}\"\nlicense = \"MIT\"\n{}", name, extra),
        )
        .unwrap();
    }

    fn zlib_index() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let zlib = tmp.path().join("zlib");
        write_recipe(&zlib.join("all"), "zlib", "");
        fs::write(
            zlib.join(CONFIG_FILE),
            "[versions.\"1.2.11\"]\nfolder = \"all\"\n[versions.\"1.2.13\"]\nfolder = \"all\"\n[versions.\"1.3.1\"]\nfolder = \"all\"\n",
        )
        .unwrap();
        tmp
    }

    #[test]
    fn test_find_highest_in_range() {
        let index = zlib_index();
        let registry = RecipeRegistry::new(vec![index.path().to_path_buf()]);
        let versions = registry.versions_of("zlib").unwrap();
        assert_eq!(versions.len(), 3);

        let req = VersionReq::parse("[>=1.2 <2]").unwrap();
        let found = registry.find("zlib", &req).unwrap();
        assert_eq!(found.version.to_string(), "1.3.1");
        assert_eq!(found.recipe.name(), "zlib");
    }

    #[test]
    fn test_find_errors() {
        let index = zlib_index();
        let registry = RecipeRegistry::new(vec![index.path().to_path_buf()]);
        let err = registry
            .find("zlib", &VersionReq::parse("[>=2]").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::VersionUnsatisfiable);
        let err = registry
            .find("nope", &VersionReq::parse("1.0").unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RecipeNotFound);
    }

    #[test]
    fn test_version_directories() {
        let tmp = TempDir::new().unwrap();
        write_recipe(&tmp.path().join("fmt/10.2.1"), "fmt", "");
        write_recipe(&tmp.path().join("fmt/9.1.0"), "fmt", "");
        fs::create_dir_all(tmp.path().join("fmt/docs")).unwrap();
        let registry = RecipeRegistry::new(vec![tmp.path().to_path_buf()]);
        let versions: Vec<String> = registry
            .versions_of("fmt")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(versions, vec!["9.1.0", "10.2.1"]);
    }

    #[test]
    fn test_cache_invalidated_on_change() {
        let index = zlib_index();
        let registry = RecipeRegistry::new(vec![index.path().to_path_buf()]);
        let folder = index.path().join("zlib/all");
        let first = registry.load(&folder).unwrap();
        let again = registry.load(&folder).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let recipe = folder.join(RECIPE_FILE);
        write_recipe(&folder, "zlib", "description = \"changed\"\n");
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&recipe)
            .unwrap()
            .set_modified(later)
            .unwrap();
        let reloaded = registry.load(&folder).unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
        assert_ne!(first.revision, reloaded.revision);
    }

    #[test]
    fn test_patch_content_is_part_of_revision() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("zlib/all");
        write_recipe(&folder, "zlib", "");
        fs::write(
            folder.join(SOURCES_FILE),
            "[[patches.\"1.3.1\"]]\npatch_file = \"patches/0001-fix.patch\"\n",
        )
        .unwrap();
        fs::create_dir_all(folder.join("patches")).unwrap();
        let patch = folder.join("patches/0001-fix.patch");
        fs::write(&patch, "--- a/zlib.h\n+++ b/zlib.h\n").unwrap();

        let registry = RecipeRegistry::empty();
        let first = registry.load(&folder).unwrap();
        assert!(Arc::ptr_eq(&first, &registry.load(&folder).unwrap()));

        fs::write(&patch, "--- a/zconf.h\n+++ b/zconf.h\n").unwrap();
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&patch)
            .unwrap()
            .set_modified(later)
            .unwrap();
        let reloaded = registry.load(&folder).unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
        assert_ne!(first.revision, reloaded.revision);

        // A fresh registry agrees with the reloaded revision
        assert_eq!(RecipeRegistry::empty().load(&folder).unwrap().revision, reloaded.revision);
    }

    #[test]
    fn test_registered_recipes() {
        struct Noop;
        impl RecipeHooks for Noop {}
        let registry = RecipeRegistry::empty();
        registry
            .register(Recipe::new(RecipeMetadata::new("argparse"), Arc::new(Noop)), &["3.0", "3.1"])
            .unwrap();
        let found = registry
            .find("argparse", &VersionReq::parse("[*]").unwrap())
            .unwrap();
        assert_eq!(found.version.to_string(), "3.1");
    }

    #[test]
    fn test_validate_recipe() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("bad");
        write_recipe(&folder, "bad", "settings = [\"os\", \"flavor\"]\n");
        fs::write(
            folder.join(SOURCES_FILE),
            "[sources.\"1.0\"]\nurl = \"https://example.com/a.tgz\"\n\n[[patches.\"1.0\"]]\npatch_file = \"patches/missing.patch\"\n",
        )
        .unwrap();
        let registry = RecipeRegistry::empty();
        let recipe = registry.load(&folder).unwrap();
        let report = RecipeRegistry::validate_recipe(&recipe);
        assert!(!report.is_ok());
        assert_eq!(report.errors.len(), 3, "{:?}", report.errors);
        assert_eq!(report.warnings, vec!["no description"]);
    }
}

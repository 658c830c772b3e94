// src/lifecycle/cache.rs

//! On-disk cache of sources, packages and logs
//!
//! ```text
//! <cache>/sources/<name>/<version>/<recipe_revision>/
//! <cache>/packages/<name>/<version>/<recipe_revision>/<package_id>/<package_revision>/
//! <cache>/locks/
//! <cache>/logs/<name>-<version>-<context>-<package_id>/<stage>.log
//! <cache>/downloads/
//! <cache>/builds/<name>/<version>/<package_id>/
//! ```
//!
//! Source and package folders are published atomically: the content is
//! produced in a temporary sibling directory which is renamed into place
//! once complete, together with its manifest.

use crate::cpp_info::ConsumptionInfo;
use crate::error::{Error, Result};
use crate::graph::Context;
use crate::layout::manifest::{MANIFEST_FILE, Manifest, PackageRecord};
use crate::lifecycle::lock::{CacheLock, lock_name};
use crate::recipe::{RecipeRef, Stage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const NO_REVISION: &str = "0";

fn revision(reference: &RecipeRef) -> &str {
    reference.revision.as_deref().unwrap_or(NO_REVISION)
}

/// Handle on a cache root
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open a cache, creating its top-level folders
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["sources", "packages", "locks", "logs", "downloads", "builds"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Digest-addressed download cache
    pub fn downloads(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn source_folder(&self, reference: &RecipeRef) -> PathBuf {
        self.root
            .join("sources")
            .join(&reference.name)
            .join(reference.version.as_str())
            .join(revision(reference))
    }

    /// Folder holding every revision of one package id
    pub fn package_base(&self, reference: &RecipeRef, package_id: &str) -> PathBuf {
        self.root
            .join("packages")
            .join(&reference.name)
            .join(reference.version.as_str())
            .join(revision(reference))
            .join(package_id)
    }

    /// Scratch folders of one node's build
    pub fn build_workspace(&self, reference: &RecipeRef, package_id: &str) -> PathBuf {
        self.root
            .join("builds")
            .join(&reference.name)
            .join(reference.version.as_str())
            .join(package_id)
    }

    /// Log file of one stage of one node
    ///
    /// Nodes sharing a ref and context differ by package id, so the id is
    /// part of the folder name.
    pub fn log_file(&self, reference: &RecipeRef, context: Context, package_id: &str, stage: Stage) -> PathBuf {
        self.root
            .join("logs")
            .join(format!("{}-{}-{}-{}", reference.name, reference.version, context, package_id))
            .join(format!("{}.log", stage))
    }

    pub fn source_lock(&self, reference: &RecipeRef) -> Result<CacheLock> {
        let name = lock_name(&["sources", &reference.name, reference.version.as_str(), revision(reference)]);
        CacheLock::acquire(&self.root.join("locks").join(name))
    }

    pub fn package_lock(&self, reference: &RecipeRef, package_id: &str) -> Result<CacheLock> {
        let name = lock_name(&[
            "packages",
            &reference.name,
            reference.version.as_str(),
            revision(reference),
            package_id,
        ]);
        CacheLock::acquire(&self.root.join("locks").join(name))
    }

    /// The source folder of a recipe revision, running `acquire` on a miss
    ///
    /// A published source folder whose files no longer match its manifest
    /// is discarded and acquired again.
    pub fn ensure_sources<F>(&self, reference: &RecipeRef, acquire: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let _lock = self.source_lock(reference)?;
        let folder = self.source_folder(reference);
        if folder.join(MANIFEST_FILE).is_file() {
            let differing = Manifest::read(&folder)?.verify(&folder)?;
            if differing.is_empty() {
                debug!("Sources of {} are cached", reference);
                return Ok(folder);
            }
            warn!(
                "Cached sources of {} changed ({} file(s)), acquiring again",
                reference,
                differing.len()
            );
        }
        if folder.exists() {
            fs::remove_dir_all(&folder)?;
        }

        let parent = folder
            .parent()
            .ok_or_else(|| Error::Internal(format!("{} has no parent", folder.display())))?;
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(parent)?;
        acquire(staging.path())?;
        Manifest::scan(staging.path())?.write(staging.path())?;
        fs::rename(staging.keep(), &folder)?;
        info!("Sources of {} stored in cache", reference);
        Ok(folder)
    }

    /// Staging folder for a package about to be built, next to its final place
    pub fn package_staging(&self, reference: &RecipeRef, package_id: &str) -> Result<PathBuf> {
        let base = self.package_base(reference, package_id);
        fs::create_dir_all(&base)?;
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(&base)?;
        Ok(staging.keep())
    }

    /// Publish a staged package folder under its content revision
    ///
    /// Writes the manifest and `record` (with the computed revision) into
    /// the staged folder, then renames it into place. When the same
    /// revision is already published the staged copy is dropped.
    pub fn publish(&self, staged: &Path, mut record: PackageRecord) -> Result<PathBuf> {
        let base = staged
            .parent()
            .ok_or_else(|| Error::Internal(format!("{} has no parent", staged.display())))?;
        let manifest = Manifest::scan(staged)?;
        let package_revision = manifest.revision()?;
        manifest.write(staged)?;
        record.package_revision = package_revision.clone();
        record.write(staged)?;

        let target = base.join(&package_revision);
        if target.exists() {
            debug!("Package revision {} already published", package_revision);
            fs::remove_dir_all(staged)?;
        } else {
            fs::rename(staged, &target)?;
        }
        info!(
            "Published {}:{} revision {}",
            record.reference, record.package_id, package_revision
        );
        Ok(target)
    }

    /// The newest intact revision of a package id
    ///
    /// Revisions that fail manifest verification are removed.
    pub fn lookup(&self, reference: &RecipeRef, package_id: &str) -> Result<Option<PathBuf>> {
        let base = self.package_base(reference, package_id);
        if !base.is_dir() {
            return Ok(None);
        }
        let mut found: Vec<(PackageRecord, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&base)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !path.is_dir() || name.starts_with('.') {
                continue;
            }
            let intact = path.join(MANIFEST_FILE).is_file()
                && Manifest::read(&path)?.verify(&path)?.is_empty();
            match PackageRecord::read(&path) {
                Ok(record) if intact => found.push((record, path)),
                _ => {
                    warn!("Removing damaged package {}", path.display());
                    fs::remove_dir_all(&path)?;
                }
            }
        }
        found.sort_by(|a, b| a.0.created_at.cmp(&b.0.created_at));
        Ok(found.pop().map(|(_, path)| path))
    }

    /// Store the sealed consumption info next to a published revision
    pub fn store_info(&self, package_folder: &Path, info: &ConsumptionInfo) -> Result<()> {
        let path = info_path(package_folder)?;
        fs::write(path, serde_json::to_string_pretty(info)?)?;
        Ok(())
    }

    /// Consumption info stored for a published revision
    pub fn load_info(&self, package_folder: &Path) -> Result<Option<ConsumptionInfo>> {
        let path = info_path(package_folder)?;
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
    }
}

fn info_path(package_folder: &Path) -> Result<PathBuf> {
    let revision = package_folder
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Internal(format!("bad package folder {}", package_folder.display())))?;
    let base = package_folder
        .parent()
        .ok_or_else(|| Error::Internal(format!("bad package folder {}", package_folder.display())))?;
    Ok(base.join(format!("{}.info.json", revision)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn reference() -> RecipeRef {
        let mut r = RecipeRef::new("zlib", Version::parse("1.3.1").unwrap());
        r.revision = Some("abc123".into());
        r
    }

    fn record() -> PackageRecord {
        PackageRecord {
            reference: reference().to_string(),
            context: "host".into(),
            package_id: "f".repeat(40),
            package_revision: String::new(),
            settings: BTreeMap::new(),
            options: BTreeMap::new(),
            requires: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_layout() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        assert_eq!(
            cache.source_folder(&reference()),
            dir.path().join("sources/zlib/1.3.1/abc123")
        );
        assert_eq!(
            cache.package_base(&reference(), "pid"),
            dir.path().join("packages/zlib/1.3.1/abc123/pid")
        );
        assert_eq!(
            cache.log_file(&reference(), Context::Build, "pid", Stage::Build),
            dir.path().join("logs/zlib-1.3.1-build-pid/build.log")
        );
        assert_ne!(
            cache.log_file(&reference(), Context::Build, "pid", Stage::Build),
            cache.log_file(&reference(), Context::Build, "other", Stage::Build)
        );
    }

    #[test]
    fn test_sources_acquired_once() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let mut calls = 0;
        let folder = cache
            .ensure_sources(&reference(), |dest| {
                calls += 1;
                fs::write(dest.join("zlib.h"), "#define ZLIB 1").map_err(Into::into)
            })
            .unwrap();
        assert!(folder.join("zlib.h").is_file());
        cache
            .ensure_sources(&reference(), |_| panic!("sources must come from the cache"))
            .unwrap();
        assert_eq!(calls, 1);

        // A tampered source folder is acquired again
        fs::write(folder.join("zlib.h"), "tampered").unwrap();
        let mut again = false;
        cache
            .ensure_sources(&reference(), |dest| {
                again = true;
                fs::write(dest.join("zlib.h"), "#define ZLIB 1").map_err(Into::into)
            })
            .unwrap();
        assert!(again);
        assert_eq!(fs::read_to_string(folder.join("zlib.h")).unwrap(), "#define ZLIB 1");
    }

    #[test]
    fn test_failed_acquisition_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let result = cache.ensure_sources(&reference(), |dest| {
            fs::write(dest.join("partial"), "x")?;
            Err(Error::DownloadError("offline".into()))
        });
        assert!(result.is_err());
        assert!(!cache.source_folder(&reference()).exists());
    }

    #[test]
    fn test_publish_and_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let pid = "f".repeat(40);
        assert!(cache.lookup(&reference(), &pid).unwrap().is_none());

        let staged = cache.package_staging(&reference(), &pid).unwrap();
        fs::create_dir_all(staged.join("licenses")).unwrap();
        fs::write(staged.join("licenses/LICENSE"), "zlib").unwrap();
        let published = cache.publish(&staged, record()).unwrap();
        assert!(!staged.exists());

        let found = cache.lookup(&reference(), &pid).unwrap().unwrap();
        assert_eq!(found, published);
        let rec = PackageRecord::read(&found).unwrap();
        assert_eq!(found.file_name().unwrap().to_str().unwrap(), rec.package_revision);

        cache.store_info(&found, &ConsumptionInfo::default()).unwrap();
        assert!(cache.load_info(&found).unwrap().is_some());

        // Damaged revisions are dropped on lookup
        fs::write(found.join("licenses/LICENSE"), "changed").unwrap();
        assert!(cache.lookup(&reference(), &pid).unwrap().is_none());
        assert!(!found.exists());
    }

    #[test]
    fn test_lookup_prefers_newest() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let pid = "f".repeat(40);
        let mut old = record();
        old.created_at = Utc::now() - Duration::hours(1);

        let first = cache.package_staging(&reference(), &pid).unwrap();
        fs::write(first.join("a.txt"), "one").unwrap();
        cache.publish(&first, old).unwrap();
        let second = cache.package_staging(&reference(), &pid).unwrap();
        fs::write(second.join("a.txt"), "two").unwrap();
        let newest = cache.publish(&second, record()).unwrap();

        assert_eq!(cache.lookup(&reference(), &pid).unwrap(), Some(newest));
    }
}

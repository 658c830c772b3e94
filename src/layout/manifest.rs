// src/layout/manifest.rs

//! Package manifest and package record
//!
//! `pantry_manifest.json` maps every file of a package (relative path) to
//! its SHA-256; the package revision is the digest of the manifest itself,
//! so two packages with the same bytes share a revision. Symlinks are
//! recorded by their target. `pantry_package.json` records what produced
//! the package.

use crate::error::{Error, Result};
use crate::hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "pantry_manifest.json";
pub const RECORD_FILE: &str = "pantry_package.json";

/// Path to digest map of a package or source folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: BTreeMap<String, String>,
}

fn is_metadata(relative: &str) -> bool {
    relative == MANIFEST_FILE || relative == RECORD_FILE
}

impl Manifest {
    /// Digest every file below `folder`
    pub fn scan(folder: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(folder).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(folder) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if is_metadata(&relative) {
                continue;
            }
            let digest = if entry.path_is_symlink() {
                let target = fs::read_link(entry.path())?;
                hash::sha256(format!("symlink:{}", target.display()).as_bytes())
            } else {
                hash::hash_file(entry.path())?
            };
            files.insert(relative, digest);
        }
        Ok(Self { files })
    }

    /// Digest of the manifest
    pub fn revision(&self) -> Result<String> {
        Ok(hash::sha256(serde_json::to_string(&self.files)?.as_bytes()))
    }

    pub fn write(&self, folder: &Path) -> Result<()> {
        fs::write(folder.join(MANIFEST_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(folder: &Path) -> Result<Self> {
        let text = fs::read_to_string(folder.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Check a folder against this manifest; returns the differing paths
    pub fn verify(&self, folder: &Path) -> Result<Vec<String>> {
        let actual = Self::scan(folder)?;
        let mut differing: Vec<String> = self
            .files
            .iter()
            .filter(|(path, digest)| actual.files.get(*path) != Some(*digest))
            .map(|(path, _)| path.clone())
            .collect();
        differing.extend(
            actual
                .files
                .keys()
                .filter(|p| !self.files.contains_key(*p))
                .cloned(),
        );
        Ok(differing)
    }
}

/// Provenance of a cached package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// `name/version#revision`
    pub reference: String,
    pub context: String,
    pub package_id: String,
    pub package_revision: String,
    pub settings: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    /// Dependencies as `name/version:package_id`
    pub requires: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PackageRecord {
    pub fn write(&self, folder: &Path) -> Result<()> {
        fs::write(folder.join(RECORD_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(folder: &Path) -> Result<Self> {
        let path = folder.join(RECORD_FILE);
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::IoError(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_revision_follows_content() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("include")).unwrap();
        fs::write(dir.path().join("include/a.h"), "int a;").unwrap();

        let first = Manifest::scan(dir.path()).unwrap();
        first.write(dir.path()).unwrap();
        // The manifest file itself is not part of the manifest
        assert_eq!(Manifest::scan(dir.path()).unwrap(), first);
        assert_eq!(Manifest::read(dir.path()).unwrap(), first);

        fs::write(dir.path().join("include/a.h"), "int b;").unwrap();
        let second = Manifest::scan(dir.path()).unwrap();
        assert_ne!(first.revision().unwrap(), second.revision().unwrap());
        assert_eq!(first.verify(dir.path()).unwrap(), vec!["include/a.h".to_string()]);
    }

    #[test]
    fn test_record_round_trip() {
        let dir = TempDir::new().unwrap();
        let record = PackageRecord {
            reference: "zlib/1.3.1#abc".into(),
            context: "host".into(),
            package_id: "0".repeat(40),
            package_revision: "1".repeat(64),
            settings: BTreeMap::from([("os".into(), "Linux".into())]),
            options: BTreeMap::new(),
            requires: Vec::new(),
            created_at: Utc::now(),
        };
        record.write(dir.path()).unwrap();
        assert_eq!(PackageRecord::read(dir.path()).unwrap(), record);
    }
}

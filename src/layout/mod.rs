// src/layout/mod.rs

//! Package layout normalization
//!
//! After a recipe's `package` hook has copied its artifacts, the package
//! folder is brought into the canonical layout:
//!
//! ```text
//! include/        public headers
//! lib/            static libs, import libs, shared libs outside Windows
//! bin/            executables, shared libs on Windows
//! licenses/       one file per distinct license
//! res/ | share/   other resources
//! ```
//!
//! [`normalize`] strips build-tool metadata, repairs symlinks, rewrites
//! macOS install names, renames Meson static libraries for MSVC, drops
//! debug databases, collapses duplicate licenses and finally insists that
//! a license is present.

pub mod apple;
pub mod files;
pub mod manifest;

pub use manifest::{Manifest, PackageRecord};

use crate::build::Backend;
use crate::conf::keys;
use crate::cpp_info::CppInfo;
use crate::error::{Error, Result};
use crate::hash;
use crate::recipe::NodeState;
use glob::Pattern;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directories written by build tools that consumers never read
pub const METADATA_DIRS: &[&str] = &[
    "lib/cmake",
    "lib/pkgconfig",
    "share/pkgconfig",
    "share/doc",
    "share/man",
    "share/info",
];

/// File patterns removed anywhere in the package
pub const METADATA_FILES: &[&str] = &["*.la"];

const APPLE_OSES: &[&str] = &["Macos", "iOS", "watchOS", "tvOS"];

/// What the normalizer does for one package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Relative paths or patterns exempt from metadata stripping
    pub retain: Vec<String>,
    pub fix_install_names: bool,
    /// Rename `libxyz.a` to `xyz.lib` (Meson output on MSVC)
    pub msvc_static_names: bool,
    pub keep_pdb: bool,
}

impl NormalizeOptions {
    /// Options derived from a node's settings, tool configuration and backend
    pub fn for_node(node: &NodeState, backend: Option<Backend>, retain: &[String]) -> Self {
        let os = node.setting("os").unwrap_or_default();
        let build_type = node.setting("build_type").unwrap_or_default();
        let debug_build = matches!(build_type, "Debug" | "RelWithDebInfo");
        Self {
            retain: retain.to_vec(),
            fix_install_names: APPLE_OSES.contains(&os)
                && node.conf.get_bool(keys::FIX_INSTALL_NAMES).unwrap_or(true),
            msvc_static_names: node.setting("compiler") == Some("msvc") && backend == Some(Backend::Meson),
            keep_pdb: node.conf.get_bool(keys::KEEP_PDB).unwrap_or(debug_build),
        }
    }

    fn is_retained(&self, relative: &str) -> bool {
        self.retain.iter().any(|r| {
            let r = r.trim_end_matches('/');
            r == relative
                || relative.starts_with(&format!("{}/", r))
                || Pattern::new(r).is_ok_and(|p| p.matches(relative))
        })
    }
}

/// What normalization changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub removed: Vec<PathBuf>,
    pub renamed: Vec<(PathBuf, PathBuf)>,
    pub relinked: Vec<PathBuf>,
    pub install_names: Vec<PathBuf>,
}

/// Bring a package folder into the canonical layout
pub fn normalize(package_folder: &Path, opts: &NormalizeOptions) -> Result<NormalizeReport> {
    let mut report = NormalizeReport::default();
    strip_metadata(package_folder, opts, &mut report)?;
    fix_symlinks(package_folder, &mut report)?;
    if opts.fix_install_names {
        report.install_names = apple::fix_apple_shared_install_name(package_folder)?;
    }
    if opts.msvc_static_names {
        rename_meson_static_libs(package_folder, &mut report)?;
    }
    if !opts.keep_pdb {
        report.removed.extend(files::rm("*.pdb", package_folder, true)?);
    }
    report.removed.extend(dedupe_licenses(package_folder)?);
    check_license(package_folder)?;
    files::remove_empty_dirs(package_folder)?;
    info!(
        "Normalized {}: {} removed, {} renamed, {} relinked",
        package_folder.display(),
        report.removed.len(),
        report.renamed.len(),
        report.relinked.len()
    );
    Ok(report)
}

fn strip_metadata(folder: &Path, opts: &NormalizeOptions, report: &mut NormalizeReport) -> Result<()> {
    for dir in METADATA_DIRS {
        if opts.is_retained(dir) {
            continue;
        }
        let path = folder.join(dir);
        if files::rmdir(&path)? {
            debug!("Removed {}", dir);
            report.removed.push(path);
        }
    }
    for pattern in METADATA_FILES {
        let pattern = Pattern::new(pattern)?;
        for entry in WalkDir::new(folder) {
            let entry = entry?;
            if entry.file_type().is_dir() || !pattern.matches(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let relative = relative_str(folder, entry.path());
            if !opts.is_retained(&relative) {
                fs::remove_file(entry.path())?;
                report.removed.push(entry.into_path());
            }
        }
    }
    Ok(())
}

fn relative_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Resolve `.` and `..` without touching the filesystem
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Relative path from directory `from` to `to`; both absolute and normalized
fn relative_to(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component);
    }
    out
}

#[cfg(unix)]
fn fix_symlinks(folder: &Path, report: &mut NormalizeReport) -> Result<()> {
    let root = lexical_normalize(folder);
    let links: Vec<PathBuf> = WalkDir::new(folder)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path_is_symlink())
        .map(|e| e.into_path())
        .collect();

    for link in links {
        let target = fs::read_link(&link)?;
        let parent = lexical_normalize(link.parent().unwrap_or(folder));
        let resolved = if target.is_absolute() {
            lexical_normalize(&target)
        } else {
            lexical_normalize(&parent.join(&target))
        };
        if !resolved.starts_with(&root) {
            warn!(
                "Removing {}: points outside the package ({})",
                link.display(),
                target.display()
            );
            fs::remove_file(&link)?;
            report.removed.push(link);
            continue;
        }
        if target.is_absolute() {
            let relative = relative_to(&parent, &resolved);
            fs::remove_file(&link)?;
            std::os::unix::fs::symlink(&relative, &link)?;
            debug!("Relinked {} -> {}", link.display(), relative.display());
            report.relinked.push(link);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn fix_symlinks(_folder: &Path, _report: &mut NormalizeReport) -> Result<()> {
    Ok(())
}

/// Meson names static libraries `libxyz.a` even for MSVC, where consumers
/// look for `xyz.lib`
fn rename_meson_static_libs(folder: &Path, report: &mut NormalizeReport) -> Result<()> {
    let lib = folder.join("lib");
    if !lib.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(&lib)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_prefix("lib").and_then(|n| n.strip_suffix(".a")) else {
            continue;
        };
        let renamed = lib.join(format!("{}.lib", stem));
        if renamed.exists() {
            continue;
        }
        fs::rename(&path, &renamed)?;
        debug!("Renamed {} to {}.lib", name, stem);
        report.renamed.push((path, renamed));
    }
    Ok(())
}

/// Remove license files whose content repeats an earlier one
fn dedupe_licenses(folder: &Path) -> Result<Vec<PathBuf>> {
    let licenses = folder.join("licenses");
    let mut seen = BTreeSet::new();
    let mut removed = Vec::new();
    if !licenses.is_dir() {
        return Ok(removed);
    }
    for entry in WalkDir::new(&licenses).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !seen.insert(hash::hash_file(entry.path())?) {
            fs::remove_file(entry.path())?;
            removed.push(entry.into_path());
        }
    }
    Ok(removed)
}

fn check_license(folder: &Path) -> Result<()> {
    let licenses = folder.join("licenses");
    let present = licenses.is_dir()
        && WalkDir::new(&licenses)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| !e.file_type().is_dir());
    if present {
        Ok(())
    } else {
        Err(Error::MissingLicense(licenses))
    }
}

/// Files of the package no declared directory covers
///
/// Licenses and pantry's own metadata files are always covered. Each
/// uncovered file is logged as a warning.
pub fn uncovered_files(package_folder: &Path, cpp_info: &CppInfo) -> Result<Vec<String>> {
    let dirs = cpp_info.covered_dirs();
    if dirs.iter().any(|d| d.is_empty() || d == ".") {
        return Ok(Vec::new());
    }
    let mut uncovered = Vec::new();
    for entry in WalkDir::new(package_folder).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = relative_str(package_folder, entry.path());
        let covered = relative.starts_with("licenses/")
            || relative == manifest::MANIFEST_FILE
            || relative == manifest::RECORD_FILE
            || dirs.iter().any(|d| relative.starts_with(&format!("{}/", d)));
        if !covered {
            warn!("{} is not covered by any declared directory", relative);
            uncovered.push(relative);
        }
    }
    Ok(uncovered)
}

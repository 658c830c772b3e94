// src/layout/files.rs

//! File helpers for recipes and the packaging stage
//!
//! Patterns are matched against paths relative to the source directory with
//! shell-style globbing where `*` also crosses directory separators, so
//! `*.h` selects headers at any depth while `LICENSE*` only matches at the
//! top level.

use crate::error::{Error, Result};
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Join a relative path from a recipe onto a root
///
/// `..` components are rejected; leading slashes and `.` are ignored.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in Path::new(relative.trim_start_matches('/')).components() {
        match component {
            Component::Normal(c) => joined.push(c),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(Error::ParseError(format!(
                    "path '{}' escapes its folder",
                    relative
                )));
            }
        }
    }
    Ok(joined)
}

fn matches_any(patterns: &[Pattern], relative: &str, name: &str) -> bool {
    patterns
        .iter()
        .any(|p| p.matches_with(relative, MATCH) || p.matches_with(name, MATCH))
}

/// Copy files matching `pattern` from `src` into `dst`
///
/// With `keep_path` the relative directory of each file is recreated under
/// `dst`; otherwise files land directly in `dst`. Symlinks are copied as
/// links. Returns the copied destination paths.
pub fn copy(pattern: &str, src: &Path, dst: &Path, keep_path: bool, excludes: &[String]) -> Result<Vec<PathBuf>> {
    let pattern = Pattern::new(pattern)?;
    let excludes = excludes
        .iter()
        .map(|e| Pattern::new(e))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if !src.is_dir() {
        return Ok(Vec::new());
    }

    let mut copied = Vec::new();
    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if !pattern.matches_with(&relative_str, MATCH) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if matches_any(&excludes, &relative_str, &name) {
            continue;
        }

        let target = if keep_path {
            dst.join(relative)
        } else {
            dst.join(entry.file_name())
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if entry.path_is_symlink() {
            copy_link(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
        copied.push(target);
    }
    debug!(
        "Copied {} file(s) matching '{}' from {} to {}",
        copied.len(),
        pattern,
        src.display(),
        dst.display()
    );
    Ok(copied)
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> Result<()> {
    let target = fs::read_link(src)?;
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(target, dst)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_link(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)?;
    Ok(())
}

/// Remove files matching `pattern` under `folder`; returns the removed paths
pub fn rm(pattern: &str, folder: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let pattern = Pattern::new(pattern)?;
    let mut removed = Vec::new();
    if !folder.is_dir() {
        return Ok(removed);
    }
    let depth = if recursive { usize::MAX } else { 1 };
    for entry in WalkDir::new(folder).max_depth(depth) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if pattern.matches_with(&name, MATCH) {
            fs::remove_file(entry.path())?;
            removed.push(entry.path().to_path_buf());
        }
    }
    Ok(removed)
}

/// Remove a directory tree if it exists
pub fn rmdir(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove empty directories below `root`, deepest first
pub fn remove_empty_dirs(root: &Path) -> Result<()> {
    let dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    for dir in dirs {
        if fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(root: &Path, files: &[&str]) {
        for f in files {
            let path = root.join(f);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, f.as_bytes()).unwrap();
        }
    }

    #[test]
    fn test_copy_keeps_relative_path() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        tree(src.path(), &["include/a.h", "include/sub/b.h", "src/c.c", "LICENSE"]);

        let copied = copy("*.h", src.path(), &dst.path().join("pkg"), true, &[]).unwrap();
        assert_eq!(copied.len(), 2);
        assert!(dst.path().join("pkg/include/sub/b.h").is_file());
    }

    #[test]
    fn test_copy_flat_with_excludes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        tree(src.path(), &["include/a.h", "include/internal/b.h"]);

        let copied = copy("include/*", src.path(), dst.path(), false, &["include/internal/*".into()]).unwrap();
        assert_eq!(copied, vec![dst.path().join("a.h")]);
    }

    #[test]
    fn test_top_level_pattern() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        tree(src.path(), &["LICENSE", "third_party/LICENSE.txt"]);
        let copied = copy("LICENSE*", src.path(), dst.path(), false, &[]).unwrap();
        assert_eq!(copied.len(), 1);
    }

    #[test]
    fn test_rm_and_empty_dirs() {
        let dir = TempDir::new().unwrap();
        tree(dir.path(), &["lib/libz.la", "lib/libz.a", "share/doc/readme"]);
        let removed = rm("*.la", dir.path(), true).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(rmdir(&dir.path().join("share/doc")).unwrap());
        assert!(!rmdir(&dir.path().join("share/doc")).unwrap());
        remove_empty_dirs(dir.path()).unwrap();
        assert!(!dir.path().join("share").exists());
        assert!(dir.path().join("lib/libz.a").is_file());
    }

    #[test]
    fn test_safe_join() {
        let root = Path::new("/pkg");
        assert_eq!(safe_join(root, "/include/./x").unwrap(), PathBuf::from("/pkg/include/x"));
        assert!(safe_join(root, "../etc").is_err());
    }
}

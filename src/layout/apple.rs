// src/layout/apple.rs

//! Relocatable install names for macOS shared libraries
//!
//! A dylib built with an absolute install name cannot move with its package.
//! The packaging stage rewrites the library's own id to `@rpath/<file>` and
//! every dependency that points into the package folder likewise, using
//! `install_name_tool`. Mach-O headers are read with `goblin`.

use crate::error::{Error, Result};
use goblin::mach::Mach;
use goblin::Object;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Install names read from a Mach-O image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DylibNames {
    /// `LC_ID_DYLIB`, for shared libraries
    pub id: Option<String>,
    /// Linked libraries
    pub libs: Vec<String>,
}

/// Rewrites one image needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallNamePlan {
    pub new_id: Option<String>,
    /// `(old, new)` dependency names
    pub changes: Vec<(String, String)>,
}

impl InstallNamePlan {
    pub fn is_empty(&self) -> bool {
        self.new_id.is_none() && self.changes.is_empty()
    }
}

/// Parse install names; `None` when the bytes are not a Mach-O image
pub fn read_names(bytes: &[u8]) -> Option<DylibNames> {
    let macho = match Object::parse(bytes).ok()? {
        Object::Mach(Mach::Binary(macho)) => macho,
        Object::Mach(Mach::Fat(fat)) => {
            // Every slice carries the same names; the first one is enough
            let arch = fat.iter_arches().next()?.ok()?;
            let slice = arch.slice(bytes);
            return match Object::parse(slice).ok()? {
                Object::Mach(Mach::Binary(macho)) => Some(names_of(&macho)),
                _ => None,
            };
        }
        _ => return None,
    };
    Some(names_of(&macho))
}

fn names_of(macho: &goblin::mach::MachO<'_>) -> DylibNames {
    DylibNames {
        id: macho.name.map(str::to_string),
        // goblin lists "self" first
        libs: macho
            .libs
            .iter()
            .filter(|l| **l != "self")
            .map(|l| l.to_string())
            .collect(),
    }
}

fn rpath_name(name: &str) -> String {
    let file = name.rsplit('/').next().unwrap_or(name);
    format!("@rpath/{}", file)
}

/// Decide the rewrites for one image of the package
pub fn plan(names: &DylibNames, package_folder: &Path) -> InstallNamePlan {
    let new_id = names
        .id
        .as_deref()
        .filter(|id| !id.starts_with('@'))
        .map(rpath_name);
    let folder = package_folder.to_string_lossy();
    let changes = names
        .libs
        .iter()
        .filter(|lib| lib.starts_with(folder.as_ref()))
        .map(|lib| (lib.clone(), rpath_name(lib)))
        .collect();
    InstallNamePlan { new_id, changes }
}

fn is_candidate(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".dylib") || name.contains(".dylib.") || path.parent().is_some_and(|p| p.ends_with("bin"))
}

/// Rewrite install names of every dylib and executable in the package
pub fn fix_apple_shared_install_name(package_folder: &Path) -> Result<Vec<PathBuf>> {
    let mut planned = Vec::new();
    for entry in WalkDir::new(package_folder).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_candidate(entry.path()) {
            continue;
        }
        let bytes = fs::read(entry.path())?;
        let Some(names) = read_names(&bytes) else {
            continue;
        };
        let plan = plan(&names, package_folder);
        if !plan.is_empty() {
            planned.push((entry.into_path(), plan));
        }
    }
    if planned.is_empty() {
        return Ok(Vec::new());
    }

    let Ok(tool) = which::which("install_name_tool") else {
        warn!(
            "install_name_tool not found; {} image(s) keep absolute install names",
            planned.len()
        );
        return Ok(Vec::new());
    };

    let mut fixed = Vec::new();
    for (path, plan) in planned {
        let mut cmd = Command::new(&tool);
        if let Some(id) = &plan.new_id {
            cmd.arg("-id").arg(id);
        }
        for (old, new) in &plan.changes {
            cmd.arg("-change").arg(old).arg(new);
        }
        cmd.arg(&path);
        debug!("Running {:?}", cmd);
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(Error::BuildFailed {
                message: format!("install_name_tool failed on {}", path.display()),
                log_tail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        fixed.push(path);
    }
    info!("Rewrote install names of {} image(s)", fixed.len());
    Ok(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rewrites_absolute_names() {
        let names = DylibNames {
            id: Some("/tmp/build/pkg/lib/libz.1.dylib".into()),
            libs: vec![
                "/tmp/build/pkg/lib/libbase.dylib".into(),
                "/usr/lib/libSystem.B.dylib".into(),
            ],
        };
        let plan = plan(&names, Path::new("/tmp/build/pkg"));
        assert_eq!(plan.new_id.as_deref(), Some("@rpath/libz.1.dylib"));
        assert_eq!(
            plan.changes,
            vec![(
                "/tmp/build/pkg/lib/libbase.dylib".to_string(),
                "@rpath/libbase.dylib".to_string()
            )]
        );
    }

    #[test]
    fn test_plan_keeps_relative_names() {
        let names = DylibNames {
            id: Some("@rpath/libz.dylib".into()),
            libs: vec!["/usr/lib/libc++.1.dylib".into()],
        };
        assert!(plan(&names, Path::new("/pkg")).is_empty());
    }

    #[test]
    fn test_non_macho_is_ignored() {
        assert!(read_names(b"#!/bin/sh\necho hi\n").is_none());
    }

    #[test]
    fn test_candidates() {
        assert!(is_candidate(Path::new("/p/lib/libz.dylib")));
        assert!(is_candidate(Path::new("/p/lib/libz.1.2.dylib")));
        assert!(is_candidate(Path::new("/p/bin/tool")));
        assert!(!is_candidate(Path::new("/p/lib/libz.a")));
    }
}

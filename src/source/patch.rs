// src/source/patch.rs

//! Patch application and in-file replacements
//!
//! Patches are unified diffs, possibly touching several files. Each file
//! section is applied with `diffy`; paths are stripped of `strip` leading
//! components like `patch -p`. A hunk that does not apply aborts with
//! `PatchFailed` naming the file and the hunk.

use crate::error::{Error, Result};
use crate::recipe::PatchSpec;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

const DEV_NULL: &str = "/dev/null";

/// One file section of a unified diff
#[derive(Debug)]
struct FilePatch {
    old_path: String,
    new_path: String,
    text: String,
}

/// Path of a `---`/`+++` header line, without timestamp
fn header_path(line: &str) -> String {
    let rest = &line[4..];
    rest.split('\t').next().unwrap_or(rest).trim().to_string()
}

/// Split a unified diff into file sections
fn split_file_patches(text: &str) -> Vec<FilePatch> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut patches = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let is_header = lines[i].starts_with("--- ")
            && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ "));
        if !is_header {
            i += 1;
            continue;
        }
        let old_path = header_path(lines[i]);
        let new_path = header_path(lines[i + 1]);
        let start = i;
        i += 2;
        while i < lines.len() {
            let next_header = lines[i].starts_with("--- ")
                && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ "));
            if next_header || lines[i].starts_with("diff ") {
                break;
            }
            i += 1;
        }
        patches.push(FilePatch {
            old_path,
            new_path,
            text: lines[start..i].concat(),
        });
    }
    patches
}

/// Remove `strip` leading components from a patch path
fn strip_path(path: &str, strip: usize) -> Option<PathBuf> {
    let stripped: PathBuf = Path::new(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .skip(strip)
        .collect();
    if stripped.as_os_str().is_empty() {
        return None;
    }
    Some(stripped)
}

fn patch_error(patch: &str, file: &str, detail: impl Into<String>) -> Error {
    Error::PatchFailed {
        patch: patch.to_string(),
        file: file.to_string(),
        detail: detail.into(),
    }
}

/// Apply one unified diff under `base`
pub fn apply_patch_text(name: &str, text: &str, base: &Path, strip: usize) -> Result<Vec<PathBuf>> {
    let sections = split_file_patches(text);
    if sections.is_empty() {
        return Err(patch_error(name, "-", "no file sections found"));
    }
    let mut touched = Vec::new();
    for section in sections {
        let deleting = section.new_path == DEV_NULL;
        let creating = section.old_path == DEV_NULL;
        let target_name = if deleting { &section.old_path } else { &section.new_path };
        let relative = strip_path(target_name, strip)
            .ok_or_else(|| patch_error(name, target_name, format!("cannot strip {} components", strip)))?;
        let target = base.join(&relative);
        let shown = relative.display().to_string();

        let original = if creating {
            String::new()
        } else {
            fs::read_to_string(&target)
                .map_err(|e| patch_error(name, &shown, format!("cannot read target: {}", e)))?
        };
        let parsed = diffy::Patch::from_str(&section.text)
            .map_err(|e| patch_error(name, &shown, e.to_string()))?;
        let patched = diffy::apply(&original, &parsed)
            .map_err(|e| patch_error(name, &shown, e.to_string()))?;

        if deleting {
            debug!("Patch {} deletes {}", name, shown);
            fs::remove_file(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, patched)?;
        }
        touched.push(relative);
    }
    Ok(touched)
}

/// Apply declared patches in order under the source folder
///
/// Patch files are resolved against the recipe folder.
pub fn apply_patches(patches: &[PatchSpec], source_folder: &Path, recipe_folder: Option<&Path>) -> Result<()> {
    for spec in patches {
        let folder = recipe_folder.ok_or_else(|| {
            patch_error(&spec.patch_file, "-", "recipe has no folder to read patches from")
        })?;
        let path = folder.join(&spec.patch_file);
        let text = fs::read_to_string(&path)
            .map_err(|e| patch_error(&spec.patch_file, "-", format!("cannot read patch: {}", e)))?;
        let base = match &spec.base_path {
            Some(sub) => source_folder.join(sub),
            None => source_folder.to_path_buf(),
        };
        match &spec.patch_description {
            Some(description) => info!("Applying {}: {}", spec.patch_file, description),
            None => info!("Applying {}", spec.patch_file),
        }
        let touched = apply_patch_text(&spec.patch_file, &text, &base, spec.strip)?;
        debug!("{} touched {} file(s)", spec.patch_file, touched.len());
    }
    Ok(())
}

/// Replace every occurrence of `search` in a file
///
/// Returns whether the file changed. With `strict`, a missing search
/// string is an error.
pub fn replace_in_file(path: &Path, search: &str, replace: &str, strict: bool) -> Result<bool> {
    let file = path.display().to_string();
    let content = fs::read_to_string(path)
        .map_err(|e| patch_error("replace_in_file", &file, e.to_string()))?;
    if !content.contains(search) {
        if strict {
            return Err(patch_error(
                "replace_in_file",
                &file,
                format!("pattern '{}' not found", search),
            ));
        }
        return Ok(false);
    }
    fs::write(path, content.replace(search, replace))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    const PATCH: &str = "\
diff --git a/src/a.c b/src/a.c
--- a/src/a.c
+++ b/src/a.c
@@ -1,3 +1,3 @@
 int a() {
-    return 1;
+    return 2;
 }
--- /dev/null
+++ b/src/new.h
@@ -0,0 +1 @@
+#define NEW 1
";

    #[test]
    fn test_split_sections() {
        let sections = split_file_patches(PATCH);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].new_path, "b/src/a.c");
        assert_eq!(sections[1].old_path, DEV_NULL);
    }

    #[test]
    fn test_strip_path() {
        assert_eq!(strip_path("a/src/x.c", 1), Some(PathBuf::from("src/x.c")));
        assert_eq!(strip_path("src/x.c", 0), Some(PathBuf::from("src/x.c")));
        assert_eq!(strip_path("x.c", 1), None);
    }

    #[test]
    fn test_apply_multi_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.c"), "int a() {\n    return 1;\n}\n").unwrap();

        let touched = apply_patch_text("fix.patch", PATCH, dir.path(), 1).unwrap();
        assert_eq!(touched.len(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("src/a.c")).unwrap(),
            "int a() {\n    return 2;\n}\n"
        );
        assert_eq!(fs::read_to_string(dir.path().join("src/new.h")).unwrap(), "#define NEW 1\n");
    }

    #[test]
    fn test_failed_hunk_names_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.c"), "something else\n").unwrap();

        let err = apply_patch_text("fix.patch", PATCH, dir.path(), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchFailed);
        assert!(err.to_string().contains("src/a.c"));
    }

    #[test]
    fn test_apply_patches_from_recipe_folder() {
        let recipe = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        fs::create_dir_all(recipe.path().join("patches")).unwrap();
        fs::write(recipe.path().join("patches/fix.patch"), PATCH).unwrap();
        fs::create_dir_all(source.path().join("src")).unwrap();
        fs::write(source.path().join("src/a.c"), "int a() {\n    return 1;\n}\n").unwrap();

        let spec = PatchSpec {
            patch_file: "patches/fix.patch".to_string(),
            base_path: None,
            strip: 1,
            patch_description: Some("return two".to_string()),
            patch_type: Some("portability".to_string()),
        };
        apply_patches(&[spec.clone()], source.path(), Some(recipe.path())).unwrap();
        assert!(source.path().join("src/new.h").is_file());

        let err = apply_patches(&[spec], source.path(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchFailed);
    }

    #[test]
    fn test_replace_in_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("CMakeLists.txt");
        fs::write(&file, "add_library(z SHARED z.c)\n").unwrap();

        assert!(replace_in_file(&file, "SHARED", "STATIC", true).unwrap());
        assert_eq!(fs::read_to_string(&file).unwrap(), "add_library(z STATIC z.c)\n");
        assert!(!replace_in_file(&file, "SHARED", "STATIC", false).unwrap());
        let err = replace_in_file(&file, "SHARED", "STATIC", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchFailed);
    }
}

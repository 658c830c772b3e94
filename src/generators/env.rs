// src/generators/env.rs

//! `pantry_buildenv.sh` and `pantry_runenv.sh`
//!
//! The build script is the composed build environment of the node. The run
//! script puts the binaries and shared libraries of run-time dependencies
//! on the search paths, then applies their `runenv_info` in topological
//! order.

use crate::environment::Environment;
use crate::error::Result;
use crate::generators::GeneratorInput;
use std::path::PathBuf;

pub const BUILDENV_SCRIPT: &str = "pantry_buildenv.sh";
pub const RUNENV_SCRIPT: &str = "pantry_runenv.sh";

fn library_path_var(os: Option<&str>) -> &'static str {
    match os {
        Some("Macos" | "iOS" | "watchOS" | "tvOS") => "DYLD_LIBRARY_PATH",
        Some("Windows") => "PATH",
        _ => "LD_LIBRARY_PATH",
    }
}

/// Run environment of the node's dependencies
pub fn run_environment(input: &GeneratorInput<'_>) -> Result<Environment> {
    let mut env = Environment::new();
    let lib_var = library_path_var(input.node.setting("os"));
    for dep in input.run_deps()? {
        let mut contribution = Environment::new();
        for bin in dep.abs(&dep.aggregated.bindirs) {
            contribution.prepend_path("PATH", &bin);
        }
        for lib in dep.abs(&dep.aggregated.libdirs) {
            contribution.prepend_path(lib_var, &lib);
        }
        env.compose(&contribution);
        env.compose(&dep.package.info.runenv_info);
    }
    Ok(env)
}

/// Write both environment scripts
pub fn write_env_scripts(input: &GeneratorInput<'_>) -> Result<Vec<PathBuf>> {
    let run = run_environment(input)?;
    Ok(vec![
        input.write(BUILDENV_SCRIPT, &input.buildenv.to_shell_script())?,
        input.write(RUNENV_SCRIPT, &run.to_shell_script())?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::testing::*;
    use crate::graph::{Context, Traits};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_scripts() {
        let dir = TempDir::new().unwrap();
        let n = node(&[("os", "Linux")], &[("os", "Linux")]);
        let shared = Traits {
            run: true,
            ..host()
        };
        let deps = vec![
            dep("zlib", Context::Host, shared, lib(&["z"])),
            dep("cmake", Context::Build, tool(), lib(&[])),
        ];
        let mut buildenv = Environment::new();
        buildenv.prepend_path("PATH", "/cache/cmake/bin");
        let input = GeneratorInput {
            node: &n,
            dependencies: &deps,
            generators_folder: dir.path(),
            build_folder: Path::new("/b"),
            package_folder: Path::new("/p"),
            buildenv: &buildenv,
        };
        let written = write_env_scripts(&input).unwrap();
        assert_eq!(written.len(), 2);

        let build = fs::read_to_string(dir.path().join(BUILDENV_SCRIPT)).unwrap();
        assert!(build.contains("export PATH=\"/cache/cmake/bin"));
        let run = fs::read_to_string(dir.path().join(RUNENV_SCRIPT)).unwrap();
        assert!(run.contains("LD_LIBRARY_PATH=\"/cache/zlib/lib"));
        assert!(!run.contains("/cache/cmake"));
    }
}

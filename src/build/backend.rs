// src/build/backend.rs

//! Command lines of the build backends
//!
//! Pure functions from a node and its folders to argv vectors, kept apart
//! from execution so they can be checked without the tools installed.

use crate::build::BackendOptions;
use crate::conf::keys;
use crate::generators::{autotools, cmake, meson};
use crate::recipe::{NodeState, StageContext};
use std::path::{Path, PathBuf};

/// Folders a backend works in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    /// Directory with the top-level build file
    pub source: PathBuf,
    pub build: PathBuf,
    pub generators: PathBuf,
    pub package: PathBuf,
    pub jobs: usize,
}

impl BuildPaths {
    pub fn new(ctx: &StageContext<'_>, opts: &BackendOptions) -> Self {
        let source = match &opts.subdir {
            Some(sub) => ctx.source_folder.join(sub),
            None => ctx.source_folder.clone(),
        };
        Self {
            source,
            build: ctx.build_folder.clone(),
            generators: ctx.generators_folder.clone(),
            package: ctx.package_folder.clone(),
            jobs: ctx.jobs.max(1),
        }
    }
}

fn s(path: &Path) -> String {
    path.display().to_string()
}

fn build_type(node: &NodeState) -> Option<&str> {
    node.setting("build_type")
}

/// `cmake` configure step
pub fn cmake_configure(node: &NodeState, paths: &BuildPaths, opts: &BackendOptions) -> Vec<String> {
    let mut argv = vec![
        "cmake".to_string(),
        "-S".to_string(),
        s(&paths.source),
        "-B".to_string(),
        s(&paths.build),
    ];
    let generator = opts
        .generator
        .clone()
        .or_else(|| node.conf.get_str(keys::CMAKE_GENERATOR));
    if let Some(generator) = generator {
        argv.push("-G".to_string());
        argv.push(generator);
    }
    argv.push(format!(
        "-DCMAKE_TOOLCHAIN_FILE={}",
        s(&paths.generators.join(cmake::TOOLCHAIN_FILE))
    ));
    argv.push(format!("-DCMAKE_INSTALL_PREFIX={}", s(&paths.package)));
    if let Some(bt) = build_type(node) {
        argv.push(format!("-DCMAKE_BUILD_TYPE={}", bt));
    }
    argv.extend(opts.configure_args.iter().cloned());
    argv
}

/// `cmake --build`
pub fn cmake_build(node: &NodeState, paths: &BuildPaths, opts: &BackendOptions) -> Vec<String> {
    let mut argv = vec![
        "cmake".to_string(),
        "--build".to_string(),
        s(&paths.build),
        "--parallel".to_string(),
        paths.jobs.to_string(),
    ];
    if let Some(bt) = build_type(node) {
        argv.push("--config".to_string());
        argv.push(bt.to_string());
    }
    for target in &opts.targets {
        argv.push("--target".to_string());
        argv.push(target.clone());
    }
    argv
}

/// `cmake --install`
pub fn cmake_install(node: &NodeState, paths: &BuildPaths) -> Vec<String> {
    let mut argv = vec![
        "cmake".to_string(),
        "--install".to_string(),
        s(&paths.build),
        "--prefix".to_string(),
        s(&paths.package),
    ];
    if let Some(bt) = build_type(node) {
        argv.push("--config".to_string());
        argv.push(bt.to_string());
    }
    argv
}

/// `meson setup`
pub fn meson_setup(node: &NodeState, paths: &BuildPaths, opts: &BackendOptions) -> Vec<String> {
    let mut argv = vec![
        "meson".to_string(),
        "setup".to_string(),
        "--native-file".to_string(),
        s(&paths.generators.join(meson::NATIVE_FILE)),
    ];
    if node.is_cross_building() {
        argv.push("--cross-file".to_string());
        argv.push(s(&paths.generators.join(meson::CROSS_FILE)));
    }
    argv.extend([
        "--prefix".to_string(),
        s(&paths.package),
        "--libdir".to_string(),
        "lib".to_string(),
        "--bindir".to_string(),
        "bin".to_string(),
        "--includedir".to_string(),
        "include".to_string(),
    ]);
    argv.extend(opts.configure_args.iter().cloned());
    argv.push(s(&paths.build));
    argv.push(s(&paths.source));
    argv
}

/// `meson compile`
pub fn meson_compile(paths: &BuildPaths, opts: &BackendOptions) -> Vec<String> {
    let mut argv = vec![
        "meson".to_string(),
        "compile".to_string(),
        "-C".to_string(),
        s(&paths.build),
        "-j".to_string(),
        paths.jobs.to_string(),
    ];
    argv.extend(opts.targets.iter().cloned());
    argv
}

/// `meson install`
pub fn meson_install(paths: &BuildPaths) -> Vec<String> {
    vec![
        "meson".to_string(),
        "install".to_string(),
        "-C".to_string(),
        s(&paths.build),
    ]
}

/// `./configure` of an Autotools project, run from the build folder
pub fn autotools_configure(node: &NodeState, paths: &BuildPaths, opts: &BackendOptions) -> Vec<String> {
    let mut argv = vec![
        s(&paths.source.join("configure")),
        format!("--prefix={}", s(&paths.package)),
    ];
    argv.extend(autotools::triplet_args(node));
    if node.options.is_declared("shared") {
        if node.options.get_bool("shared") {
            argv.extend(["--enable-shared".to_string(), "--disable-static".to_string()]);
        } else {
            argv.extend(["--disable-shared".to_string(), "--enable-static".to_string()]);
        }
    }
    argv.extend(opts.configure_args.iter().cloned());
    argv
}

/// `make` with a job count, extra variables and targets
pub fn make(paths: &BuildPaths, targets: &[String], extra: Option<String>) -> Vec<String> {
    let mut argv = vec!["make".to_string(), format!("-j{}", paths.jobs)];
    argv.extend(extra);
    argv.extend(targets.iter().cloned());
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::{Conf, ConfValue};
    use crate::graph::Context;
    use crate::recipe::PackageType;
    use crate::settings::{OptionDef, Options, Settings};
    use crate::version::Version;
    use std::collections::BTreeMap;

    fn node(host: &[(&str, &str)], build: &[(&str, &str)]) -> NodeState {
        let mut settings = Settings::with_defaults().unwrap();
        settings.update(host.iter().copied()).unwrap();
        let mut settings_build = Settings::with_defaults().unwrap();
        settings_build.update(build.iter().copied()).unwrap();
        NodeState {
            name: "zlib".into(),
            version: Version::parse("1.3.1").unwrap(),
            context: Context::Host,
            package_type: PackageType::Library,
            settings,
            settings_build,
            options: Options::from_defs(BTreeMap::from([(
                "shared".to_string(),
                OptionDef::boolean(false),
            )])),
            conf: Conf::new(),
            is_root: true,
        }
    }

    fn paths() -> BuildPaths {
        BuildPaths {
            source: PathBuf::from("/w/src"),
            build: PathBuf::from("/w/build"),
            generators: PathBuf::from("/w/build/generators"),
            package: PathBuf::from("/w/pkg"),
            jobs: 8,
        }
    }

    #[test]
    fn test_cmake_lines() {
        let mut n = node(&[("os", "Linux"), ("build_type", "Release")], &[("os", "Linux")]);
        n.conf
            .define(keys::CMAKE_GENERATOR, ConfValue::Str("Ninja".into()))
            .unwrap();
        let opts = BackendOptions {
            configure_args: vec!["-DZ_EXTRA=1".into()],
            targets: vec!["zlib".into()],
            ..Default::default()
        };
        let configure = cmake_configure(&n, &paths(), &opts);
        assert_eq!(&configure[..5], &["cmake", "-S", "/w/src", "-B", "/w/build"]);
        assert!(configure.contains(&"Ninja".to_string()));
        assert!(configure.contains(&"-DCMAKE_TOOLCHAIN_FILE=/w/build/generators/pantry_toolchain.cmake".to_string()));
        assert!(configure.contains(&"-DCMAKE_BUILD_TYPE=Release".to_string()));
        assert_eq!(configure.last().map(String::as_str), Some("-DZ_EXTRA=1"));

        let build = cmake_build(&n, &paths(), &opts);
        assert!(build.ends_with(&["--target".to_string(), "zlib".to_string()]));
        assert!(cmake_install(&n, &paths()).contains(&"/w/pkg".to_string()));
    }

    #[test]
    fn test_meson_cross_file_only_when_cross() {
        let native = node(&[("os", "Linux"), ("arch", "x86_64")], &[("os", "Linux"), ("arch", "x86_64")]);
        let setup = meson_setup(&native, &paths(), &BackendOptions::default());
        assert!(!setup.contains(&"--cross-file".to_string()));
        assert_eq!(&setup[setup.len() - 2..], &["/w/build", "/w/src"]);

        let cross = node(&[("os", "Linux"), ("arch", "armv8")], &[("os", "Linux"), ("arch", "x86_64")]);
        let setup = meson_setup(&cross, &paths(), &BackendOptions::default());
        assert!(setup.contains(&"--cross-file".to_string()));
    }

    #[test]
    fn test_autotools_configure() {
        let mut n = node(&[("os", "Linux"), ("arch", "armv8")], &[("os", "Linux"), ("arch", "x86_64")]);
        n.options.set("shared", "True").unwrap();
        let argv = autotools_configure(&n, &paths(), &BackendOptions::default());
        assert_eq!(argv[0], "/w/src/configure");
        assert!(argv.contains(&"--host=aarch64-linux-gnu".to_string()));
        assert!(argv.contains(&"--build=x86_64-linux-gnu".to_string()));
        assert!(argv.contains(&"--enable-shared".to_string()));
    }

    #[test]
    fn test_make() {
        let argv = make(&paths(), &["install".to_string()], Some("PREFIX=/w/pkg".into()));
        assert_eq!(argv, vec!["make", "-j8", "PREFIX=/w/pkg", "install"]);
    }
}

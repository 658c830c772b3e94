// src/generators/pkgconfig.rs

//! pkg-config files for host dependencies
//!
//! One `<name>.pc` per dependency, plus one per component named
//! `<name>-<component>` unless the component sets `pkg_config_name`. The
//! package file then only `Requires` its components.

use crate::cpp_info::Component;
use crate::error::Result;
use crate::generators::{GeneratorInput, ResolvedDep};
use std::fmt::Write as _;
use std::path::PathBuf;

fn package_pc_name(dep: &ResolvedDep<'_>) -> String {
    dep.cpp_info()
        .root
        .properties
        .pkg_config_name
        .clone()
        .unwrap_or_else(|| dep.name().to_string())
}

fn component_pc_name(dep: &ResolvedDep<'_>, name: &str, component: &Component) -> String {
    component
        .properties
        .pkg_config_name
        .clone()
        .unwrap_or_else(|| format!("{}-{}", dep.name(), name))
}

/// pkg-config module a component requirement points at
fn required_pc_name(dep: &ResolvedDep<'_>, required: &str) -> String {
    match required.split_once("::") {
        Some((pkg, comp)) if pkg == comp => pkg.to_string(),
        Some((pkg, comp)) => format!("{}-{}", pkg, comp),
        None => match dep.cpp_info().components.get(required) {
            Some(c) => component_pc_name(dep, required, c),
            None => format!("{}-{}", dep.name(), required),
        },
    }
}

fn relative_flags(prefix: &str, dirs: &[String], var: &str) -> Vec<String> {
    dirs.iter()
        .map(|d| {
            if d.starts_with('/') {
                format!("{}{}", prefix, d)
            } else {
                format!("{}${{{}}}/{}", prefix, var, d)
            }
        })
        .collect()
}

/// Content of one `.pc` file
pub fn pc_file(dep: &ResolvedDep<'_>, name: &str, component: &Component, requires: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "prefix={}", dep.folder().display());
    let version = component
        .properties
        .component_version
        .clone()
        .unwrap_or_else(|| dep.view.version().as_str().to_string());
    if let Some(custom) = &component.properties.pkg_config_custom_content {
        out.push_str(custom.trim_end());
        out.push('\n');
    }
    out.push('\n');
    let _ = writeln!(out, "Name: {}", name);
    let _ = writeln!(out, "Description: {} package for pantry", dep.name());
    let _ = writeln!(out, "Version: {}", version);

    let mut libs = relative_flags("-L", &component.libdirs, "prefix");
    libs.extend(component.libs.iter().map(|l| format!("-l{}", l)));
    libs.extend(component.system_libs.iter().map(|l| format!("-l{}", l)));
    libs.extend(component.frameworks.iter().map(|f| format!("-framework {}", f)));
    libs.extend(component.sharedlinkflags.iter().cloned());
    libs.extend(component.exelinkflags.iter().cloned());
    let _ = writeln!(out, "Libs: {}", libs.join(" "));

    let mut cflags = relative_flags("-I", &component.includedirs, "prefix");
    cflags.extend(component.defines.iter().map(|d| format!("-D{}", d)));
    cflags.extend(component.cflags.iter().cloned());
    cflags.extend(component.cxxflags.iter().cloned());
    let _ = writeln!(out, "Cflags: {}", cflags.join(" "));
    if !requires.is_empty() {
        let _ = writeln!(out, "Requires: {}", requires.join(" "));
    }
    out
}

/// Write `.pc` files for every host dependency
pub fn write(input: &GeneratorInput<'_>) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for dep in input.host_deps()? {
        let info = dep.cpp_info();
        let package = package_pc_name(&dep);
        if info.has_components() {
            let order = info.component_order()?;
            let mut names = Vec::new();
            for name in &order {
                let Some(component) = info.components.get(name) else {
                    continue;
                };
                let pc = component_pc_name(&dep, name, component);
                let requires: Vec<String> = component
                    .requires
                    .iter()
                    .map(|r| required_pc_name(&dep, r))
                    .collect();
                written.push(input.write(&format!("{}.pc", pc), &pc_file(&dep, &pc, component, &requires))?);
                names.push(pc);
            }
            let mut root = info.root.clone();
            root.libs.clear();
            root.libdirs.clear();
            written.push(input.write(&format!("{}.pc", package), &pc_file(&dep, &package, &root, &names))?);
        } else {
            let requires: Vec<String> = info
                .root
                .requires
                .iter()
                .map(|r| required_pc_name(&dep, r))
                .collect();
            written.push(input.write(
                &format!("{}.pc", package),
                &pc_file(&dep, &package, &info.root, &requires),
            )?);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpp_info::CppInfo;
    use crate::environment::Environment;
    use crate::generators::testing::*;
    use crate::graph::Context;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_single_package() {
        let dir = TempDir::new().unwrap();
        let n = node(&[("os", "Linux")], &[("os", "Linux")]);
        let mut zlib = lib(&["z"]);
        zlib.root.properties.pkg_config_name = Some("ZLIB".into());
        let deps = vec![
            dep("zlib", Context::Host, host(), zlib),
            dep("cmake", Context::Build, tool(), lib(&[])),
        ];
        let env = Environment::new();
        let input = GeneratorInput {
            node: &n,
            dependencies: &deps,
            generators_folder: dir.path(),
            build_folder: Path::new("/b"),
            package_folder: Path::new("/p"),
            buildenv: &env,
        };
        let written = write(&input).unwrap();
        assert_eq!(written.len(), 1);
        let pc = fs::read_to_string(dir.path().join("ZLIB.pc")).unwrap();
        assert!(pc.starts_with("prefix=/cache/zlib\n"));
        assert!(pc.contains("Version: 1.0"));
        assert!(pc.contains("Libs: -L${prefix}/lib -lz"));
        assert!(pc.contains("Cflags: -I${prefix}/include"));
    }

    #[test]
    fn test_components() {
        let dir = TempDir::new().unwrap();
        let n = node(&[("os", "Linux")], &[("os", "Linux")]);
        let mut info = CppInfo::default();
        info.components.insert(
            "crypto".into(),
            Component {
                libs: vec!["crypto".into()],
                ..Default::default()
            },
        );
        info.components.insert(
            "ssl".into(),
            Component {
                libs: vec!["ssl".into()],
                requires: vec!["crypto".into(), "zlib::zlib".into()],
                ..Default::default()
            },
        );
        info.components.get_mut("ssl").unwrap().properties.pkg_config_custom_content =
            Some("enginesdir=${prefix}/lib/engines".into());
        let deps = vec![dep("openssl", Context::Host, host(), info)];
        let env = Environment::new();
        let input = GeneratorInput {
            node: &n,
            dependencies: &deps,
            generators_folder: dir.path(),
            build_folder: Path::new("/b"),
            package_folder: Path::new("/p"),
            buildenv: &env,
        };
        write(&input).unwrap();
        let ssl = fs::read_to_string(dir.path().join("openssl-ssl.pc")).unwrap();
        assert!(ssl.contains("Requires: openssl-crypto zlib"));
        assert!(ssl.contains("enginesdir=${prefix}/lib/engines"));
        let package = fs::read_to_string(dir.path().join("openssl.pc")).unwrap();
        assert!(package.contains("Requires: openssl-ssl openssl-crypto"));
        assert!(package.contains("Libs: \n"));
    }
}

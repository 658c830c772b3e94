// src/generators/cmake.rs

//! CMake toolchain and dependency files
//!
//! `pantry_toolchain.cmake` carries the compiler, platform and flags of the
//! node plus the recipe's cache variables. Each host dependency gets a
//! `<name>-config.cmake` (or `Find<name>.cmake`) defining interface
//! targets, and `pantry_deps.cmake` includes them all and records the link
//! order in `PANTRY_LINK_ORDER`.

use crate::conf::keys;
use crate::cpp_info::Component;
use crate::error::Result;
use crate::generators::{ConfFlags, GeneratorInput, ResolvedDep, compilers, cppstd, is_shared, wants_pic};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

pub const TOOLCHAIN_FILE: &str = "pantry_toolchain.cmake";
pub const DEPS_FILE: &str = "pantry_deps.cmake";

const HEADER: &str = "# Generated by pantry, do not edit\n";

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "/").replace('"', "\\\""))
}

fn system_name(os: &str) -> &str {
    match os {
        "Macos" => "Darwin",
        "baremetal" => "Generic",
        other => other,
    }
}

fn processor(arch: &str) -> &str {
    match arch {
        "armv8" => "aarch64",
        "armv7" | "armv7hf" | "armv7s" => "armv7",
        "x86" => "i686",
        "ppc64le" => "ppc64le",
        other => other,
    }
}

/// Content of the toolchain file
pub fn toolchain(input: &GeneratorInput<'_>, cache_variables: &BTreeMap<String, String>) -> Result<String> {
    let node = input.node;
    let mut out = String::from(HEADER);

    if node.is_cross_building() {
        if let Some(os) = node.setting("os") {
            let _ = writeln!(out, "set(CMAKE_SYSTEM_NAME {})", system_name(os));
        }
        if let Some(arch) = node.setting("arch") {
            let _ = writeln!(out, "set(CMAKE_SYSTEM_PROCESSOR {})", processor(arch));
        }
    }
    let compilers = compilers(&node.settings, node);
    let _ = writeln!(out, "set(CMAKE_C_COMPILER {})", quote(&compilers.cc));
    let _ = writeln!(out, "set(CMAKE_CXX_COMPILER {})", quote(&compilers.cxx));
    if let Some(sysroot) = node.conf.get_str(keys::SYSROOT) {
        let _ = writeln!(out, "set(CMAKE_SYSROOT {})", quote(&sysroot));
    }
    if let Some(bt) = node.setting("build_type") {
        let _ = writeln!(out, "set(CMAKE_BUILD_TYPE {} CACHE STRING \"\" FORCE)", quote(bt));
    }
    if let Some(shared) = is_shared(node) {
        let _ = writeln!(out, "set(BUILD_SHARED_LIBS {})", if shared { "ON" } else { "OFF" });
    }
    if wants_pic(node) {
        out.push_str("set(CMAKE_POSITION_INDEPENDENT_CODE ON)\n");
    }
    if let Some((std, gnu)) = cppstd(node) {
        let _ = writeln!(out, "set(CMAKE_CXX_STANDARD {})", std);
        let _ = writeln!(out, "set(CMAKE_CXX_EXTENSIONS {})", if gnu { "ON" } else { "OFF" });
        out.push_str("set(CMAKE_CXX_STANDARD_REQUIRED ON)\n");
    }
    if node.setting("compiler") == Some("msvc") {
        let debug = if node.setting("compiler.runtime_type") == Some("Debug") { "Debug" } else { "" };
        let dll = if node.setting("compiler.runtime") == Some("static") { "" } else { "DLL" };
        let _ = writeln!(out, "set(CMAKE_MSVC_RUNTIME_LIBRARY \"MultiThreaded{}{}\")", debug, dll);
    }
    if node.setting("compiler.libcxx") == Some("libc++") && node.setting("compiler") == Some("clang") {
        out.push_str("string(APPEND CMAKE_CXX_FLAGS_INIT \" -stdlib=libc++\")\n");
    }

    let flags = ConfFlags::from_node(node);
    for (var, values) in [
        ("CMAKE_C_FLAGS_INIT", &flags.cflags),
        ("CMAKE_CXX_FLAGS_INIT", &flags.cxxflags),
        ("CMAKE_SHARED_LINKER_FLAGS_INIT", &flags.sharedlinkflags),
        ("CMAKE_EXE_LINKER_FLAGS_INIT", &flags.exelinkflags),
    ] {
        if !values.is_empty() {
            let _ = writeln!(out, "string(APPEND {} \" {}\")", var, values.join(" "));
        }
    }
    if !flags.defines.is_empty() {
        let _ = writeln!(out, "add_compile_definitions({})", flags.defines.join(" "));
    }

    let generators = input.generators_folder.display().to_string();
    let _ = writeln!(out, "set(CMAKE_INSTALL_PREFIX {})", quote(&input.package_folder.display().to_string()));
    let _ = writeln!(out, "list(PREPEND CMAKE_PREFIX_PATH {})", quote(&generators));
    let _ = writeln!(out, "list(PREPEND CMAKE_MODULE_PATH {})", quote(&generators));
    let _ = writeln!(out, "set(CMAKE_FIND_PACKAGE_PREFER_CONFIG ON)");

    for dep in input.host_deps()? {
        for dir in dep.abs(&dep.aggregated.builddirs) {
            let _ = writeln!(out, "list(APPEND CMAKE_MODULE_PATH {})", quote(&dir));
        }
    }
    for tool in input.tool_deps()? {
        for dir in tool.abs(&tool.aggregated.bindirs) {
            let _ = writeln!(out, "list(APPEND CMAKE_PROGRAM_PATH {})", quote(&dir));
        }
        for dir in tool.abs(&tool.aggregated.builddirs) {
            let _ = writeln!(out, "list(APPEND CMAKE_MODULE_PATH {})", quote(&dir));
        }
    }

    for (name, value) in cache_variables {
        let _ = writeln!(out, "set({} {} CACHE STRING \"\" FORCE)", name, quote(value));
    }
    Ok(out)
}

fn file_name(dep: &ResolvedDep<'_>) -> String {
    dep.cpp_info()
        .root
        .properties
        .cmake_file_name
        .clone()
        .unwrap_or_else(|| dep.name().to_string())
}

fn target_name(dep: &ResolvedDep<'_>) -> String {
    dep.cpp_info()
        .root
        .properties
        .cmake_target_name
        .clone()
        .unwrap_or_else(|| format!("{0}::{0}", dep.name()))
}

fn component_target(dep: &ResolvedDep<'_>, name: &str, component: &Component) -> String {
    component
        .properties
        .cmake_target_name
        .clone()
        .unwrap_or_else(|| format!("{}::{}", dep.name(), name))
}

/// One interface target for a component
fn target_block(out: &mut String, dep: &ResolvedDep<'_>, target: &str, c: &Component, links: &[String]) {
    let _ = writeln!(out, "if(NOT TARGET {})", target);
    let _ = writeln!(out, "  add_library({} INTERFACE IMPORTED)", target);
    let includes: Vec<String> = dep.abs(&c.includedirs).iter().map(|d| quote(d)).collect();
    if !includes.is_empty() {
        let _ = writeln!(
            out,
            "  set_property(TARGET {} PROPERTY INTERFACE_INCLUDE_DIRECTORIES {})",
            target,
            includes.join(" ")
        );
    }
    let libdirs: Vec<String> = dep.abs(&c.libdirs).iter().map(|d| quote(d)).collect();
    if !libdirs.is_empty() {
        let _ = writeln!(
            out,
            "  set_property(TARGET {} PROPERTY INTERFACE_LINK_DIRECTORIES {})",
            target,
            libdirs.join(" ")
        );
    }
    let mut link: Vec<String> = c.libs.clone();
    link.extend(links.iter().cloned());
    link.extend(c.system_libs.iter().cloned());
    link.extend(c.frameworks.iter().map(|f| format!("\"-framework {}\"", f)));
    if !link.is_empty() {
        let _ = writeln!(
            out,
            "  set_property(TARGET {} PROPERTY INTERFACE_LINK_LIBRARIES {})",
            target,
            link.join(" ")
        );
    }
    if !c.defines.is_empty() {
        let _ = writeln!(
            out,
            "  set_property(TARGET {} PROPERTY INTERFACE_COMPILE_DEFINITIONS {})",
            target,
            c.defines.join(" ")
        );
    }
    let mut options: Vec<String> = Vec::new();
    options.extend(c.cflags.iter().map(|f| format!("$<$<COMPILE_LANGUAGE:C>:{}>", f)));
    options.extend(c.cxxflags.iter().map(|f| format!("$<$<COMPILE_LANGUAGE:CXX>:{}>", f)));
    if !options.is_empty() {
        let _ = writeln!(
            out,
            "  set_property(TARGET {} PROPERTY INTERFACE_COMPILE_OPTIONS {})",
            target,
            options.join(" ")
        );
    }
    let mut link_options: Vec<String> = Vec::new();
    link_options.extend(
        c.sharedlinkflags
            .iter()
            .map(|f| format!("$<$<STREQUAL:$<TARGET_PROPERTY:TYPE>,SHARED_LIBRARY>:{}>", f)),
    );
    link_options.extend(
        c.exelinkflags
            .iter()
            .map(|f| format!("$<$<STREQUAL:$<TARGET_PROPERTY:TYPE>,EXECUTABLE>:{}>", f)),
    );
    if !link_options.is_empty() {
        let _ = writeln!(
            out,
            "  set_property(TARGET {} PROPERTY INTERFACE_LINK_OPTIONS {})",
            target,
            link_options.join(" ")
        );
    }
    out.push_str("endif()\n");
}

/// Resolve a component requirement to a target name
fn required_target(dep: &ResolvedDep<'_>, required: &str) -> String {
    match required.split_once("::") {
        Some((pkg, comp)) if pkg == comp => format!("{0}::{0}", pkg),
        Some(_) => required.to_string(),
        None => match dep.cpp_info().components.get(required) {
            Some(c) => component_target(dep, required, c),
            None => format!("{}::{}", dep.name(), required),
        },
    }
}

/// Content of the config file of one dependency
pub fn config_file(dep: &ResolvedDep<'_>) -> Result<String> {
    let info = dep.cpp_info();
    let main = target_name(dep);
    let mut out = String::from(HEADER);
    let _ = writeln!(out, "set({}_FOUND TRUE)", file_name(dep));
    let _ = writeln!(out, "set({}_VERSION {})", file_name(dep), quote(dep.view.version().as_str()));

    if info.has_components() {
        let order = info.component_order()?;
        // Dependencies first so every linked target already exists
        for name in order.iter().rev() {
            let Some(c) = info.components.get(name) else {
                continue;
            };
            let links: Vec<String> = c.requires.iter().map(|r| required_target(dep, r)).collect();
            target_block(&mut out, dep, &component_target(dep, name, c), c, &links);
        }
        let all: Vec<String> = order
            .iter()
            .filter_map(|n| info.components.get(n).map(|c| component_target(dep, n, c)))
            .collect();
        let mut root = info.root.clone();
        root.libs.clear();
        target_block(&mut out, dep, &main, &root, &all);
    } else {
        let links: Vec<String> = info.root.requires.iter().map(|r| required_target(dep, r)).collect();
        target_block(&mut out, dep, &main, &info.root, &links);
    }

    for alias in &info.root.properties.cmake_target_aliases {
        let _ = writeln!(out, "if(NOT TARGET {})", alias);
        let _ = writeln!(out, "  add_library({} INTERFACE IMPORTED)", alias);
        let _ = writeln!(out, "  set_property(TARGET {} PROPERTY INTERFACE_LINK_LIBRARIES {})", alias, main);
        out.push_str("endif()\n");
    }
    for module in dep.abs(&info.root.properties.cmake_build_modules) {
        let _ = writeln!(out, "include({})", quote(&module));
    }
    Ok(out)
}

/// Write the toolchain, per-dependency config files and the deps file
pub fn write(input: &GeneratorInput<'_>, cache_variables: &BTreeMap<String, String>) -> Result<Vec<PathBuf>> {
    let mut written = vec![input.write(TOOLCHAIN_FILE, &toolchain(input, cache_variables)?)?];

    let mut deps_file = String::from(HEADER);
    let mut includes = Vec::new();
    for dep in input.host_deps()? {
        let mode = dep
            .cpp_info()
            .root
            .properties
            .cmake_find_mode
            .clone()
            .unwrap_or_else(|| "config".to_string());
        if mode == "none" {
            continue;
        }
        let content = config_file(&dep)?;
        let name = file_name(&dep);
        if mode == "config" || mode == "both" {
            let file = format!("{}-config.cmake", name);
            written.push(input.write(&file, &content)?);
            includes.push(file);
        }
        if mode == "module" || mode == "both" {
            let file = format!("Find{}.cmake", name);
            written.push(input.write(&file, &content)?);
            if mode == "module" {
                includes.push(file);
            }
        }
    }
    for file in &includes {
        let _ = writeln!(deps_file, "include(\"${{CMAKE_CURRENT_LIST_DIR}}/{}\")", file);
    }
    let order: Vec<String> = input
        .link_deps()?
        .iter()
        .filter(|d| d.cpp_info().root.properties.cmake_find_mode.as_deref() != Some("none"))
        .map(target_name)
        .collect();
    let _ = writeln!(deps_file, "set(PANTRY_LINK_ORDER {})", order.join(" "));
    written.push(input.write(DEPS_FILE, &deps_file)?);
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

    fn components() -> CppInfo {
        let mut info = CppInfo::default();
        info.root.properties.cmake_file_name = Some("OpenSSL".into());
        info.root.properties.cmake_target_name = Some("OpenSSL::OpenSSL".into());
        let mut crypto = crate::cpp_info::Component {
            libs: vec!["crypto".into()],
            system_libs: vec!["dl".into(), "pthread".into()],
            ..Default::default()
        };
        crypto.properties.cmake_target_name = Some("OpenSSL::Crypto".into());
        let mut ssl = crate::cpp_info::Component {
            libs: vec!["ssl".into()],
            requires: vec!["crypto".into()],
            ..Default::default()
        };
        ssl.properties.cmake_target_name = Some("OpenSSL::SSL".into());
        info.components.insert("crypto".into(), crypto);
        info.components.insert("ssl".into(), ssl);
        info
    }

    #[test]
    fn test_toolchain() {
        let mut n = node(
            &[("os", "Linux"), ("arch", "armv8"), ("compiler", "gcc"), ("build_type", "Release")],
            &[("os", "Linux"), ("arch", "x86_64")],
        );
        n.conf.apply_line("tools.build:cflags=['-Wall']").unwrap();
        let deps = vec![dep("protobuf", Context::Build, tool(), lib(&["protobuf"]))];
        let env = Environment::new();
        let input = GeneratorInput {
            node: &n,
            dependencies: &deps,
            generators_folder: Path::new("/g"),
            build_folder: Path::new("/b"),
            package_folder: Path::new("/p"),
            buildenv: &env,
        };
        let vars = BTreeMap::from([("ZLIB_COMPAT".to_string(), "ON".to_string())]);
        let text = toolchain(&input, &vars).unwrap();
        assert!(text.contains("set(CMAKE_SYSTEM_NAME Linux)"));
        assert!(text.contains("set(CMAKE_SYSTEM_PROCESSOR aarch64)"));
        assert!(text.contains("set(CMAKE_CXX_COMPILER \"g++\")"));
        assert!(text.contains("set(BUILD_SHARED_LIBS OFF)"));
        assert!(text.contains("set(CMAKE_POSITION_INDEPENDENT_CODE ON)"));
        assert!(text.contains("string(APPEND CMAKE_C_FLAGS_INIT \" -Wall\")"));
        assert!(text.contains("list(APPEND CMAKE_PROGRAM_PATH \"/cache/protobuf/bin\")"));
        assert!(text.contains("set(ZLIB_COMPAT \"ON\" CACHE STRING \"\" FORCE)"));
    }

    #[test]
    fn test_component_targets() {
        let dir = TempDir::new().unwrap();
        let n = node(&[("os", "Linux")], &[("os", "Linux")]);
        let deps = vec![
            dep("openssl", Context::Host, host(), components()),
            dep("zlib", Context::Host, host(), lib(&["z"])),
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
        write(&input, &BTreeMap::new()).unwrap();

        let config = fs::read_to_string(dir.path().join("OpenSSL-config.cmake")).unwrap();
        let crypto = config.find("add_library(OpenSSL::Crypto").unwrap();
        let ssl = config.find("add_library(OpenSSL::SSL").unwrap();
        assert!(crypto < ssl);
        assert!(config.contains("INTERFACE_LINK_LIBRARIES ssl OpenSSL::Crypto"));
        assert!(config.contains("INTERFACE_LINK_LIBRARIES crypto dl pthread"));
        assert!(config.contains("INTERFACE_LINK_LIBRARIES OpenSSL::SSL OpenSSL::Crypto"));

        let deps_file = fs::read_to_string(dir.path().join(DEPS_FILE)).unwrap();
        assert!(deps_file.contains("set(PANTRY_LINK_ORDER zlib::zlib OpenSSL::OpenSSL)"));
        assert!(!dir.path().join("cmake-config.cmake").exists());
    }
}

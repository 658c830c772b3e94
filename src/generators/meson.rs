// src/generators/meson.rs

//! Meson machine files
//!
//! The native file always exists. The cross file is written only when the
//! node's host platform differs from the build platform; then it carries
//! the `[host_machine]` section and the compilers, while the native file
//! describes the build machine.

use crate::conf::keys;
use crate::error::Result;
use crate::generators::{ConfFlags, GeneratorInput, compilers, cppstd, is_shared, single_quote, wants_pic};
use crate::recipe::NodeState;
use std::fmt::Write as _;
use std::path::PathBuf;

pub const NATIVE_FILE: &str = "pantry_meson_native.ini";
pub const CROSS_FILE: &str = "pantry_meson_cross.ini";

fn array(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| single_quote(v)).collect();
    format!("[{}]", quoted.join(", "))
}

fn buildtype(node: &NodeState) -> Option<&'static str> {
    match node.setting("build_type")? {
        "Debug" => Some("debug"),
        "Release" => Some("release"),
        "RelWithDebInfo" => Some("debugoptimized"),
        "MinSizeRel" => Some("minsize"),
        _ => None,
    }
}

fn system(os: &str) -> String {
    match os {
        "Macos" | "iOS" | "watchOS" | "tvOS" => "darwin".to_string(),
        "baremetal" => "bare metal".to_string(),
        other => other.to_lowercase(),
    }
}

/// `(cpu_family, cpu, endian)` of a settings arch
fn cpu(arch: &str) -> (&str, &str, &str) {
    match arch {
        "x86" => ("x86", "x86", "little"),
        "x86_64" => ("x86_64", "x86_64", "little"),
        "armv8" | "armv8.3" => ("aarch64", "aarch64", "little"),
        "armv7" | "armv7hf" | "armv7s" => ("arm", "armv7", "little"),
        "armv6" => ("arm", "armv6", "little"),
        "ppc64le" => ("ppc64", "ppc64le", "little"),
        "ppc64" => ("ppc64", "ppc64", "big"),
        "s390x" => ("s390x", "s390x", "big"),
        "riscv64" => ("riscv64", "riscv64", "little"),
        "wasm" => ("wasm32", "wasm32", "little"),
        other => (other, other, "little"),
    }
}

fn binaries(out: &mut String, input: &GeneratorInput<'_>) {
    let node = input.node;
    let compilers = compilers(&node.settings, node);
    out.push_str("[binaries]\n");
    let _ = writeln!(out, "c = {}", single_quote(&compilers.cc));
    let _ = writeln!(out, "cpp = {}", single_quote(&compilers.cxx));
    out.push_str("pkg-config = 'pkg-config'\n\n");
}

fn options(out: &mut String, input: &GeneratorInput<'_>) {
    let node = input.node;
    let flags = ConfFlags::from_node(node);
    out.push_str("[built-in options]\n");
    if let Some(bt) = buildtype(node) {
        let _ = writeln!(out, "buildtype = {}", single_quote(bt));
    }
    if let Some(shared) = is_shared(node) {
        let _ = writeln!(out, "default_library = {}", single_quote(if shared { "shared" } else { "static" }));
    }
    let _ = writeln!(out, "b_staticpic = {}", wants_pic(node));
    if let Some((std, gnu)) = cppstd(node) {
        let value = if gnu { format!("gnu++{}", std) } else { format!("c++{}", std) };
        let _ = writeln!(out, "cpp_std = {}", single_quote(&value));
    }
    if node.setting("compiler") == Some("msvc") {
        let runtime = match (node.setting("compiler.runtime"), node.setting("compiler.runtime_type")) {
            (Some("static"), Some("Debug")) => "mtd",
            (Some("static"), _) => "mt",
            (_, Some("Debug")) => "mdd",
            _ => "md",
        };
        let _ = writeln!(out, "b_vscrt = {}", single_quote(runtime));
    }
    let pkg_config = input.generators_folder.display().to_string();
    let _ = writeln!(out, "pkg_config_path = {}", single_quote(&pkg_config));

    let mut cargs = flags.defines.iter().map(|d| format!("-D{}", d)).collect::<Vec<_>>();
    let mut cppargs = cargs.clone();
    cargs.extend(flags.cflags.iter().cloned());
    cppargs.extend(flags.cxxflags.iter().cloned());
    let mut link: Vec<String> = flags.sharedlinkflags.clone();
    link.extend(flags.exelinkflags.iter().cloned());
    if !cargs.is_empty() {
        let _ = writeln!(out, "c_args = {}", array(&cargs));
    }
    if !cppargs.is_empty() {
        let _ = writeln!(out, "cpp_args = {}", array(&cppargs));
    }
    if !link.is_empty() {
        let _ = writeln!(out, "c_link_args = {}", array(&link));
        let _ = writeln!(out, "cpp_link_args = {}", array(&link));
    }
    out.push('\n');
}

/// Content of the native file
pub fn native_file(input: &GeneratorInput<'_>) -> Result<String> {
    let mut out = String::from("# Generated by pantry, do not edit\n");
    let cross = input.node.is_cross_building();
    if !cross {
        binaries(&mut out, input);
        options(&mut out, input);
    } else {
        out.push_str("[built-in options]\n");
        let _ = writeln!(
            out,
            "pkg_config_path = {}\n",
            single_quote(&input.generators_folder.display().to_string())
        );
    }

    let tools: Vec<String> = input
        .tool_deps()?
        .iter()
        .flat_map(|t| t.abs(&t.aggregated.bindirs))
        .collect();
    out.push_str("[constants]\n");
    let _ = writeln!(out, "pantry_tool_paths = {}", array(&tools));
    let _ = writeln!(
        out,
        "pantry_package_folder = {}",
        single_quote(&input.package_folder.display().to_string())
    );
    Ok(out)
}

/// Content of the cross file
pub fn cross_file(input: &GeneratorInput<'_>) -> String {
    let node = input.node;
    let mut out = String::from("# Generated by pantry, do not edit\n");
    binaries(&mut out, input);
    options(&mut out, input);
    if let Some(sysroot) = node.conf.get_str(keys::SYSROOT) {
        out.push_str("[properties]\n");
        let _ = writeln!(out, "sys_root = {}\n", single_quote(&sysroot));
    }
    let (family, cpu, endian) = cpu(node.setting("arch").unwrap_or("x86_64"));
    out.push_str("[host_machine]\n");
    let _ = writeln!(out, "system = {}", single_quote(&system(node.setting("os").unwrap_or("Linux"))));
    let _ = writeln!(out, "cpu_family = {}", single_quote(family));
    let _ = writeln!(out, "cpu = {}", single_quote(cpu));
    let _ = writeln!(out, "endian = {}", single_quote(endian));
    out
}

/// Write the native file, and the cross file when cross building
pub fn write(input: &GeneratorInput<'_>) -> Result<Vec<PathBuf>> {
    let mut written = vec![input.write(NATIVE_FILE, &native_file(input)?)?];
    if input.node.is_cross_building() {
        written.push(input.write(CROSS_FILE, &cross_file(input))?);
    }
    Ok(written)
}

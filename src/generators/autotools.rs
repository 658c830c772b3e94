// src/generators/autotools.rs

//! Toolchain environment for Autotools and plain Make builds
//!
//! Compilers and flags travel through the usual `CC`/`CFLAGS`/`LDFLAGS`
//! variables. Cross builds get `--host`/`--build` triplets derived from
//! the host and build settings.

use crate::error::Result;
use crate::generators::{ConfFlags, GeneratorInput, compilers, cppstd, wants_pic};
use crate::recipe::NodeState;
use crate::settings::Settings;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

pub const SCRIPT: &str = "pantry_autotools.sh";

/// GNU triplet of a settings set
pub fn gnu_triplet(settings: &Settings) -> Option<String> {
    let arch = match settings.get_safe("arch", None)? {
        "x86" => "i686",
        "x86_64" => "x86_64",
        "armv8" | "armv8.3" => "aarch64",
        "armv7" | "armv7s" | "armv7hf" | "armv6" => "arm",
        "ppc64le" => "powerpc64le",
        "ppc64" => "powerpc64",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        "wasm" => "wasm32",
        other => other,
    };
    let os = settings.get_safe("os", None)?;
    let system = match os {
        "Linux" => match settings.get_safe("arch", None) {
            Some("armv7hf") => "linux-gnueabihf",
            Some("armv7" | "armv6") => "linux-gnueabi",
            _ => "linux-gnu",
        },
        "Android" => match settings.get_safe("arch", None) {
            Some("armv7" | "armv7hf") => "linux-androideabi",
            _ => "linux-android",
        },
        "Macos" | "iOS" | "watchOS" | "tvOS" => "apple-darwin",
        "Windows" => match settings.get_safe("compiler", None) {
            Some("msvc") => "pc-windows-msvc",
            _ => "w64-mingw32",
        },
        "FreeBSD" => "unknown-freebsd",
        "Emscripten" => "unknown-emscripten",
        "baremetal" => "none-elf",
        _ => return None,
    };
    Some(format!("{}-{}", arch, system))
}

/// `--host`/`--build` arguments, empty unless cross building
pub fn triplet_args(node: &NodeState) -> Vec<String> {
    if !node.is_cross_building() {
        return Vec::new();
    }
    match (gnu_triplet(&node.settings), gnu_triplet(&node.settings_build)) {
        (Some(host), Some(build)) => vec![format!("--host={}", host), format!("--build={}", build)],
        _ => Vec::new(),
    }
}

fn join(parts: &[String]) -> String {
    parts.iter().filter(|p| !p.is_empty()).cloned().collect::<Vec<_>>().join(" ")
}

/// Toolchain variables of the node
pub fn environment(input: &GeneratorInput<'_>) -> BTreeMap<String, String> {
    let node = input.node;
    let flags = ConfFlags::from_node(node);
    let compilers = compilers(&node.settings, node);

    let mut cflags = flags.cflags.clone();
    let mut cxxflags = flags.cxxflags.clone();
    if wants_pic(node) && node.setting("os") != Some("Windows") {
        cflags.push("-fPIC".to_string());
        cxxflags.push("-fPIC".to_string());
    }
    match node.setting("build_type") {
        Some("Debug") => {
            cflags.push("-g".to_string());
            cxxflags.push("-g".to_string());
        }
        Some("Release") => {
            cflags.push("-O3".to_string());
            cxxflags.push("-O3".to_string());
        }
        Some("RelWithDebInfo") => {
            cflags.extend(["-O2".to_string(), "-g".to_string()]);
            cxxflags.extend(["-O2".to_string(), "-g".to_string()]);
        }
        Some("MinSizeRel") => {
            cflags.push("-Os".to_string());
            cxxflags.push("-Os".to_string());
        }
        _ => {}
    }
    if let Some((std, gnu)) = cppstd(node) {
        cxxflags.push(format!("-std={}++{}", if gnu { "gnu" } else { "c" }, std));
    }

    let mut cppflags: Vec<String> = flags.defines.iter().map(|d| format!("-D{}", d)).collect();
    let mut ldflags = flags.sharedlinkflags.clone();
    ldflags.extend(flags.exelinkflags.iter().cloned());
    let mut libs: Vec<String> = Vec::new();

    // Component cycles were rejected when the package was sealed
    if let Ok(deps) = input.include_deps() {
        for dep in deps {
            cppflags.extend(dep.abs(&dep.aggregated.includedirs).iter().map(|d| format!("-I{}", d)));
            cppflags.extend(dep.aggregated.defines.iter().map(|d| format!("-D{}", d)));
            cflags.extend(dep.aggregated.cflags.iter().cloned());
            cxxflags.extend(dep.aggregated.cxxflags.iter().cloned());
        }
    }
    if let Ok(deps) = input.link_deps() {
        for dep in &deps {
            ldflags.extend(dep.abs(&dep.aggregated.libdirs).iter().map(|d| format!("-L{}", d)));
            ldflags.extend(dep.aggregated.sharedlinkflags.iter().cloned());
            ldflags.extend(dep.aggregated.exelinkflags.iter().cloned());
            libs.extend(dep.aggregated.libs.iter().map(|l| format!("-l{}", l)));
        }
        for dep in &deps {
            libs.extend(dep.aggregated.system_libs.iter().map(|l| format!("-l{}", l)));
            for framework in &dep.aggregated.frameworks {
                libs.push(format!("-framework {}", framework));
            }
        }
    }

    let mut env = BTreeMap::new();
    env.insert("CC".to_string(), compilers.cc);
    env.insert("CXX".to_string(), compilers.cxx);
    env.insert("CFLAGS".to_string(), join(&cflags));
    env.insert("CXXFLAGS".to_string(), join(&cxxflags));
    env.insert("CPPFLAGS".to_string(), join(&cppflags));
    env.insert("LDFLAGS".to_string(), join(&ldflags));
    env.insert("LIBS".to_string(), join(&libs));
    env.insert(
        "PKG_CONFIG_PATH".to_string(),
        input.generators_folder.display().to_string(),
    );
    env
}

/// Write a sourceable script exporting the toolchain variables
pub fn write(input: &GeneratorInput<'_>) -> Result<Vec<PathBuf>> {
    let mut script = String::from("# Generated by pantry, do not edit\n");
    for (name, value) in environment(input) {
        let _ = writeln!(script, "export {}=\"{}\"", name, value.replace('"', "\\\""));
    }
    let args = triplet_args(input.node);
    if !args.is_empty() {
        let _ = writeln!(script, "export PANTRY_CONFIGURE_TRIPLETS=\"{}\"", args.join(" "));
    }
    Ok(vec![input.write(SCRIPT, &script)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpp_info::CppInfo;
    use crate::environment::Environment;
    use crate::generators::testing::*;
    use crate::graph::Context;
    use std::path::Path;

    fn settings(values: &[(&str, &str)]) -> Settings {
        let mut s = Settings::with_defaults().unwrap();
        s.update(values.iter().copied()).unwrap();
        s
    }

    #[test]
    fn test_triplets() {
        assert_eq!(
            gnu_triplet(&settings(&[("os", "Macos"), ("arch", "x86_64")])).as_deref(),
            Some("x86_64-apple-darwin")
        );
        assert_eq!(
            gnu_triplet(&settings(&[("os", "Windows"), ("arch", "x86_64"), ("compiler", "gcc")])).as_deref(),
            Some("x86_64-w64-mingw32")
        );
        assert_eq!(
            gnu_triplet(&settings(&[("os", "Linux"), ("arch", "armv7hf")])).as_deref(),
            Some("arm-linux-gnueabihf")
        );
        let native = node(&[("os", "Linux"), ("arch", "x86_64")], &[("os", "Linux"), ("arch", "x86_64")]);
        assert!(triplet_args(&native).is_empty());
    }

    #[test]
    fn test_environment() {
        let n = node(
            &[("os", "Linux"), ("arch", "x86_64"), ("compiler", "gcc"), ("build_type", "Release")],
            &[("os", "Linux"), ("arch", "x86_64")],
        );
        let mut ssl = lib(&["ssl", "crypto"]);
        ssl.root.system_libs = vec!["dl".into()];
        ssl.root.defines = vec!["OPENSSL_API".into()];
        let deps = vec![
            dep("zlib", Context::Host, host(), lib(&["z"])),
            dep("openssl", Context::Host, host(), ssl),
            dep("m4", Context::Build, tool(), CppInfo::default()),
        ];
        let env = Environment::new();
        let input = GeneratorInput {
            node: &n,
            dependencies: &deps,
            generators_folder: Path::new("/g"),
            build_folder: Path::new("/b"),
            package_folder: Path::new("/p"),
            buildenv: &env,
        };
        let vars = environment(&input);
        assert_eq!(vars["CC"], "gcc");
        assert_eq!(vars["CFLAGS"], "-fPIC -O3");
        assert_eq!(
            vars["CPPFLAGS"],
            "-I/cache/zlib/include -I/cache/openssl/include -DOPENSSL_API"
        );
        assert_eq!(vars["LIBS"], "-lssl -lcrypto -lz -ldl");
        assert_eq!(vars["LDFLAGS"], "-L/cache/openssl/lib -L/cache/zlib/lib");
        assert!(!vars["LDFLAGS"].contains("m4"));
        assert_eq!(vars["PKG_CONFIG_PATH"], "/g");
    }
}

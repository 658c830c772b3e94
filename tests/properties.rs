// tests/properties.rs

//! Package identity, caching and layout invariants.

mod common;

use common::{TestRecipe, Workspace, id_of, meta, profile, root_id, source_data, tar_gz};
use pantry::package_id::PackageIdMode;
use pantry::recipe::{Implements, RequirementsContext};
use pantry::{Context, ErrorKind, OptionDef, Outcome, PackageType, Profile, Recipe, RecipeHooks, Result};
use std::fs;
use std::sync::Arc;

fn with_options(compiler: &str, options: &str) -> Profile {
    Profile::parse(
        &format!(
            "[settings]\nos=Linux\narch=x86_64\ncompiler={}\ncompiler.version=13\nbuild_type=Release\n[options]\n{}\n",
            compiler, options
        ),
        None,
    )
    .unwrap()
}

fn zlib_meta() -> pantry::RecipeMetadata {
    meta("zlib", PackageType::StaticLibrary).with_option("level", OptionDef::one_of(["1", "9"], Some("9")))
}

/// Consumer pinning the propagation mode of its zlib edge
struct ModeConsumer(PackageIdMode);

impl RecipeHooks for ModeConsumer {
    fn requirements(&self, ctx: &mut RequirementsContext<'_>) -> Result<()> {
        ctx.requires("zlib/[>=1.2 <2]")?.package_id_mode(self.0);
        Ok(())
    }
}

#[test]
fn test_identical_inputs_identical_ids() {
    let ws = Workspace::new();
    ws.add(zlib_meta(), &["1.3.1"], TestRecipe::new());
    ws.add(meta("app", PackageType::Application), &["1.0"], TestRecipe::new().requires("zlib/1.3.1"));

    let host = profile("gcc", "13", "Release");
    let a = ws.graph("app/1.0", &host, &host).unwrap();
    let b = ws.graph("app/1.0", &host, &host).unwrap();
    assert_eq!(root_id(&a), root_id(&b));
    assert_eq!(id_of(&a, "zlib", Context::Host), id_of(&b, "zlib", Context::Host));
    assert_eq!(root_id(&a).len(), 40);

    let clang = profile("clang", "17", "Release");
    let c = ws.graph("app/1.0", &clang, &clang).unwrap();
    assert_ne!(root_id(&a), root_id(&c));
}

#[test]
fn test_cached_package_skips_build() {
    let ws = Workspace::new();
    let zlib = ws.add(zlib_meta(), &["1.3.1"], TestRecipe::new());
    let app = ws.add(meta("app", PackageType::Application), &["1.0"], TestRecipe::new().requires("zlib/1.3.1"));

    let host = profile("gcc", "13", "Release");
    let first = ws.create("app/1.0", &host, &host);
    assert!(first.is_success(), "{:?}", first.errors);
    assert_eq!(first.count(Outcome::Built), 2);

    let second = ws.create("app/1.0", &host, &host);
    assert!(second.is_success(), "{:?}", second.errors);
    assert_eq!(second.count(Outcome::Cached), 2);
    assert_eq!(zlib.builds(), 1);
    assert_eq!(app.builds(), 1);

    // Consumption info is restored for cached dependencies
    let package = second.node("zlib", Context::Host).unwrap().package.as_ref().unwrap();
    assert_eq!(package.info.cpp_info.root.libs, vec!["zlib"]);
}

#[test]
fn test_removed_setting_keeps_id() {
    let ws = Workspace::new();
    ws.add(
        meta("tool", PackageType::Application),
        &["2.0"],
        TestRecipe::new().remove_setting("build_type"),
    );

    let release = profile("gcc", "13", "Release");
    let debug = profile("gcc", "13", "Debug");
    let a = ws.graph("tool/2.0", &release, &release).unwrap();
    let b = ws.graph("tool/2.0", &debug, &debug).unwrap();
    assert_eq!(root_id(&a), root_id(&b));

    let other = profile("gcc", "12", "Release");
    let c = ws.graph("tool/2.0", &other, &other).unwrap();
    assert_ne!(root_id(&a), root_id(&c));
}

#[test]
fn test_header_only_ignores_compiler() {
    let ws = Workspace::new();
    ws.add(
        meta("json", PackageType::HeaderLibrary).with_implements(Implements::AutoHeaderOnly),
        &["3.11.3"],
        TestRecipe::new(),
    );

    let ids: Vec<String> = [
        profile("gcc", "13", "Release"),
        profile("gcc", "13", "Debug"),
        profile("clang", "17", "Debug"),
    ]
    .iter()
    .map(|p| root_id(&ws.graph("json/3.11.3", p, p).unwrap()))
    .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]), "{:?}", ids);
}

#[test]
fn test_semver_projection_of_dependency() {
    let host = profile("gcc", "13", "Release");
    let id_with = |versions: &[&str], options: &str| {
        let ws = Workspace::new();
        ws.add(zlib_meta(), versions, TestRecipe::new());
        ws.registry
            .register(
                Recipe::new(meta("app", PackageType::Application), Arc::new(ModeConsumer(PackageIdMode::SemverMode))),
                &["1.0"],
            )
            .unwrap();
        let profile = if options.is_empty() { host.clone() } else { with_options("gcc", options) };
        let graph = ws.graph("app/1.0", &profile, &profile).unwrap();
        (root_id(&graph), id_of(&graph, "zlib", Context::Host))
    };

    let (base, base_zlib) = id_with(&["1.2.11"], "");
    // Same major.minor: projection unchanged
    let (patch, _) = id_with(&["1.2.11", "1.2.13"], "");
    assert_eq!(base, patch);
    // Dependency option: zlib id moves, its projection does not
    let (option, option_zlib) = id_with(&["1.2.11"], "zlib/*:level=1");
    assert_ne!(base_zlib, option_zlib);
    assert_eq!(base, option);
    // New minor: projection and consumer id change
    let (minor, _) = id_with(&["1.2.11", "1.3.1"], "");
    assert_ne!(base, minor);
}

#[test]
fn test_full_mode_follows_dependency_id() {
    let id_with = |options: &str| {
        let ws = Workspace::new();
        ws.add(zlib_meta(), &["1.3.1"], TestRecipe::new());
        ws.registry
            .register(
                Recipe::new(
                    meta("app", PackageType::Application),
                    Arc::new(ModeConsumer(PackageIdMode::FullVersionMode)),
                ),
                &["1.0"],
            )
            .unwrap();
        let profile = with_options("gcc", options);
        root_id(&ws.graph("app/1.0", &profile, &profile).unwrap())
    };
    assert_eq!(id_with("zlib/*:level=9"), id_with("zlib/*:level=9"));
    assert_ne!(id_with("zlib/*:level=9"), id_with("zlib/*:level=1"));
}

#[test]
fn test_source_acquisition_is_idempotent() {
    let ws = Workspace::new();
    let archive = tar_gz("pcre2-10.42", &[("configure", "#!/bin/sh\n"), ("src/pcre2.c", "int x;\n")]);
    let digest = pantry::hash::sha256(&archive);
    let url = ws.serve("pcre2-10.42.tar.gz", &archive);
    ws.add_with_data(
        meta("pcre2", PackageType::StaticLibrary),
        "10.42",
        source_data("10.42", &url, &digest),
        TestRecipe::new(),
    );

    let host = profile("gcc", "13", "Release");
    let graph = ws.graph("pcre2/10.42", &host, &host).unwrap();
    let root = graph.roots()[0];
    let controller = ws.controller();

    let first = controller.source(&graph, root).unwrap();
    assert_eq!(fs::read_to_string(first.join("src/pcre2.c")).unwrap(), "int x;\n");

    // A second acquisition never touches the network
    let served = ws.dir.path().join("served/pcre2-10.42.tar.gz");
    fs::remove_file(&served).unwrap();
    assert_eq!(controller.source(&graph, root).unwrap(), first);

    // A corrupted download is detected and fetched again
    let cached = controller.cache().downloads().join(&digest[..2]).join(&digest);
    fs::write(&cached, b"garbage").unwrap();
    fs::remove_dir_all(&first).unwrap();
    fs::write(&served, &archive).unwrap();
    let again = controller.source(&graph, root).unwrap();
    assert_eq!(fs::read_to_string(again.join("configure")).unwrap(), "#!/bin/sh\n");
    assert_eq!(pantry::hash::sha256(&fs::read(&cached).unwrap()), digest);
}

#[test]
fn test_package_layout_is_covered() {
    let ws = Workspace::new();
    ws.add(
        meta("fmt", PackageType::StaticLibrary),
        &["10.2.1"],
        TestRecipe::new().file("share/fmt/notes.txt", "x\n"),
    );

    let host = profile("gcc", "13", "Release");
    let report = ws.create("fmt/10.2.1", &host, &host);
    assert!(report.is_success(), "{:?}", report.errors);
    let package = report.node("fmt", Context::Host).unwrap().package.as_ref().unwrap();

    assert!(fs::read_dir(package.folder.join("licenses")).unwrap().next().is_some());
    let uncovered = pantry::layout::uncovered_files(&package.folder, &package.info.cpp_info).unwrap();
    assert_eq!(uncovered, vec!["share/fmt/notes.txt"]);
}

#[test]
fn test_missing_license_fails_node() {
    let ws = Workspace::new();
    ws.add(meta("nolicense", PackageType::StaticLibrary), &["1.0"], TestRecipe::new().without_license());

    let host = profile("gcc", "13", "Release");
    let report = ws.create("nolicense/1.0", &host, &host);
    assert_eq!(report.first_error_kind(), Some(ErrorKind::MissingLicense));
    assert_eq!(report.node("nolicense", Context::Host).unwrap().outcome, Outcome::Failed);

    let graph = ws.graph("nolicense/1.0", &host, &host).unwrap();
    let controller = ws.controller();
    assert_eq!(controller.cache().lookup(&graph.node(graph.roots()[0]).reference, &root_id(&graph)).unwrap(), None);
}

#[test]
fn test_tools_stay_off_link_line_and_id() {
    let ws = Workspace::new();
    ws.add(meta("protoc", PackageType::StaticLibrary), &["25.1"], TestRecipe::new());
    let consumer = ws.add(
        meta("grpc", PackageType::StaticLibrary),
        &["1.62.0"],
        TestRecipe::new().tool("protoc/25.1").requires("zlib/1.3.1"),
    );
    ws.add(zlib_meta(), &["1.3.1"], TestRecipe::new());

    let host = profile("gcc", "13", "Release");
    let report = ws.create("grpc/1.62.0", &host, &host);
    assert!(report.is_success(), "{:?}", report.errors);
    let seen = &consumer.observations()[0];
    assert!(seen.libs.contains("-lzlib"), "{}", seen.libs);
    assert!(!seen.libs.contains("-lprotoc"), "{}", seen.libs);

    // The tool's own configuration never reaches the consumer id
    let other_build = profile("clang", "17", "Debug");
    let a = ws.graph("grpc/1.62.0", &host, &host).unwrap();
    let b = ws.graph("grpc/1.62.0", &host, &other_build).unwrap();
    assert_ne!(id_of(&a, "protoc", Context::Build), id_of(&b, "protoc", Context::Build));
    assert_eq!(root_id(&a), root_id(&b));
}

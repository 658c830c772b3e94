// tests/scenarios.rs

//! End-to-end runs of the engine over small programmatic recipe sets.

mod common;

use common::{TestRecipe, Workspace, files_under, meta, profile, root_id, source_data, tar_gz};
use pantry::layout::manifest::{MANIFEST_FILE, RECORD_FILE};
use pantry::recipe::{Implements, RequirementRef};
use pantry::{Context, ErrorKind, GraphBuilder, OptionDef, Outcome, PackageType, Profile, RecipeMetadata, compute_package_ids};

#[test]
fn test_header_only_id_ignores_build_type() {
    let ws = Workspace::new();
    let probe = ws.add(
        meta("argparse", PackageType::HeaderLibrary),
        &["3.1"],
        TestRecipe::new().clear_package_id(),
    );

    let debug = profile("gcc", "13", "Debug");
    let release = profile("gcc", "13", "Release");
    let first = ws.create("argparse/3.1", &debug, &debug);
    let second = ws.create("argparse/3.1", &release, &release);

    assert!(first.is_success(), "{:?}", first.errors);
    assert!(second.is_success(), "{:?}", second.errors);
    let a = first.node("argparse", Context::Host).unwrap();
    let b = second.node("argparse", Context::Host).unwrap();
    assert_eq!(a.package_id, b.package_id);
    assert_eq!(a.outcome, Outcome::Built);
    assert_eq!(b.outcome, Outcome::Cached);
    assert_eq!(probe.builds(), 1);

    let folder = &a.package.as_ref().unwrap().folder;
    let files: Vec<String> = files_under(folder)
        .into_iter()
        .filter(|f| f != MANIFEST_FILE && f != RECORD_FILE)
        .collect();
    assert_eq!(files, vec!["include/argparse/argparse.hpp", "licenses/LICENSE"]);
}

#[test]
fn test_shared_drops_fpic_from_id() {
    let ws = Workspace::new();
    ws.add(
        RecipeMetadata::new("zlib")
            .with_type(PackageType::Library)
            .with_settings(&["os", "arch", "compiler", "build_type"])
            .with_option("shared", OptionDef::boolean(false))
            .with_option("fPIC", OptionDef::boolean(true))
            .with_implements(Implements::AutoSharedFpic),
        &["1.3.1"],
        TestRecipe::new(),
    );

    let base = "[settings]\nos=Linux\narch=x86_64\ncompiler=gcc\ncompiler.version=13\nbuild_type=Release\n";
    let with_pic = Profile::parse(&format!("{}[options]\nshared=True\nfPIC=True\n", base), None).unwrap();
    let without_pic = Profile::parse(&format!("{}[options]\nshared=True\nfPIC=False\n", base), None).unwrap();

    let a = ws.graph("zlib/1.3.1", &with_pic, &with_pic).unwrap();
    let b = ws.graph("zlib/1.3.1", &without_pic, &without_pic).unwrap();
    assert_eq!(root_id(&a), root_id(&b));

    let zlib = a.node(a.roots()[0]);
    assert!(!zlib.state.options.is_declared("fPIC"));
    assert_eq!(zlib.state.options.get("shared"), Some("True"));
    assert_eq!(zlib.state.package_type, PackageType::SharedLibrary);
}

#[test]
fn test_range_picks_highest_version() {
    let ws = Workspace::new();
    ws.add(meta("zlib", PackageType::StaticLibrary), &["1.2.11", "1.2.13", "1.3.1"], TestRecipe::new());
    ws.add(
        meta("app", PackageType::Application),
        &["1.0"],
        TestRecipe::new().requires("zlib/[>=1.2 <2]"),
    );

    let host = profile("gcc", "13", "Release");
    let graph = ws.graph("app/1.0", &host, &host).unwrap();
    let zlib = graph.find_in("zlib", Context::Host).unwrap();
    assert_eq!(zlib.reference.version.to_string(), "1.3.1");
}

#[test]
fn test_override_collapses_versions() {
    let ws = Workspace::new();
    ws.add(meta("openssl", PackageType::StaticLibrary), &["1.1.1", "3.0.0"], TestRecipe::new());
    ws.add(meta("a", PackageType::StaticLibrary), &["1.0"], TestRecipe::new().requires("openssl/1.1.1"));

    struct Pin;
    impl pantry::RecipeHooks for Pin {
        fn requirements(&self, ctx: &mut pantry::recipe::RequirementsContext<'_>) -> pantry::Result<()> {
            ctx.requires("openssl/3.0.0")?.force_override();
            Ok(())
        }
    }
    ws.registry
        .register(pantry::Recipe::new(meta("b", PackageType::StaticLibrary), std::sync::Arc::new(Pin)), &["1.0"])
        .unwrap();

    let host = profile("gcc", "13", "Release");
    let roots = [RequirementRef::parse("a/1.0").unwrap(), RequirementRef::parse("b/1.0").unwrap()];
    let mut graph = GraphBuilder::new(&ws.registry, &host, &host).unwrap().build(&roots).unwrap();
    compute_package_ids(&mut graph).unwrap();

    let openssl = graph.find("openssl");
    assert_eq!(openssl.len(), 1);
    assert_eq!(openssl[0].reference.version.to_string(), "3.0.0");

    let report = ws.controller().run(&graph, &host, &host).unwrap();
    assert!(report.is_success(), "{:?}", report.errors);
    assert_eq!(report.count(Outcome::Built), 3);
}

#[test]
fn test_corrupted_archive_fails_before_build() {
    let ws = Workspace::new();
    let archive = tar_gz("mylib-1.0", &[("CMakeLists.txt", "project(mylib)\n")]);
    let digest = pantry::hash::sha256(&archive);
    let mut corrupted = archive.clone();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xff;
    let url = ws.serve("mylib-1.0.tar.gz", &corrupted);

    let probe = ws.add_with_data(
        meta("mylib", PackageType::StaticLibrary),
        "1.0",
        source_data("1.0", &url, &digest),
        TestRecipe::new(),
    );

    let host = profile("gcc", "13", "Release");
    let graph = ws.graph("mylib/1.0", &host, &host).unwrap();
    let report = ws.controller().run(&graph, &host, &host).unwrap();

    assert!(!report.is_success());
    assert_eq!(report.first_error_kind(), Some(ErrorKind::IntegrityError));
    assert_eq!(report.node("mylib", Context::Host).unwrap().outcome, Outcome::Failed);
    assert_eq!(probe.builds(), 0);

    let node = graph.find_in("mylib", Context::Host).unwrap();
    let cache = pantry::lifecycle::Cache::open(ws.cache_root()).unwrap();
    let workspace = cache.build_workspace(&node.reference, node.package_id.as_deref().unwrap());
    assert!(!workspace.exists());
    assert!(!cache.source_folder(&node.reference).exists());
}

#[test]
fn test_tool_builds_in_build_context() {
    let ws = Workspace::new();
    let cmake = ws.add(meta("cmake", PackageType::Application), &["3.28.1"], TestRecipe::new());
    let consumer = ws.add(
        meta("consumer", PackageType::StaticLibrary),
        &["1.0"],
        TestRecipe::new().tool("cmake/[>=3.20]"),
    );

    let host = profile("clang", "17", "Release");
    let build = profile("gcc", "13", "Release");
    let report = ws.create("consumer/1.0", &host, &build);
    assert!(report.is_success(), "{:?}", report.errors);
    assert!(report.node("cmake", Context::Build).is_some());
    assert!(report.node("cmake", Context::Host).is_none());

    let tool = &cmake.observations()[0];
    assert_eq!(tool.compiler.as_deref(), Some("gcc"));

    let seen = &consumer.observations()[0];
    assert_eq!(seen.compiler.as_deref(), Some("clang"));
    assert!(!seen.libs.contains("-lcmake"), "tool library leaked into LIBS: {}", seen.libs);
    let tool_folder = &report.node("cmake", Context::Build).unwrap().package.as_ref().unwrap().folder;
    let path = seen.path.as_deref().unwrap_or_default();
    assert!(path.contains(&tool_folder.join("bin").display().to_string()), "PATH was {}", path);
}

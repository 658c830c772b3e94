// src/recipe/format.rs

//! Recipe file formats
//!
//! A recipe folder holds two TOML files:
//!
//! - `recipe.toml`, the declarative recipe ([`RecipeDocument`])
//! - `sources.toml`, per-version sources and patches ([`SourceData`])
//!
//! ```toml
//! # sources.toml
//! [sources."1.3.1"]
//! url = ["https://zlib.net/zlib-1.3.1.tar.gz", "https://mirror.example/zlib-1.3.1.tar.gz"]
//! sha256 = "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"
//! strip_root = true
//!
//! [[patches."1.3.1"]]
//! patch_file = "patches/0001-fix-cmake.patch"
//! patch_description = "separate static and shared builds"
//! patch_type = "conan"
//! ```

use crate::build::Backend;
use crate::conf::ConfValue;
use crate::cpp_info::CppInfo;
use crate::error::{Error, Result};
use crate::package_id::PackageIdMode;
use crate::recipe::{Implements, PackageType};
use crate::source::SourceSpec;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One URL or a list of mirrors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Urls {
    One(String),
    Mirrors(Vec<String>),
}

impl Urls {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Urls::One(u) => vec![u.clone()],
            Urls::Mirrors(list) => list.clone(),
        }
    }
}

/// Sources of one version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSources {
    #[serde(default)]
    pub url: Option<Urls>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub strip_root: bool,
    /// File name for non-archive downloads
    #[serde(default)]
    pub filename: Option<String>,
    /// Subdirectory of the source folder receiving this source
    #[serde(default)]
    pub destination: Option<String>,
    /// Additional named parts, fetched serially after the main source
    #[serde(default)]
    pub parts: BTreeMap<String, VersionSources>,
    /// Pre-built binaries keyed by `<os>-<arch>` or `<os>`
    #[serde(default)]
    pub platforms: BTreeMap<String, VersionSources>,
}

impl VersionSources {
    /// Download spec of this entry
    pub fn spec(&self, label: &str) -> Result<SourceSpec> {
        let urls = self
            .url
            .as_ref()
            .map(Urls::to_vec)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::ParseError(format!("source '{}' has no url", label)))?;
        let sha256 = self.sha256.clone().ok_or_else(|| {
            Error::ParseError(format!("source '{}' has no sha256 digest", label))
        })?;
        Ok(SourceSpec {
            urls,
            sha256,
            strip_root: self.strip_root,
            filename: self.filename.clone(),
            destination: self.destination.clone(),
        })
    }

    /// Download spec of the main source, when the entry has a URL
    pub fn main(&self) -> Result<Option<SourceSpec>> {
        match &self.url {
            Some(_) => self.spec("main").map(Some),
            None => Ok(None),
        }
    }

    /// Pre-built entry for a platform, falling back to the OS alone
    pub fn for_platform(&self, os: &str, arch: &str) -> Option<&VersionSources> {
        self.platforms
            .get(&format!("{}-{}", os, arch))
            .or_else(|| self.platforms.get(os))
    }
}

fn default_strip() -> usize {
    1
}

/// A patch declared for a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Patch path relative to the recipe folder
    pub patch_file: String,
    /// Subdirectory of the source folder the patch applies to
    #[serde(default)]
    pub base_path: Option<String>,
    /// Leading path components to strip from patch paths
    #[serde(default = "default_strip")]
    pub strip: usize,
    #[serde(default)]
    pub patch_description: Option<String>,
    #[serde(default)]
    pub patch_type: Option<String>,
}

/// Contents of `sources.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceData {
    #[serde(default)]
    pub sources: BTreeMap<String, VersionSources>,
    #[serde(default)]
    pub patches: BTreeMap<String, Vec<PatchSpec>>,
}

fn key_matches(key: &str, version: &Version) -> bool {
    key == version.as_str() || Version::parse(key).is_ok_and(|k| &k == version)
}

impl SourceData {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Sources of a version
    pub fn sources_for(&self, version: &Version) -> Option<&VersionSources> {
        self.sources
            .iter()
            .find(|(k, _)| key_matches(k, version))
            .map(|(_, v)| v)
    }

    /// Patches of a version, in declared order
    pub fn patches_for(&self, version: &Version) -> &[PatchSpec] {
        self.patches
            .iter()
            .find(|(k, _)| key_matches(k, version))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// Versions with declared sources
    pub fn versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .sources
            .keys()
            .filter_map(|k| Version::parse(k).ok())
            .collect();
        versions.sort();
        versions
    }
}

/// `[package]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageSection {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub package_type: PackageType,
    /// Top-level settings the recipe consumes
    #[serde(default)]
    pub settings: Vec<String>,
    #[serde(default)]
    pub implements: Vec<Implements>,
    #[serde(default)]
    pub languages: Vec<String>,
}

/// Accepted values of a declared option: a list, or `"ANY"`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OptionValuesSpec {
    Keyword(String),
    List(Vec<toml::Value>),
}

/// One `[options.<name>]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct OptionSpec {
    pub values: OptionValuesSpec,
    #[serde(default)]
    pub default: Option<toml::Value>,
}

/// Render a TOML scalar the way profiles spell it
pub fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Boolean(true) => "True".to_string(),
        toml::Value::Boolean(false) => "False".to_string(),
        other => other.to_string(),
    }
}

/// A `[[config_options]]` or `[[configure]]` rule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigureRule {
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub remove_options: Vec<String>,
    #[serde(default)]
    pub remove_settings: Vec<String>,
    #[serde(default)]
    pub set_options: BTreeMap<String, toml::Value>,
}

/// A `[[requires]]` or `[[tool_requires]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct RequireSpec {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub headers: Option<bool>,
    #[serde(default)]
    pub libs: Option<bool>,
    #[serde(default)]
    pub run: Option<bool>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub transitive_headers: Option<bool>,
    #[serde(default)]
    pub transitive_libs: Option<bool>,
    #[serde(default, rename = "override")]
    pub is_override: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub package_id_mode: Option<PackageIdMode>,
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
}

/// A `[[validate]]` rule: the configuration is rejected when `when` holds
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRule {
    pub when: String,
    pub message: String,
    /// Only checked when building from source
    #[serde(default)]
    pub build_only: bool,
}

fn default_true() -> bool {
    true
}

/// A `[[source.replace]]` substitution applied after patching
#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceSpec {
    pub file: String,
    pub search: String,
    pub replace: String,
    #[serde(default = "default_true")]
    pub strict: bool,
}

/// `[source]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSection {
    #[serde(default)]
    pub replace: Vec<ReplaceSpec>,
}

/// `[build]` section
///
/// String values support `%(name)s`, `%(version)s`, `%(options.<x>)s`,
/// `%(settings.<x>)s`, `%(package_folder)s`, `%(source_folder)s`,
/// `%(build_folder)s` and `%(jobs)s`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildSection {
    #[serde(default)]
    pub backend: Option<Backend>,
    /// Source subdirectory holding the top-level build file
    #[serde(default)]
    pub subdir: Option<String>,
    /// Backend-specific generator (`Ninja`, `Unix Makefiles`)
    #[serde(default)]
    pub generator: Option<String>,
    #[serde(default)]
    pub cache_variables: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub configure_args: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Extra shell commands, run in the build folder after the backend
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Where a copy rule reads from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyFrom {
    #[default]
    Source,
    Build,
}

/// A `[[package_files.copy]]` rule
#[derive(Debug, Clone, Deserialize)]
pub struct CopyRule {
    pub pattern: String,
    #[serde(default)]
    pub from: CopyFrom,
    /// Subdirectory of the source or build folder
    #[serde(default)]
    pub src: Option<String>,
    /// Destination inside the package folder
    #[serde(default)]
    pub dst: String,
    #[serde(default = "default_true")]
    pub keep_path: bool,
    #[serde(default)]
    pub excludes: Vec<String>,
}

fn default_license_patterns() -> Vec<String> {
    ["LICENSE*", "COPYING*", "LICENCE*", "NOTICE*"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// `[package_files]` section
#[derive(Debug, Clone, Deserialize)]
pub struct PackageFilesSection {
    /// License file patterns, searched in the source folder
    #[serde(default = "default_license_patterns")]
    pub licenses: Vec<String>,
    #[serde(default)]
    pub copy: Vec<CopyRule>,
    /// Paths exempt from layout cleanup
    #[serde(default)]
    pub retain: Vec<String>,
}

impl Default for PackageFilesSection {
    fn default() -> Self {
        Self {
            licenses: default_license_patterns(),
            copy: Vec::new(),
            retain: Vec::new(),
        }
    }
}

/// `[package_id]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageIdSection {
    /// Drop every input
    #[serde(default)]
    pub clear: bool,
    #[serde(default)]
    pub remove_settings: Vec<String>,
    #[serde(default)]
    pub remove_options: Vec<String>,
    /// Setting path to `major`, `minor` or a literal value
    #[serde(default)]
    pub narrow: BTreeMap<String, String>,
    /// Propagation mode per dependency name
    #[serde(default)]
    pub modes: BTreeMap<String, PackageIdMode>,
}

/// A `[[cpp_info_when]]` entry adding consumption info under a condition
#[derive(Debug, Clone, Deserialize)]
pub struct CppInfoWhen {
    pub when: String,
    /// Component receiving the additions, the root when absent
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub libs: Vec<String>,
    #[serde(default)]
    pub system_libs: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub cflags: Vec<String>,
    #[serde(default)]
    pub cxxflags: Vec<String>,
    #[serde(default)]
    pub sharedlinkflags: Vec<String>,
    #[serde(default)]
    pub exelinkflags: Vec<String>,
}

/// `[buildenv_info]` / `[runenv_info]` sections
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvSection {
    #[serde(default)]
    pub define: BTreeMap<String, String>,
    #[serde(default)]
    pub define_path: BTreeMap<String, String>,
    #[serde(default)]
    pub append: BTreeMap<String, String>,
    #[serde(default)]
    pub append_path: BTreeMap<String, String>,
    #[serde(default)]
    pub prepend: BTreeMap<String, String>,
    #[serde(default)]
    pub prepend_path: BTreeMap<String, String>,
    #[serde(default)]
    pub unset: Vec<String>,
}

impl EnvSection {
    pub fn is_empty(&self) -> bool {
        self.define.is_empty()
            && self.define_path.is_empty()
            && self.append.is_empty()
            && self.append_path.is_empty()
            && self.prepend.is_empty()
            && self.prepend_path.is_empty()
            && self.unset.is_empty()
    }
}

/// Contents of `recipe.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeDocument {
    pub package: PackageSection,
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,
    #[serde(default)]
    pub config_options: Vec<ConfigureRule>,
    #[serde(default)]
    pub configure: Vec<ConfigureRule>,
    #[serde(default)]
    pub requires: Vec<RequireSpec>,
    #[serde(default)]
    pub tool_requires: Vec<RequireSpec>,
    #[serde(default)]
    pub validate: Vec<ValidateRule>,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub package_files: PackageFilesSection,
    #[serde(default)]
    pub package_id: PackageIdSection,
    #[serde(default)]
    pub cpp_info: CppInfo,
    #[serde(default)]
    pub cpp_info_when: Vec<CppInfoWhen>,
    #[serde(default)]
    pub buildenv_info: EnvSection,
    #[serde(default)]
    pub runenv_info: EnvSection,
    #[serde(default)]
    pub conf_info: BTreeMap<String, ConfValue>,
}

impl RecipeDocument {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCES: &str = r#"
[sources."1.3.1"]
url = ["https://zlib.net/zlib-1.3.1.tar.gz", "https://mirror.example/zlib-1.3.1.tar.gz"]
sha256 = "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"
strip_root = true

[sources."1.3.1".parts.license]
url = "https://zlib.net/LICENSE"
sha256 = "aaaa"
filename = "LICENSE"

[sources."2.0".platforms."Linux-x86_64"]
url = "https://example.com/tool-linux.tar.gz"
sha256 = "bbbb"

[sources."2.0".platforms.Macos]
url = "https://example.com/tool-macos.tar.gz"
sha256 = "cccc"

[[patches."1.3.1"]]
patch_file = "patches/0001.patch"
patch_description = "fix"

[[patches."1.3.1"]]
patch_file = "patches/0002.patch"
strip = 0
"#;

    #[test]
    fn test_parse_sources() {
        let data = SourceData::parse(SOURCES).unwrap();
        let v = Version::parse("1.3.1").unwrap();
        let entry = data.sources_for(&v).unwrap();
        let main = entry.main().unwrap().unwrap();
        assert_eq!(main.urls.len(), 2);
        assert!(main.strip_root);
        assert_eq!(entry.parts["license"].filename.as_deref(), Some("LICENSE"));

        let patches = data.patches_for(&v);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].strip, 1);
        assert_eq!(patches[1].strip, 0);
    }

    #[test]
    fn test_platform_lookup() {
        let data = SourceData::parse(SOURCES).unwrap();
        let entry = data.sources_for(&Version::parse("2.0").unwrap()).unwrap();
        assert!(entry.main().unwrap().is_none());
        let linux = entry.for_platform("Linux", "x86_64").unwrap();
        assert_eq!(linux.sha256.as_deref(), Some("bbbb"));
        let mac = entry.for_platform("Macos", "armv8").unwrap();
        assert_eq!(mac.sha256.as_deref(), Some("cccc"));
        assert!(entry.for_platform("Windows", "x86_64").is_none());
    }

    #[test]
    fn test_missing_digest_is_rejected() {
        let entry = VersionSources {
            url: Some(Urls::One("https://example.com/a.tar.gz".to_string())),
            ..Default::default()
        };
        assert!(entry.main().is_err());
    }

    #[test]
    fn test_parse_recipe_document() {
        let doc = RecipeDocument::parse(
            r#"
[package]
name = "zlib"
license = "Zlib"
package_type = "library"
settings = ["os", "arch", "compiler", "build_type"]
implements = ["auto_shared_fpic"]

[options.shared]
values = [true, false]
default = false

[options.fPIC]
values = [true, false]
default = true

[[requires]]
ref = "openssl/[>=1.1 <4]"
when = "options.with_ssl"
transitive_headers = true

[[tool_requires]]
ref = "cmake/[>=3.20]"

[[validate]]
when = "settings.os == Windows and options.shared"
message = "shared builds are not supported on Windows"

[build]
backend = "cmake"
cache_variables = { ZLIB_BUILD_EXAMPLES = false }

[package_id]
remove_settings = ["compiler.cppstd"]

[cpp_info]
libs = ["z"]

[cpp_info.properties]
cmake_file_name = "ZLIB"
cmake_target_name = "ZLIB::ZLIB"

[buildenv_info.prepend_path]
PATH = "%(package_folder)s/bin"
"#,
        )
        .unwrap();
        assert_eq!(doc.package.package_type, PackageType::Library);
        assert_eq!(doc.package.implements, vec![Implements::AutoSharedFpic]);
        assert_eq!(doc.options.len(), 2);
        assert_eq!(doc.requires[0].transitive_headers, Some(true));
        assert_eq!(doc.build.backend, Some(Backend::CMake));
        assert_eq!(doc.cpp_info.root.libs, vec!["z"]);
        assert_eq!(
            doc.cpp_info.root.properties.cmake_target_name.as_deref(),
            Some("ZLIB::ZLIB")
        );
        assert_eq!(doc.cpp_info.root.includedirs, vec!["include"]);
        assert_eq!(doc.package_files.licenses[0], "LICENSE*");
        assert!(!doc.buildenv_info.is_empty());
    }
}

// src/profile.rs

//! Profiles: the requested configuration for one context
//!
//! A profile is an INI-like text file:
//!
//! ```text
//! include(base)
//!
//! [settings]
//! os=Linux
//! compiler=gcc
//! compiler.version=13
//! zlib/*:build_type=Debug
//!
//! [options]
//! *:shared=True
//! openssl:no_asm=True
//!
//! [conf]
//! tools.build:jobs=8
//!
//! [buildenv]
//! PATH=+(path)/opt/tools/bin
//!
//! [tool_requires]
//! cmake/3.28.1
//! ```
//!
//! Entries may be scoped with a `pattern:` prefix. Patterns are globs
//! matched against `name/version`; a pattern without `/` matches the name
//! alone and `&` matches only the root of the graph.

use crate::conf::Conf;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::version::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A scoped assignment from a profile section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedValue {
    /// Package pattern, `None` for unscoped entries
    pub pattern: Option<String>,
    /// Setting path or option name
    pub key: String,
    /// Assigned value
    pub value: String,
}

/// A tool requirement injected by a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileToolRequire {
    /// Packages receiving the tool requirement (`*` when unscoped)
    pub pattern: String,
    /// Requirement reference (`cmake/[>=3.20]`)
    pub reference: String,
}

/// Parsed profile
#[derive(Debug, Clone, Default)]
pub struct Profile {
    /// Settings, global and package-scoped, in declaration order
    pub settings: Vec<ScopedValue>,
    /// Options, global and package-scoped, in declaration order
    pub options: Vec<ScopedValue>,
    /// Tool configuration
    pub conf: Conf,
    /// Build-time environment
    pub buildenv: Environment,
    /// Run-time environment
    pub runenv: Environment,
    /// Injected tool requirements
    pub tool_requires: Vec<ProfileToolRequire>,
}

/// How specific a pattern is; higher applies later
fn specificity(pattern: Option<&str>) -> u8 {
    match pattern {
        None => 0,
        Some("*") | Some("*/*") => 1,
        Some(p) if p.contains(['*', '?', '[']) => 2,
        Some(_) => 3,
    }
}

/// Whether a profile pattern selects a package
pub fn pattern_matches(pattern: &str, name: &str, version: &Version, is_root: bool) -> bool {
    if pattern == "&" {
        return is_root;
    }
    let target = if pattern.contains('/') {
        format!("{}/{}", name, version)
    } else {
        name.to_string()
    };
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(&target),
        Err(_) => pattern == target,
    }
}

/// Split `pattern:key` at the scope separator
///
/// Conf keys contain `:` themselves, so only keys with a `/`, `*` or `&`
/// before the colon count as scoped in settings and options.
fn split_scope(key: &str) -> (Option<String>, String) {
    match key.split_once(':') {
        Some((scope, rest))
            if scope == "&" || scope.contains('/') || scope.contains('*') || !scope.contains('.') =>
        {
            (Some(scope.trim().to_string()), rest.trim().to_string())
        }
        _ => (None, key.trim().to_string()),
    }
}

fn apply_env_line(env: &mut Environment, line: &str) -> Result<()> {
    let (name, value) = line
        .split_once('=')
        .ok_or_else(|| Error::ParseError(format!("invalid environment line '{}'", line)))?;

    let (name, op) = match name.strip_suffix('+') {
        Some(n) => (n.trim(), "append"),
        None => (name.trim(), "define"),
    };
    let (op, value) = match (op, value.strip_prefix('+')) {
        ("define", Some(rest)) => ("prepend", rest),
        _ => (op, value),
    };
    if op == "define" && value.trim() == "!" {
        env.unset(name);
        return Ok(());
    }
    let (is_path, value) = match value.trim().strip_prefix("(path)") {
        Some(rest) => (true, rest.trim()),
        None => (false, value.trim()),
    };
    match (op, is_path) {
        ("append", true) => env.append_path(name, value),
        ("append", false) => env.append(name, value),
        ("prepend", true) => env.prepend_path(name, value),
        ("prepend", false) => env.prepend(name, value),
        (_, true) => env.define_path(name, value),
        (_, false) => env.define(name, value),
    }
    Ok(())
}

impl Profile {
    /// Parse profile text; `include()` lines resolve relative to `base_dir`
    pub fn parse(text: &str, base_dir: Option<&Path>) -> Result<Self> {
        let mut profile = Profile::default();
        let mut section: Option<String> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(inner) = line.strip_prefix("include(").and_then(|l| l.strip_suffix(')')) {
                if section.is_some() {
                    return Err(Error::ParseError(format!(
                        "profile line {}: include() must precede all sections",
                        lineno + 1
                    )));
                }
                let path = match base_dir {
                    Some(dir) => dir.join(inner.trim()),
                    None => PathBuf::from(inner.trim()),
                };
                let included = Profile::load(&path)?;
                profile.merge(included);
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = Some(name.trim().to_string());
                continue;
            }

            let err = |msg: &str| {
                Error::ParseError(format!("profile line {}: {} ('{}')", lineno + 1, msg, line))
            };

            match section.as_deref() {
                Some("settings") | Some("options") => {
                    let (key, value) = line.split_once('=').ok_or_else(|| err("expected key=value"))?;
                    let (pattern, key) = split_scope(key);
                    let entry = ScopedValue {
                        pattern,
                        key,
                        value: value.trim().to_string(),
                    };
                    if section.as_deref() == Some("settings") {
                        profile.settings.push(entry);
                    } else {
                        profile.options.push(entry);
                    }
                }
                Some("conf") => profile.conf.apply_line(line)?,
                Some("buildenv") => apply_env_line(&mut profile.buildenv, line)?,
                Some("runenv") => apply_env_line(&mut profile.runenv, line)?,
                Some("tool_requires") => {
                    let (pattern, reference) = match line.split_once(": ") {
                        Some((p, r)) => (p.trim().to_string(), r.trim().to_string()),
                        None => ("*".to_string(), line.to_string()),
                    };
                    for reference in reference.split(',') {
                        profile.tool_requires.push(ProfileToolRequire {
                            pattern: pattern.clone(),
                            reference: reference.trim().to_string(),
                        });
                    }
                }
                Some(other) => return Err(err(&format!("unknown section [{}]", other))),
                None => return Err(err("entry outside of any section")),
            }
        }

        Ok(profile)
    }

    /// Load a profile file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::ParseError(format!("cannot read profile {}: {}", path.display(), e))
        })?;
        debug!("Loading profile {}", path.display());
        Self::parse(&text, path.parent())
    }

    /// Layer another profile on top of this one
    pub fn merge(&mut self, other: Profile) {
        self.settings.extend(other.settings);
        self.options.extend(other.options);
        self.conf.update(&other.conf);
        self.buildenv.compose(&other.buildenv);
        self.runenv.compose(&other.runenv);
        self.tool_requires.extend(other.tool_requires);
    }

    /// Effective settings for a package
    ///
    /// Global settings apply first, then package-scoped ones from the least
    /// to the most specific pattern. A scoped `compiler=...` discards the
    /// global compiler sub-settings as a fresh parent value would.
    pub fn settings_for(
        &self,
        base: &Settings,
        name: &str,
        version: &Version,
        is_root: bool,
    ) -> Result<Settings> {
        let mut settings = base.clone();
        settings.update(
            self.settings
                .iter()
                .filter(|s| s.pattern.is_none())
                .map(|s| (s.key.as_str(), s.value.as_str())),
        )?;

        let mut scoped: Vec<&ScopedValue> = self
            .settings
            .iter()
            .filter(|s| {
                s.pattern
                    .as_deref()
                    .is_some_and(|p| pattern_matches(p, name, version, is_root))
            })
            .collect();
        scoped.sort_by_key(|s| specificity(s.pattern.as_deref()));
        settings.update(scoped.iter().map(|s| (s.key.as_str(), s.value.as_str())))?;
        Ok(settings)
    }

    /// Option assignments that apply to a package, least specific first
    ///
    /// Unscoped options only apply to the root.
    pub fn options_for(&self, name: &str, version: &Version, is_root: bool) -> Vec<&ScopedValue> {
        let mut matching: Vec<&ScopedValue> = self
            .options
            .iter()
            .filter(|o| match o.pattern.as_deref() {
                None => is_root,
                Some(p) => pattern_matches(p, name, version, is_root),
            })
            .collect();
        matching.sort_by_key(|o| specificity(o.pattern.as_deref()));
        matching
    }

    /// Tool requirements a profile injects into a package
    pub fn tool_requires_for(&self, name: &str, version: &Version, is_root: bool) -> Vec<&str> {
        self.tool_requires
            .iter()
            .filter(|t| pattern_matches(&t.pattern, name, version, is_root))
            .map(|t| t.reference.as_str())
            .collect()
    }
}

/// Whether a pattern is at least as specific as a name scope
pub fn is_specific_pattern(pattern: Option<&str>) -> bool {
    specificity(pattern) >= 2
}

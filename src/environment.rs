// src/environment.rs

//! Environment contributions
//!
//! Recipes publish `buildenv_info` and `runenv_info` as [`Environment`]
//! values; profiles contribute `[buildenv]`/`[runenv]`. Each variable is a
//! sequence of parts where [`EnvPart::Previous`] stands for whatever value
//! the variable had before, which makes composition a substitution:
//! applying a later environment on top of an earlier one replaces the later
//! one's `Previous` with the earlier parts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator for path-like variables on the machine running the build
#[cfg(windows)]
pub const PATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub const PATH_SEPARATOR: &str = ":";

/// One part of a variable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvPart {
    Text(String),
    Previous,
}

/// Pending value of one variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Parts in order; empty with `unset` means the variable is removed
    parts: Vec<EnvPart>,
    /// Whether the variable is removed
    unset: bool,
    /// Whether parts join with the path separator instead of a space
    path: bool,
}

impl EnvVar {
    fn separator(&self) -> &'static str {
        if self.path { PATH_SEPARATOR } else { " " }
    }

    /// Evaluate against the previous value of the variable
    pub fn evaluate(&self, previous: Option<&str>) -> Option<String> {
        if self.unset {
            return None;
        }
        let values: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|p| match p {
                EnvPart::Text(t) => Some(t.as_str()),
                EnvPart::Previous => previous.filter(|p| !p.is_empty()),
            })
            .collect();
        Some(values.join(self.separator()))
    }

    /// Render for a POSIX shell, referencing the previous value as `$NAME`
    ///
    /// Literal text is escaped for a double-quoted word, so `$`, backticks
    /// and backslashes in values reach the variable unexpanded.
    fn shell_value(&self, name: &str) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                EnvPart::Text(t) => escape_double_quoted(t),
                EnvPart::Previous => format!("${name}"),
            })
            .collect::<Vec<_>>()
            .join(self.separator())
    }
}

fn escape_double_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A set of environment variable operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    vars: BTreeMap<String, EnvVar>,
}

impl Environment {
    /// Empty environment
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, name: &str, path: bool) -> &mut EnvVar {
        self.vars.entry(name.to_string()).or_insert_with(|| EnvVar {
            parts: vec![EnvPart::Previous],
            unset: false,
            path,
        })
    }

    fn put(&mut self, name: &str, value: &str, path: bool) {
        self.vars.insert(
            name.to_string(),
            EnvVar {
                parts: vec![EnvPart::Text(value.to_string())],
                unset: false,
                path,
            },
        );
    }

    /// Set a variable, discarding any previous value
    pub fn define(&mut self, name: &str, value: &str) {
        self.put(name, value, false);
    }

    /// Set a path-like variable, discarding any previous value
    pub fn define_path(&mut self, name: &str, value: &str) {
        self.put(name, value, true);
    }

    fn add(&mut self, name: &str, value: &str, path: bool, front: bool) {
        let var = self.entry(name, path);
        var.unset = false;
        let part = EnvPart::Text(value.to_string());
        if front {
            var.parts.insert(0, part);
        } else {
            var.parts.push(part);
        }
    }

    /// Append to a space-separated variable
    pub fn append(&mut self, name: &str, value: &str) {
        self.add(name, value, false, false);
    }

    /// Append to a path-like variable
    pub fn append_path(&mut self, name: &str, value: &str) {
        self.add(name, value, true, false);
    }

    /// Prepend to a space-separated variable
    pub fn prepend(&mut self, name: &str, value: &str) {
        self.add(name, value, false, true);
    }

    /// Prepend to a path-like variable
    pub fn prepend_path(&mut self, name: &str, value: &str) {
        self.add(name, value, true, true);
    }

    /// Remove a variable
    pub fn unset(&mut self, name: &str) {
        self.vars.insert(
            name.to_string(),
            EnvVar {
                parts: Vec::new(),
                unset: true,
                path: false,
            },
        );
    }

    /// Apply `later` on top of this environment
    ///
    /// Definitions and unsets in `later` win; its appends and prepends wrap
    /// the value accumulated so far.
    pub fn compose(&mut self, later: &Environment) {
        for (name, var) in &later.vars {
            let composed = match self.vars.get(name) {
                Some(existing) if var.parts.contains(&EnvPart::Previous) => {
                    let mut parts = Vec::new();
                    for part in &var.parts {
                        match part {
                            EnvPart::Previous if existing.unset => {}
                            EnvPart::Previous => parts.extend(existing.parts.iter().cloned()),
                            text => parts.push(text.clone()),
                        }
                    }
                    EnvVar {
                        parts,
                        unset: false,
                        path: var.path || existing.path,
                    }
                }
                _ => var.clone(),
            };
            self.vars.insert(name.clone(), composed);
        }
    }

    /// Variable names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Whether no variable is touched
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Final value of a variable given its previous value
    pub fn value(&self, name: &str, previous: Option<&str>) -> Option<String> {
        self.vars.get(name).and_then(|v| v.evaluate(previous))
    }

    /// Evaluate every variable against a lookup of previous values
    ///
    /// Unset variables map to `None`.
    pub fn evaluate<F>(&self, lookup: F) -> BTreeMap<String, Option<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.vars
            .iter()
            .map(|(name, var)| {
                let previous = lookup(name);
                (name.clone(), var.evaluate(previous.as_deref()))
            })
            .collect()
    }

    /// Render as a POSIX shell script that can be sourced
    pub fn to_shell_script(&self) -> String {
        let mut out = String::from("# Generated by pantry, do not edit\n");
        for (name, var) in &self.vars {
            if var.unset {
                out.push_str(&format!("unset {name}\n"));
            } else {
                out.push_str(&format!("export {}=\"{}\"\n", name, var.shell_value(name)));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_append() {
        let mut env = Environment::new();
        env.define("CFLAGS", "-O2");
        env.append("CFLAGS", "-g");
        assert_eq!(env.value("CFLAGS", Some("-Wall")).as_deref(), Some("-O2 -g"));

        env.append("LDFLAGS", "-lm");
        assert_eq!(env.value("LDFLAGS", Some("-L/x")).as_deref(), Some("-L/x -lm"));
        assert_eq!(env.value("LDFLAGS", None).as_deref(), Some("-lm"));
    }

    #[test]
    fn test_prepend_path() {
        let mut env = Environment::new();
        env.prepend_path("PATH", "/opt/cmake/bin");
        let expected = format!("/opt/cmake/bin{}/usr/bin", PATH_SEPARATOR);
        assert_eq!(env.value("PATH", Some("/usr/bin")), Some(expected));
    }

    #[test]
    fn test_compose_order() {
        let mut first = Environment::new();
        first.prepend_path("PATH", "/a/bin");
        let mut second = Environment::new();
        second.prepend_path("PATH", "/b/bin");

        let mut acc = Environment::new();
        acc.compose(&first);
        acc.compose(&second);

        let sep = PATH_SEPARATOR;
        assert_eq!(
            acc.value("PATH", Some("/usr/bin")),
            Some(format!("/b/bin{sep}/a/bin{sep}/usr/bin"))
        );
    }

    #[test]
    fn test_compose_define_wins_and_unset() {
        let mut acc = Environment::new();
        acc.define("CC", "gcc");
        let mut later = Environment::new();
        later.define("CC", "clang");
        later.unset("CXX");
        acc.compose(&later);
        assert_eq!(acc.value("CC", None).as_deref(), Some("clang"));
        assert_eq!(acc.value("CXX", Some("g++")), None);

        let mut after_unset = Environment::new();
        after_unset.append("CXX", "clang++");
        acc.compose(&after_unset);
        assert_eq!(acc.value("CXX", Some("g++")).as_deref(), Some("clang++"));
    }

    #[test]
    fn test_shell_script() {
        let mut env = Environment::new();
        env.prepend_path("PATH", "/opt/bin");
        env.define("CC", "gcc");
        env.unset("CXX");
        let script = env.to_shell_script();
        assert!(script.contains("export CC=\"gcc\""));
        assert!(script.contains(&format!("export PATH=\"/opt/bin{}$PATH\"", PATH_SEPARATOR)));
        assert!(script.contains("unset CXX"));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_script_keeps_values_literal() {
        let literal = r#"-DNAME="x" -DHOME=$HOME `id` C:\path"#;
        let mut env = Environment::new();
        env.define("FLAGS", literal);
        env.prepend_path("PATH", "/opt/$bin");
        assert!(env.to_shell_script().contains(r#"export FLAGS="-DNAME=\"x\" -DHOME=\$HOME \`id\` C:\\path""#));

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("env.sh");
        std::fs::write(&script, env.to_shell_script()).unwrap();
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(r#". "$1"; printf '%s\n%s' "$FLAGS" "${PATH%%:*}""#)
            .arg("sh")
            .arg(&script)
            .output()
            .unwrap();
        let stdout = String::from_utf8(output.stdout).unwrap();
        assert_eq!(stdout, format!("{}\n/opt/$bin", literal));
    }
}

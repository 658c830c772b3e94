// src/settings/mod.rs

//! Settings and options model
//!
//! Settings are the process-wide configuration vocabulary (`os`, `arch`,
//! `compiler`, `build_type`, `cuda`) described by an embedded YAML document.
//! A [`Settings`] value is a flat map of dotted paths (`compiler.version`)
//! validated against that vocabulary: sub-settings only exist under the
//! parent value that declares them, and values must come from the declared
//! set unless the field accepts `ANY`.
//!
//! Every node holds its own clone. Recipes delete settings they do not
//! consume ([`Settings::constrain`], [`Settings::rm_safe`]) and package id
//! hooks may narrow a setting to a projection ([`Settings::narrow`]).

pub mod options;

pub use options::{OptionDef, OptionValues, Options};

use crate::error::{Error, Result};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

/// Embedded default vocabulary
const DEFAULT_SETTINGS_YML: &str = include_str!("settings.yml");

/// Marker for fields accepting any value
const ANY: &str = "ANY";

/// Marker for settings that only hold sub-settings
const GROUP: &str = "_group";

/// Named fields at one level of the vocabulary
pub type Fields = BTreeMap<String, FieldDef>;

/// Definition of one setting field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDef {
    /// Explicit values, each with the sub-settings it enables
    values: BTreeMap<String, Fields>,
    /// Whether the field may stay unset
    allow_none: bool,
    /// Sub-settings enabled when any value is accepted
    any: Option<Fields>,
    /// Sub-settings of a value-less group
    group: Option<Fields>,
}

impl FieldDef {
    fn parse(name: &str, value: &Value) -> Result<Self> {
        let mut def = FieldDef::default();
        match value {
            Value::Null => def.any = Some(Fields::new()),
            Value::Sequence(items) => {
                for item in items {
                    match item {
                        Value::Null => def.allow_none = true,
                        Value::String(s) if s == ANY => def.any = Some(Fields::new()),
                        other => {
                            def.values.insert(scalar(name, other)?, Fields::new());
                        }
                    }
                }
            }
            Value::Mapping(map) => {
                if map.len() == 1 {
                    if let Some(group) = map.get(GROUP) {
                        def.group = Some(parse_fields(group)?);
                        def.allow_none = true;
                        return Ok(def);
                    }
                }
                for (key, children) in map {
                    match key {
                        Value::Null => def.allow_none = true,
                        Value::String(s) if s == ANY => def.any = Some(parse_fields(children)?),
                        other => {
                            def.values.insert(scalar(name, other)?, parse_fields(children)?);
                        }
                    }
                }
            }
            _ => {
                return Err(Error::ParseError(format!(
                    "settings vocabulary: unexpected definition for '{}'",
                    name
                )));
            }
        }
        Ok(def)
    }

    /// Whether the field is a value-less group
    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }

    /// Whether `value` is acceptable for this field
    pub fn accepts(&self, value: &str) -> bool {
        self.values.contains_key(value) || self.any.is_some()
    }

    /// Sub-settings enabled by a value (or by the group itself)
    fn children(&self, value: Option<&str>) -> Option<&Fields> {
        if let Some(group) = &self.group {
            return Some(group);
        }
        let value = value?;
        self.values.get(value).or(self.any.as_ref())
    }

    /// Declared values, `None` included when the field may stay unset
    pub fn possible_values(&self) -> Vec<Option<String>> {
        let mut out: Vec<Option<String>> = Vec::new();
        if self.allow_none {
            out.push(None);
        }
        out.extend(self.values.keys().cloned().map(Some));
        if self.any.is_some() {
            out.push(Some(ANY.to_string()));
        }
        out
    }
}

fn scalar(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if *b { "True" } else { "False" }.to_string()),
        _ => Err(Error::ParseError(format!(
            "settings vocabulary: non-scalar value under '{}'",
            name
        ))),
    }
}

fn parse_fields(value: &Value) -> Result<Fields> {
    let mut fields = Fields::new();
    match value {
        Value::Null => {}
        Value::Mapping(map) => {
            for (key, def) in map {
                let name = scalar("<root>", key)?;
                let field = FieldDef::parse(&name, def)?;
                fields.insert(name, field);
            }
        }
        _ => {
            return Err(Error::ParseError(
                "settings vocabulary: expected a mapping of fields".to_string(),
            ));
        }
    }
    Ok(fields)
}

/// Parse a settings vocabulary from YAML text
pub fn parse_vocabulary(text: &str) -> Result<Arc<Fields>> {
    let value: Value = serde_yaml::from_str(text)?;
    Ok(Arc::new(parse_fields(&value)?))
}

/// The embedded default vocabulary, parsed once per process
pub fn default_vocabulary() -> Result<Arc<Fields>> {
    static VOCABULARY: OnceLock<std::result::Result<Arc<Fields>, String>> = OnceLock::new();
    VOCABULARY
        .get_or_init(|| parse_vocabulary(DEFAULT_SETTINGS_YML).map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| Error::Internal(format!("embedded settings vocabulary: {e}")))
}

/// A configured set of settings
#[derive(Debug, Clone)]
pub struct Settings {
    def: Arc<Fields>,
    values: BTreeMap<String, String>,
    removed: BTreeSet<String>,
}

impl PartialEq for Settings {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.removed == other.removed
    }
}

impl Settings {
    /// Empty settings over a vocabulary
    pub fn new(def: Arc<Fields>) -> Self {
        Self {
            def,
            values: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Empty settings over the embedded default vocabulary
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(default_vocabulary()?))
    }

    fn removed_ancestor(&self, path: &str) -> Option<&str> {
        self.removed
            .iter()
            .find(|r| path == r.as_str() || path.starts_with(&format!("{r}.")))
            .map(|r| r.as_str())
    }

    /// Definition of a field, requiring every ancestor value to be set
    fn field_def(&self, path: &str) -> Result<&FieldDef> {
        let mut fields: &Fields = &self.def;
        let mut walked = String::new();
        let mut parts = path.split('.').peekable();

        while let Some(part) = parts.next() {
            let field = fields.get(part).ok_or_else(|| {
                Error::InvalidSetting(format!("'settings.{}' doesn't exist", path))
            })?;
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(part);

            if parts.peek().is_none() {
                return Ok(field);
            }
            let current = self.values.get(&walked).map(String::as_str);
            fields = field.children(current).ok_or_else(|| match current {
                Some(v) => Error::InvalidSetting(format!(
                    "'settings.{}' doesn't exist for {}={}",
                    path, walked, v
                )),
                None => Error::InvalidSetting(format!(
                    "'settings.{}' requires '{}' to be set",
                    path, walked
                )),
            })?;
        }
        Err(Error::InvalidSetting("empty setting path".to_string()))
    }

    /// Whether the vocabulary names this path under any parent value
    fn is_known_path(&self, path: &str) -> bool {
        fn walk(fields: &Fields, parts: &[&str]) -> bool {
            let Some((first, rest)) = parts.split_first() else {
                return true;
            };
            let Some(field) = fields.get(*first) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            field
                .values
                .values()
                .chain(field.any.iter())
                .chain(field.group.iter())
                .any(|children| walk(children, rest))
        }
        let parts: Vec<&str> = path.split('.').collect();
        walk(&self.def, &parts)
    }

    /// Value of a setting
    ///
    /// Fails for paths the vocabulary does not know and for removed settings;
    /// a known but unset setting yields `None`.
    pub fn get(&self, path: &str) -> Result<Option<&str>> {
        if let Some(removed) = self.removed_ancestor(path) {
            return Err(Error::InvalidSetting(format!(
                "'settings.{}' was removed by the recipe ('{}')",
                path, removed
            )));
        }
        if let Some(v) = self.values.get(path) {
            return Ok(Some(v.as_str()));
        }
        if !self.is_known_path(path) {
            return Err(Error::InvalidSetting(format!(
                "'settings.{}' doesn't exist",
                path
            )));
        }
        Ok(None)
    }

    /// Value of a setting, or `default` when unset, removed or unknown
    pub fn get_safe<'a>(&'a self, path: &str, default: Option<&'a str>) -> Option<&'a str> {
        self.values.get(path).map(String::as_str).or(default)
    }

    /// Assign a setting, validating the path and the value
    pub fn set(&mut self, path: &str, value: &str) -> Result<()> {
        if let Some(removed) = self.removed_ancestor(path) {
            return Err(Error::InvalidSetting(format!(
                "'settings.{}' was removed ('{}')",
                path, removed
            )));
        }
        let field = self.field_def(path)?;
        if field.is_group() {
            return Err(Error::InvalidSetting(format!(
                "'settings.{}' holds only sub-settings and takes no value",
                path
            )));
        }
        if !field.accepts(value) {
            let allowed: Vec<String> = field
                .possible_values()
                .into_iter()
                .map(|v| v.unwrap_or_else(|| "None".to_string()))
                .collect();
            return Err(Error::InvalidSetting(format!(
                "invalid value '{}' for 'settings.{}'; possible values are [{}]",
                value,
                path,
                allowed.join(", ")
            )));
        }

        if self.values.get(path).map(String::as_str) != Some(value) {
            self.clear_children(path);
        }
        self.values.insert(path.to_string(), value.to_string());
        Ok(())
    }

    /// Assign several settings, parents before children
    pub fn update<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut entries: Vec<(&str, &str)> = entries.into_iter().collect();
        entries.sort_by_key(|(path, _)| path.matches('.').count());
        for (path, value) in entries {
            self.set(path, value)?;
        }
        Ok(())
    }

    fn clear_children(&mut self, path: &str) {
        let prefix = format!("{path}.");
        self.values.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Remove a setting and its sub-settings if present; never fails
    pub fn rm_safe(&mut self, path: &str) {
        self.values.remove(path);
        self.clear_children(path);
        self.removed.insert(path.to_string());
    }

    /// Keep only the top-level settings a recipe consumes
    pub fn constrain(&mut self, settings_used: &[String]) {
        let top: Vec<String> = self.def.keys().cloned().collect();
        for name in top {
            if !settings_used.iter().any(|s| s == &name) {
                self.rm_safe(&name);
            }
        }
    }

    /// Replace a setting value with a projection, without vocabulary checks
    ///
    /// Used on package id information, where a value such as
    /// `cuda.version = 12` stands for every `12.x`.
    pub fn narrow(&mut self, path: &str, value: &str) {
        self.values.insert(path.to_string(), value.to_string());
    }

    /// Remove every setting
    pub fn clear(&mut self) {
        let top: Vec<String> = self.def.keys().cloned().collect();
        for name in top {
            self.rm_safe(&name);
        }
    }

    /// Declared values of a setting
    pub fn possible_values(&self, path: &str) -> Result<Vec<Option<String>>> {
        Ok(self.field_def(path)?.possible_values())
    }

    /// Configured values, ordered by path
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Whether no setting has a value
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Serialize as `path=value` lines
    pub fn dumps(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

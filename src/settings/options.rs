// src/settings/options.rs

//! Per-recipe options
//!
//! Each recipe declares its options with an allowed-value set and a default.
//! Boolean spellings (`true`, `1`, `yes`) are normalized to `True`/`False`
//! so that profiles, recipes and package ids agree on one representation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Allowed values of one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionValues {
    /// Any value is accepted
    Any,
    /// One of a fixed set
    OneOf(BTreeSet<String>),
}

/// Declaration of one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDef {
    /// Accepted values
    pub values: OptionValues,
    /// Default value, `None` leaves the option unset
    pub default: Option<String>,
}

impl OptionDef {
    /// A `True`/`False` option
    pub fn boolean(default: bool) -> Self {
        Self {
            values: OptionValues::OneOf(
                ["True", "False"].iter().map(|s| s.to_string()).collect(),
            ),
            default: Some(bool_value(default).to_string()),
        }
    }

    /// An option restricted to a fixed set of values
    pub fn one_of<I, S>(values: I, default: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            values: OptionValues::OneOf(
                values
                    .into_iter()
                    .map(|v| normalize_value(v.as_ref()))
                    .collect(),
            ),
            default: default.map(normalize_value),
        }
    }

    /// An option accepting any value
    pub fn any(default: Option<&str>) -> Self {
        Self {
            values: OptionValues::Any,
            default: default.map(normalize_value),
        }
    }

    /// Whether a (normalized) value is acceptable
    pub fn accepts(&self, value: &str) -> bool {
        match &self.values {
            OptionValues::Any => true,
            OptionValues::OneOf(set) => set.contains(value),
        }
    }

    /// Check that the default is part of the allowed set
    pub fn check_default(&self, name: &str) -> Result<()> {
        match &self.default {
            Some(d) if !self.accepts(d) => Err(Error::InvalidSetting(format!(
                "default '{}' of option '{}' is not an allowed value",
                d, name
            ))),
            _ => Ok(()),
        }
    }
}

fn bool_value(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

/// Normalize boolean spellings to `True`/`False`
pub fn normalize_value(value: &str) -> String {
    match value.trim() {
        "true" | "True" | "TRUE" | "yes" | "on" | "1" => "True".to_string(),
        "false" | "False" | "FALSE" | "no" | "off" | "0" => "False".to_string(),
        other => other.to_string(),
    }
}

/// Option values of one recipe instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    defs: BTreeMap<String, OptionDef>,
    values: BTreeMap<String, String>,
}

impl Options {
    /// Options initialized to their declared defaults
    pub fn from_defs(defs: BTreeMap<String, OptionDef>) -> Self {
        let values = defs
            .iter()
            .filter_map(|(name, def)| def.default.clone().map(|d| (name.clone(), d)))
            .collect();
        Self { defs, values }
    }

    /// Whether the recipe declares (and has not removed) an option
    pub fn is_declared(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Current value of an option
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Whether a boolean option is `True`
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name) == Some("True")
    }

    /// Assign a declared option
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let def = self.defs.get(name).ok_or_else(|| {
            Error::InvalidSetting(format!("option '{}' doesn't exist", name))
        })?;
        let value = normalize_value(value);
        if !def.accepts(&value) {
            let allowed = match &def.values {
                OptionValues::Any => "ANY".to_string(),
                OptionValues::OneOf(set) => set.iter().cloned().collect::<Vec<_>>().join(", "),
            };
            return Err(Error::InvalidSetting(format!(
                "'{}' is not a valid value for option '{}'; possible values are [{}]",
                value, name, allowed
            )));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Assign an option only if the recipe declares it
    ///
    /// Returns whether the assignment happened.
    pub fn set_if_declared(&mut self, name: &str, value: &str) -> Result<bool> {
        if !self.is_declared(name) {
            return Ok(false);
        }
        self.set(name, value)?;
        Ok(true)
    }

    /// Remove an option if present; never fails
    pub fn rm_safe(&mut self, name: &str) {
        self.defs.remove(name);
        self.values.remove(name);
    }

    /// Remove every option
    pub fn clear(&mut self) {
        self.defs.clear();
        self.values.clear();
    }

    /// Replace a value without validation (package id projections)
    pub fn narrow(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    /// Configured values, ordered by name
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Declarations, ordered by name
    pub fn defs(&self) -> &BTreeMap<String, OptionDef> {
        &self.defs
    }
}

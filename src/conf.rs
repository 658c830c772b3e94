// src/conf.rs

//! Tool configuration (`[conf]` profile section and `conf_info`)
//!
//! Keys are `namespace:name` (`tools.build:jobs`, `user.myorg:flag`).
//! Values are typed: profiles write Python-like literals (`True`, `4`,
//! `['-g', '-O0']`, `{'c': 'gcc'}`) which are parsed into [`ConfValue`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Known configuration keys
pub mod keys {
    pub const JOBS: &str = "tools.build:jobs";
    pub const SYSROOT: &str = "tools.build:sysroot";
    pub const COMPILER_EXECUTABLES: &str = "tools.build:compiler_executables";
    pub const CFLAGS: &str = "tools.build:cflags";
    pub const CXXFLAGS: &str = "tools.build:cxxflags";
    pub const SHAREDLINKFLAGS: &str = "tools.build:sharedlinkflags";
    pub const EXELINKFLAGS: &str = "tools.build:exelinkflags";
    pub const DEFINES: &str = "tools.build:defines";
    pub const CMAKE_GENERATOR: &str = "tools.cmake:generator";
    pub const KEEP_PDB: &str = "tools.build:keep_pdb";
    pub const FIX_INSTALL_NAMES: &str = "tools.apple:fix_install_names";
    pub const BUILD_TIMEOUT: &str = "tools.build:timeout";
}

/// A typed configuration value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl ConfValue {
    /// Parse a profile literal
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        match text {
            "True" | "true" => return Ok(Self::Bool(true)),
            "False" | "false" => return Ok(Self::Bool(false)),
            _ => {}
        }
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Self::Int(n));
        }
        if text.starts_with('[') || text.starts_with('{') {
            let json = text.replace('\'', "\"");
            let value: serde_json::Value = serde_json::from_str(&json)
                .map_err(|e| Error::ParseError(format!("invalid conf value '{}': {}", text, e)))?;
            return Self::from_json(&value)
                .ok_or_else(|| Error::ParseError(format!("unsupported conf value '{}'", text)));
        }
        let unquoted = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
            .unwrap_or(text);
        Ok(Self::Str(unquoted.to_string()))
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        let scalar = |v: &serde_json::Value| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        };
        match value {
            serde_json::Value::Array(items) => {
                items.iter().map(scalar).collect::<Option<Vec<_>>>().map(Self::List)
            }
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| scalar(v).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Self::Map),
            _ => None,
        }
    }
}

/// Tool configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conf {
    values: BTreeMap<String, ConfValue>,
}

fn check_key(key: &str) -> Result<()> {
    match key.split_once(':') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(Error::ParseError(format!(
            "conf key '{}' must have the form 'namespace:name'",
            key
        ))),
    }
}

impl Conf {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value
    pub fn define(&mut self, key: &str, value: ConfValue) -> Result<()> {
        check_key(key)?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Parse and apply one `key=value` profile line
    ///
    /// `key+=[...]` appends to a list, `key=+[...]` prepends and `key=!`
    /// removes the key.
    pub fn apply_line(&mut self, line: &str) -> Result<()> {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::ParseError(format!("invalid conf line '{}'", line)))?;
        let (key, op, value) = if let Some(k) = key.strip_suffix('+') {
            (k, "+=", value)
        } else if let Some(v) = value.strip_prefix('+') {
            (key, "=+", v)
        } else {
            (key, "=", value)
        };
        let key = key.trim();
        check_key(key)?;

        if op == "=" && value.trim() == "!" {
            self.values.remove(key);
            return Ok(());
        }

        let value = ConfValue::parse(value)?;
        match op {
            "=" => {
                self.values.insert(key.to_string(), value);
            }
            _ => {
                let added = match value {
                    ConfValue::List(items) => items,
                    ConfValue::Str(s) => vec![s],
                    other => {
                        return Err(Error::ParseError(format!(
                            "cannot append {:?} to conf '{}'",
                            other, key
                        )));
                    }
                };
                let mut current = self.get_list(key);
                if op == "+=" {
                    current.extend(added);
                } else {
                    current.splice(0..0, added);
                }
                self.values.insert(key.to_string(), ConfValue::List(current));
            }
        }
        Ok(())
    }

    /// Overlay another configuration; its values win
    pub fn update(&mut self, other: &Conf) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Raw value
    pub fn get(&self, key: &str) -> Option<&ConfValue> {
        self.values.get(key)
    }

    /// String value (scalars are rendered)
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            ConfValue::Str(s) => Some(s.clone()),
            ConfValue::Int(n) => Some(n.to_string()),
            ConfValue::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
            _ => None,
        }
    }

    /// Boolean value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            ConfValue::Bool(b) => Some(*b),
            ConfValue::Str(s) => match s.as_str() {
                "True" | "true" | "1" => Some(true),
                "False" | "false" | "0" => Some(false),
                _ => None,
            },
            ConfValue::Int(n) => Some(*n != 0),
            _ => None,
        }
    }

    /// Integer value
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            ConfValue::Int(n) => Some(*n),
            ConfValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// List value, empty when missing
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(ConfValue::List(items)) => items.clone(),
            Some(ConfValue::Str(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Map value, empty when missing
    pub fn get_map(&self, key: &str) -> BTreeMap<String, String> {
        match self.values.get(key) {
            Some(ConfValue::Map(map)) => map.clone(),
            _ => BTreeMap::new(),
        }
    }

    /// Whether no key is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values, ordered by key
    pub fn values(&self) -> &BTreeMap<String, ConfValue> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(ConfValue::parse("True").unwrap(), ConfValue::Bool(true));
        assert_eq!(ConfValue::parse("8").unwrap(), ConfValue::Int(8));
        assert_eq!(
            ConfValue::parse("['-g', '-O0']").unwrap(),
            ConfValue::List(vec!["-g".to_string(), "-O0".to_string()])
        );
        let map = ConfValue::parse("{'c': 'clang', 'cpp': 'clang++'}").unwrap();
        match map {
            ConfValue::Map(m) => assert_eq!(m["cpp"], "clang++"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            ConfValue::parse("\"Ninja\"").unwrap(),
            ConfValue::Str("Ninja".to_string())
        );
    }

    #[test]
    fn test_apply_lines() {
        let mut conf = Conf::new();
        conf.apply_line("tools.build:jobs=4").unwrap();
        conf.apply_line("tools.build:cflags=['-O2']").unwrap();
        conf.apply_line("tools.build:cflags+=['-g']").unwrap();
        conf.apply_line("tools.build:cflags=+['-pipe']").unwrap();
        conf.apply_line("tools.cmake:generator=Ninja").unwrap();

        assert_eq!(conf.get_int(keys::JOBS), Some(4));
        assert_eq!(conf.get_list(keys::CFLAGS), vec!["-pipe", "-O2", "-g"]);
        assert_eq!(conf.get_str(keys::CMAKE_GENERATOR).as_deref(), Some("Ninja"));

        conf.apply_line("tools.build:jobs=!").unwrap();
        assert_eq!(conf.get_int(keys::JOBS), None);
    }

    #[test]
    fn test_invalid_key() {
        let mut conf = Conf::new();
        assert!(conf.apply_line("jobs=4").is_err());
        assert!(conf.define("tools.build:", ConfValue::Int(1)).is_err());
    }

    #[test]
    fn test_update_overrides() {
        let mut base = Conf::new();
        base.apply_line("tools.build:jobs=2").unwrap();
        let mut other = Conf::new();
        other.apply_line("tools.build:jobs=8").unwrap();
        base.update(&other);
        assert_eq!(base.get_int(keys::JOBS), Some(8));
    }
}

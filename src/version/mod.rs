// src/version/mod.rs

//! Version model and range selection
//!
//! Versions are dot-separated items. Numeric items compare numerically,
//! other items lexicographically, and missing trailing items count as zero,
//! so `1.2` and `1.2.0` are equal. A `-` suffix marks a pre-release, which
//! orders before the release with the same core. `+` build metadata is kept
//! for display but ignored for ordering.

mod range;

pub use range::{VersionRange, VersionReq};

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// One dot-separated version item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VersionItem {
    Number(u64),
    Text(String),
}

impl VersionItem {
    fn parse(s: &str) -> Self {
        match s.parse::<u64>() {
            Ok(n) => Self::Number(n),
            Err(_) => Self::Text(s.to_string()),
        }
    }

    fn is_zero(&self) -> bool {
        matches!(self, Self::Number(0))
    }
}

impl fmt::Display for VersionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A package version
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    core: Vec<VersionItem>,
    pre: Option<Vec<VersionItem>>,
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() || raw.contains(char::is_whitespace) {
            return Err(Error::ParseError(format!("invalid version '{}'", s)));
        }

        let without_build = raw.split_once('+').map_or(raw, |(v, _)| v);
        let (core_str, pre_str) = match without_build.split_once('-') {
            Some((c, p)) => (c, Some(p)),
            None => (without_build, None),
        };

        if core_str.is_empty() || core_str.split('.').any(str::is_empty) {
            return Err(Error::ParseError(format!("invalid version '{}'", s)));
        }

        let core = core_str.split('.').map(VersionItem::parse).collect();
        let pre = match pre_str {
            Some(p) if p.is_empty() => Some(Vec::new()),
            Some(p) => Some(p.split('.').map(VersionItem::parse).collect()),
            None => None,
        };

        Ok(Self {
            raw: raw.to_string(),
            core,
            pre,
        })
    }

    /// The version as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this is a pre-release
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// Item at position `index` of the core, zero when absent
    pub fn item(&self, index: usize) -> VersionItem {
        self.core
            .get(index)
            .cloned()
            .unwrap_or(VersionItem::Number(0))
    }

    /// Major item
    pub fn major(&self) -> VersionItem {
        self.item(0)
    }

    /// Number of items in the core as written
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// Whether the core is empty (never true for parsed versions)
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// The first `n` core items joined with dots, zero padded
    ///
    /// `upto(2)` of `1.2.11` is `1.2`, of `3` is `3.0`.
    pub fn upto(&self, n: usize) -> String {
        (0..n)
            .map(|i| self.item(i).to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Increment the item at `index` and drop everything after it
    pub fn bump(&self, index: usize) -> Result<Version> {
        let mut core: Vec<VersionItem> = (0..=index).map(|i| self.item(i)).collect();
        let last = core.len() - 1;
        core[last] = match &core[last] {
            VersionItem::Number(n) => VersionItem::Number(n.checked_add(1).ok_or_else(|| {
                Error::ParseError(format!("version item {} of '{}' cannot be incremented", n, self.raw))
            })?),
            VersionItem::Text(_) => VersionItem::Number(1),
        };
        let raw = core
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Ok(Version {
            raw,
            core,
            pre: None,
        })
    }

    /// Index of the first non-zero core item (last index when all are zero)
    pub fn first_nonzero_index(&self) -> usize {
        self.core
            .iter()
            .position(|i| !i.is_zero())
            .unwrap_or(self.core.len().saturating_sub(1))
    }

    /// Compare only the core items
    pub fn cmp_core(&self, other: &Self) -> Ordering {
        let len = self.core.len().max(other.core.len());
        for i in 0..len {
            match self.item(i).cmp(&other.item(i)) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }

    fn normalized_core(&self) -> &[VersionItem] {
        let end = self
            .core
            .iter()
            .rposition(|i| !i.is_zero())
            .map_or(0, |p| p + 1);
        &self.core[..end]
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_core(other).then_with(|| match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_core().hash(state);
        self.pre.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

// src/recipe/reference.rs

//! Recipe references: `name/version#revision` and `name/[range]`

use crate::error::{Error, Result};
use crate::version::{Version, VersionReq};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_][a-z0-9_+.-]{0,100}$").unwrap());

/// Validate a package name
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::ParseError(format!(
            "invalid package name '{}': use lowercase letters, digits, '_', '+', '.', '-'",
            name
        )))
    }
}

/// A concrete recipe reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipeRef {
    pub name: String,
    pub version: Version,
    /// Recipe revision, when known
    pub revision: Option<String>,
}

impl RecipeRef {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            revision: None,
        }
    }

    /// Parse `name/version` or `name/version#revision`
    pub fn parse(s: &str) -> Result<Self> {
        let (body, revision) = match s.trim().split_once('#') {
            Some((b, r)) if !r.is_empty() => (b, Some(r.to_string())),
            Some(_) => return Err(Error::ParseError(format!("empty revision in '{}'", s))),
            None => (s.trim(), None),
        };
        let (name, version) = body
            .split_once('/')
            .ok_or_else(|| Error::ParseError(format!("expected name/version, got '{}'", s)))?;
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            version: Version::parse(version)?,
            revision,
        })
    }

    /// `name/version` without revision
    pub fn short(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

impl fmt::Display for RecipeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let Some(rev) = &self.revision {
            write!(f, "#{}", rev)?;
        }
        Ok(())
    }
}

/// The target of a requirement: a name and an exact version or range
#[derive(Debug, Clone)]
pub struct RequirementRef {
    pub name: String,
    pub version: VersionReq,
}

impl RequirementRef {
    /// Parse `zlib/1.3.1` or `zlib/[>=1.2 <2]`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, version) = s
            .split_once('/')
            .ok_or_else(|| Error::ParseError(format!("expected name/version, got '{}'", s)))?;
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            version: VersionReq::parse(version)?,
        })
    }
}

impl fmt::Display for RequirementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

// src/version/range.rs

//! Version range expressions
//!
//! Syntax (inside brackets):
//! - `>=1.2 <2`, `>=1.2, <2`: conditions joined by whitespace or commas (AND)
//! - `=1.2.3`, `>1`, `<=1.4`, bare `1.2.3` (exact)
//! - `~1.2`: compatible minor, `>=1.2 <1.3`; `~1` is `>=1 <2`
//! - `^1.2.3`: compatible major, bumps the first non-zero item
//! - `*`: any version
//! - `a || b`: either alternative
//! - `include_prerelease`: let pre-releases match
//!
//! Pre-releases never match unless the range includes `include_prerelease`
//! or one of the conditions itself names a pre-release.

use super::Version;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone)]
struct Condition {
    op: Op,
    version: Version,
}

impl Condition {
    fn matches(&self, v: &Version) -> bool {
        match self.op {
            Op::Eq => v == &self.version,
            Op::Gt => v > &self.version,
            Op::Ge => v >= &self.version,
            Op::Le => v <= &self.version,
            Op::Lt => {
                // `<2` must not admit `2-pre`
                if v.is_prerelease() && !self.version.is_prerelease() {
                    v.cmp_core(&self.version) == Ordering::Less
                } else {
                    v < &self.version
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    fn parse(text: &str, include_prerelease: &mut bool) -> Result<Self> {
        let mut set = ConditionSet::default();
        for token in text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            if token == "include_prerelease" {
                *include_prerelease = true;
                continue;
            }
            if token == "*" {
                continue;
            }
            set.conditions.extend(parse_token(token)?);
        }
        Ok(set)
    }

    fn matches(&self, v: &Version, include_prerelease: bool) -> bool {
        if v.is_prerelease()
            && !include_prerelease
            && !self.conditions.iter().any(|c| c.version.is_prerelease())
        {
            return false;
        }
        self.conditions.iter().all(|c| c.matches(v))
    }
}

fn parse_token(token: &str) -> Result<Vec<Condition>> {
    let (op, rest) = [
        (">=", Some(Op::Ge)),
        ("<=", Some(Op::Le)),
        ("==", Some(Op::Eq)),
        (">", Some(Op::Gt)),
        ("<", Some(Op::Lt)),
        ("=", Some(Op::Eq)),
        ("~", None),
        ("^", None),
    ]
    .iter()
    .find_map(|(prefix, op)| token.strip_prefix(prefix).map(|rest| ((*prefix, *op), rest)))
    .unwrap_or((("", Some(Op::Eq)), token));

    let version = Version::parse(rest)
        .map_err(|_| Error::ParseError(format!("invalid version range token '{}'", token)))?;

    let conditions = match op {
        (_, Some(op)) => vec![Condition { op, version }],
        ("~", None) => {
            let index = if version.len() > 1 { 1 } else { 0 };
            let upper = version.bump(index)?;
            vec![
                Condition {
                    op: Op::Ge,
                    version,
                },
                Condition {
                    op: Op::Lt,
                    version: upper,
                },
            ]
        }
        _ => {
            let upper = version.bump(version.first_nonzero_index())?;
            vec![
                Condition {
                    op: Op::Ge,
                    version,
                },
                Condition {
                    op: Op::Lt,
                    version: upper,
                },
            ]
        }
    };
    Ok(conditions)
}

/// A parsed version range
#[derive(Debug, Clone)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<ConditionSet>,
    include_prerelease: bool,
}

impl VersionRange {
    /// Parse a range, with or without the surrounding brackets
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed)
            .trim();

        let mut include_prerelease = false;
        let alternatives = inner
            .split("||")
            .map(|alt| ConditionSet::parse(alt, &mut include_prerelease))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: format!("[{}]", inner),
            alternatives,
            include_prerelease,
        })
    }

    /// Whether a version satisfies the range
    pub fn contains(&self, v: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|set| set.matches(v, self.include_prerelease))
    }

    /// Pick the highest satisfying version
    ///
    /// Stable versions beat pre-releases with the same core; pre-releases
    /// tie-break by label.
    pub fn select<'a, I>(&self, candidates: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        candidates.into_iter().filter(|v| self.contains(v)).max()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The version part of a requirement: an exact version or a range
#[derive(Debug, Clone)]
pub enum VersionReq {
    Exact(Version),
    Range(VersionRange),
}

impl VersionReq {
    /// Parse `1.2.3` or `[>=1.2 <2]`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('[') {
            if !s.ends_with(']') {
                return Err(Error::ParseError(format!("unterminated version range '{}'", s)));
            }
            Ok(Self::Range(VersionRange::parse(s)?))
        } else {
            Ok(Self::Exact(Version::parse(s)?))
        }
    }

    /// Whether a version satisfies the requirement
    pub fn matches(&self, v: &Version) -> bool {
        match self {
            Self::Exact(exact) => exact == v,
            Self::Range(range) => range.contains(v),
        }
    }

    /// Pick the best version among candidates
    pub fn select<'a, I>(&self, candidates: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        match self {
            Self::Exact(exact) => candidates.into_iter().find(|v| *v == exact),
            Self::Range(range) => range.select(candidates),
        }
    }

    /// Whether this is a range rather than an exact version
    pub fn is_range(&self) -> bool {
        matches!(self, Self::Range(_))
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Range(r) => write!(f, "{r}"),
        }
    }
}

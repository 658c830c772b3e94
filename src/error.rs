// src/error.rs

//! Error types for the recipe engine
//!
//! Every failure the engine reports is an [`Error`]. Callers never inspect
//! messages: the machine-readable [`ErrorKind`] decides whether a failure is
//! recovered at the graph level, fatal for one node, or fatal for the run,
//! and which exit code the command line front-end returns.

use crate::graph::Context;
use crate::recipe::hooks::Stage;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use strum_macros::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The requested settings/options cannot be satisfied by a recipe
    InvalidConfiguration,
    /// A setting or option was assigned a value outside its declared set
    InvalidSetting,
    /// A profile, recipe, or data file could not be parsed
    InvalidInput,
    /// No recipe with the requested name exists
    RecipeNotFound,
    /// No available version satisfies a range
    VersionUnsatisfiable,
    /// Two reachable requirements demand incompatible versions
    VersionConflict,
    /// Requirements form a cycle inside one context
    DependencyCycle,
    /// Downloaded bytes did not match the declared digest
    IntegrityError,
    /// A patch or replacement did not apply cleanly
    PatchFailed,
    /// A build subprocess exited nonzero
    BuildFailed,
    /// A build subprocess exceeded its deadline
    BuildTimeout,
    /// A package was produced without a license file
    MissingLicense,
    /// The build policy forbids building a package that is not cached
    MissingBinary,
    /// Network failure that survived all retries
    NetworkError,
    /// The run was cancelled
    Cancelled,
    /// Filesystem failure
    Io,
    /// Contract violated; bug in the engine
    InternalError,
}

/// How far a failure of a given kind reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The failing node is pruned; optional edges try alternatives
    Recoverable,
    /// The node fails and its dependents in the same run are skipped
    NodeFatal,
    /// The whole run stops
    RunFatal,
}

impl ErrorKind {
    /// Classify how far this kind of failure reaches
    pub fn disposition(self) -> Disposition {
        match self {
            Self::InvalidConfiguration
            | Self::InvalidSetting
            | Self::VersionUnsatisfiable
            | Self::VersionConflict
            | Self::IntegrityError => Disposition::Recoverable,
            Self::InternalError | Self::Cancelled => Disposition::RunFatal,
            _ => Disposition::NodeFatal,
        }
    }

    /// Whether the graph builder may recover from this kind of failure
    pub fn is_recoverable(self) -> bool {
        self.disposition() == Disposition::Recoverable
    }

    /// Process exit code used by the command line front-end
    pub fn exit_code(self) -> i32 {
        match self {
            Self::InvalidInput
            | Self::RecipeNotFound
            | Self::VersionUnsatisfiable
            | Self::VersionConflict
            | Self::DependencyCycle
            | Self::MissingBinary => 1,
            Self::BuildFailed
            | Self::BuildTimeout
            | Self::PatchFailed
            | Self::MissingLicense
            | Self::NetworkError
            | Self::Io
            | Self::InternalError => 2,
            Self::InvalidConfiguration | Self::InvalidSetting => 6,
            Self::IntegrityError => 11,
            Self::Cancelled => 130,
        }
    }
}

/// Node identification attached to errors raised while processing a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// `name/version#revision` of the node
    pub reference: String,
    /// Context the node lives in
    pub context: Context,
    /// Package id, when already computed
    pub package_id: Option<String>,
    /// Lifecycle stage that failed
    pub stage: Option<Stage>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.reference, self.context)?;
        if let Some(id) = &self.package_id {
            write!(f, ", package {}", &id[..id.len().min(8)])?;
        }
        if let Some(stage) = self.stage {
            write!(f, ", stage {}", stage)?;
        }
        write!(f, ")")
    }
}

/// Engine error
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("no version of '{name}' satisfies {range} (available: {available})")]
    VersionUnsatisfiable {
        name: String,
        range: String,
        available: String,
    },

    #[error(
        "version conflict for '{name}': {existing} required by {existing_by}, {requested} required by {requested_by}"
    )]
    VersionConflict {
        name: String,
        existing: String,
        existing_by: String,
        requested: String,
        requested_by: String,
    },

    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("patch {patch} failed on {file}: {detail}")]
    PatchFailed {
        patch: String,
        file: String,
        detail: String,
    },

    #[error("{message}\n--- last lines of output ---\n{log_tail}")]
    BuildFailed { message: String, log_tail: String },

    #[error("'{command}' exceeded its deadline of {timeout:?}")]
    BuildTimeout { command: String, timeout: Duration },

    #[error("no license files in {}", .0.display())]
    MissingLicense(PathBuf),

    #[error("no cached binary for {0} and the build policy forbids building it")]
    MissingBinary(String),

    #[error("download error: {0}")]
    DownloadError(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    InNode {
        context: Box<ErrorContext>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Machine-readable kind of this error, looking through node context
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::InvalidSetting(_) => ErrorKind::InvalidSetting,
            Self::ParseError(_) => ErrorKind::InvalidInput,
            Self::RecipeNotFound(_) => ErrorKind::RecipeNotFound,
            Self::VersionUnsatisfiable { .. } => ErrorKind::VersionUnsatisfiable,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::DependencyCycle(_) => ErrorKind::DependencyCycle,
            Self::ChecksumMismatch { .. } => ErrorKind::IntegrityError,
            Self::PatchFailed { .. } => ErrorKind::PatchFailed,
            Self::BuildFailed { .. } => ErrorKind::BuildFailed,
            Self::BuildTimeout { .. } => ErrorKind::BuildTimeout,
            Self::MissingLicense(_) => ErrorKind::MissingLicense,
            Self::MissingBinary(_) => ErrorKind::MissingBinary,
            Self::DownloadError(_) => ErrorKind::NetworkError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::IoError(_) | Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::InternalError,
            Self::InNode { source, .. } => source.kind(),
        }
    }

    /// Attach node identification, replacing any context already present
    pub fn in_node(self, context: ErrorContext) -> Self {
        let source = match self {
            Self::InNode { source, .. } => source,
            other => Box::new(other),
        };
        Self::InNode {
            context: Box::new(context),
            source,
        }
    }

    /// Node identification, if attached
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::InNode { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The error without node identification
    pub fn root(&self) -> &Error {
        match self {
            Self::InNode { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::ParseError(format!("JSON: {e}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::ParseError(format!("TOML: {e}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::ParseError(format!("YAML: {e}"))
    }
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<glob::PatternError> for Error {
    fn from(e: glob::PatternError) -> Self {
        Self::ParseError(format!("invalid glob pattern: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_node_context() {
        let err = Error::ChecksumMismatch {
            url: "file:///x.tar.gz".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        }
        .in_node(ErrorContext {
            reference: "zlib/1.3.1".to_string(),
            context: Context::Host,
            package_id: None,
            stage: Some(Stage::Source),
        });

        assert_eq!(err.kind(), ErrorKind::IntegrityError);
        assert_eq!(err.kind().exit_code(), 11);
        assert!(err.to_string().starts_with("zlib/1.3.1 (host, stage source)"));
    }

    #[test]
    fn test_in_node_replaces_context() {
        let ctx = |r: &str| ErrorContext {
            reference: r.to_string(),
            context: Context::Build,
            package_id: Some("0123456789abcdef".to_string()),
            stage: None,
        };
        let err = Error::Cancelled.in_node(ctx("a/1")).in_node(ctx("b/2"));
        assert_eq!(err.context().map(|c| c.reference.as_str()), Some("b/2"));
        assert!(matches!(err.root(), Error::Cancelled));
    }

    #[test]
    fn test_dispositions() {
        assert!(ErrorKind::VersionConflict.is_recoverable());
        assert!(ErrorKind::IntegrityError.is_recoverable());
        assert_eq!(ErrorKind::PatchFailed.disposition(), Disposition::NodeFatal);
        assert_eq!(ErrorKind::BuildTimeout.disposition(), Disposition::NodeFatal);
        assert_eq!(ErrorKind::InternalError.disposition(), Disposition::RunFatal);
        assert_eq!(ErrorKind::InvalidConfiguration.exit_code(), 6);
        assert_eq!(ErrorKind::BuildFailed.exit_code(), 2);
        assert_eq!(ErrorKind::RecipeNotFound.exit_code(), 1);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::IntegrityError.to_string(), "integrity-error");
        assert_eq!(
            "version-unsatisfiable".parse::<ErrorKind>().ok(),
            Some(ErrorKind::VersionUnsatisfiable)
        );
    }
}

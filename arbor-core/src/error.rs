//! Error types for arbor-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::tree::NodeKind;

/// Errors from registry and config persistence.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure, annotated with the path being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.arbor/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No project record exists at the expected path.
    #[error("project record not found at {path}")]
    ProjectNotFound { path: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}

/// Violations of the tree invariants, or mutations that would cause one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("'{path}' is a {existing} and cannot be replaced by a {requested}")]
    KindConflict {
        path: String,
        existing: NodeKind,
        requested: NodeKind,
    },

    #[error("cannot place '{path}' under '{parent}', which is a file")]
    ParentIsFile { path: String, parent: String },

    #[error("'{path}' has no parent folder '{missing}'")]
    Orphan { path: String, missing: String },

    #[error("file '{path}' has no content")]
    MissingContent { path: String },

    #[error("folder '{path}' must not carry content")]
    UnexpectedContent { path: String },

    #[error("map key '{key}' does not match node path '{path}'")]
    KeyMismatch { key: String, path: String },

    #[error("no node at '{path}'")]
    NotFound { path: String },

    #[error("a node already exists at '{path}'")]
    AlreadyExists { path: String },

    #[error("cannot move '{from}' inside itself ('{to}')")]
    RenameIntoSelf { from: String, to: String },
}

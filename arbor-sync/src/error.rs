//! Error types for arbor-sync.

use std::path::PathBuf;

use thiserror::Error;

use arbor_core::error::{RegistryError, TreeError};
use arbor_core::types::ProjectKey;
use arbor_templates::RenderError;
use arbor_walker::WalkError;

use crate::remote::RemoteError;
use crate::session::SandboxError;

/// Why a project cannot talk to its remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotLinkedReason {
    /// The project record has no repository reference.
    NoRepository,
    /// The owner's account has no usable credential.
    NoCredential,
}

impl std::fmt::Display for NotLinkedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotLinkedReason::NoRepository => f.write_str("no remote repository is linked"),
            NotLinkedReason::NoCredential => f.write_str("the owner has no remote credential"),
        }
    }
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Push/Pull/Init without a repository or credential. No state changed.
    #[error("{subject} is not linked: {reason}")]
    NotLinked {
        /// `project <owner>/<id>`, or `owner <owner>` before a project exists.
        subject: String,
        reason: NotLinkedReason,
    },

    /// Init on a project that already has a repository.
    #[error("project {project} is already linked to {repo}")]
    AlreadyLinked { project: ProjectKey, repo: String },

    /// The remote store refused a read or write.
    #[error("remote rejected the request: {0}")]
    RemoteRejected(#[from] RemoteError),

    /// A walk could not enumerate its root, including the live copy of a
    /// session.
    #[error("read failure: {0}")]
    ReadFailure(#[from] WalkError),

    #[error("project {0} does not exist")]
    ProjectNotFound(ProjectKey),

    /// Push with nothing saved in the cache store.
    #[error("project {0} has no saved tree to push; save first")]
    NoCachedTree(ProjectKey),

    #[error("invalid tree: {0}")]
    Tree(#[from] TreeError),

    #[error("template error: {0}")]
    Render(#[from] RenderError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("sandbox error: {0}")]
    Sandbox(SandboxError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (cache store).
    #[error("cache store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The task running the operation panicked or was shut down.
    #[error("operation on {project} aborted: {message}")]
    Aborted { project: String, message: String },
}

impl SyncError {
    pub(crate) fn not_linked(project: &ProjectKey, reason: NotLinkedReason) -> Self {
        SyncError::NotLinked {
            subject: format!("project {project}"),
            reason,
        }
    }
}

impl From<SandboxError> for SyncError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Snapshot(walk) => SyncError::ReadFailure(walk),
            other => SyncError::Sandbox(other),
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

//! Remote store: the commit/tree/ref object API of a hosted repository.
//!
//! [`RemoteStore`] is the narrow set of calls the mirror is built on.
//! Implementations: [`github::GithubStore`] (git data REST API) and
//! [`local::LocalStore`] (content-addressed objects on disk).

pub mod github;
pub mod local;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use arbor_core::config::{RemoteBackend, RemoteConfig};
use arbor_core::types::{BranchName, RepoRef};

// ---------------------------------------------------------------------------
// Object model
// ---------------------------------------------------------------------------

/// Hex object id of a commit, tree or blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Blob,
    Tree,
    /// Submodules and anything else the mirror ignores.
    #[serde(other)]
    Other,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub sha: ObjectId,
}

/// A file to be written by `create_tree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlob {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub sha: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("credential rejected by the remote ({0})")]
    Unauthorized(String),

    #[error("not found on the remote: {0}")]
    NotFound(String),

    #[error("repository '{0}' already exists")]
    AlreadyExists(String),

    #[error("remote returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid repository reference '{0}', expected owner/name")]
    InvalidRepo(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed remote response: {0}")]
    Decode(String),

    /// The remote cut a recursive listing short; the rest of the tree is unknown.
    #[error("tree listing of {0} was truncated by the remote")]
    Truncated(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn io_err(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: path.into(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Object-level access to remote repositories, already authenticated.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Commit the branch points at; `NotFound` when the branch has no head.
    async fn get_ref(&self, repo: &RepoRef, branch: &BranchName) -> Result<ObjectId, RemoteError>;

    async fn get_commit(&self, repo: &RepoRef, sha: &ObjectId) -> Result<CommitInfo, RemoteError>;

    /// List a tree. `sha` may name a commit (its tree is listed) or a tree.
    async fn get_tree(
        &self,
        repo: &RepoRef,
        sha: &ObjectId,
        recursive: bool,
    ) -> Result<Vec<RemoteEntry>, RemoteError>;

    async fn get_blob(&self, repo: &RepoRef, sha: &ObjectId) -> Result<Vec<u8>, RemoteError>;

    /// New tree made of `base` (if any) with `blobs` written over it.
    async fn create_tree(
        &self,
        repo: &RepoRef,
        base: Option<&ObjectId>,
        blobs: &[NewBlob],
    ) -> Result<ObjectId, RemoteError>;

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &ObjectId,
        parents: &[ObjectId],
    ) -> Result<ObjectId, RemoteError>;

    /// Point `branch` at `sha`, creating the ref when it does not exist.
    async fn update_ref(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        sha: &ObjectId,
    ) -> Result<(), RemoteError>;

    /// Provision a repository for the authenticated user. A name that is
    /// taken fails with `AlreadyExists`.
    async fn create_repository(&self, name: &str, private: bool) -> Result<RepoRef, RemoteError>;
}

/// Turns an owner's credential into an authenticated [`RemoteStore`].
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, credential: &str) -> Result<Arc<dyn RemoteStore>, RemoteError>;
}

/// Connector for the backend selected in `config`.
pub fn connector_from_config(
    home: &Path,
    config: &RemoteConfig,
) -> Result<Arc<dyn RemoteConnector>, RemoteError> {
    match config.backend {
        RemoteBackend::Github => Ok(Arc::new(github::GithubConnector::new(&config.api_base)?)),
        RemoteBackend::Local => Ok(Arc::new(local::LocalConnector::new(
            config.local_root_at(home),
        ))),
    }
}

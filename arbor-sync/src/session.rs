//! Execution sandbox seam and the session binding a project to one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use arbor_core::tree::{ancestors, Tree};
use arbor_core::types::ProjectKey;
use arbor_walker::{walk, ExclusionSet, FsSource, Walk, WalkError};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot failed: {0}")]
    Snapshot(#[from] WalkError),

    #[error("cannot spawn '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session belongs to {found}, not {expected}")]
    WrongProject {
        expected: ProjectKey,
        found: ProjectKey,
    },
}

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SandboxError {
    SandboxError::Io {
        path: path.into(),
        source,
    }
}

/// Byte streams of a shell running inside a sandbox.
pub struct ShellStream {
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    pub output: Pin<Box<dyn AsyncRead + Send>>,
    /// The process itself; its stderr is piped and left on the child.
    pub child: Child,
}

/// A disposable live working copy.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Materialise `tree` as files before anything runs.
    async fn mount(&self, tree: &Tree) -> Result<(), SandboxError>;

    /// Walk the live filesystem with the sandbox's exclusion set. Entries
    /// that exist but could not be read are listed in [`Walk::skipped`].
    async fn snapshot(&self) -> Result<Walk, SandboxError>;

    /// Make the live filesystem identical to `tree`: live paths absent from
    /// it are deleted, then `tree` is mounted.
    async fn replace(&self, tree: &Tree) -> Result<(), SandboxError>;

    async fn spawn(&self, shell: &str) -> Result<ShellStream, SandboxError>;
}

// ---------------------------------------------------------------------------
// LocalSandbox
// ---------------------------------------------------------------------------

/// Sandbox backed by a plain directory on this machine.
#[derive(Debug)]
pub struct LocalSandbox {
    root: PathBuf,
    exclusions: ExclusionSet,
}

impl LocalSandbox {
    /// Create (or reuse) the sandbox directory at `root`.
    pub async fn boot(root: impl Into<PathBuf>, exclusions: ExclusionSet) -> Result<Self, SandboxError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_err(&root, e))?;
        tracing::debug!("sandbox booted at {}", root.display());
        Ok(Self { root, exclusions })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete the sandbox directory and everything in it.
    pub async fn teardown(&self) -> Result<(), SandboxError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&self.root, e)),
        }
    }

    fn host_path(&self, path: &str) -> PathBuf {
        path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn mount(&self, tree: &Tree) -> Result<(), SandboxError> {
        // Tree iteration is path-ordered, so folders come before their contents.
        for node in tree {
            let target = self.host_path(&node.path);
            if node.is_folder() {
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| io_err(&target, e))?;
            } else {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| io_err(parent, e))?;
                }
                tokio::fs::write(&target, node.content())
                    .await
                    .map_err(|e| io_err(&target, e))?;
            }
        }
        tracing::debug!("mounted {} nodes into {}", tree.len(), self.root.display());
        Ok(())
    }

    async fn snapshot(&self) -> Result<Walk, SandboxError> {
        let source = FsSource::new(&self.root);
        Ok(walk(&source, "", &self.exclusions).await?)
    }

    async fn replace(&self, tree: &Tree) -> Result<(), SandboxError> {
        let live = self.snapshot().await?;
        let stale = stale_paths(&live, tree);
        for path in &stale {
            let target = self.host_path(path);
            let removed = match tokio::fs::symlink_metadata(&target).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&target).await,
                Ok(_) => tokio::fs::remove_file(&target).await,
                Err(e) => Err(e),
            };
            match removed {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&target, e)),
            }
        }
        if !stale.is_empty() {
            tracing::debug!("removed {} stale paths from {}", stale.len(), self.root.display());
        }
        self.mount(tree).await
    }

    async fn spawn(&self, shell: &str) -> Result<ShellStream, SandboxError> {
        let spawn_err = |source| SandboxError::Spawn {
            shell: shell.to_string(),
            source,
        };
        let mut child = Command::new(shell)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let missing = || spawn_err(std::io::Error::other("stdio was not piped"));
        let input = child.stdin.take().ok_or_else(missing)?;
        let output = child.stdout.take().ok_or_else(missing)?;
        Ok(ShellStream {
            input: Box::pin(input),
            output: Box::pin(output),
            child,
        })
    }
}

/// Topmost live paths that `target` lacks or holds with the other kind.
fn stale_paths(live: &Walk, target: &Tree) -> Vec<String> {
    let mut stale: BTreeSet<&str> = live
        .tree
        .iter()
        .filter(|node| target.get(&node.path).map_or(true, |t| t.kind != node.kind))
        .map(|node| node.path.as_str())
        .collect();
    stale.extend(
        live.skipped
            .iter()
            .filter(|s| !target.contains(&s.path))
            .map(|s| s.path.as_str()),
    );
    stale
        .iter()
        .filter(|path| !ancestors(path).any(|a| stale.contains(a)))
        .map(|path| path.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// SyncSession
// ---------------------------------------------------------------------------

/// Runtime binding of a project to its live sandbox. Holds no state of its
/// own; cloning shares the sandbox.
#[derive(Clone)]
pub struct SyncSession {
    project: ProjectKey,
    sandbox: Arc<dyn Sandbox>,
}

impl SyncSession {
    pub fn new(project: ProjectKey, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { project, sandbox }
    }

    pub fn project(&self) -> &ProjectKey {
        &self.project
    }

    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    /// Snapshot of the live tree, checked to belong to `expected`.
    pub async fn snapshot_for(&self, expected: &ProjectKey) -> Result<Walk, SandboxError> {
        self.check(expected)?;
        self.sandbox.snapshot().await
    }

    /// Replace the live tree, checked to belong to `expected`.
    pub async fn replace_for(&self, expected: &ProjectKey, tree: &Tree) -> Result<(), SandboxError> {
        self.check(expected)?;
        self.sandbox.replace(tree).await
    }

    fn check(&self, expected: &ProjectKey) -> Result<(), SandboxError> {
        if &self.project != expected {
            return Err(SandboxError::WrongProject {
                expected: expected.clone(),
                found: self.project.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

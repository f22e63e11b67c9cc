//! On-disk remote store for offline use and tests.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <owner>/<name>/
//!     objects/<sha256>.json   (blob | tree | commit)
//!     refs/heads/<branch>     (commit id)
//! ```
//!
//! Object ids are the SHA-256 of the object's JSON encoding, so identical
//! blobs and trees are stored once. The credential passed to
//! [`LocalConnector::connect`] names the owner new repositories are created
//! under; reads and writes are not authenticated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use arbor_core::types::{BranchName, RepoRef, DEFAULT_BRANCH};

use super::{
    io_err, CommitInfo, EntryType, NewBlob, ObjectId, RemoteConnector, RemoteEntry, RemoteError,
    RemoteStore,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: EntryType,
    sha: ObjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Object {
    Blob {
        content: String,
    },
    Tree {
        entries: BTreeMap<String, TreeEntry>,
    },
    Commit {
        tree: ObjectId,
        parents: Vec<ObjectId>,
        message: String,
        created_at: DateTime<Utc>,
    },
}

impl Object {
    fn kind(&self) -> &'static str {
        match self {
            Object::Blob { .. } => "blob",
            Object::Tree { .. } => "tree",
            Object::Commit { .. } => "commit",
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RemoteConnector for LocalConnector {
    fn connect(&self, credential: &str) -> Result<Arc<dyn RemoteStore>, RemoteError> {
        Ok(Arc::new(LocalStore::new(&self.root, credential)))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    user: String,
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(&['/', '\\'][..])
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            user: user.into(),
        }
    }

    fn repo_dir(&self, repo: &RepoRef) -> Result<PathBuf, RemoteError> {
        match repo.split() {
            Some((owner, name)) if valid_segment(owner) && valid_segment(name) => {
                Ok(self.root.join(owner).join(name))
            }
            _ => Err(RemoteError::InvalidRepo(repo.to_string())),
        }
    }

    /// Repository directory, failing with `NotFound` when it was never created.
    async fn existing_repo(&self, repo: &RepoRef) -> Result<PathBuf, RemoteError> {
        let dir = self.repo_dir(repo)?;
        if tokio::fs::metadata(&dir).await.is_err() {
            return Err(RemoteError::NotFound(format!("repository {repo}")));
        }
        Ok(dir)
    }

    fn ref_path(dir: &Path, branch: &BranchName) -> Result<PathBuf, RemoteError> {
        let mut path = dir.join("refs").join("heads");
        for segment in branch.0.split('/') {
            if !valid_segment(segment) {
                return Err(RemoteError::Rejected {
                    status: 422,
                    message: format!("invalid branch name '{branch}'"),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }

    async fn read_object(&self, dir: &Path, sha: &ObjectId) -> Result<Object, RemoteError> {
        if !sha.0.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RemoteError::NotFound(format!("object {sha}")));
        }
        let path = dir.join("objects").join(format!("{sha}.json"));
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(format!("object {sha}")))
            }
            Err(e) => Err(io_err(path, e)),
        }
    }

    async fn write_object(&self, dir: &Path, object: &Object) -> Result<ObjectId, RemoteError> {
        let raw = serde_json::to_vec(object)?;
        let sha = ObjectId(hex::encode(Sha256::digest(&raw)));
        let objects = dir.join("objects");
        let path = objects.join(format!("{sha}.json"));
        if tokio::fs::metadata(&path).await.is_ok() {
            return Ok(sha);
        }
        tokio::fs::create_dir_all(&objects)
            .await
            .map_err(|e| io_err(&objects, e))?;
        write_atomic(&path, &raw).await?;
        Ok(sha)
    }

    /// Resolve a commit or tree id to the root tree's entries.
    async fn tree_entries(
        &self,
        dir: &Path,
        sha: &ObjectId,
    ) -> Result<BTreeMap<String, TreeEntry>, RemoteError> {
        match self.read_object(dir, sha).await? {
            Object::Tree { entries } => Ok(entries),
            Object::Commit { tree, .. } => match self.read_object(dir, &tree).await? {
                Object::Tree { entries } => Ok(entries),
                other => Err(not_a(&tree, "tree", &other)),
            },
            other => Err(not_a(sha, "tree", &other)),
        }
    }

    /// Every blob under `sha`, keyed by full path.
    async fn flatten(
        &self,
        dir: &Path,
        sha: &ObjectId,
    ) -> Result<BTreeMap<String, ObjectId>, RemoteError> {
        let mut blobs = BTreeMap::new();
        let mut pending = vec![(String::new(), sha.clone())];
        while let Some((prefix, tree)) = pending.pop() {
            for (name, entry) in self.tree_entries(dir, &tree).await? {
                let path = join(&prefix, &name);
                match entry.kind {
                    EntryType::Blob => {
                        blobs.insert(path, entry.sha);
                    }
                    EntryType::Tree => pending.push((path, entry.sha)),
                    EntryType::Other => {}
                }
            }
        }
        Ok(blobs)
    }

    /// Write nested tree objects for a flat `path → blob` map.
    async fn write_tree(
        &self,
        dir: &Path,
        blobs: &BTreeMap<String, ObjectId>,
    ) -> Result<ObjectId, RemoteError> {
        // Group by directory, deepest first, so children exist before parents.
        let mut dirs: BTreeMap<String, BTreeMap<String, TreeEntry>> = BTreeMap::new();
        dirs.insert(String::new(), BTreeMap::new());
        for (path, sha) in blobs {
            let (parent, name) = split_parent(path);
            dirs.entry(parent.to_string()).or_default().insert(
                name.to_string(),
                TreeEntry {
                    kind: EntryType::Blob,
                    sha: sha.clone(),
                },
            );
            let mut current = parent;
            while !current.is_empty() {
                let (up, _) = split_parent(current);
                dirs.entry(up.to_string()).or_default();
                current = up;
            }
        }

        let mut order: Vec<String> = dirs.keys().cloned().collect();
        order.sort_by_key(|d| std::cmp::Reverse(depth(d)));

        let mut root = None;
        for path in order {
            let entries = dirs.remove(&path).unwrap_or_default();
            let sha = self.write_object(dir, &Object::Tree { entries }).await?;
            if path.is_empty() {
                root = Some(sha);
            } else {
                let (parent, name) = split_parent(&path);
                dirs.entry(parent.to_string()).or_default().insert(
                    name.to_string(),
                    TreeEntry {
                        kind: EntryType::Tree,
                        sha,
                    },
                );
            }
        }
        root.ok_or_else(|| RemoteError::Decode("tree without a root".into()))
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn get_ref(&self, repo: &RepoRef, branch: &BranchName) -> Result<ObjectId, RemoteError> {
        let dir = self.existing_repo(repo).await?;
        let path = Self::ref_path(&dir, branch)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(sha) => Ok(ObjectId(sha.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(format!("branch {branch} of {repo}")))
            }
            Err(e) => Err(io_err(path, e)),
        }
    }

    async fn get_commit(&self, repo: &RepoRef, sha: &ObjectId) -> Result<CommitInfo, RemoteError> {
        let dir = self.existing_repo(repo).await?;
        match self.read_object(&dir, sha).await? {
            Object::Commit {
                tree,
                parents,
                message,
                ..
            } => Ok(CommitInfo {
                sha: sha.clone(),
                tree,
                parents,
                message,
            }),
            other => Err(not_a(sha, "commit", &other)),
        }
    }

    async fn get_tree(
        &self,
        repo: &RepoRef,
        sha: &ObjectId,
        recursive: bool,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let dir = self.existing_repo(repo).await?;
        let mut listing = Vec::new();
        let mut pending = vec![(String::new(), sha.clone())];
        while let Some((prefix, tree)) = pending.pop() {
            for (name, entry) in self.tree_entries(&dir, &tree).await? {
                let path = join(&prefix, &name);
                if recursive && entry.kind == EntryType::Tree {
                    pending.push((path.clone(), entry.sha.clone()));
                }
                listing.push(RemoteEntry {
                    path,
                    entry_type: entry.kind,
                    sha: entry.sha,
                });
            }
        }
        listing.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }

    async fn get_blob(&self, repo: &RepoRef, sha: &ObjectId) -> Result<Vec<u8>, RemoteError> {
        let dir = self.existing_repo(repo).await?;
        match self.read_object(&dir, sha).await? {
            Object::Blob { content } => Ok(content.into_bytes()),
            other => Err(not_a(sha, "blob", &other)),
        }
    }

    async fn create_tree(
        &self,
        repo: &RepoRef,
        base: Option<&ObjectId>,
        blobs: &[NewBlob],
    ) -> Result<ObjectId, RemoteError> {
        let dir = self.existing_repo(repo).await?;
        let mut files = match base {
            Some(base) => self.flatten(&dir, base).await?,
            None => BTreeMap::new(),
        };
        for blob in blobs {
            if blob.path.split('/').any(|s| !valid_segment(s)) {
                return Err(RemoteError::Rejected {
                    status: 422,
                    message: format!("invalid tree path '{}'", blob.path),
                });
            }
            let sha = self
                .write_object(
                    &dir,
                    &Object::Blob {
                        content: blob.content.clone(),
                    },
                )
                .await?;
            // A file replaces any directory of the same name and vice versa.
            let nested = format!("{}/", blob.path);
            files.retain(|path, _| {
                !path.starts_with(&nested) && !blob.path.starts_with(&format!("{path}/"))
            });
            files.insert(blob.path.clone(), sha);
        }
        self.write_tree(&dir, &files).await
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &ObjectId,
        parents: &[ObjectId],
    ) -> Result<ObjectId, RemoteError> {
        let dir = self.existing_repo(repo).await?;
        match self.read_object(&dir, tree).await? {
            Object::Tree { .. } => {}
            other => return Err(not_a(tree, "tree", &other)),
        }
        for parent in parents {
            self.get_commit(repo, parent).await?;
        }
        let commit = Object::Commit {
            tree: tree.clone(),
            parents: parents.to_vec(),
            message: message.to_string(),
            created_at: Utc::now(),
        };
        self.write_object(&dir, &commit).await
    }

    async fn update_ref(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        sha: &ObjectId,
    ) -> Result<(), RemoteError> {
        let dir = self.existing_repo(repo).await?;
        self.get_commit(repo, sha).await?;
        let path = Self::ref_path(&dir, branch)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        write_atomic(&path, sha.0.as_bytes()).await
    }

    async fn create_repository(&self, name: &str, _private: bool) -> Result<RepoRef, RemoteError> {
        let repo = RepoRef::from(format!("{}/{name}", self.user));
        let dir = self.repo_dir(&repo)?;
        if tokio::fs::metadata(&dir).await.is_ok() {
            return Err(RemoteError::AlreadyExists(repo.to_string()));
        }
        tokio::fs::create_dir_all(dir.join("objects"))
            .await
            .map_err(|e| io_err(&dir, e))?;

        // Same shape as an auto-initialised hosted repository: one commit.
        let tree = self.write_tree(&dir, &BTreeMap::new()).await?;
        let commit = self
            .create_commit(&repo, "Initial commit", &tree, &[])
            .await?;
        self.update_ref(&repo, &BranchName::from(DEFAULT_BRANCH), &commit)
            .await?;
        tracing::info!("created local repository {repo}");
        Ok(repo)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn not_a(sha: &ObjectId, wanted: &str, found: &Object) -> RemoteError {
    RemoteError::Decode(format!("object {sha} is a {}, not a {wanted}", found.kind()))
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.matches('/').count() + 1
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RemoteError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_err(path, e))
}

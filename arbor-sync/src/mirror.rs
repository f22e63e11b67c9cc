//! Remote mirror: moves whole trees to and from a [`RemoteStore`].
//!
//! Fetching reuses the walker over an in-memory listing of the remote tree,
//! so the remote and the live sandbox share one traversal and one exclusion
//! policy. Pushing writes the file set as a new tree layered on the branch
//! head, commits it and moves the ref. The ref update is the last step: a
//! failure before it leaves unreferenced objects and an unchanged branch.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use arbor_core::tree::{ancestors, Tree};
use arbor_core::types::{BranchName, RepoRef};
use arbor_walker::{walk, DirEntry, ExclusionSet, SourceError, WalkSource};

use crate::error::SyncError;
use crate::remote::{
    CommitInfo, EntryType, NewBlob, ObjectId, RemoteEntry, RemoteError, RemoteStore,
};

/// Result of a successful push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    pub commit: ObjectId,
    /// Number of file blobs written.
    pub files: usize,
}

pub struct RemoteMirror {
    store: Arc<dyn RemoteStore>,
    exclusions: ExclusionSet,
    commit_prefix: String,
}

impl RemoteMirror {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        exclusions: ExclusionSet,
        commit_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            exclusions,
            commit_prefix: commit_prefix.into(),
        }
    }

    /// Provision a new repository. A taken name is an error.
    pub async fn create_repository(&self, name: &str, private: bool) -> Result<RepoRef, RemoteError> {
        let repo = self.store.create_repository(name, private).await?;
        tracing::info!("created repository {repo}");
        Ok(repo)
    }

    /// Tree at the head of `branch`.
    ///
    /// Folders are rebuilt from blob path prefixes; submodules and other
    /// entry types are ignored. Any remote failure fails the fetch; blobs
    /// that are not UTF-8 text are left out with a warning.
    pub async fn fetch_tree(&self, repo: &RepoRef, branch: &BranchName) -> Result<Tree, SyncError> {
        let head = self.store.get_ref(repo, branch).await?;
        let entries = self.store.get_tree(repo, &head, true).await?;
        tracing::debug!("{repo}@{branch} lists {} entries", entries.len());

        let listing = RemoteListing::new(self.store.clone(), repo.clone(), entries);
        let result = walk(&listing, "", &self.exclusions).await?;
        if let Some(e) = listing.failure.lock().take() {
            return Err(e.into());
        }
        tracing::info!(
            "fetched {} files from {repo}@{branch}",
            result.tree.file_count()
        );
        Ok(result.tree)
    }

    /// Commit the files of `tree` onto `branch`.
    ///
    /// Folders carry no blob and are not sent. The commit's only parent is
    /// the current head; a branch without a head gets a root commit.
    pub async fn push_tree(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        tree: &Tree,
    ) -> Result<PushOutcome, RemoteError> {
        let head = match self.store.get_ref(repo, branch).await {
            Ok(head) => Some(head),
            Err(RemoteError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let base = match &head {
            Some(head) => Some(self.store.get_commit(repo, head).await?.tree),
            None => None,
        };

        let blobs: Vec<NewBlob> = tree
            .files()
            .map(|node| NewBlob {
                path: node.path.clone(),
                content: node.content().to_string(),
            })
            .collect();
        let new_tree = self.store.create_tree(repo, base.as_ref(), &blobs).await?;

        let message = format!(
            "{} - {}",
            self.commit_prefix,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let parents: Vec<ObjectId> = head.into_iter().collect();
        let commit = self
            .store
            .create_commit(repo, &message, &new_tree, &parents)
            .await?;
        self.store.update_ref(repo, branch, &commit).await?;

        tracing::info!("pushed {} files to {repo}@{branch} as {commit}", blobs.len());
        Ok(PushOutcome {
            commit,
            files: blobs.len(),
        })
    }

    /// Up to `limit` commits reachable from the head of `branch`, newest
    /// first, following first parents.
    pub async fn history(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        limit: usize,
    ) -> Result<Vec<CommitInfo>, RemoteError> {
        let mut commits = Vec::new();
        let mut next = Some(self.store.get_ref(repo, branch).await?);
        while let Some(sha) = next {
            if commits.len() >= limit {
                break;
            }
            let commit = self.store.get_commit(repo, &sha).await?;
            next = commit.parents.first().cloned();
            commits.push(commit);
        }
        Ok(commits)
    }
}

// ---------------------------------------------------------------------------
// Remote listing as a walk source
// ---------------------------------------------------------------------------

/// A recursive remote tree listing presented as directories and files.
struct RemoteListing {
    store: Arc<dyn RemoteStore>,
    repo: RepoRef,
    dirs: HashMap<String, Vec<DirEntry>>,
    blobs: HashMap<String, ObjectId>,
    /// First remote error seen while reading blobs.
    failure: Mutex<Option<RemoteError>>,
}

impl RemoteListing {
    fn new(store: Arc<dyn RemoteStore>, repo: RepoRef, entries: Vec<RemoteEntry>) -> Self {
        // dir -> name -> is_dir
        let mut dirs: BTreeMap<String, BTreeMap<String, bool>> = BTreeMap::new();
        dirs.insert(String::new(), BTreeMap::new());
        let mut blobs = HashMap::new();

        let mut add = |path: &str, is_dir: bool| {
            let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
            let slot = dirs
                .entry(parent.to_string())
                .or_default()
                .entry(name.to_string())
                .or_insert(is_dir);
            *slot |= is_dir;
            if is_dir {
                dirs.entry(path.to_string()).or_default();
            }
        };

        for entry in entries {
            let is_dir = match entry.entry_type {
                EntryType::Blob => false,
                EntryType::Tree => true,
                EntryType::Other => continue,
            };
            for ancestor in ancestors(&entry.path) {
                add(ancestor, true);
            }
            add(&entry.path, is_dir);
            if !is_dir {
                blobs.insert(entry.path, entry.sha);
            }
        }

        let dirs = dirs
            .into_iter()
            .map(|(dir, names)| {
                let entries = names
                    .into_iter()
                    .map(|(name, is_dir)| {
                        if is_dir {
                            DirEntry::dir(name)
                        } else {
                            DirEntry::file(name)
                        }
                    })
                    .collect();
                (dir, entries)
            })
            .collect();

        Self {
            store,
            repo,
            dirs,
            blobs,
            failure: Mutex::new(None),
        }
    }
}

#[async_trait]
impl WalkSource for RemoteListing {
    async fn read_dir(&self, dir: &str) -> Result<Vec<DirEntry>, SourceError> {
        self.dirs
            .get(dir)
            .cloned()
            .ok_or_else(|| format!("{dir} is not a directory in {}", self.repo).into())
    }

    async fn read_file(&self, path: &str) -> Result<String, SourceError> {
        let sha = self
            .blobs
            .get(path)
            .ok_or_else(|| SourceError::from(format!("{path} is not a blob")))?;
        match self.store.get_blob(&self.repo, sha).await {
            Ok(bytes) => {
                String::from_utf8(bytes).map_err(|_| format!("{path} is not UTF-8 text").into())
            }
            Err(e) => {
                let message = e.to_string();
                self.failure.lock().get_or_insert(e);
                Err(message.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::local::LocalStore;
    use tempfile::TempDir;

    fn entry(path: &str, entry_type: EntryType) -> RemoteEntry {
        RemoteEntry {
            path: path.into(),
            entry_type,
            sha: ObjectId::from("00"),
        }
    }

    #[test]
    fn listing_reconstructs_folders_from_blob_paths() {
        let store: Arc<dyn RemoteStore> = Arc::new(LocalStore::new("/nonexistent", "x"));
        let listing = RemoteListing::new(
            store,
            RepoRef::from("a/b"),
            vec![
                entry("src/app/main.rs", EntryType::Blob),
                entry("README.md", EntryType::Blob),
                entry("vendor/sub", EntryType::Other),
            ],
        );
        assert_eq!(
            listing.dirs[""],
            vec![DirEntry::file("README.md"), DirEntry::dir("src")]
        );
        assert_eq!(listing.dirs["src"], vec![DirEntry::dir("app")]);
        assert!(!listing.dirs.contains_key("vendor"));
    }

    #[tokio::test]
    async fn push_then_fetch_restores_the_files() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path(), "ada"));
        let repo = store.create_repository("site", true).await.unwrap();
        let mirror = RemoteMirror::new(store, ExclusionSet::default(), "Sync from arbor");

        let tree = Tree::from_files([("index.html", "<p>"), ("js/app.js", "go()")]).unwrap();
        let outcome = mirror
            .push_tree(&repo, &BranchName::default(), &tree)
            .await
            .unwrap();
        assert_eq!(outcome.files, 2);

        let fetched = mirror.fetch_tree(&repo, &BranchName::default()).await.unwrap();
        assert_eq!(fetched, tree);
    }

    #[tokio::test]
    async fn push_to_new_branch_makes_root_commit() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path(), "ada"));
        let repo = store.create_repository("site", true).await.unwrap();
        let mirror = RemoteMirror::new(store, ExclusionSet::default(), "msg");
        let branch = BranchName::from("draft");

        let tree = Tree::from_files([("a.txt", "a")]).unwrap();
        mirror.push_tree(&repo, &branch, &tree).await.unwrap();
        let history = mirror.history(&repo, &branch, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].parents.is_empty());
        assert!(history[0].message.starts_with("msg - "));
    }

    #[tokio::test]
    async fn fetch_records_excluded_folder_without_contents() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path(), "ada"));
        let repo = store.create_repository("site", true).await.unwrap();
        let mirror = RemoteMirror::new(store, ExclusionSet::default(), "msg");

        let tree = Tree::from_files([
            ("package.json", "{}"),
            ("node_modules/left-pad/index.js", "pad"),
        ])
        .unwrap();
        mirror.push_tree(&repo, &BranchName::default(), &tree).await.unwrap();

        let fetched = mirror.fetch_tree(&repo, &BranchName::default()).await.unwrap();
        assert!(fetched.get("node_modules").unwrap().is_folder());
        assert!(!fetched.contains("node_modules/left-pad"));
        assert_eq!(fetched.file_count(), 1);
    }
}

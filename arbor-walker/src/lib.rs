//! Depth-first walk of a tree-like source into an [`arbor_core::Tree`].
//!
//! The traversal and exclusion logic is independent of where entries come
//! from: a [`WalkSource`] supplies directory listings and file contents, so
//! the same walk serves a local directory ([`FsSource`]) and a remote
//! repository listing.

mod exclusions;
mod fs;

use arbor_core::tree::{FsNode, Tree};
use async_trait::async_trait;
use thiserror::Error;

pub use exclusions::ExclusionSet;
pub use fs::{FsSource, FsSourceError};

/// Error type returned by [`WalkSource`] implementations.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Dir,
        }
    }
}

/// Effectful reads a walk is built on. Paths are slash-separated and
/// relative to the source root; `""` is the root itself.
#[async_trait]
pub trait WalkSource: Send + Sync {
    async fn read_dir(&self, dir: &str) -> Result<Vec<DirEntry>, SourceError>;
    async fn read_file(&self, path: &str) -> Result<String, SourceError>;
}

/// A file or directory the walk could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub path: String,
    pub reason: String,
}

/// Result of a successful walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Walk {
    pub tree: Tree,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("cannot read walk root '{root}': {source}")]
    RootUnreadable {
        root: String,
        #[source]
        source: SourceError,
    },
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

/// Walk `source` from `root`, producing a tree whose paths are relative to
/// `root`.
///
/// Directories named in `exclusions` are recorded as folders and not
/// entered. Unreadable files and sub-directories are skipped and reported in
/// [`Walk::skipped`]; an unreadable root fails the walk.
pub async fn walk<S>(source: &S, root: &str, exclusions: &ExclusionSet) -> Result<Walk, WalkError>
where
    S: WalkSource + ?Sized,
{
    let root = root.trim_matches('/');
    let mut result = Walk::default();
    // (source path, tree path)
    let mut stack: Vec<(String, String)> = vec![(root.to_string(), String::new())];

    while let Some((dir, rel)) = stack.pop() {
        let mut entries = match source.read_dir(&dir).await {
            Ok(entries) => entries,
            Err(source) if rel.is_empty() => {
                return Err(WalkError::RootUnreadable {
                    root: root.to_string(),
                    source,
                })
            }
            Err(e) => {
                tracing::warn!("skipping unreadable directory {dir}: {e}");
                result.skipped.push(Skipped {
                    path: rel,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in entries {
            let src_path = join(&dir, &entry.name);
            let tree_path = join(&rel, &entry.name);
            match entry.kind {
                EntryKind::File => files.push((src_path, tree_path)),
                EntryKind::Dir => {
                    if let Err(e) = result.tree.put(FsNode::folder(tree_path.as_str())) {
                        skip(&mut result, tree_path, e.to_string());
                        continue;
                    }
                    if exclusions.contains(&entry.name) {
                        tracing::debug!("not descending into excluded {tree_path}");
                    } else {
                        subdirs.push((src_path, tree_path));
                    }
                }
            }
        }

        let reads = files.iter().map(|(src_path, _)| source.read_file(src_path));
        let contents = futures::future::join_all(reads).await;
        for ((_, tree_path), content) in files.into_iter().zip(contents) {
            match content {
                Ok(content) => {
                    if let Err(e) = result.tree.put(FsNode::file(tree_path.as_str(), content)) {
                        skip(&mut result, tree_path, e.to_string());
                    }
                }
                Err(e) => skip(&mut result, tree_path, e.to_string()),
            }
        }

        // Reverse so the alphabetically first directory is visited next.
        stack.extend(subdirs.into_iter().rev());
    }

    Ok(result)
}

fn skip(result: &mut Walk, path: String, reason: String) {
    tracing::warn!("skipping {path}: {reason}");
    result.skipped.push(Skipped { path, reason });
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

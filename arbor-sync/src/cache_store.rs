//! Cache store: durable per-project persistence of a [`Tree`].
//!
//! [`DiskCacheStore`] persists a `CachedTree` JSON document at
//! `<home>/.arbor/store/<owner>/<project-id>/tree.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the registry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arbor_core::registry::arbor_root;
use arbor_core::tree::Tree;
use arbor_core::types::ProjectKey;

use crate::error::{io_err, SyncError};

/// Per-project tree persistence.
///
/// `load` distinguishes "nothing saved yet" (`None`) from a saved empty
/// tree. `save` replaces whatever was stored before.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &ProjectKey) -> Result<Option<Tree>, SyncError>;
    async fn save(&self, key: &ProjectKey, tree: &Tree) -> Result<(), SyncError>;
    /// Forget a project's tree. Returns whether anything was stored.
    async fn remove(&self, key: &ProjectKey) -> Result<bool, SyncError>;
}

/// On-disk cache payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedTree {
    pub saved_at: DateTime<Utc>,
    pub tree: Tree,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CachedTreeCompat {
    Structured(CachedTree),
    Legacy(Tree),
}

/// Path to the cached tree JSON for `key`, rooted at `home`.
///
/// `~/.arbor/store/<owner>/<project-id>/tree.json`
pub fn store_path_at(home: &Path, key: &ProjectKey) -> PathBuf {
    arbor_root(home)
        .join("store")
        .join(&key.owner.0)
        .join(key.project.to_string())
        .join("tree.json")
}

/// Load the cached tree for `key`, or `None` if nothing was saved.
pub async fn load_at(home: &Path, key: &ProjectKey) -> Result<Option<CachedTree>, SyncError> {
    let path = store_path_at(home, key);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&path, e)),
    };
    let cached = match serde_json::from_str::<CachedTreeCompat>(&contents)? {
        CachedTreeCompat::Structured(cached) => cached,
        CachedTreeCompat::Legacy(tree) => CachedTree {
            saved_at: Utc::now(),
            tree,
        },
    };
    Ok(Some(cached))
}

/// Save `tree` for `key` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub async fn save_at(home: &Path, key: &ProjectKey, tree: &Tree) -> Result<(), SyncError> {
    let path = store_path_at(home, key);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid cache store path"),
        ));
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_err(dir, e))?;

    let cached = CachedTree {
        saved_at: Utc::now(),
        tree: tree.clone(),
    };
    let json = serde_json::to_string_pretty(&cached)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| io_err(&path, e))?;
    tracing::debug!("cached {} nodes for {key}", tree.len());
    Ok(())
}

/// Delete the cached tree directory for `key`.
pub async fn remove_at(home: &Path, key: &ProjectKey) -> Result<bool, SyncError> {
    let path = store_path_at(home, key);
    let Some(dir) = path.parent() else {
        return Ok(false);
    };
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(dir, e)),
    }
}

/// [`CacheStore`] backed by JSON files under `<home>/.arbor/store/`.
#[derive(Debug, Clone)]
pub struct DiskCacheStore {
    home: PathBuf,
}

impl DiskCacheStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn load(&self, key: &ProjectKey) -> Result<Option<Tree>, SyncError> {
        Ok(load_at(&self.home, key).await?.map(|cached| cached.tree))
    }

    async fn save(&self, key: &ProjectKey, tree: &Tree) -> Result<(), SyncError> {
        save_at(&self.home, key, tree).await
    }

    async fn remove(&self, key: &ProjectKey) -> Result<bool, SyncError> {
        remove_at(&self.home, key).await
    }
}

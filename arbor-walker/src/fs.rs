//! Walk source backed by a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::{DirEntry, EntryKind, SourceError, WalkSource};

#[derive(Debug, Error)]
pub enum FsSourceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not UTF-8 text")]
    NotText { path: PathBuf },
}

/// Reads a directory tree rooted at `base`. Symlinks are ignored.
#[derive(Debug, Clone)]
pub struct FsSource {
    base: PathBuf,
}

impl FsSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.base.clone()
        } else {
            rel.split('/').fold(self.base.clone(), |acc, seg| acc.join(seg))
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> SourceError {
    Box::new(FsSourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl WalkSource for FsSource {
    async fn read_dir(&self, dir: &str) -> Result<Vec<DirEntry>, SourceError> {
        let path = self.resolve(dir);
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_err(&path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| io_err(&path, e))? {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_err(&entry.path(), e))?;
            let kind = if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                tracing::debug!("ignoring special file {}", entry.path().display());
                continue;
            };
            match entry.file_name().into_string() {
                Ok(name) => entries.push(DirEntry { name, kind }),
                Err(raw) => tracing::warn!("ignoring non-UTF-8 name {:?} in {}", raw, path.display()),
            }
        }
        Ok(entries)
    }

    async fn read_file(&self, file: &str) -> Result<String, SourceError> {
        let path = self.resolve(file);
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_err(&path, e))?;
        String::from_utf8(bytes).map_err(|_| Box::new(FsSourceError::NotText { path }) as SourceError)
    }
}

pub mod account;
pub mod daemon;
pub mod project;
pub mod sync;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use arbor_core::tree::Tree;
use arbor_core::types::{OwnerId, ProjectId, ProjectKey};
use arbor_sync::{Coordinator, LocalSandbox, Sandbox};
use arbor_walker::{walk, FsSource};

/// Everything a project command needs: resolved home, owner and an open
/// coordinator, plus the runtime to drive it.
pub struct Workspace {
    pub home: PathBuf,
    pub owner: OwnerId,
    pub coordinator: Coordinator,
    runtime: tokio::runtime::Runtime,
}

impl Workspace {
    pub fn open(owner: Option<String>) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let coordinator = Coordinator::open_at(&home)
            .with_context(|| format!("failed to open {}", home.join(".arbor").display()))?;
        let owner = owner
            .map(OwnerId::from)
            .unwrap_or_else(|| coordinator.config().owner.clone());
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        Ok(Self {
            home,
            owner,
            coordinator,
            runtime,
        })
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn key(&self, project: ProjectId) -> ProjectKey {
        ProjectKey::new(self.owner.clone(), project)
    }

    /// Walk `dir` into a tree with the configured exclusions.
    pub fn read_dir_tree(&self, dir: &Path) -> Result<Tree> {
        let source = FsSource::new(dir);
        let result = self
            .block_on(walk(&source, "", self.coordinator.exclusions()))
            .with_context(|| format!("cannot read {}", dir.display()))?;
        for skipped in &result.skipped {
            eprintln!(
                "{} skipped {}: {}",
                "!".yellow().bold(),
                skipped.path,
                skipped.reason
            );
        }
        Ok(result.tree)
    }

    /// Write the files and folders of `tree` under `dir`.
    pub fn write_tree(&self, tree: &Tree, dir: &Path) -> Result<()> {
        self.block_on(async {
            let target = LocalSandbox::boot(dir, self.coordinator.exclusions().clone()).await?;
            target.mount(tree).await
        })
        .with_context(|| format!("failed to write files into {}", dir.display()))
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON")?
    );
    Ok(())
}

#[derive(Tabled)]
struct TreeRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "language")]
    language: String,
    #[tabled(rename = "bytes")]
    bytes: String,
}

pub fn print_tree(tree: &Tree) {
    if tree.is_empty() {
        println!("(empty tree)");
        return;
    }
    let rows: Vec<TreeRow> = tree
        .iter()
        .map(|node| TreeRow {
            path: node.path.clone(),
            kind: node.kind.to_string(),
            language: if node.is_file() {
                node.language()
            } else {
                String::new()
            },
            bytes: if node.is_file() {
                node.content().len().to_string()
            } else {
                String::new()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!(
        "{} files, {} folders",
        tree.file_count(),
        tree.len() - tree.file_count()
    );
}

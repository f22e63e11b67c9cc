//! `arbor load|save|push|pull|init|import|history`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use arbor_core::types::{BranchName, ProjectId, RepoRef};

use super::{print_json, print_tree, Workspace};

/// A command that takes just a project id.
#[derive(Args, Debug)]
pub struct ProjectArg {
    /// Project id.
    pub project: ProjectId,
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Project id.
    pub project: ProjectId,

    /// Also write the files into this directory.
    #[arg(long, value_name = "DIR")]
    pub into: Option<PathBuf>,

    /// Print the tree as JSON.
    #[arg(long)]
    pub json: bool,
}

impl LoadArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let key = ws.key(self.project);
        let tree = ws
            .block_on(ws.coordinator.load(&key))
            .with_context(|| format!("failed to load project {key}"))?;
        if let Some(dir) = &self.into {
            ws.write_tree(&tree, dir)?;
        }
        if self.json {
            return print_json(&tree);
        }
        print_tree(&tree);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct SaveArgs {
    /// Project id.
    pub project: ProjectId,

    /// Directory whose files become the project's tree.
    #[arg(long, value_name = "DIR")]
    pub from: PathBuf,
}

impl SaveArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let key = ws.key(self.project);
        let tree = ws.read_dir_tree(&self.from)?;
        let saved = ws
            .block_on(ws.coordinator.save(&key, tree, None))
            .with_context(|| format!("failed to save project {key}"))?;
        println!(
            "{} Saved {} files for project {key}",
            "✓".green(),
            saved.tree.file_count()
        );
        Ok(())
    }
}

pub fn push(ws: &Workspace, args: ProjectArg) -> Result<()> {
    let key = ws.key(args.project);
    let outcome = ws
        .block_on(ws.coordinator.push(&key))
        .with_context(|| format!("failed to push project {key}"))?;
    println!(
        "{} Pushed {} files for project {key} ({})",
        "✓".green(),
        outcome.files,
        short(&outcome.commit.0)
    );
    Ok(())
}

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Project id.
    pub project: ProjectId,

    /// Also write the pulled files into this directory.
    #[arg(long, value_name = "DIR")]
    pub into: Option<PathBuf>,

    /// Print the pulled tree as JSON.
    #[arg(long)]
    pub json: bool,
}

impl PullArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let key = ws.key(self.project);
        let tree = ws
            .block_on(ws.coordinator.pull(&key, None))
            .with_context(|| format!("failed to pull project {key}"))?;
        if let Some(dir) = &self.into {
            ws.write_tree(&tree, dir)?;
        }
        if self.json {
            return print_json(&tree);
        }
        println!(
            "{} Pulled {} files for project {key}",
            "✓".green(),
            tree.file_count()
        );
        if let Some(dir) = &self.into {
            println!("  Written to {}", dir.display());
        }
        Ok(())
    }
}

pub fn init(ws: &Workspace, args: ProjectArg) -> Result<()> {
    let key = ws.key(args.project);
    let project = ws
        .block_on(ws.coordinator.init(&key))
        .with_context(|| format!("failed to initialise a repository for project {key}"))?;
    if let Some(repo) = &project.remote_repo {
        println!(
            "{} Project {key} is now linked to {repo}@{}",
            "✓".green(),
            project.remote_branch
        );
    }
    Ok(())
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Repository as `owner/name`.
    pub repo: String,

    /// Project name; defaults to the repository name.
    #[arg(long)]
    pub name: Option<String>,

    /// Branch to track; defaults to the account's branch.
    #[arg(long)]
    pub branch: Option<String>,

    /// Emit the new project record as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ImportArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let repo = RepoRef::from(self.repo);
        let name = match self.name {
            Some(name) => name,
            None => repo
                .split()
                .map(|(_, name)| name.to_string())
                .with_context(|| format!("'{repo}' is not of the form owner/name"))?,
        };
        let branch = self.branch.map(BranchName::from);
        let project = ws
            .block_on(ws.coordinator.import(&ws.owner, repo.clone(), &name, branch))
            .with_context(|| format!("failed to import {repo}"))?;

        if self.json {
            return print_json(&project);
        }
        println!(
            "{} Imported {repo} as project {} '{}'",
            "✓".green(),
            project.id,
            project.name
        );
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Project id.
    pub project: ProjectId,

    /// Maximum number of commits to show.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct CommitRow {
    #[tabled(rename = "commit")]
    sha: String,
    #[tabled(rename = "message")]
    message: String,
}

impl HistoryArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let key = ws.key(self.project);
        let commits = ws
            .block_on(ws.coordinator.history(&key, self.limit))
            .with_context(|| format!("failed to read history of project {key}"))?;
        if self.json {
            return print_json(&commits);
        }
        let rows: Vec<CommitRow> = commits
            .iter()
            .map(|c| CommitRow {
                sha: short(&c.sha.0).to_string(),
                message: c.message.lines().next().unwrap_or_default().to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn short(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

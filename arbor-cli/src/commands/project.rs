//! `arbor project list|create|delete`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use arbor_core::types::{Project, ProjectId, ProjectType};

use super::super::ProjectTypeArg;
use super::{print_json, Workspace};

/// Manage the owner's project records.
#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// List the owner's projects.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create a project from a template or a local directory.
    Create(CreateArgs),

    /// Delete a project record and its saved tree.
    Delete {
        /// Project id.
        project: ProjectId,
    },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Display name of the project.
    pub name: String,

    /// Starter template: blank | html | react-tailwind | node. Defaults to blank.
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub project_type: Option<ProjectTypeArg>,

    /// Seed the project with the files of this directory instead of a template.
    #[arg(long, value_name = "DIR")]
    pub from: Option<PathBuf>,

    /// Emit the new project record as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(ws: &Workspace, cmd: ProjectCommand) -> Result<()> {
    match cmd {
        ProjectCommand::List { json } => list(ws, json),
        ProjectCommand::Create(args) => create(ws, args),
        ProjectCommand::Delete { project } => delete(ws, project),
    }
}

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "id")]
    id: u64,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "type")]
    project_type: String,
    #[tabled(rename = "remote")]
    remote: String,
    #[tabled(rename = "updated")]
    updated: String,
}

fn list(ws: &Workspace, json: bool) -> Result<()> {
    let projects = ws
        .block_on(ws.coordinator.list(&ws.owner))
        .with_context(|| format!("failed to list projects of '{}'", ws.owner))?;

    if json {
        return print_json(&projects);
    }
    if projects.is_empty() {
        println!("No projects for '{}'.", ws.owner);
        println!("Run: arbor project create <name>");
        return Ok(());
    }

    let rows: Vec<ProjectRow> = projects.iter().map(row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", format!("Projects of {}", ws.owner).bold());
    println!("{table}");
    Ok(())
}

fn row(project: &Project) -> ProjectRow {
    ProjectRow {
        id: project.id.0,
        name: project.name.clone(),
        project_type: project.project_type.to_string(),
        remote: match &project.remote_repo {
            Some(repo) => format!("{repo}@{}", project.remote_branch),
            None => "-".to_string(),
        },
        updated: project.updated_at.format("%Y-%m-%d %H:%M").to_string(),
    }
}

fn create(ws: &Workspace, args: CreateArgs) -> Result<()> {
    let files = match &args.from {
        Some(dir) => Some(ws.read_dir_tree(dir)?),
        None => None,
    };
    let project_type: ProjectType = args.project_type.unwrap_or_default().into();

    let project = ws
        .block_on(
            ws.coordinator
                .create(&ws.owner, &args.name, project_type, files),
        )
        .with_context(|| format!("failed to create project '{}'", args.name))?;

    if args.json {
        return print_json(&project);
    }
    println!(
        "{} Created project {} '{}' ({})",
        "✓".green(),
        project.id,
        project.name,
        project.project_type
    );
    if let Some(repo) = &project.remote_repo {
        println!("  Linked to {repo}@{}", project.remote_branch);
    }
    Ok(())
}

fn delete(ws: &Workspace, project: ProjectId) -> Result<()> {
    let key = ws.key(project);
    let removed = ws
        .block_on(ws.coordinator.delete(&key))
        .with_context(|| format!("failed to delete project {key}"))?;
    println!("{} Deleted project {} '{}'", "✓".green(), removed.id, removed.name);
    if let Some(repo) = removed.remote_repo {
        println!("  The repository {repo} was left untouched.");
    }
    Ok(())
}

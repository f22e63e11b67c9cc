//! Arbor: keep a project's files in step between a sandbox, the local
//! cache and a remote repository.
//!
//! # Usage
//!
//! ```text
//! arbor [--owner <id>] project list|create|delete
//! arbor account link --token <token> | unlink | show
//! arbor load <id> [--into <dir>] [--json]
//! arbor save <id> --from <dir>
//! arbor push <id>
//! arbor pull <id> [--into <dir>] [--json]
//! arbor init <id>
//! arbor import <owner/repo> --name <name> [--branch <branch>]
//! arbor history <id> [--limit <n>] [--json]
//! arbor daemon start|stop|status [--json]
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use arbor_core::types::ProjectType;
use commands::{
    account::AccountCommand,
    daemon::DaemonCommand,
    project::ProjectCommand,
    sync::{HistoryArgs, ImportArgs, LoadArgs, ProjectArg, PullArgs, SaveArgs},
    Workspace,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "arbor",
    version,
    about = "Sync project file trees between a sandbox, a local cache and a remote repository",
    long_about = None,
)]
struct Cli {
    /// Owner identity; defaults to `owner` in ~/.arbor/config.yaml.
    #[arg(long, global = true)]
    owner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage project records.
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Manage the owner's remote credential.
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Show a project's tree: cache, else remote, else empty.
    Load(LoadArgs),

    /// Save a directory as the project's tree.
    Save(SaveArgs),

    /// Commit the saved tree to the linked repository.
    Push(ProjectArg),

    /// Replace the saved tree with the remote one.
    Pull(PullArgs),

    /// Create a repository for the project and push to it.
    Init(ProjectArg),

    /// Create a project from an existing repository.
    Import(ImportArgs),

    /// List commits on the project's branch.
    History(HistoryArgs),

    /// Run or talk to the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared ProjectType argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `ProjectType` from CLI args.
#[derive(Debug, Clone, Default)]
pub struct ProjectTypeArg(pub ProjectType);

impl FromStr for ProjectTypeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blank" => Ok(Self(ProjectType::Blank)),
            "html" => Ok(Self(ProjectType::Html)),
            "react-tailwind" | "react" => Ok(Self(ProjectType::ReactTailwind)),
            "node" => Ok(Self(ProjectType::Node)),
            other => Err(format!(
                "unknown project type '{other}'; expected: blank, html, react-tailwind, node"
            )),
        }
    }
}

impl fmt::Display for ProjectTypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<ProjectTypeArg> for ProjectType {
    fn from(p: ProjectTypeArg) -> Self {
        p.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let owner = cli.owner;
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Account { command } => commands::account::run(command, owner),
        Commands::Project { command } => commands::project::run(&Workspace::open(owner)?, command),
        Commands::Load(args) => args.run(&Workspace::open(owner)?),
        Commands::Save(args) => args.run(&Workspace::open(owner)?),
        Commands::Push(args) => commands::sync::push(&Workspace::open(owner)?, args),
        Commands::Pull(args) => args.run(&Workspace::open(owner)?),
        Commands::Init(args) => commands::sync::init(&Workspace::open(owner)?, args),
        Commands::Import(args) => args.run(&Workspace::open(owner)?),
        Commands::History(args) => args.run(&Workspace::open(owner)?),
    }
}

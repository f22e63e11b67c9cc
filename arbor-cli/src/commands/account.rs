//! `arbor account link|unlink|show`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;

use arbor_core::config;
use arbor_core::registry;
use arbor_core::types::{Account, BranchName, OwnerId};

use super::print_json;

/// Manage the owner's remote credential.
#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Store a remote access token for the owner.
    Link {
        /// Access token for the remote store.
        #[arg(long)]
        token: String,

        /// Branch new and imported projects track.
        #[arg(long)]
        branch: Option<String>,
    },

    /// Forget the owner's token.
    Unlink,

    /// Show the owner's account settings.
    Show {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn run(cmd: AccountCommand, owner: Option<String>) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let owner = match owner {
        Some(owner) => OwnerId::from(owner),
        None => config::load_at(&home).context("failed to load config")?.owner,
    };
    let mut account = registry::load_account_at(&home, &owner)
        .with_context(|| format!("failed to load account '{owner}'"))?;

    match cmd {
        AccountCommand::Link { token, branch } => {
            account.remote_token = Some(token);
            if let Some(branch) = branch {
                account.default_branch = BranchName::from(branch);
            }
            registry::save_account_at(&home, &account)
                .with_context(|| format!("failed to save account '{owner}'"))?;
            println!("{} Linked a remote credential for '{owner}'", "✓".green());
        }
        AccountCommand::Unlink => {
            account.remote_token = None;
            registry::save_account_at(&home, &account)
                .with_context(|| format!("failed to save account '{owner}'"))?;
            println!("{} Removed the remote credential for '{owner}'", "✓".green());
        }
        AccountCommand::Show { json } => show(&account, json)?,
    }
    Ok(())
}

fn show(account: &Account, json: bool) -> Result<()> {
    let credential = account.credential().map(mask);
    if json {
        return print_json(&json!({
            "owner": account.owner,
            "credential": credential,
            "default_branch": account.default_branch,
        }));
    }
    println!("owner:          {}", account.owner);
    println!(
        "credential:     {}",
        credential.unwrap_or_else(|| "not set".dimmed().to_string())
    );
    println!("default branch: {}", account.default_branch);
    Ok(())
}

/// Last four characters only.
fn mask(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

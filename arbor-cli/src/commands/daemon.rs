//! `arbor daemon start|stop|status`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::{json, Value};

use arbor_daemon::paths::socket_path;
use arbor_daemon::{request_status, request_stop, start_blocking, DaemonError};

use super::print_json;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground until ctrl-c or `arbor daemon stop`.
    Start,
    /// Ask a running daemon to shut down.
    Stop,
    /// Show whether the daemon is up and which sessions it holds open.
    Status {
        /// Emit the raw status payload as JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start => start_blocking(&home).context("daemon exited with error"),
        DaemonCommand::Stop => {
            match request_stop(&home) {
                Ok(()) => println!("{} Daemon stop requested", "✓".green()),
                Err(DaemonError::DaemonNotRunning { .. }) => println!("Daemon is not running."),
                Err(err) => return Err(err).context("failed to stop daemon"),
            }
            Ok(())
        }
        DaemonCommand::Status { json } => {
            let status = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { socket }) => json!({
                    "running": false,
                    "socket": socket.display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            if json {
                return print_json(&status);
            }
            print_status(&status, &socket_path(&home).display().to_string());
            Ok(())
        }
    }
}

fn print_status(status: &Value, socket: &str) {
    if status["running"] != json!(true) {
        println!("{} daemon is not running ({socket})", "●".dimmed());
        return;
    }
    println!("{} daemon is running on {socket}", "●".green());
    let sessions = status["sessions"].as_array().map(Vec::as_slice).unwrap_or_default();
    if sessions.is_empty() {
        println!("  no open sessions");
    }
    for session in sessions {
        println!(
            "  session {}",
            session["project"].as_str().unwrap_or("?")
        );
    }
}

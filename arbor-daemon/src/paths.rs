use std::path::{Path, PathBuf};

use arbor_core::types::ProjectKey;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn arbor_root(home: &Path) -> PathBuf {
    arbor_core::registry::arbor_root(home)
}

pub fn run_dir(home: &Path) -> PathBuf {
    arbor_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    arbor_root(home).join(DAEMON_SOCKET)
}

pub fn sandboxes_dir(home: &Path) -> PathBuf {
    run_dir(home).join("sandboxes")
}

/// `<home>/.arbor/run/sandboxes/<owner>/<id>`
pub fn sandbox_dir(home: &Path, key: &ProjectKey) -> PathBuf {
    sandboxes_dir(home)
        .join(&key.owner.0)
        .join(key.project.to_string())
}

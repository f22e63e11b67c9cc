//! Per-owner YAML registry of project records and accounts.
//!
//! # Storage layout
//!
//! ```text
//! ~/.arbor/
//!   accounts/
//!     <owner>.yaml          (credential and defaults, mode 0600)
//!   projects/
//!     <owner>/              (mode 0700)
//!       <id>.yaml           (one file per project, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home, used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::error::{io_err, RegistryError};
use crate::types::{
    Account, BranchName, OwnerId, Project, ProjectId, ProjectKey, ProjectType, RepoRef,
};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.arbor/`
pub fn arbor_root(home: &Path) -> PathBuf {
    home.join(".arbor")
}

/// `<home>/.arbor/projects/<owner>/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn owner_dir_at(home: &Path, owner: &OwnerId) -> Result<PathBuf, RegistryError> {
    let dir = arbor_root(home).join("projects").join(&owner.0);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.arbor/projects/<owner>/<id>.yaml`. Pure, no I/O.
pub fn project_path_at(home: &Path, key: &ProjectKey) -> PathBuf {
    arbor_root(home)
        .join("projects")
        .join(&key.owner.0)
        .join(format!("{}.yaml", key.project))
}

/// `<home>/.arbor/accounts/<owner>.yaml`. Pure, no I/O.
pub fn account_path_at(home: &Path, owner: &OwnerId) -> PathBuf {
    arbor_root(home)
        .join("accounts")
        .join(format!("{}.yaml", owner.0))
}

// ---------------------------------------------------------------------------
// 2. Projects: load / list
// ---------------------------------------------------------------------------

/// Load one project record.
///
/// Returns `RegistryError::ProjectNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn load_project_at(home: &Path, key: &ProjectKey) -> Result<Project, RegistryError> {
    let path = project_path_at(home, key);
    if !path.exists() {
        return Err(RegistryError::ProjectNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| RegistryError::Parse { path, source })
}

/// `load_project_at` convenience wrapper.
pub fn load_project(key: &ProjectKey) -> Result<Project, RegistryError> {
    load_project_at(&home()?, key)
}

/// All project records of `owner`, sorted by id.
pub fn list_projects_at(home: &Path, owner: &OwnerId) -> Result<Vec<Project>, RegistryError> {
    let dir = arbor_root(home).join("projects").join(&owner.0);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut projects = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
            continue;
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let project: Project = serde_yaml::from_str(&contents)
            .map_err(|source| RegistryError::Parse { path, source })?;
        projects.push(project);
    }
    projects.sort_by_key(|p| p.id);
    Ok(projects)
}

/// `list_projects_at` convenience wrapper.
pub fn list_projects(owner: &OwnerId) -> Result<Vec<Project>, RegistryError> {
    list_projects_at(&home()?, owner)
}

// ---------------------------------------------------------------------------
// 3. Projects: save / create / delete
// ---------------------------------------------------------------------------

/// Atomically save a project record.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_project_at(home: &Path, project: &Project) -> Result<(), RegistryError> {
    owner_dir_at(home, &project.owner)?;
    write_yaml_atomic(&project_path_at(home, &project.key()), project)
}

/// Allocate the next id for `owner` and write a new project record.
///
/// Ids start at 1 and are one past the highest id on disk. Callers creating
/// projects concurrently for the same owner must serialize around this call.
pub fn create_project_at(
    home: &Path,
    owner: &OwnerId,
    name: &str,
    project_type: ProjectType,
    remote_repo: Option<RepoRef>,
    remote_branch: BranchName,
) -> Result<Project, RegistryError> {
    let next = list_projects_at(home, owner)?
        .last()
        .map(|p| p.id.0 + 1)
        .unwrap_or(1);
    let now = Utc::now();
    let project = Project {
        id: ProjectId(next),
        owner: owner.clone(),
        name: name.to_string(),
        project_type,
        remote_repo,
        remote_branch,
        created_at: now,
        updated_at: now,
    };
    save_project_at(home, &project)?;
    Ok(project)
}

/// Remove a project record. Missing records are not an error.
pub fn delete_project_at(home: &Path, key: &ProjectKey) -> Result<bool, RegistryError> {
    let path = project_path_at(home, key);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(&path, e)),
    }
}

// ---------------------------------------------------------------------------
// 4. Accounts
// ---------------------------------------------------------------------------

/// Load the account for `owner`; an owner without a file gets a fresh
/// account with no credential.
pub fn load_account_at(home: &Path, owner: &OwnerId) -> Result<Account, RegistryError> {
    let path = account_path_at(home, owner);
    if !path.exists() {
        return Ok(Account::new(owner.clone()));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| RegistryError::Parse { path, source })
}

/// `load_account_at` convenience wrapper.
pub fn load_account(owner: &OwnerId) -> Result<Account, RegistryError> {
    load_account_at(&home()?, owner)
}

/// Atomically save an account (mode `0600`; it holds the credential).
pub fn save_account_at(home: &Path, account: &Account) -> Result<(), RegistryError> {
    let dir = arbor_root(home).join("accounts");
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    write_yaml_atomic(&account_path_at(home, &account.owner), account)
}

/// `save_account_at` convenience wrapper.
pub fn save_account(account: &Account) -> Result<(), RegistryError> {
    save_account_at(&home()?, account)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RegistryError> {
    let yaml = serde_yaml::to_string(value)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

pub fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! `~/.arbor/config.yaml`: engine-wide settings.
//!
//! Every field is optional; a missing file yields [`Config::default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, RegistryError};
use crate::registry::arbor_root;
use crate::types::{BranchName, OwnerId};

/// Folder names recorded but never descended into during a walk.
pub const DEFAULT_EXCLUSIONS: &[&str] = &["node_modules", ".git"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Owner identity used when the CLI is not given `--owner`.
    pub owner: OwnerId,
    pub exclusions: Vec<String>,
    pub default_branch: BranchName,
    pub remote: RemoteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: OwnerId::from("local"),
            exclusions: DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
            default_branch: BranchName::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Which remote store implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    #[default]
    Github,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    pub api_base: String,
    /// Root of the on-disk object store for the `local` backend.
    /// Defaults to `~/.arbor/remote`.
    pub local_root: Option<PathBuf>,
    /// Create new repositories as private.
    pub private: bool,
    /// Create and link a repository when a project is created by an owner
    /// with a credential.
    pub auto_create: bool,
    pub commit_message: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::Github,
            api_base: "https://api.github.com".to_string(),
            local_root: None,
            private: true,
            auto_create: true,
            commit_message: "Sync from arbor".to_string(),
        }
    }
}

impl RemoteConfig {
    /// Resolved root of the local object store.
    pub fn local_root_at(&self, home: &Path) -> PathBuf {
        self.local_root
            .clone()
            .unwrap_or_else(|| arbor_root(home).join("remote"))
    }
}

/// `<home>/.arbor/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    arbor_root(home).join("config.yaml")
}

/// Load the config, falling back to defaults when the file is absent.
pub fn load_at(home: &Path) -> Result<Config, RegistryError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| RegistryError::Parse { path, source })
}

/// Write the config (atomic `.tmp` + rename).
pub fn save_at(home: &Path, config: &Config) -> Result<(), RegistryError> {
    let path = config_path_at(home);
    let dir = arbor_root(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let home = TempDir::new().unwrap();
        let config = load_at(home.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.exclusions, vec!["node_modules", ".git"]);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir_all(arbor_root(home.path())).unwrap();
        std::fs::write(
            config_path_at(home.path()),
            "remote:\n  backend: local\ndefault_branch: trunk\n",
        )
        .unwrap();

        let config = load_at(home.path()).unwrap();
        assert_eq!(config.remote.backend, RemoteBackend::Local);
        assert_eq!(config.default_branch.0, "trunk");
        assert_eq!(config.remote.commit_message, "Sync from arbor");
        assert_eq!(
            config.remote.local_root_at(home.path()),
            home.path().join(".arbor").join("remote")
        );
    }

    #[test]
    fn save_then_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let mut config = Config::default();
        config.exclusions.push("target".into());
        config.remote.private = false;
        save_at(home.path(), &config).unwrap();
        assert_eq!(load_at(home.path()).unwrap(), config);
    }

    #[test]
    fn malformed_file_reports_path() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir_all(arbor_root(home.path())).unwrap();
        std::fs::write(config_path_at(home.path()), "exclusions: {not: [a list").unwrap();
        let err = load_at(home.path()).unwrap_err();
        assert!(err.to_string().contains("config.yaml"), "got: {err}");
    }
}

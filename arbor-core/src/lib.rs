//! Arbor core library: tree model, domain types, registry persistence, config.
//!
//! - [`tree`]: [`Tree`] / [`FsNode`] and their invariants
//! - [`types`]: newtypes and project/account records
//! - [`error`]: [`RegistryError`], [`TreeError`]
//! - [`registry`]: project and account load / save / list
//! - [`config`]: `~/.arbor/config.yaml`

pub mod config;
pub mod error;
pub mod registry;
pub mod tree;
pub mod types;

pub use config::{Config, RemoteBackend, RemoteConfig, DEFAULT_EXCLUSIONS};
pub use error::{RegistryError, TreeError};
pub use tree::{FsNode, NodeKind, Tree};
pub use types::{
    Account, BranchName, OwnerId, Project, ProjectId, ProjectKey, ProjectType, RepoRef,
    DEFAULT_BRANCH,
};

//! Domain types for projects, accounts and their remote links.
//!
//! All types are serializable via serde + serde_yaml.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Branch tracked when nothing else is configured.
pub const DEFAULT_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identity of the account that owns a set of projects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Numeric project identifier, unique per owner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for ProjectId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for ProjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Remote repository reference, e.g. `octocat/arbor-demo-1234`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef(pub String);

impl RepoRef {
    /// `(owner, name)` halves; `None` when there is no `/` or either half is empty.
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0
            .split_once('/')
            .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepoRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepoRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of the single branch a project tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(pub String);

impl Default for BranchName {
    fn default() -> Self {
        Self(DEFAULT_BRANCH.to_string())
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BranchName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BranchName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Stable per-project key: `(owner, project id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectKey {
    pub owner: OwnerId,
    pub project: ProjectId,
}

impl ProjectKey {
    pub fn new(owner: impl Into<OwnerId>, project: impl Into<ProjectId>) -> Self {
        Self {
            owner: owner.into(),
            project: project.into(),
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.project)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Starter kind of a project; selects the template used on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    #[default]
    Blank,
    Html,
    ReactTailwind,
    Node,
    Imported,
}

impl ProjectType {
    pub fn all() -> &'static [ProjectType] {
        &[
            ProjectType::Blank,
            ProjectType::Html,
            ProjectType::ReactTailwind,
            ProjectType::Node,
            ProjectType::Imported,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Blank => "blank",
            ProjectType::Html => "html",
            ProjectType::ReactTailwind => "react-tailwind",
            ProjectType::Node => "node",
            ProjectType::Imported => "imported",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A project record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub owner: OwnerId,
    pub name: String,
    pub project_type: ProjectType,
    /// Absent until a repository is created (Init) or linked (Import).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_repo: Option<RepoRef>,
    #[serde(default)]
    pub remote_branch: BranchName,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn key(&self) -> ProjectKey {
        ProjectKey {
            owner: self.owner.clone(),
            project: self.id,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.remote_repo.is_some()
    }

    /// Lowercase name with every run of non-alphanumerics collapsed to `-`.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// Per-owner account settings, including the remote credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub owner: OwnerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_token: Option<String>,
    #[serde(default)]
    pub default_branch: BranchName,
}

impl Account {
    pub fn new(owner: impl Into<OwnerId>) -> Self {
        Self {
            owner: owner.into(),
            remote_token: None,
            default_branch: BranchName::default(),
        }
    }

    /// The credential, when one is set and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.remote_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Tree Model: the file/folder set of a project at one point in time.
//!
//! Invariants, checked on every mutation and on deserialization:
//! - map keys are normalised slash-separated paths equal to each node's `path`
//! - every proper prefix of a path exists in the tree as a folder
//! - `content` is present iff the node is a file
//!
//! Mutations are atomic: a failed `put` or `rename` leaves the tree untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Whether a node is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Folder => write!(f, "folder"),
        }
    }
}

/// One file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsNode {
    pub path: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FsNode {
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::File,
            content: Some(content.into()),
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::Folder,
            content: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Final path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// File content, or `""` for folders.
    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Derived display language; see [`language_for`].
    pub fn language(&self) -> String {
        language_for(&self.path)
    }

    fn check_content(&self) -> Result<(), TreeError> {
        match (self.kind, &self.content) {
            (NodeKind::File, None) => Err(TreeError::MissingContent {
                path: self.path.clone(),
            }),
            (NodeKind::Folder, Some(_)) => Err(TreeError::UnexpectedContent {
                path: self.path.clone(),
            }),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Lowercase extension of the final path segment, or `"text"` when there is none.
pub fn language_for(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => "text".to_string(),
    }
}

/// Normalise a caller-supplied path: strips leading `./` and `/` and a
/// trailing `/`; rejects empty, `.` and `..` segments.
pub fn normalize_path(raw: &str) -> Result<String, TreeError> {
    let invalid = |reason| TreeError::InvalidPath {
        path: raw.to_string(),
        reason,
    };

    // Leading `/` and `./` in any mix: `/./a`, `.//a`, `././a`.
    let mut trimmed = raw;
    loop {
        let next = trimmed.trim_start_matches('/');
        let next = next.strip_prefix("./").unwrap_or(next);
        if next.len() == trimmed.len() {
            break;
        }
        trimmed = next;
    }
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("empty path"));
    }
    for segment in trimmed.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(trimmed.to_string())
}

/// Proper prefixes of `path`, shallowest first: `a/b/c` yields `a`, `a/b`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

/// `true` when `path` is `prefix` itself or lies underneath it.
pub fn is_within(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// Mapping from path to node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, FsNode>", into = "BTreeMap<String, FsNode>")]
pub struct Tree {
    nodes: BTreeMap<String, FsNode>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from complete node list; every invariant must already hold.
    pub fn from_nodes(nodes: impl IntoIterator<Item = FsNode>) -> Result<Self, TreeError> {
        let nodes: BTreeMap<String, FsNode> = nodes
            .into_iter()
            .map(|node| (node.path.clone(), node))
            .collect();
        Self::try_from(nodes)
    }

    /// Build a tree from `(path, content)` pairs, creating folders for every
    /// path prefix.
    pub fn from_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Result<Self, TreeError>
    where
        P: Into<String>,
        C: Into<String>,
    {
        let mut tree = Self::new();
        for (path, content) in files {
            tree.put(FsNode::file(path, content))?;
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FsNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Content of the file at `path`, if there is one.
    pub fn content_of(&self, path: &str) -> Option<&str> {
        self.nodes.get(path).and_then(|n| n.content.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FsNode> {
        self.nodes.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = &FsNode> {
        self.nodes.values().filter(|n| n.is_file())
    }

    pub fn folders(&self) -> impl Iterator<Item = &FsNode> {
        self.nodes.values().filter(|n| n.is_folder())
    }

    pub fn file_count(&self) -> usize {
        self.files().count()
    }

    /// Compare file nodes only, ignoring folders.
    pub fn same_files(&self, other: &Tree) -> bool {
        self.files().eq(other.files())
    }

    /// Insert or replace a node, creating missing ancestor folders.
    ///
    /// Returns the node previously stored at that path.
    pub fn put(&mut self, node: FsNode) -> Result<Option<FsNode>, TreeError> {
        let path = normalize_path(&node.path)?;
        let node = FsNode {
            path: path.clone(),
            ..node
        };
        node.check_content()?;

        if let Some(existing) = self.nodes.get(&path) {
            if existing.kind != node.kind {
                return Err(TreeError::KindConflict {
                    path,
                    existing: existing.kind,
                    requested: node.kind,
                });
            }
        }
        for ancestor in ancestors(&path) {
            if self.nodes.get(ancestor).is_some_and(FsNode::is_file) {
                return Err(TreeError::ParentIsFile {
                    path: path.clone(),
                    parent: ancestor.to_string(),
                });
            }
        }

        for ancestor in ancestors(&path) {
            self.nodes
                .entry(ancestor.to_string())
                .or_insert_with(|| FsNode::folder(ancestor));
        }
        Ok(self.nodes.insert(path, node))
    }

    /// Remove the node at `path` and, for a folder, everything beneath it.
    pub fn remove(&mut self, path: &str) -> Vec<FsNode> {
        let Ok(path) = normalize_path(path) else {
            return Vec::new();
        };
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| is_within(key, &path))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|key| self.nodes.remove(&key))
            .collect()
    }

    /// Move `from` (and, for a folder, its descendants) to `to`.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), TreeError> {
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        if !self.nodes.contains_key(&from) {
            return Err(TreeError::NotFound { path: from });
        }
        if from == to {
            return Ok(());
        }
        if is_within(&to, &from) {
            return Err(TreeError::RenameIntoSelf { from, to });
        }
        if self.nodes.contains_key(&to) {
            return Err(TreeError::AlreadyExists { path: to });
        }

        let mut next = self.clone();
        for node in next.remove(&from) {
            let path = format!("{to}{}", &node.path[from.len()..]);
            next.put(FsNode { path, ..node })?;
        }
        *self = next;
        Ok(())
    }

    /// Check every invariant listed in the module docs.
    pub fn validate(&self) -> Result<(), TreeError> {
        for (key, node) in &self.nodes {
            if normalize_path(key)? != *key {
                return Err(TreeError::InvalidPath {
                    path: key.clone(),
                    reason: "path is not normalised",
                });
            }
            if *key != node.path {
                return Err(TreeError::KeyMismatch {
                    key: key.clone(),
                    path: node.path.clone(),
                });
            }
            node.check_content()?;
            for ancestor in ancestors(key) {
                match self.nodes.get(ancestor) {
                    None => {
                        return Err(TreeError::Orphan {
                            path: key.clone(),
                            missing: ancestor.to_string(),
                        })
                    }
                    Some(parent) if parent.is_file() => {
                        return Err(TreeError::ParentIsFile {
                            path: key.clone(),
                            parent: ancestor.to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    pub fn into_nodes(self) -> BTreeMap<String, FsNode> {
        self.nodes
    }
}

impl TryFrom<BTreeMap<String, FsNode>> for Tree {
    type Error = TreeError;

    fn try_from(nodes: BTreeMap<String, FsNode>) -> Result<Self, Self::Error> {
        let tree = Tree { nodes };
        tree.validate()?;
        Ok(tree)
    }
}

impl From<Tree> for BTreeMap<String, FsNode> {
    fn from(tree: Tree) -> Self {
        tree.nodes
    }
}

impl<'a> IntoIterator for &'a Tree {
    type Item = &'a FsNode;
    type IntoIter = std::collections::btree_map::Values<'a, String, FsNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.values()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree {
        Tree::from_files([
            ("src/main.rs", "fn main() {}"),
            ("src/lib/mod.rs", "pub mod x;"),
            ("src-extra/notes.md", "# notes"),
            ("README.md", "hello"),
        ])
        .unwrap()
    }

    #[test]
    fn put_creates_missing_parent_folders() {
        let mut tree = Tree::new();
        tree.put(FsNode::file("a/b/c.txt", "x")).unwrap();
        assert!(tree.get("a").unwrap().is_folder());
        assert!(tree.get("a/b").unwrap().is_folder());
        assert_eq!(tree.content_of("a/b/c.txt"), Some("x"));
        tree.validate().unwrap();
    }

    #[test]
    fn put_replaces_same_kind_and_returns_previous() {
        let mut tree = Tree::from_files([("a.txt", "v1")]).unwrap();
        let previous = tree.put(FsNode::file("a.txt", "v2")).unwrap();
        assert_eq!(previous.unwrap().content(), "v1");
        assert_eq!(tree.content_of("a.txt"), Some("v2"));
    }

    #[test]
    fn put_rejects_kind_conflict() {
        let mut tree = sample();
        let err = tree.put(FsNode::file("src", "oops")).unwrap_err();
        assert!(matches!(err, TreeError::KindConflict { .. }));
        assert!(tree.get("src").unwrap().is_folder());
    }

    #[test]
    fn put_under_a_file_fails_without_side_effects() {
        let mut tree = sample();
        let before = tree.clone();
        let err = tree.put(FsNode::file("README.md/inner/x", "x")).unwrap_err();
        assert!(matches!(err, TreeError::ParentIsFile { .. }));
        assert_eq!(tree, before);
    }

    #[test]
    fn put_normalises_leading_dot_slash() {
        let mut tree = Tree::new();
        tree.put(FsNode::file("./docs/a.md", "a")).unwrap();
        assert!(tree.contains("docs/a.md"));
    }

    #[test]
    fn remove_folder_takes_descendants_but_not_similar_siblings() {
        let mut tree = sample();
        let removed = tree.remove("src");
        assert_eq!(removed.len(), 4);
        assert!(!tree.contains("src/lib/mod.rs"));
        assert!(tree.contains("src-extra/notes.md"));
        tree.validate().unwrap();
    }

    #[test]
    fn remove_missing_path_is_a_noop() {
        let mut tree = sample();
        assert!(tree.remove("nope").is_empty());
        assert_eq!(tree.len(), sample().len());
    }

    #[test]
    fn rename_folder_rewrites_prefixes() {
        let mut tree = sample();
        tree.rename("src", "app/source").unwrap();
        assert!(tree.get("app").unwrap().is_folder());
        assert_eq!(tree.content_of("app/source/lib/mod.rs"), Some("pub mod x;"));
        assert!(!tree.contains("src"));
        assert!(tree.contains("src-extra"));
        tree.validate().unwrap();
    }

    #[test]
    fn rename_into_itself_is_rejected() {
        let mut tree = sample();
        let err = tree.rename("src", "src/nested").unwrap_err();
        assert!(matches!(err, TreeError::RenameIntoSelf { .. }));
    }

    #[test]
    fn rename_onto_existing_path_is_rejected() {
        let mut tree = sample();
        let err = tree.rename("README.md", "src/main.rs").unwrap_err();
        assert!(matches!(err, TreeError::AlreadyExists { .. }));
        assert_eq!(tree, sample());
    }

    #[test]
    fn rename_missing_source_is_not_found() {
        let mut tree = sample();
        let err = tree.rename("ghost", "spirit").unwrap_err();
        assert!(matches!(err, TreeError::NotFound { .. }));
    }

    #[test]
    fn deserialize_rejects_orphans() {
        let json = r#"{"a/b.txt":{"path":"a/b.txt","kind":"file","content":"x"}}"#;
        let err = serde_json::from_str::<Tree>(json).unwrap_err();
        assert!(err.to_string().contains("no parent folder"), "got: {err}");
    }

    #[test]
    fn deserialize_rejects_folder_with_content() {
        let json = r#"{"a":{"path":"a","kind":"folder","content":"x"}}"#;
        assert!(serde_json::from_str::<Tree>(json).is_err());
    }

    #[test]
    fn serde_json_roundtrip_preserves_tree() {
        let tree = sample();
        let json = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn ancestors_are_shallowest_first() {
        let got: Vec<&str> = ancestors("a/b/c").collect();
        assert_eq!(got, vec!["a", "a/b"]);
        assert_eq!(ancestors("top").count(), 0);
    }

    #[test]
    fn normalize_rejects_traversal() {
        assert!(normalize_path("a/../b").is_err());
        assert!(normalize_path("a//b").is_err());
        assert!(normalize_path("").is_err());
        assert_eq!(normalize_path("/a/b/").unwrap(), "a/b");
        assert!(normalize_path("a/./b").is_err());
    }

    #[test]
    fn normalize_strips_mixed_leading_prefixes() {
        assert_eq!(normalize_path("/./a").unwrap(), "a");
        assert_eq!(normalize_path(".//a/b").unwrap(), "a/b");
        assert_eq!(normalize_path("././a").unwrap(), "a");
        assert!(normalize_path("/./").is_err());
    }
}

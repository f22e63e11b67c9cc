use std::collections::BTreeSet;

use arbor_core::config::DEFAULT_EXCLUSIONS;
use arbor_core::tree::ancestors;

/// Folder names that a walk records but never descends into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    names: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// No exclusions at all.
    pub fn none() -> Self {
        Self {
            names: BTreeSet::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Shallowest proper ancestor of `path` whose final segment is excluded.
    ///
    /// `node_modules/react/index.js` yields `node_modules`; `node_modules`
    /// itself yields `None` because a walk still records the folder.
    pub fn excluded_ancestor<'a>(&self, path: &'a str) -> Option<&'a str> {
        ancestors(path).find(|prefix| {
            let name = prefix.rsplit('/').next().unwrap_or(prefix);
            self.contains(name)
        })
    }

    /// `true` when a walk would never have enumerated `path`.
    pub fn is_inside_excluded(&self, path: &str) -> bool {
        self.excluded_ancestor(path).is_some()
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUSIONS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_holds_dependency_and_vcs_dirs() {
        let set = ExclusionSet::default();
        assert!(set.contains("node_modules"));
        assert!(set.contains(".git"));
        assert!(!set.contains("src"));
    }

    #[test]
    fn excluded_ancestor_is_shallowest_match() {
        let set = ExclusionSet::default();
        assert_eq!(
            set.excluded_ancestor("web/node_modules/a/.git/HEAD"),
            Some("web/node_modules")
        );
        assert_eq!(set.excluded_ancestor("node_modules"), None);
        assert_eq!(set.excluded_ancestor("src/node_modules_notes.md"), None);
    }
}

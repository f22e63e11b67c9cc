//! Merge an editor tree with a live snapshot before saving.
//!
//! The live snapshot wins entry for entry: its nodes replace the editor's and
//! editor nodes missing from the snapshot are dropped. Two exceptions keep
//! the editor's copy: content under an excluded folder, which a snapshot
//! never enumerates, as long as the excluded folder itself is live; and
//! paths the snapshot found but could not read.

use serde::Serialize;

use arbor_core::tree::{is_within, Tree};
use arbor_walker::{ExclusionSet, Walk};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciled {
    pub tree: Tree,
    /// Editor paths that were not carried over.
    pub dropped: Vec<String>,
}

pub fn reconcile(editor: &Tree, live: &Walk, exclusions: &ExclusionSet) -> Reconciled {
    let mut tree = live.tree.clone();
    let mut dropped = Vec::new();

    for node in editor {
        if live.tree.contains(&node.path) {
            continue;
        }
        let unreadable = live
            .skipped
            .iter()
            .any(|skipped| is_within(&node.path, &skipped.path));
        let shielded = exclusions
            .excluded_ancestor(&node.path)
            .and_then(|folder| live.tree.get(folder))
            .is_some_and(|folder| folder.is_folder());
        if (unreadable || shielded) && tree.put(node.clone()).is_ok() {
            continue;
        }
        dropped.push(node.path.clone());
    }

    let lost_files = dropped
        .iter()
        .filter(|p| editor.get(p).is_some_and(|n| n.is_file()))
        .count();
    if lost_files > 0 {
        tracing::warn!(
            "{lost_files} editor-only file(s) are not in the live snapshot and were dropped: {}",
            dropped.join(", ")
        );
    }
    Reconciled { tree, dropped }
}

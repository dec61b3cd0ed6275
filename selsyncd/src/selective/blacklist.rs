use std::collections::BTreeSet;

use tracing::{info, warn};

use super::node::{CheckState, SubfolderNode};
use super::tree::SelectiveSyncTree;
use crate::folder::{FolderRegistry, SyncScheduler};

/// Flattens the check states under `node` into excluded paths.
///
/// Unchecked subtrees collapse to their own path. A partially checked node
/// that was never listed this session keeps whatever `previous` excluded
/// beneath it.
pub fn project_blacklist(node: &SubfolderNode, previous: &[String]) -> Vec<String> {
    match node.check_state {
        CheckState::Unchecked => vec![node.path.clone()],
        CheckState::Checked => Vec::new(),
        CheckState::PartiallyChecked if node.fetched => node
            .children
            .iter()
            .flat_map(|child| project_blacklist(child, previous))
            .collect(),
        CheckState::PartiallyChecked => previous
            .iter()
            .filter(|entry| entry.starts_with(&node.path))
            .cloned()
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistChange {
    pub alias: String,
    pub previous: Vec<String>,
    pub blacklist: Vec<String>,
    /// Paths present in exactly one of the two lists, sorted.
    pub changed: Vec<String>,
}

impl BlacklistChange {
    fn new(alias: &str, previous: Vec<String>, blacklist: Vec<String>) -> Self {
        let old: BTreeSet<&String> = previous.iter().collect();
        let new: BTreeSet<&String> = blacklist.iter().collect();
        let changed = old
            .symmetric_difference(&new)
            .map(|path| (*path).clone())
            .collect();
        Self {
            alias: alias.to_string(),
            previous,
            blacklist,
            changed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Computes the new blacklist of every folder whose root was listed this
/// session. Folders never expanded are left out.
pub fn plan_changes(tree: &SelectiveSyncTree, registry: &dyn FolderRegistry) -> Vec<BlacklistChange> {
    tree.roots()
        .iter()
        .filter(|root| root.is_fetched())
        .filter_map(|root| {
            let folder = registry.folder(root.owner())?;
            let previous = folder.selective_sync_blacklist().to_vec();
            let blacklist = project_blacklist(root, &previous);
            Some(BlacklistChange::new(folder.alias(), previous, blacklist))
        })
        .collect()
}

/// Writes the edited selection back to the folders and discards the tree.
///
/// For each folder whose blacklist actually changed, a running sync is
/// terminated, the journal is told to distrust every changed path, and a new
/// sync is requested. Journal failures are logged and do not stop the
/// remaining work. Returns the folders that changed.
pub async fn apply_selective_sync(
    tree: &mut SelectiveSyncTree,
    registry: &mut dyn FolderRegistry,
    scheduler: &dyn SyncScheduler,
) -> Vec<BlacklistChange> {
    if !tree.is_dirty() {
        return Vec::new();
    }

    let mut applied = Vec::new();
    for change in plan_changes(tree, &*registry) {
        let Some(index) = registry.index_of(&change.alias) else {
            continue;
        };
        let Some(folder) = registry.folder_at_mut(index) else {
            continue;
        };
        folder.set_selective_sync_blacklist(change.blacklist.clone());
        if change.is_empty() {
            continue;
        }

        info!(
            alias = %change.alias,
            changed = change.changed.len(),
            "selective sync blacklist changed"
        );
        if folder.is_busy() {
            folder.terminate_sync();
        }
        let journal = folder.journal();
        for path in &change.changed {
            if let Err(err) = journal.avoid_read_from_db_on_next_sync(path).await {
                warn!(alias = %change.alias, path = %path, "failed to invalidate journal entry: {err}");
            }
        }
        scheduler.schedule_sync(&change.alias);
        applied.push(change);
    }

    tree.reset();
    applied
}

#[cfg(test)]
#[path = "blacklist_tests.rs"]
mod tests;

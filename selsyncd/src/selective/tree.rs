use std::ops::Range;

use selsync_core::{DirectoryListing, LSCOL_PROPERTIES};
use tracing::debug;

use super::node::{CheckState, PathIndex, SubfolderNode};
use crate::folder::FolderRegistry;
use crate::sync::paths::{decoded_url_path, join_remote, last_segment, strip_remote_root};

/// Blacklist entry that excludes a whole folder.
pub const EXCLUDE_ALL: &str = "/";

/// Correlates an asynchronous listing result with the node that asked for
/// it. Results carrying an older generation than the tree's are stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub address: PathIndex,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: FetchTicket,
    pub remote_path: String,
    pub properties: &'static [&'static str],
}

/// A bulk insertion of freshly fetched children under `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowsInserted {
    pub parent: PathIndex,
    pub rows: Range<usize>,
}

/// Lazily materialized mirror of the remote folder hierarchy, one root per
/// configured sync folder, carrying the tri-state selection the user edits.
#[derive(Debug, Default)]
pub struct SelectiveSyncTree {
    roots: Vec<SubfolderNode>,
    generation: u64,
    dirty: bool,
}

impl SelectiveSyncTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materializes a root for every folder the registry knows about that
    /// has no root yet.
    pub fn ensure_roots(&mut self, registry: &dyn FolderRegistry) {
        for index in self.roots.len()..registry.folder_count() {
            let Some(folder) = registry.folder_at(index) else {
                break;
            };
            let state = initial_root_state(folder.selective_sync_blacklist());
            self.roots
                .push(SubfolderNode::root(index, folder.alias(), state));
        }
    }

    pub fn roots(&self) -> &[SubfolderNode] {
        &self.roots
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once any check state changed since the last reset.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn node(&self, address: &[usize]) -> Option<&SubfolderNode> {
        let (first, rest) = address.split_first()?;
        let mut node = self.roots.get(*first)?;
        for index in rest {
            node = node.children.get(*index)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, address: &[usize]) -> Option<&mut SubfolderNode> {
        let (first, rest) = address.split_first()?;
        let mut node = self.roots.get_mut(*first)?;
        for index in rest {
            node = node.children.get_mut(*index)?;
        }
        Some(node)
    }

    pub fn children(&self, address: &[usize]) -> &[SubfolderNode] {
        self.node(address)
            .map(SubfolderNode::children)
            .unwrap_or_default()
    }

    /// Unfetched nodes report children so a view offers to expand them.
    pub fn has_children(&self, address: &[usize]) -> bool {
        self.node(address)
            .is_some_and(|node| !node.fetched || !node.children.is_empty())
    }

    pub fn child_named(&self, address: &[usize], name: &str) -> Option<&SubfolderNode> {
        self.children(address)
            .iter()
            .find(|child| child.name == name)
    }

    /// Sets the check state of the node at `address` and propagates it.
    ///
    /// Checked and Unchecked cascade down through every materialized
    /// descendant. Upwards, each step only looks at the direct parent: a
    /// fully checked sibling set promotes it to Checked, otherwise an
    /// Unchecked parent becomes PartiallyChecked; unchecking demotes a
    /// Checked parent to PartiallyChecked; PartiallyChecked marks the parent
    /// PartiallyChecked. Every parent change applies the same rules in turn.
    ///
    /// Returns the addresses whose state changed, in the order they changed.
    pub fn set_check_state(&mut self, address: &[usize], state: CheckState) -> Vec<PathIndex> {
        let mut changed = Vec::new();
        self.apply_check_state(address, state, &mut changed);
        if !changed.is_empty() {
            self.dirty = true;
        }
        changed
    }

    fn apply_check_state(
        &mut self,
        address: &[usize],
        state: CheckState,
        changed: &mut Vec<PathIndex>,
    ) {
        let Some(node) = self.node_mut(address) else {
            return;
        };
        if node.check_state == state {
            return;
        }
        node.check_state = state;
        let child_count = node.children.len();
        changed.push(address.to_vec());

        let parent = parent_address(address);
        let parent_state = parent.and_then(|p| self.node(p)).map(|p| p.check_state);

        match state {
            CheckState::Checked => {
                if let (Some(parent), Some(parent_state)) = (parent, parent_state)
                    && parent_state != CheckState::Checked
                {
                    let siblings_checked = self
                        .children(parent)
                        .iter()
                        .all(|sibling| sibling.check_state == CheckState::Checked);
                    if siblings_checked {
                        self.apply_check_state(parent, CheckState::Checked, changed);
                    } else if parent_state == CheckState::Unchecked {
                        self.apply_check_state(parent, CheckState::PartiallyChecked, changed);
                    }
                }
                self.cascade_to_children(address, child_count, CheckState::Checked, changed);
            }
            CheckState::Unchecked => {
                if let Some(parent) = parent
                    && parent_state == Some(CheckState::Checked)
                {
                    self.apply_check_state(parent, CheckState::PartiallyChecked, changed);
                }
                self.cascade_to_children(address, child_count, CheckState::Unchecked, changed);
            }
            CheckState::PartiallyChecked => {
                if let Some(parent) = parent
                    && parent_state.is_some_and(|s| s != CheckState::PartiallyChecked)
                {
                    self.apply_check_state(parent, CheckState::PartiallyChecked, changed);
                }
            }
        }
    }

    fn cascade_to_children(
        &mut self,
        address: &[usize],
        child_count: usize,
        state: CheckState,
        changed: &mut Vec<PathIndex>,
    ) {
        let mut child = address.to_vec();
        child.push(0);
        for index in 0..child_count {
            if let Some(last) = child.last_mut() {
                *last = index;
            }
            self.apply_check_state(&child, state, changed);
        }
    }

    pub fn can_fetch(&self, address: &[usize]) -> bool {
        self.node(address)
            .is_some_and(|node| !node.fetched && !node.fetching)
    }

    /// Marks the node as fetching and describes the listing to issue for it.
    /// Returns `None` when the node is unknown, already fetched or a fetch
    /// is still outstanding.
    pub fn begin_fetch(
        &mut self,
        address: &[usize],
        registry: &dyn FolderRegistry,
    ) -> Option<FetchRequest> {
        let generation = self.generation;
        let node = self.node_mut(address)?;
        if node.fetched || node.fetching {
            return None;
        }
        let folder = registry.folder(&node.owner)?;
        let remote_path = join_remote(folder.remote_path(), &node.path);
        node.fetching = true;
        debug!(alias = %node.owner, remote_path = %remote_path, "fetching subfolders");
        Some(FetchRequest {
            ticket: FetchTicket {
                address: address.to_vec(),
                generation,
            },
            remote_path,
            properties: LSCOL_PROPERTIES,
        })
    }

    /// Populates the node a listing was requested for. The first listing
    /// entry is the directory itself and is skipped. Stale or unmatched
    /// results are ignored.
    pub fn on_fetch_complete(
        &mut self,
        ticket: &FetchTicket,
        listing: &DirectoryListing,
        registry: &dyn FolderRegistry,
    ) -> Option<RowsInserted> {
        if ticket.generation != self.generation {
            debug!(address = ?ticket.address, "ignoring listing for a discarded tree");
            return None;
        }
        let Some(node) = self.node_mut(&ticket.address) else {
            debug!(address = ?ticket.address, "ignoring listing for an unknown node");
            return None;
        };
        if node.fetched || !node.fetching {
            return None;
        }
        let Some(folder) = registry.folder(&node.owner) else {
            node.fetching = false;
            return None;
        };
        let root_path = decoded_url_path(folder.remote_url());
        let blacklist = folder.selective_sync_blacklist();

        let first = node.children.len();
        for href in listing.entries.iter().skip(1) {
            let path = strip_remote_root(href, &root_path);
            let Some(name) = last_segment(path) else {
                continue;
            };
            let state = initial_child_state(node.check_state, path, blacklist);
            let size = listing.sizes.get(href).copied().unwrap_or_default();
            let child =
                SubfolderNode::child_of(node, path.to_string(), name.to_string(), state, size);
            node.children.push(child);
        }
        node.fetched = true;
        node.fetching = false;

        Some(RowsInserted {
            parent: ticket.address.clone(),
            rows: first..node.children.len(),
        })
    }

    /// Returns the node to NotFetched so a later attempt can be made.
    pub fn on_fetch_failed(&mut self, ticket: &FetchTicket) -> bool {
        if ticket.generation != self.generation {
            return false;
        }
        match self.node_mut(&ticket.address) {
            Some(node) if node.fetching => {
                node.fetching = false;
                true
            }
            _ => false,
        }
    }

    /// Drops every node. Results of fetches still in flight will no longer
    /// match.
    pub fn reset(&mut self) {
        self.roots.clear();
        self.generation += 1;
        self.dirty = false;
    }
}

fn parent_address(address: &[usize]) -> Option<&[usize]> {
    if address.len() > 1 {
        Some(&address[..address.len() - 1])
    } else {
        None
    }
}

fn initial_root_state(blacklist: &[String]) -> CheckState {
    if blacklist.iter().any(|entry| entry == EXCLUDE_ALL) {
        CheckState::Unchecked
    } else if blacklist.is_empty() {
        CheckState::Checked
    } else {
        CheckState::PartiallyChecked
    }
}

/// State of a freshly listed child: excluded outright when the blacklist
/// names it (or everything), partial when an excluded path lies beneath it,
/// otherwise inherited from the parent.
pub(crate) fn initial_child_state(
    parent: CheckState,
    path: &str,
    blacklist: &[String],
) -> CheckState {
    if parent == CheckState::Unchecked {
        return CheckState::Unchecked;
    }
    let mut state = CheckState::Checked;
    for entry in blacklist {
        if entry == path || entry == EXCLUDE_ALL {
            return CheckState::Unchecked;
        }
        if entry.starts_with(path) {
            state = CheckState::PartiallyChecked;
        }
    }
    state
}

#[cfg(test)]
#[path = "tree_tests.rs"]
mod tests;

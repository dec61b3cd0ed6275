use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Unchecked,
    Checked,
    /// Some, but not all, known descendants are excluded.
    PartiallyChecked,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Unchecked => "unchecked",
            CheckState::Checked => "checked",
            CheckState::PartiallyChecked => "partial",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a node from the tree root: root index, then child index at
/// each level. Stays valid across fetches of other nodes, so asynchronous
/// results are matched back through it rather than through references.
pub type PathIndex = Vec<usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubfolderNode {
    pub(crate) path: String,
    pub(crate) name: String,
    pub(crate) path_index: PathIndex,
    pub(crate) check_state: CheckState,
    pub(crate) fetched: bool,
    pub(crate) fetching: bool,
    pub(crate) children: Vec<SubfolderNode>,
    pub(crate) size_bytes: u64,
    pub(crate) owner: String,
}

impl SubfolderNode {
    pub(crate) fn root(index: usize, alias: &str, check_state: CheckState) -> Self {
        Self {
            path: "/".to_string(),
            name: alias.to_string(),
            path_index: vec![index],
            check_state,
            fetched: false,
            fetching: false,
            children: Vec::new(),
            size_bytes: 0,
            owner: alias.to_string(),
        }
    }

    pub(crate) fn child_of(
        parent: &SubfolderNode,
        path: String,
        name: String,
        check_state: CheckState,
        size_bytes: u64,
    ) -> Self {
        let mut path_index = parent.path_index.clone();
        path_index.push(parent.children.len());
        Self {
            path,
            name,
            path_index,
            check_state,
            fetched: false,
            fetching: false,
            children: Vec::new(),
            size_bytes,
            owner: parent.owner.clone(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path_index(&self) -> &[usize] {
        &self.path_index
    }

    pub fn depth(&self) -> usize {
        self.path_index.len()
    }

    pub fn check_state(&self) -> CheckState {
        self.check_state
    }

    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    pub fn children(&self) -> &[SubfolderNode] {
        &self.children
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Alias of the sync folder this subtree belongs to.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_root(&self) -> bool {
        self.path_index.len() == 1
    }
}

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::blacklist::{BlacklistChange, apply_selective_sync};
use super::fetch::{FetchDriver, FetchError, FetchOutcome, RemoteListingFetcher};
use super::node::{CheckState, PathIndex};
use super::tree::{RowsInserted, SelectiveSyncTree};
use crate::folder::{FolderRegistry, SyncScheduler};
use crate::sync::backoff::RetryPolicy;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown sync folder: {0}")]
    UnknownFolder(String),
    #[error("no folder {path} in {alias}")]
    NoSuchPath { alias: String, path: String },
    #[error("node {0:?} cannot be listed")]
    Unresolvable(PathIndex),
    #[error("listing failed: {0}")]
    Fetch(#[from] FetchError),
}

#[derive(Debug)]
pub enum SessionUpdate {
    RowsInserted(RowsInserted),
    FetchFailed { address: PathIndex, error: FetchError },
    /// The result no longer matched a node waiting for it.
    Ignored { address: PathIndex },
}

impl SessionUpdate {
    pub fn address(&self) -> &[usize] {
        match self {
            SessionUpdate::RowsInserted(rows) => &rows.parent,
            SessionUpdate::FetchFailed { address, .. } | SessionUpdate::Ignored { address } => {
                address
            }
        }
    }
}

/// One editing session over the selective sync tree. All tree mutation
/// happens through `&mut self`, so listings finishing on other tasks are only
/// applied when the owner polls for them.
pub struct SelectiveSyncSession {
    tree: SelectiveSyncTree,
    driver: FetchDriver,
}

impl SelectiveSyncSession {
    pub fn new(fetcher: Arc<dyn RemoteListingFetcher>, retry: RetryPolicy) -> Self {
        Self {
            tree: SelectiveSyncTree::new(),
            driver: FetchDriver::new(fetcher, retry),
        }
    }

    pub fn tree(&self) -> &SelectiveSyncTree {
        &self.tree
    }

    pub fn ensure_roots(&mut self, registry: &dyn FolderRegistry) {
        self.tree.ensure_roots(registry);
    }

    /// Starts listing the node at `address`. Returns false when it is already
    /// listed, being listed, or unknown.
    pub fn request_fetch(&mut self, address: &[usize], registry: &dyn FolderRegistry) -> bool {
        self.tree.ensure_roots(registry);
        match self.tree.begin_fetch(address, registry) {
            Some(request) => {
                self.driver.spawn(request);
                true
            }
            None => false,
        }
    }

    /// Waits for the next listing to finish and applies it to the tree.
    /// Returns `None` when nothing is outstanding.
    pub async fn next_update(&mut self, registry: &dyn FolderRegistry) -> Option<SessionUpdate> {
        let FetchOutcome { ticket, result } = self.driver.next_outcome().await?;
        let update = match result {
            Ok(listing) => match self.tree.on_fetch_complete(&ticket, &listing, registry) {
                Some(rows) => SessionUpdate::RowsInserted(rows),
                None => SessionUpdate::Ignored {
                    address: ticket.address,
                },
            },
            Err(error) => {
                if self.tree.on_fetch_failed(&ticket) {
                    warn!(address = ?ticket.address, "listing subfolders failed: {error}");
                    SessionUpdate::FetchFailed {
                        address: ticket.address,
                        error,
                    }
                } else {
                    debug!(address = ?ticket.address, "ignoring failure for a discarded node");
                    SessionUpdate::Ignored {
                        address: ticket.address,
                    }
                }
            }
        };
        Some(update)
    }

    /// Lists the node at `address` unless that already happened, and waits
    /// for it. Results for other nodes arriving meanwhile are applied too.
    pub async fn expand(
        &mut self,
        address: &[usize],
        registry: &dyn FolderRegistry,
    ) -> Result<(), SessionError> {
        self.tree.ensure_roots(registry);
        loop {
            let node = self
                .tree
                .node(address)
                .ok_or_else(|| SessionError::Unresolvable(address.to_vec()))?;
            if node.is_fetched() {
                return Ok(());
            }
            if !node.is_fetching() && !self.request_fetch(address, registry) {
                return Err(SessionError::Unresolvable(address.to_vec()));
            }
            match self.next_update(registry).await {
                None => return Err(SessionError::Unresolvable(address.to_vec())),
                Some(SessionUpdate::FetchFailed { address: failed, error }) if failed == address => {
                    return Err(error.into());
                }
                Some(_) => {}
            }
        }
    }

    /// Expands the folder `alias` down to `path` (slash separated, relative to
    /// the folder) and returns the address of the last node.
    pub async fn expand_path(
        &mut self,
        alias: &str,
        path: &str,
        registry: &dyn FolderRegistry,
    ) -> Result<PathIndex, SessionError> {
        let index = registry
            .index_of(alias)
            .ok_or_else(|| SessionError::UnknownFolder(alias.to_string()))?;
        let mut address = vec![index];
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            self.expand(&address, registry).await?;
            let child = self
                .tree
                .child_named(&address, segment)
                .ok_or_else(|| SessionError::NoSuchPath {
                    alias: alias.to_string(),
                    path: path.to_string(),
                })?;
            address = child.path_index().to_vec();
        }
        Ok(address)
    }

    pub fn toggle(&mut self, address: &[usize], state: CheckState) -> Vec<PathIndex> {
        self.tree.set_check_state(address, state)
    }

    pub async fn apply(
        &mut self,
        registry: &mut dyn FolderRegistry,
        scheduler: &dyn SyncScheduler,
    ) -> Vec<BlacklistChange> {
        apply_selective_sync(&mut self.tree, registry, scheduler).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use selsync_core::{DavError, DirectoryListing};

    use super::*;
    use crate::selective::test_support::{FakeFolder, FakeRegistry, RecordingScheduler, listing};

    /// Serves listings keyed by the requested remote directory; unknown
    /// directories answer 404.
    #[derive(Default)]
    struct MapFetcher {
        listings: HashMap<String, DirectoryListing>,
        calls: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn serve(&mut self, folder: &FakeFolder, dir: &str, children: &[&str]) {
            let entries: Vec<(&str, u64)> = children.iter().map(|name| (*name, 1)).collect();
            let key = crate::sync::paths::join_remote(&folder.remote_path, dir);
            self.listings.insert(key, listing(folder, dir, &entries));
        }
    }

    #[async_trait]
    impl RemoteListingFetcher for MapFetcher {
        async fn list(
            &self,
            remote_dir: &str,
            _properties: &[&str],
        ) -> Result<DirectoryListing, DavError> {
            self.calls.lock().unwrap().push(remote_dir.to_string());
            self.listings
                .get(remote_dir)
                .cloned()
                .ok_or_else(|| DavError::Api {
                    status: StatusCode::NOT_FOUND,
                    body: String::new(),
                })
        }
    }

    fn setup() -> (FakeRegistry, Arc<MapFetcher>) {
        let photos = FakeFolder::new("Photos", "Photos", &["2020/raw/"]);
        let mut fetcher = MapFetcher::default();
        fetcher.serve(&photos, "/", &["2020", "2021"]);
        fetcher.serve(&photos, "2020/", &["raw", "jpg"]);
        (FakeRegistry::with(vec![photos]), Arc::new(fetcher))
    }

    #[tokio::test]
    async fn expand_path_walks_segment_by_segment() {
        let (registry, fetcher) = setup();
        let mut session = SelectiveSyncSession::new(fetcher.clone(), RetryPolicy::no_retry());

        let address = session
            .expand_path("Photos", "/2020/raw", &registry)
            .await
            .unwrap();

        assert_eq!(address, vec![0, 0, 0]);
        let node = session.tree().node(&address).unwrap();
        assert_eq!(node.path(), "2020/raw/");
        assert_eq!(node.check_state(), CheckState::Unchecked);
        assert_eq!(
            session.tree().node(&[0, 0]).unwrap().check_state(),
            CheckState::PartiallyChecked
        );
        assert_eq!(
            *fetcher.calls.lock().unwrap(),
            vec!["Photos/".to_string(), "Photos/2020/".to_string()]
        );
    }

    #[tokio::test]
    async fn expanding_twice_lists_once() {
        let (registry, fetcher) = setup();
        let mut session = SelectiveSyncSession::new(fetcher.clone(), RetryPolicy::no_retry());

        session.expand(&[0], &registry).await.unwrap();
        session.expand(&[0], &registry).await.unwrap();

        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
        assert!(!session.request_fetch(&[0], &registry));
    }

    #[tokio::test]
    async fn failed_listing_is_reported_and_can_be_retried() {
        let (registry, fetcher) = setup();
        let mut session = SelectiveSyncSession::new(fetcher.clone(), RetryPolicy::no_retry());
        session.expand(&[0], &registry).await.unwrap();

        let err = session.expand(&[0, 1], &registry).await.unwrap_err();

        assert!(matches!(err, SessionError::Fetch(ref e) if e.is_not_found()));
        assert!(session.tree().can_fetch(&[0, 1]));
        assert!(session.request_fetch(&[0, 1], &registry));
        assert!(matches!(
            session.next_update(&registry).await,
            Some(SessionUpdate::FetchFailed { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_folder_and_path_are_errors() {
        let (registry, fetcher) = setup();
        let mut session = SelectiveSyncSession::new(fetcher, RetryPolicy::no_retry());

        assert!(matches!(
            session.expand_path("Music", "", &registry).await,
            Err(SessionError::UnknownFolder(alias)) if alias == "Music"
        ));
        assert!(matches!(
            session.expand_path("Photos", "1999", &registry).await,
            Err(SessionError::NoSuchPath { .. })
        ));
    }

    #[tokio::test]
    async fn results_arriving_after_apply_are_ignored() {
        let (mut registry, fetcher) = setup();
        let scheduler = RecordingScheduler::default();
        let mut session = SelectiveSyncSession::new(fetcher, RetryPolicy::no_retry());
        session.expand(&[0], &registry).await.unwrap();
        session.toggle(&[0, 1], CheckState::Unchecked);
        assert!(session.request_fetch(&[0, 0], &registry));

        let applied = session.apply(&mut registry, &scheduler).await;
        assert_eq!(applied[0].blacklist, vec!["2020/raw/".to_string(), "2021/".to_string()]);

        let update = session.next_update(&registry).await.unwrap();
        assert!(matches!(update, SessionUpdate::Ignored { .. }));
        assert_eq!(update.address(), &[0, 0]);
        assert!(session.tree().roots().is_empty());
        assert_eq!(scheduler.aliases(), vec!["Photos".to_string()]);
    }
}

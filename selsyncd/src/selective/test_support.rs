use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use selsync_core::DirectoryListing;
use url::Url;

use crate::folder::{FolderRegistry, SyncFolder, SyncScheduler};
use crate::sync::journal::{JournalError, SyncJournal};
use crate::sync::paths::decoded_url_path;

pub const DAV_ROOT: &str = "https://cloud.example/remote.php/webdav/";

#[derive(Default)]
pub struct RecordingJournal {
    pub invalidated: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingJournal {
    pub fn failing() -> Self {
        Self {
            invalidated: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncJournal for RecordingJournal {
    async fn avoid_read_from_db_on_next_sync(&self, path: &str) -> Result<(), JournalError> {
        self.invalidated.lock().unwrap().push(path.to_string());
        if self.fail {
            return Err(JournalError::InvalidItemType("forced".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    pub scheduled: Mutex<Vec<String>>,
}

impl RecordingScheduler {
    pub fn aliases(&self) -> Vec<String> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl SyncScheduler for RecordingScheduler {
    fn schedule_sync(&self, alias: &str) {
        self.scheduled.lock().unwrap().push(alias.to_string());
    }
}

pub struct FakeFolder {
    pub alias: String,
    pub remote_path: String,
    pub remote_url: Url,
    pub blacklist: Vec<String>,
    pub busy: bool,
    pub terminated: bool,
    pub journal: Arc<RecordingJournal>,
}

impl FakeFolder {
    pub fn new(alias: &str, remote_path: &str, blacklist: &[&str]) -> Self {
        let remote_url = Url::parse(DAV_ROOT)
            .unwrap()
            .join(remote_path.trim_start_matches('/'))
            .unwrap();
        Self {
            alias: alias.into(),
            remote_path: remote_path.into(),
            remote_url,
            blacklist: blacklist.iter().map(|s| s.to_string()).collect(),
            busy: false,
            terminated: false,
            journal: Arc::new(RecordingJournal::default()),
        }
    }
}

impl SyncFolder for FakeFolder {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn remote_path(&self) -> &str {
        &self.remote_path
    }

    fn remote_url(&self) -> &Url {
        &self.remote_url
    }

    fn selective_sync_blacklist(&self) -> &[String] {
        &self.blacklist
    }

    fn set_selective_sync_blacklist(&mut self, blacklist: Vec<String>) {
        self.blacklist = blacklist;
    }

    fn is_busy(&self) -> bool {
        self.busy
    }

    fn terminate_sync(&mut self) {
        self.terminated = true;
        self.busy = false;
    }

    fn journal(&self) -> Arc<dyn SyncJournal> {
        self.journal.clone()
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    pub folders: Vec<FakeFolder>,
}

impl FakeRegistry {
    pub fn with(folders: Vec<FakeFolder>) -> Self {
        Self { folders }
    }

    pub fn get(&self, alias: &str) -> &FakeFolder {
        self.folders.iter().find(|f| f.alias == alias).unwrap()
    }
}

impl FolderRegistry for FakeRegistry {
    fn folder_count(&self) -> usize {
        self.folders.len()
    }

    fn folder_at(&self, index: usize) -> Option<&dyn SyncFolder> {
        self.folders.get(index).map(|f| f as &dyn SyncFolder)
    }

    fn folder_at_mut(&mut self, index: usize) -> Option<&mut dyn SyncFolder> {
        self.folders.get_mut(index).map(|f| f as &mut dyn SyncFolder)
    }
}

/// Listing as `DavClient` hands it over for `dir` under `folder`: decoded
/// hrefs, the directory itself first, then one entry per child name.
pub fn listing(folder: &FakeFolder, dir: &str, children: &[(&str, u64)]) -> DirectoryListing {
    let base = decoded_url_path(&folder.remote_url)
        .trim_end_matches('/')
        .to_string();
    let dir = dir.trim_matches('/');
    let prefix = if dir.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}/{dir}/")
    };
    let mut entries = vec![prefix.clone()];
    let mut sizes = HashMap::new();
    for (name, size) in children {
        let href = format!("{prefix}{name}/");
        sizes.insert(href.clone(), *size);
        entries.push(href);
    }
    DirectoryListing { entries, sizes }
}

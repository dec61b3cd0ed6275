use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use selsync_core::concat_url_path;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::sync::journal::{JournalError, SyncJournal, SyncJournalDb};

#[derive(Debug, Error)]
pub enum FolderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid folder definitions: {0}")]
    Json(#[from] serde_json::Error),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("duplicate folder alias: {0}")]
    DuplicateAlias(String),
    #[error("folder registry has no backing file")]
    NoConfigPath,
}

/// A configured sync folder as seen by the selective sync tree.
pub trait SyncFolder: Send + Sync {
    fn alias(&self) -> &str;
    fn remote_path(&self) -> &str;
    /// Full URL of the folder's remote root; its path is what listed hrefs
    /// are relative to.
    fn remote_url(&self) -> &Url;
    fn selective_sync_blacklist(&self) -> &[String];
    fn set_selective_sync_blacklist(&mut self, blacklist: Vec<String>);
    fn is_busy(&self) -> bool;
    fn terminate_sync(&mut self);
    fn journal(&self) -> Arc<dyn SyncJournal>;
}

/// Ordered set of sync folders. Index `i` is the root at path index `[i]`.
pub trait FolderRegistry: Send {
    fn folder_count(&self) -> usize;
    fn folder_at(&self, index: usize) -> Option<&dyn SyncFolder>;
    fn folder_at_mut(&mut self, index: usize) -> Option<&mut dyn SyncFolder>;

    fn folder(&self, alias: &str) -> Option<&dyn SyncFolder> {
        (0..self.folder_count())
            .filter_map(|index| self.folder_at(index))
            .find(|folder| folder.alias() == alias)
    }

    fn index_of(&self, alias: &str) -> Option<usize> {
        (0..self.folder_count()).find(|index| {
            self.folder_at(*index)
                .is_some_and(|folder| folder.alias() == alias)
        })
    }
}

pub trait SyncScheduler: Send + Sync {
    fn schedule_sync(&self, alias: &str);
}

/// Scheduler that hands sync requests to whoever owns the receiver.
#[derive(Debug, Clone)]
pub struct SyncScheduleQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl SyncScheduleQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SyncScheduler for SyncScheduleQueue {
    fn schedule_sync(&self, alias: &str) {
        if self.tx.send(alias.to_string()).is_err() {
            debug!(alias, "sync request dropped: scheduler receiver is gone");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderDefinition {
    pub alias: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    #[serde(default)]
    pub selective_sync_blacklist: Vec<String>,
    #[serde(default)]
    pub paused: bool,
}

pub struct Folder {
    definition: FolderDefinition,
    remote_url: Url,
    journal: Arc<dyn SyncJournal>,
    busy: bool,
}

impl Folder {
    pub fn new(definition: FolderDefinition, dav_url: &Url, journal: Arc<dyn SyncJournal>) -> Self {
        let remote_url = concat_url_path(dav_url, &definition.remote_path, &[]);
        Self {
            definition,
            remote_url,
            journal,
            busy: false,
        }
    }

    pub fn definition(&self) -> &FolderDefinition {
        &self.definition
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }
}

impl SyncFolder for Folder {
    fn alias(&self) -> &str {
        &self.definition.alias
    }

    fn remote_path(&self) -> &str {
        &self.definition.remote_path
    }

    fn remote_url(&self) -> &Url {
        &self.remote_url
    }

    fn selective_sync_blacklist(&self) -> &[String] {
        &self.definition.selective_sync_blacklist
    }

    fn set_selective_sync_blacklist(&mut self, blacklist: Vec<String>) {
        self.definition.selective_sync_blacklist = blacklist;
    }

    fn is_busy(&self) -> bool {
        self.busy
    }

    fn terminate_sync(&mut self) {
        if self.busy {
            info!(alias = %self.definition.alias, "terminating running sync");
        }
        self.busy = false;
    }

    fn journal(&self) -> Arc<dyn SyncJournal> {
        Arc::clone(&self.journal)
    }
}

/// Owns the configured folders, kept sorted by alias, and their persisted
/// definitions.
pub struct FolderMan {
    folders: Vec<Folder>,
    config_path: Option<PathBuf>,
}

impl FolderMan {
    pub fn new(mut folders: Vec<Folder>) -> Result<Self, FolderError> {
        folders.sort_by(|a, b| a.definition.alias.cmp(&b.definition.alias));
        if let Some(pair) = folders
            .windows(2)
            .find(|pair| pair[0].definition.alias == pair[1].definition.alias)
        {
            return Err(FolderError::DuplicateAlias(pair[0].definition.alias.clone()));
        }
        Ok(Self {
            folders,
            config_path: None,
        })
    }

    /// Loads `folders.json` (a missing file means no folders) and opens one
    /// journal per folder under `journal_dir`.
    pub async fn load(
        config_path: &Path,
        dav_url: &Url,
        journal_dir: &Path,
    ) -> Result<Self, FolderError> {
        let definitions = read_definitions(config_path)?;
        let mut folders = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let journal_path = journal_dir.join(journal_file_name(&definition.alias));
            let journal = SyncJournalDb::open(&journal_path).await?;
            folders.push(Folder::new(definition, dav_url, Arc::new(journal)));
        }
        let mut folder_man = Self::new(folders)?;
        folder_man.config_path = Some(config_path.to_path_buf());
        Ok(folder_man)
    }

    pub fn save(&self) -> Result<(), FolderError> {
        let path = self.config_path.as_deref().ok_or(FolderError::NoConfigPath)?;
        write_definitions(path, &self.definitions())
    }

    pub fn definitions(&self) -> Vec<FolderDefinition> {
        self.folders
            .iter()
            .map(|folder| folder.definition.clone())
            .collect()
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub fn folder_mut(&mut self, alias: &str) -> Option<&mut Folder> {
        self.folders
            .iter_mut()
            .find(|folder| folder.definition.alias == alias)
    }
}

impl FolderRegistry for FolderMan {
    fn folder_count(&self) -> usize {
        self.folders.len()
    }

    fn folder_at(&self, index: usize) -> Option<&dyn SyncFolder> {
        self.folders
            .get(index)
            .map(|folder| folder as &dyn SyncFolder)
    }

    fn folder_at_mut(&mut self, index: usize) -> Option<&mut dyn SyncFolder> {
        self.folders
            .get_mut(index)
            .map(|folder| folder as &mut dyn SyncFolder)
    }
}

pub fn read_definitions(path: &Path) -> Result<Vec<FolderDefinition>, FolderError> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

pub fn write_definitions(path: &Path, definitions: &[FolderDefinition]) -> Result<(), FolderError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(definitions)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn journal_file_name(alias: &str) -> String {
    let sanitized: String = alias
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}.db")
}

use std::path::{Path, PathBuf};

use anyhow::Context;
use selsync_core::{Account, Credentials, DEFAULT_DAV_PATH};
use serde_json::json;
use url::Url;

use crate::sync::backoff::RetryPolicy;

const DEFAULT_CONFIG_DIR_NAME: &str = "selsync";
const DEFAULT_FETCH_RETRIES: u64 = 2;
const FOLDERS_FILE_NAME: &str = "folders.json";
const JOURNALS_DIR_NAME: &str = "journals";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_url: Url,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dav_path: String,
    pub config_dir: PathBuf,
    pub fetch_retries: u32,
    pub accept_invalid_certs: bool,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup(|name| std::env::var(name).ok(), &home)
    }

    pub fn from_lookup<F>(lookup: F, home: &Path) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = lookup("SELSYNC_SERVER_URL").context("SELSYNC_SERVER_URL is not set")?;
        let server_url = Url::parse(raw_url.trim())
            .with_context(|| format!("SELSYNC_SERVER_URL is not a valid URL: {raw_url}"))?;
        let user = lookup("SELSYNC_USER").filter(|value| !value.is_empty());
        let password = lookup("SELSYNC_PASSWORD");
        let dav_path = lookup("SELSYNC_DAV_PATH").unwrap_or_else(|| DEFAULT_DAV_PATH.to_string());
        let config_dir = lookup("SELSYNC_CONFIG_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(default_config_dir);
        let fetch_retries = read_u64(&lookup, "SELSYNC_FETCH_RETRIES", DEFAULT_FETCH_RETRIES)
            .min(u64::from(u32::MAX)) as u32;
        let accept_invalid_certs = read_bool(&lookup, "SELSYNC_ACCEPT_INVALID_CERTS", false);

        Ok(Self {
            server_url,
            user,
            password,
            dav_path,
            config_dir,
            fetch_retries,
            accept_invalid_certs,
        })
    }

    pub fn folders_path(&self) -> PathBuf {
        self.config_dir.join(FOLDERS_FILE_NAME)
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.config_dir.join(JOURNALS_DIR_NAME)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.fetch_retries)
    }

    pub fn account(&self) -> Account {
        let mut account = Account::new(self.server_url.clone());
        account.set_dav_path(self.dav_path.clone());
        if let Some(user) = &self.user {
            account.set_credentials(Credentials::http(
                user.clone(),
                self.password.clone().unwrap_or_default(),
            ));
        }
        account.set_accept_invalid_certs(self.accept_invalid_certs);
        account
    }

    /// Resolved settings for display. The password is never included.
    pub fn settings_snapshot(&self) -> serde_json::Value {
        json!({
            "server_url": self.server_url.as_str(),
            "user": self.user,
            "password_set": self.password.as_deref().is_some_and(|p| !p.is_empty()),
            "dav_path": self.dav_path,
            "config_dir": self.config_dir,
            "folders_file": self.folders_path(),
            "journal_dir": self.journal_dir(),
            "fetch_retries": self.fetch_retries,
            "accept_invalid_certs": self.accept_invalid_certs,
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_CONFIG_DIR_NAME)
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

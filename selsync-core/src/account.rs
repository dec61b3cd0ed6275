use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::{Certificate, Client, Identity};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

pub const DEFAULT_DAV_PATH: &str = "remote.php/webdav/";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("invalid certificate: {0}")]
    Certificate(#[source] reqwest::Error),
    #[error("certificate bundle contains no certificates")]
    EmptyCertificateBundle,
    #[error("invalid client identity: {0}")]
    Identity(#[source] reqwest::Error),
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub auth_type: String,
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn http(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth_type: "http".to_string(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn changed(&self, other: &Credentials) -> bool {
        self.auth_type != other.auth_type || self.user != other.user
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_type", &self.auth_type)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Connection state for one server account: where it lives, how to
/// authenticate, which TLS material to trust and what the server told us
/// about itself last time we asked.
pub struct Account {
    id: String,
    url: Url,
    dav_path: String,
    credentials: Option<Credentials>,
    settings: HashMap<String, String>,
    capabilities: Map<String, Value>,
    server_version: String,
    migrated: bool,
    approved_certs: Vec<Certificate>,
    client_identity: Option<Identity>,
    accept_invalid_certs: bool,
    cookie_jar: Arc<Jar>,
}

impl Account {
    pub fn new(url: Url) -> Self {
        Self {
            id: String::new(),
            url,
            dav_path: DEFAULT_DAV_PATH.to_string(),
            credentials: None,
            settings: HashMap::new(),
            capabilities: Map::new(),
            server_version: String::new(),
            migrated: false,
            approved_certs: Vec::new(),
            client_identity: None,
            accept_invalid_certs: false,
            cookie_jar: Arc::new(Jar::default()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    pub fn dav_path(&self) -> &str {
        &self.dav_path
    }

    pub fn set_dav_path(&mut self, dav_path: impl Into<String>) {
        self.dav_path = dav_path.into();
    }

    pub fn dav_url(&self) -> Url {
        concat_url_path(&self.url, &self.dav_path, &[])
    }

    pub fn display_name(&self) -> String {
        let user = self
            .credentials
            .as_ref()
            .map(|creds| creds.user.as_str())
            .unwrap_or_default();
        format!("{}@{}", user, self.url.host_str().unwrap_or_default())
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    /// Whether `other` points at a different server or identity.
    pub fn changed(&self, other: &Account, ignore_url_protocol: bool) -> bool {
        let url_changed = if ignore_url_protocol {
            self.url.host_str() != other.url.host_str()
                || self.url.port() != other.url.port()
                || self.url.path() != other.url.path()
        } else {
            self.url != other.url
        };
        let credentials_changed = match (&self.credentials, &other.credentials) {
            (Some(ours), Some(theirs)) => ours.changed(theirs),
            (None, None) => false,
            _ => true,
        };
        url_changed || credentials_changed
    }

    pub fn credential_setting(&self, key: &str) -> Option<&str> {
        let credentials = self.credentials.as_ref()?;
        let prefixed = format!("{}_{}", credentials.auth_type, key);
        self.settings
            .get(&prefixed)
            .filter(|value| !value.is_empty())
            .or_else(|| self.settings.get(key))
            .map(String::as_str)
    }

    pub fn set_credential_setting(&mut self, key: &str, value: impl Into<String>) {
        if let Some(credentials) = &self.credentials {
            let prefixed = format!("{}_{}", credentials.auth_type, key);
            self.settings.insert(prefixed, value.into());
        }
    }

    pub fn capabilities(&self) -> &Map<String, Value> {
        &self.capabilities
    }

    pub fn set_capabilities(&mut self, capabilities: Map<String, Value>) {
        self.capabilities = capabilities;
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn set_server_version(&mut self, version: impl Into<String>) {
        self.server_version = version.into();
    }

    pub fn was_migrated(&self) -> bool {
        self.migrated
    }

    pub fn set_migrated(&mut self, migrated: bool) {
        self.migrated = migrated;
    }

    pub fn add_approved_certs(&mut self, pem: &[u8]) -> Result<(), AccountError> {
        let certs = Certificate::from_pem_bundle(pem).map_err(AccountError::Certificate)?;
        if certs.is_empty() {
            return Err(AccountError::EmptyCertificateBundle);
        }
        self.approved_certs.extend(certs);
        Ok(())
    }

    pub fn approved_cert_count(&self) -> usize {
        self.approved_certs.len()
    }

    pub fn set_client_certificate(
        &mut self,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<(), AccountError> {
        let mut bundle = Vec::with_capacity(cert_pem.len() + key_pem.len() + 1);
        bundle.extend_from_slice(cert_pem);
        bundle.push(b'\n');
        bundle.extend_from_slice(key_pem);
        let identity = Identity::from_pem(&bundle).map_err(AccountError::Identity)?;
        self.client_identity = Some(identity);
        Ok(())
    }

    pub fn set_accept_invalid_certs(&mut self, accept: bool) {
        self.accept_invalid_certs = accept;
    }

    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(&self.cookie_jar)
    }

    pub fn last_auth_cookies(&self) -> Option<HeaderValue> {
        self.cookie_jar.cookies(&self.url)
    }

    pub fn clear_cookie_jar(&mut self) {
        self.cookie_jar = Arc::new(Jar::default());
    }

    /// Builds a client carrying this account's cookie jar and TLS material.
    /// Clients built before `clear_cookie_jar` keep the old jar.
    pub fn http_client(&self) -> Result<Client, AccountError> {
        let mut builder = Client::builder()
            .cookie_provider(Arc::clone(&self.cookie_jar))
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        for cert in &self.approved_certs {
            builder = builder.add_root_certificate(cert.clone());
        }
        if let Some(identity) = &self.client_identity {
            builder = builder.identity(identity.clone());
        }
        builder.build().map_err(AccountError::Client)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("dav_path", &self.dav_path)
            .field("credentials", &self.credentials)
            .field("server_version", &self.server_version)
            .finish_non_exhaustive()
    }
}

pub fn concat_url_path(url: &Url, concat_path: &str, query: &[(&str, &str)]) -> Url {
    let mut path = url.path().to_string();
    if !concat_path.is_empty() {
        if path.ends_with('/') && concat_path.starts_with('/') {
            path.pop();
        } else if !path.ends_with('/') && !concat_path.starts_with('/') {
            path.push('/');
        }
        path.push_str(concat_path);
    }

    let mut out = url.clone();
    out.set_path(&path);
    if !query.is_empty() {
        out.query_pairs_mut().clear().extend_pairs(query.iter().copied());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(url: &str) -> Account {
        Account::new(Url::parse(url).unwrap())
    }

    #[test]
    fn concat_avoids_double_slash() {
        let base = Url::parse("https://cloud.example/owncloud/").unwrap();
        let joined = concat_url_path(&base, "/remote.php/webdav/", &[]);
        assert_eq!(joined.path(), "/owncloud/remote.php/webdav/");
    }

    #[test]
    fn concat_inserts_missing_slash() {
        let base = Url::parse("https://cloud.example/owncloud").unwrap();
        let joined = concat_url_path(&base, "status.php", &[]);
        assert_eq!(joined.as_str(), "https://cloud.example/owncloud/status.php");
    }

    #[test]
    fn concat_with_empty_path_keeps_url() {
        let base = Url::parse("https://cloud.example/owncloud").unwrap();
        assert_eq!(concat_url_path(&base, "", &[]), base);
    }

    #[test]
    fn concat_replaces_query() {
        let base = Url::parse("https://cloud.example/?stale=1").unwrap();
        let joined = concat_url_path(&base, "ocs/v1.php", &[("format", "json")]);
        assert_eq!(joined.as_str(), "https://cloud.example/ocs/v1.php?format=json");
    }

    #[test]
    fn dav_url_uses_default_dav_path() {
        let account = account("https://cloud.example/oc");
        assert_eq!(
            account.dav_url().as_str(),
            "https://cloud.example/oc/remote.php/webdav/"
        );
    }

    #[test]
    fn display_name_combines_user_and_host() {
        let mut account = account("https://cloud.example:8443/");
        assert_eq!(account.display_name(), "@cloud.example");
        account.set_credentials(Credentials::http("alice", "secret"));
        assert_eq!(account.display_name(), "alice@cloud.example");
    }

    #[test]
    fn changed_detects_url_and_user() {
        let mut first = account("https://cloud.example/");
        first.set_credentials(Credentials::http("alice", "a"));
        let mut same = account("https://cloud.example/");
        same.set_credentials(Credentials::http("alice", "other-password"));
        assert!(!first.changed(&same, false));

        let mut other_user = account("https://cloud.example/");
        other_user.set_credentials(Credentials::http("bob", "a"));
        assert!(first.changed(&other_user, false));

        let mut http = account("http://cloud.example/");
        http.set_credentials(Credentials::http("alice", "a"));
        assert!(first.changed(&http, false));
        assert!(!first.changed(&http, true));
    }

    #[test]
    fn credential_settings_are_prefixed_by_auth_type() {
        let mut account = account("https://cloud.example/");
        account.set_credential_setting("user", "ignored");
        assert_eq!(account.credential_setting("user"), None);

        account.set_credentials(Credentials::http("alice", "secret"));
        account.set_credential_setting("user", "alice");
        assert_eq!(account.credential_setting("user"), Some("alice"));
        assert_eq!(account.credential_setting("missing"), None);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::http("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn invalid_certificate_is_rejected() {
        let mut account = account("https://cloud.example/");
        assert!(account.add_approved_certs(b"not a certificate").is_err());
        assert_eq!(account.approved_cert_count(), 0);
    }

    #[test]
    fn clearing_cookie_jar_replaces_it() {
        let mut account = account("https://cloud.example/");
        let url = account.url().clone();
        account
            .cookie_jar()
            .add_cookie_str("session=abc; Path=/", &url);
        assert!(account.last_auth_cookies().is_some());
        account.clear_cookie_jar();
        assert!(account.last_auth_cookies().is_none());
    }

    #[test]
    fn capability_cache_round_trips() {
        let mut account = account("https://cloud.example/");
        let mut caps = Map::new();
        caps.insert("files".into(), Value::Bool(true));
        account.set_capabilities(caps);
        account.set_server_version("8.1.0");
        assert_eq!(account.capabilities().get("files"), Some(&Value::Bool(true)));
        assert_eq!(account.server_version(), "8.1.0");
    }
}

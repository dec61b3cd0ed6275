use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::account::{Account, AccountError, Credentials, DEFAULT_DAV_PATH, concat_url_path};

/// Properties requested when listing one directory level.
pub const LSCOL_PROPERTIES: &[&str] = &["resourcetype", "quota-used-bytes"];

const STATUS_PATH: &str = "status.php";
const CAPABILITIES_PATH: &str = "ocs/v1.php/cloud/capabilities";

#[derive(Debug, Error)]
pub enum DavError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("account error: {0}")]
    Account(#[from] AccountError),
    #[error("server returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("invalid multistatus response: {0}")]
    Xml(String),
    #[error("capabilities response has no capabilities object")]
    MissingCapabilities,
    #[error("invalid HTTP method {0}")]
    Method(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// One directory level as returned by a depth-1 PROPFIND: the directory
/// itself first, then its subdirectories in server order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub entries: Vec<String>,
    pub sizes: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerStatus {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub versionstring: String,
    #[serde(default)]
    pub edition: String,
}

#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base_url: Url,
    dav_url: Url,
    credentials: Option<Credentials>,
}

impl DavClient {
    pub fn from_account(account: &Account) -> Result<Self, DavError> {
        Ok(Self {
            http: account.http_client()?,
            base_url: account.url().clone(),
            dav_url: account.dav_url(),
            credentials: account.credentials().cloned(),
        })
    }

    pub fn with_base_url(
        base_url: &str,
        credentials: Option<Credentials>,
    ) -> Result<Self, DavError> {
        let base_url = Url::parse(base_url)?;
        let dav_url = concat_url_path(&base_url, DEFAULT_DAV_PATH, &[]);
        Ok(Self {
            http: Client::new(),
            base_url,
            dav_url,
            credentials,
        })
    }

    pub fn dav_url(&self) -> &Url {
        &self.dav_url
    }

    pub async fn list_subfolders(
        &self,
        remote_dir: &str,
        properties: &[&str],
    ) -> Result<DirectoryListing, DavError> {
        let url = concat_url_path(&self.dav_url, remote_dir, &[]);
        debug!(url = %url, "listing remote directory");
        let response = self
            .authorized(self.http.request(propfind_method()?, url))
            .header("Depth", "1")
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(propfind_body(properties))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DavError::Api { status, body });
        }
        parse_multistatus(&body)
    }

    pub async fn fetch_status(&self) -> Result<ServerStatus, DavError> {
        let url = concat_url_path(&self.base_url, STATUS_PATH, &[]);
        let response = self.http.get(url).send().await?;
        Self::handle_response(response).await
    }

    pub async fn fetch_capabilities(&self) -> Result<Map<String, Value>, DavError> {
        let url = concat_url_path(&self.base_url, CAPABILITIES_PATH, &[("format", "json")]);
        let response = self
            .authorized(self.http.get(url))
            .header("OCS-APIREQUEST", "true")
            .send()
            .await?;
        let payload: Value = Self::handle_response(response).await?;
        match payload.pointer("/ocs/data/capabilities") {
            Some(Value::Object(capabilities)) => Ok(capabilities.clone()),
            _ => Err(DavError::MissingCapabilities),
        }
    }

    /// Refreshes the server version and capability cache kept on `account`.
    pub async fn refresh_account_info(&self, account: &mut Account) -> Result<(), DavError> {
        let status = self.fetch_status().await?;
        let capabilities = self.fetch_capabilities().await?;
        account.set_server_version(status.version);
        account.set_capabilities(capabilities);
        Ok(())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.user, Some(&creds.password)),
            None => request,
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DavError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DavError::Api { status, body })
        }
    }
}

impl DavError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DavError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DavError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn propfind_method() -> Result<Method, DavError> {
    Method::from_bytes(b"PROPFIND").map_err(|err| DavError::Method(format!("PROPFIND: {err}")))
}

fn propfind_body(properties: &[&str]) -> String {
    let mut body = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<d:propfind xmlns:d=\"DAV:\">\n  <d:prop>\n",
    );
    for property in properties {
        body.push_str("    <d:");
        body.push_str(property);
        body.push_str("/>\n");
    }
    body.push_str("  </d:prop>\n</d:propfind>\n");
    body
}

#[derive(Default)]
struct ResponseEntry {
    href: Option<String>,
    is_collection: bool,
    size: Option<u64>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    None,
    Href,
    QuotaUsed,
}

fn parse_multistatus(xml: &str) -> Result<DirectoryListing, DavError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut listing = DirectoryListing::default();
    let mut current: Option<ResponseEntry> = None;
    let mut target = TextTarget::None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => current = Some(ResponseEntry::default()),
                b"href" => target = TextTarget::Href,
                b"quota-used-bytes" => target = TextTarget::QuotaUsed,
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|err| DavError::Xml(err.to_string()))?;
                match target {
                    TextTarget::Href => entry.href = Some(decode_href(&text)),
                    TextTarget::QuotaUsed => entry.size = text.trim().parse().ok(),
                    TextTarget::None => {}
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"href" | b"quota-used-bytes" => target = TextTarget::None,
                b"response" => {
                    if let Some(entry) = current.take() {
                        push_entry(&mut listing, entry);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(DavError::Xml(err.to_string())),
            _ => {}
        }
    }

    Ok(listing)
}

fn push_entry(listing: &mut DirectoryListing, entry: ResponseEntry) {
    let Some(href) = entry.href else {
        return;
    };
    if !entry.is_collection {
        return;
    }
    listing
        .sizes
        .insert(href.clone(), entry.size.unwrap_or_default());
    listing.entries.push(href);
}

fn decode_href(raw: &str) -> String {
    let path = if raw.starts_with("http://") || raw.starts_with("https://") {
        Url::parse(raw)
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    };
    percent_decode_str(&path).decode_utf8_lossy().into_owned()
}

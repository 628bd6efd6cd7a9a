//! Previously captured authentication state
//!
//! Cookies and local storage saved by an interactive sign-in are pre-loaded
//! into each new browser profile. Loading is best-effort throughout: a missing
//! file, a malformed file or an individual bad cookie only produces a warning.

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix seconds; absent or negative for session cookies
    #[serde(default, alias = "expiry")]
    pub expires: Option<f64>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: Option<bool>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default, rename = "sameSite")]
    pub same_site: Option<String>,
}

impl CookieRecord {
    fn is_usable(&self) -> bool {
        !self.name.trim().is_empty()
            && self
                .domain
                .as_deref()
                .map(|d| !d.trim().is_empty())
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// `localStorage` entries for one origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginStorage {
    pub origin: String,
    #[serde(default, rename = "localStorage")]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub cookies: Vec<CookieRecord>,
    pub origins: Vec<OriginStorage>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.origins.is_empty()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Never fails; returns whatever could be recovered
    async fn load(&self) -> Credentials;
}

/// No saved state
pub struct NoCredentials;

#[async_trait]
impl CredentialStore for NoCredentials {
    async fn load(&self) -> Credentials {
        Credentials::default()
    }
}

/// Reads `cookies.json` and `storage.json`.
///
/// Both files accept either a bare list (cookies / origins) or a full
/// browser storage-state document with `cookies` and `origins` keys.
pub struct FileCredentialStore {
    cookies_path: PathBuf,
    storage_path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(cookies_path: impl Into<PathBuf>, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            cookies_path: cookies_path.into(),
            storage_path: storage_path.into(),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Credentials {
        let mut credentials = Credentials::default();

        for path in [&self.cookies_path, &self.storage_path] {
            if let Some(doc) = read_json(path).await {
                merge_document(&mut credentials, doc, path);
            }
        }

        debug!(
            "Loaded {} cookie(s) and {} origin(s) of saved credentials",
            credentials.cookies.len(),
            credentials.origins.len()
        );
        credentials
    }
}

async fn read_json(path: &Path) -> Option<Value> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No credential file at {:?}", path);
            return None;
        }
        Err(e) => {
            warn!("Cannot read credential file {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!("Ignoring malformed credential file {:?}: {}", path, e);
            None
        }
    }
}

fn merge_document(credentials: &mut Credentials, doc: Value, path: &Path) {
    match doc {
        Value::Array(items) => {
            // A bare list is either cookies or origins, told apart by shape
            for item in items {
                if item.get("origin").is_some() {
                    push_origin(credentials, item, path);
                } else {
                    push_cookie(credentials, item, path);
                }
            }
        }
        Value::Object(mut map) => {
            if let Some(Value::Array(cookies)) = map.remove("cookies") {
                for item in cookies {
                    push_cookie(credentials, item, path);
                }
            }
            if let Some(Value::Array(origins)) = map.remove("origins") {
                for item in origins {
                    push_origin(credentials, item, path);
                }
            }
        }
        _ => warn!("Unexpected credential document in {:?}", path),
    }
}

fn push_cookie(credentials: &mut Credentials, item: Value, path: &Path) {
    match serde_json::from_value::<CookieRecord>(item) {
        Ok(cookie) if cookie.is_usable() => credentials.cookies.push(cookie),
        Ok(cookie) => warn!("Dropping cookie '{}' without a domain from {:?}", cookie.name, path),
        Err(e) => warn!("Dropping invalid cookie from {:?}: {}", path, e),
    }
}

fn push_origin(credentials: &mut Credentials, item: Value, path: &Path) {
    match serde_json::from_value::<OriginStorage>(item) {
        Ok(origin) => credentials.origins.push(origin),
        Err(e) => warn!("Dropping invalid origin storage from {:?}: {}", path, e),
    }
}

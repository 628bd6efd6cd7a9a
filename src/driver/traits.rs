use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::browser::credentials::Credentials;

/// Snapshot of one DOM element as seen by the locator engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementInfo {
    /// Lowercased tag name
    pub tag: String,
    /// Visible inner text (trimmed)
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub visible: bool,
    pub enabled: bool,
}

impl ElementInfo {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Accessible label: aria-label, then title, then placeholder
    pub fn accessible_label(&self) -> Option<&str> {
        ["aria-label", "title", "placeholder"]
            .iter()
            .filter_map(|name| self.attr(name))
            .find(|v| !v.trim().is_empty())
    }

    pub fn is_interactable(&self) -> bool {
        self.visible && self.enabled && self.attr("aria-disabled") != Some("true")
    }
}

/// Primitive browser operations used by the session components.
///
/// One implementation drives a real Chromium through Playwright; tests use an
/// in-memory page model. Implementations are not required to support
/// concurrent writers: callers serialize clicks and fills.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate and wait for the load event
    async fn goto(&self, url: &str, timeout_ms: u64) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// All elements matching a CSS selector, in document order
    async fn query_all(&self, css: &str) -> Result<Vec<ElementInfo>>;

    /// Click the `index`-th element matching `css`
    async fn click(&self, css: &str, index: usize) -> Result<()>;

    /// Replace the value of the `index`-th element matching `css`
    async fn fill(&self, css: &str, index: usize, text: &str) -> Result<()>;

    /// Visible text of the whole document
    async fn body_text(&self) -> Result<String>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Cheap probe: false when the page or browser process is gone
    async fn is_alive(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Everything needed to launch one isolated browser
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub session_id: String,
    /// Private user-data directory, never shared between sessions
    pub profile_dir: PathBuf,
    pub credentials: Credentials,
}

#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Arc<dyn BrowserDriver>>;
}

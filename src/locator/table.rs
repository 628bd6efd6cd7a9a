//! Versioned selector, keyword and phrase tables
//!
//! The markup of meeting front ends changes without notice, so everything
//! page-specific lives in YAML. The default table is compiled in; a
//! replacement can be loaded from disk.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::Role;
use crate::platform::PlatformKind;

pub const EMBEDDED_LOCATORS: &str = include_str!("../../assets/locators.yaml");

/// Keywords in the two supported UI languages
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeywordSet {
    pub en: Vec<String>,
    pub ru: Vec<String>,
}

impl KeywordSet {
    pub fn new(en: &[&str], ru: &[&str]) -> Self {
        let own = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            en: own(en),
            ru: own(ru),
        }
    }

    /// Keywords in declaration order, English first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.en.iter().chain(self.ru.iter()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.en.is_empty() && self.ru.is_empty()
    }

    /// First keyword contained in `text`, compared case-insensitively
    pub fn find_in(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.iter()
            .find(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
    }

    /// Longest keyword contained in `text`
    pub fn longest_in(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.iter()
            .filter(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
            .max_by_key(|k| k.chars().count())
    }
}

/// How to find one control
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoleHints {
    /// Attribute selectors, most specific first
    pub selectors: Vec<String>,
    pub keywords: KeywordSet,
    /// Elements considered by the label and text scans
    pub scan: String,
}

/// Label vocabulary telling whether a media toggle is currently on
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToggleWords {
    pub on: KeywordSet,
    pub off: KeywordSet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerificationTable {
    pub min_indicators: usize,
    pub indicators: Vec<String>,
    pub platforms: HashMap<PlatformKind, Vec<String>>,
    pub error_phrases: KeywordSet,
    pub end_phrases: KeywordSet,
}

impl Default for VerificationTable {
    fn default() -> Self {
        Self {
            min_indicators: 1,
            indicators: Vec::new(),
            platforms: HashMap::new(),
            error_phrases: KeywordSet::default(),
            end_phrases: KeywordSet::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocatorTable {
    pub version: String,
    #[serde(default)]
    pub roles: HashMap<Role, RoleHints>,
    /// Per-platform selectors tried before the generic ones
    #[serde(default)]
    pub platforms: HashMap<PlatformKind, HashMap<Role, Vec<String>>>,
    #[serde(default)]
    pub toggle_state: ToggleWords,
    #[serde(default)]
    pub verification: VerificationTable,
}

impl LocatorTable {
    pub fn embedded() -> Result<Self> {
        Self::from_yaml(EMBEDDED_LOCATORS).context("Embedded locator table is invalid")
    }

    /// Table from `path`, or the embedded one when no path is configured
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read locator table {:?}", path))?;
                Self::from_yaml(&content)
                    .with_context(|| format!("Invalid locator table {:?}", path))
            }
            None => Self::embedded(),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let table: LocatorTable = serde_yaml::from_str(content)?;
        if table.version.trim().is_empty() {
            bail!("Locator table has no version");
        }
        if table.verification.min_indicators == 0 {
            bail!("verification.min_indicators must be at least 1");
        }
        Ok(table)
    }

    /// Hints for a role on a platform: platform selectors first, then the
    /// generic ones
    pub fn hints(&self, platform: PlatformKind, role: Role) -> RoleHints {
        let mut hints = self.roles.get(&role).cloned().unwrap_or_default();
        if let Some(extra) = self.platforms.get(&platform).and_then(|p| p.get(&role)) {
            let mut selectors = extra.clone();
            selectors.extend(hints.selectors.into_iter().filter(|s| !extra.contains(s)));
            hints.selectors = selectors;
        }
        hints
    }

    /// In-meeting indicator selectors for a platform, specific ones first
    pub fn indicators(&self, platform: PlatformKind) -> Vec<String> {
        let mut all = self
            .verification
            .platforms
            .get(&platform)
            .cloned()
            .unwrap_or_default();
        all.extend(self.verification.indicators.iter().cloned());
        all
    }
}

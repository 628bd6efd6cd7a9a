use async_trait::async_trait;
use log::debug;

use super::table::RoleHints;
use crate::driver::{BrowserDriver, ElementInfo};

/// An element a strategy proposes, addressed as the `index`-th match of `css`
#[derive(Debug, Clone)]
pub struct Candidate {
    pub css: String,
    pub index: usize,
    pub element: ElementInfo,
}

/// One independent way of finding a control
#[async_trait]
pub trait LocatorStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidates in preference order. Lookup errors are treated as "nothing
    /// found" so one broken strategy never blocks the others.
    async fn candidates(&self, driver: &dyn BrowserDriver, hints: &RoleHints) -> Vec<Candidate>;
}

async fn query(driver: &dyn BrowserDriver, css: &str) -> Vec<ElementInfo> {
    if css.trim().is_empty() {
        return Vec::new();
    }
    match driver.query_all(css).await {
        Ok(elements) => elements,
        Err(e) => {
            debug!("Query '{}' failed: {}", css, e);
            Vec::new()
        }
    }
}

/// Selectors keyed on stable attributes (ids, data-*, aria-*)
pub struct AttributeMatch;

#[async_trait]
impl LocatorStrategy for AttributeMatch {
    fn name(&self) -> &'static str {
        "attribute"
    }

    async fn candidates(&self, driver: &dyn BrowserDriver, hints: &RoleHints) -> Vec<Candidate> {
        let mut found = Vec::new();
        for css in &hints.selectors {
            for (index, element) in query(driver, css).await.into_iter().enumerate() {
                found.push(Candidate {
                    css: css.clone(),
                    index,
                    element,
                });
            }
        }
        found
    }
}

/// Keyword match against aria-label / title / placeholder
pub struct AccessibleLabel;

#[async_trait]
impl LocatorStrategy for AccessibleLabel {
    fn name(&self) -> &'static str {
        "accessible-label"
    }

    async fn candidates(&self, driver: &dyn BrowserDriver, hints: &RoleHints) -> Vec<Candidate> {
        let elements = query(driver, &hints.scan).await;
        rank_by_keyword(&hints.scan, &elements, hints, |el| {
            el.accessible_label().map(str::to_string)
        })
    }
}

/// Keyword match against the visible text of buttons and links
pub struct FreeTextScan;

#[async_trait]
impl LocatorStrategy for FreeTextScan {
    fn name(&self) -> &'static str {
        "text-scan"
    }

    async fn candidates(&self, driver: &dyn BrowserDriver, hints: &RoleHints) -> Vec<Candidate> {
        let elements = query(driver, &hints.scan).await;
        rank_by_keyword(&hints.scan, &elements, hints, |el| {
            Some(el.text.clone()).filter(|t| !t.trim().is_empty())
        })
    }
}

/// Keyword order decides preference, so "join now" outranks a bare "join"
fn rank_by_keyword<F>(
    css: &str,
    elements: &[ElementInfo],
    hints: &RoleHints,
    text_of: F,
) -> Vec<Candidate>
where
    F: Fn(&ElementInfo) -> Option<String>,
{
    let texts: Vec<Option<String>> = elements
        .iter()
        .map(|el| text_of(el).map(|t| t.to_lowercase()))
        .collect();

    let mut seen = vec![false; elements.len()];
    let mut ranked = Vec::new();
    for keyword in hints.keywords.iter() {
        let keyword = keyword.to_lowercase();
        if keyword.is_empty() {
            continue;
        }
        for (index, text) in texts.iter().enumerate() {
            let hit = text.as_deref().map(|t| t.contains(&keyword)).unwrap_or(false);
            if hit && !seen[index] {
                seen[index] = true;
                ranked.push(Candidate {
                    css: css.to_string(),
                    index,
                    element: elements[index].clone(),
                });
            }
        }
    }
    ranked
}

pub fn default_strategies() -> Vec<Box<dyn LocatorStrategy>> {
    vec![
        Box::new(AttributeMatch),
        Box::new(AccessibleLabel),
        Box::new(FreeTextScan),
    ]
}

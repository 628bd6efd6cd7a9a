//! In-memory page model for tests
//!
//! Supports the CSS subset used by the locator tables: tag, `#id`, `.class`,
//! `[attr]`, `[attr='v']`, `[attr*='v']`, `[attr^='v']`, `[attr$='v']`, the
//! ` i` flag, compound selectors and comma-separated lists. Anything else
//! (combinators, pseudo-classes) is rejected so a bad table entry fails loudly.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::traits::{BrowserDriver, DriverFactory, ElementInfo, LaunchProfile};

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub key: String,
    pub tag: String,
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub visible: bool,
    pub enabled: bool,
}

impl FakeElement {
    pub fn new(key: &str, tag: &str) -> Self {
        Self {
            key: key.to_string(),
            tag: tag.to_lowercase(),
            text: String::new(),
            attributes: HashMap::new(),
            visible: true,
            enabled: true,
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn info(&self) -> ElementInfo {
        ElementInfo {
            tag: self.tag.clone(),
            text: self.text.clone(),
            attributes: self.attributes.clone(),
            visible: self.visible,
            enabled: self.enabled,
        }
    }
}

/// Page mutation triggered by a click
#[derive(Debug, Clone)]
pub enum Effect {
    AddElement(FakeElement),
    RemoveElement(String),
    SetUrl(String),
    SetBodyText(String),
    SetAttr {
        key: String,
        name: String,
        value: String,
    },
    Crash,
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    elements: Vec<FakeElement>,
    body_text: String,
    redirects: HashMap<String, String>,
    alive: bool,
    closed: bool,
    crash_on_goto: u32,
    failing_reads: u32,
    text_unreadable: bool,
    screenshot_fails: bool,
    on_click: HashMap<String, Vec<Effect>>,
    navigations: Vec<String>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    screenshots: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FakePage {
    state: Arc<Mutex<PageState>>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                url: "about:blank".to_string(),
                alive: true,
                ..Default::default()
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut PageState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn element(self, element: FakeElement) -> Self {
        self.with(|s| s.elements.push(element));
        self
    }

    pub fn body(self, text: &str) -> Self {
        self.with(|s| s.body_text = text.to_string());
        self
    }

    /// Navigating to `from` lands on `to`
    pub fn redirect(self, from: &str, to: &str) -> Self {
        self.with(|s| s.redirects.insert(from.to_string(), to.to_string()));
        self
    }

    pub fn on_click(self, key: &str, effects: Vec<Effect>) -> Self {
        self.with(|s| s.on_click.insert(key.to_string(), effects));
        self
    }

    /// The next `n` navigations kill the page
    pub fn crash_on_goto(self, n: u32) -> Self {
        self.with(|s| s.crash_on_goto = n);
        self
    }

    /// Every body text read fails; URL and element queries still work
    pub fn unreadable_text(self) -> Self {
        self.with(|s| s.text_unreadable = true);
        self
    }

    pub fn failing_screenshots(self) -> Self {
        self.with(|s| s.screenshot_fails = true);
        self
    }

    /// The next `n` URL/text reads fail with a transient error
    pub fn fail_reads(&self, n: u32) {
        self.with(|s| s.failing_reads = n);
    }

    pub fn set_url(&self, url: &str) {
        self.with(|s| s.url = url.to_string());
    }

    pub fn set_body(&self, text: &str) {
        self.with(|s| s.body_text = text.to_string());
    }

    pub fn kill(&self) {
        self.with(|s| s.alive = false);
    }

    pub fn url(&self) -> String {
        self.with(|s| s.url.clone())
    }

    pub fn clicks(&self) -> Vec<String> {
        self.with(|s| s.clicks.clone())
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.with(|s| s.fills.clone())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.with(|s| s.navigations.clone())
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.with(|s| s.screenshots.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.with(|s| s.closed)
    }

    fn check_alive(state: &PageState) -> Result<()> {
        if state.closed {
            bail!("Target page, context or browser has been closed");
        }
        if !state.alive {
            bail!("Browser has disconnected");
        }
        Ok(())
    }

    fn transient_read(state: &mut PageState) -> Result<()> {
        Self::check_alive(state)?;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            bail!("Execution context was destroyed");
        }
        Ok(())
    }

    fn matching<'a>(state: &'a PageState, css: &str) -> Result<Vec<&'a FakeElement>> {
        let selector = SelectorList::parse(css)?;
        Ok(state
            .elements
            .iter()
            .filter(|el| selector.matches(el))
            .collect())
    }

    fn apply(state: &mut PageState, effect: Effect) {
        match effect {
            Effect::AddElement(el) => state.elements.push(el),
            Effect::RemoveElement(key) => state.elements.retain(|el| el.key != key),
            Effect::SetUrl(url) => state.url = url,
            Effect::SetBodyText(text) => state.body_text = text,
            Effect::SetAttr { key, name, value } => {
                if let Some(el) = state.elements.iter_mut().find(|el| el.key == key) {
                    el.attributes.insert(name, value);
                }
            }
            Effect::Crash => state.alive = false,
        }
    }
}

#[async_trait]
impl BrowserDriver for FakePage {
    async fn goto(&self, url: &str, _timeout_ms: u64) -> Result<()> {
        self.with(|s| {
            Self::check_alive(s)?;
            s.navigations.push(url.to_string());
            if s.crash_on_goto > 0 {
                s.crash_on_goto -= 1;
                s.alive = false;
                bail!("Target crashed");
            }
            s.url = s.redirects.get(url).cloned().unwrap_or_else(|| url.to_string());
            Ok(())
        })
    }

    async fn current_url(&self) -> Result<String> {
        self.with(|s| {
            Self::transient_read(s)?;
            Ok(s.url.clone())
        })
    }

    async fn query_all(&self, css: &str) -> Result<Vec<ElementInfo>> {
        self.with(|s| {
            Self::check_alive(s)?;
            Ok(Self::matching(s, css)?.into_iter().map(FakeElement::info).collect())
        })
    }

    async fn click(&self, css: &str, index: usize) -> Result<()> {
        self.with(|s| {
            Self::check_alive(s)?;
            let el = Self::matching(s, css)?
                .into_iter()
                .nth(index)
                .cloned()
                .ok_or_else(|| anyhow!("No element #{} for '{}'", index, css))?;
            if !el.visible || !el.enabled {
                bail!("Element '{}' is not clickable", el.key);
            }
            s.clicks.push(el.key.clone());
            for effect in s.on_click.get(&el.key).cloned().unwrap_or_default() {
                Self::apply(s, effect);
            }
            Ok(())
        })
    }

    async fn fill(&self, css: &str, index: usize, text: &str) -> Result<()> {
        self.with(|s| {
            Self::check_alive(s)?;
            let key = Self::matching(s, css)?
                .into_iter()
                .nth(index)
                .map(|el| el.key.clone())
                .ok_or_else(|| anyhow!("No element #{} for '{}'", index, css))?;
            if let Some(el) = s.elements.iter_mut().find(|el| el.key == key) {
                el.attributes.insert("value".to_string(), text.to_string());
            }
            s.fills.push((key, text.to_string()));
            Ok(())
        })
    }

    async fn body_text(&self) -> Result<String> {
        self.with(|s| {
            Self::transient_read(s)?;
            if s.text_unreadable {
                bail!("Evaluation failed: document.body is null");
            }
            let element_text: Vec<&str> = s
                .elements
                .iter()
                .filter(|el| el.visible && !el.text.is_empty())
                .map(|el| el.text.as_str())
                .collect();
            Ok(format!("{}\n{}", s.body_text, element_text.join("\n")))
        })
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let fails = self.with(|s| -> Result<bool> {
            Self::check_alive(s)?;
            Ok(s.screenshot_fails)
        })?;
        if fails {
            bail!("Screenshot failed");
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"\x89PNG fake")?;
        self.with(|s| s.screenshots.push(path.to_path_buf()));
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.with(|s| s.alive && !s.closed)
    }

    async fn close(&self) -> Result<()> {
        self.with(|s| {
            s.closed = true;
            s.alive = false;
        });
        Ok(())
    }
}

/// Hands out prepared pages in order, then pages built by a template
pub struct FakeFactory {
    queued: Mutex<VecDeque<FakePage>>,
    template: Box<dyn Fn() -> FakePage + Send + Sync>,
    launched: Mutex<Vec<FakePage>>,
    failing_launches: AtomicU32,
}

impl FakeFactory {
    pub fn new<F>(template: F) -> Self
    where
        F: Fn() -> FakePage + Send + Sync + 'static,
    {
        Self {
            queued: Mutex::new(VecDeque::new()),
            template: Box::new(template),
            launched: Mutex::new(Vec::new()),
            failing_launches: AtomicU32::new(0),
        }
    }

    pub fn queue(self, page: FakePage) -> Self {
        self.queued.lock().unwrap().push_back(page);
        self
    }

    pub fn fail_launches(self, n: u32) -> Self {
        self.failing_launches.store(n, Ordering::SeqCst);
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    pub fn pages(&self) -> Vec<FakePage> {
        self.launched.lock().unwrap().clone()
    }

    pub fn last_page(&self) -> Option<FakePage> {
        self.launched.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Arc<dyn BrowserDriver>> {
        let failing = self.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_launches.store(failing - 1, Ordering::SeqCst);
            bail!("Failed to launch Chromium");
        }
        std::fs::create_dir_all(&profile.profile_dir)?;
        let page = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| (self.template)());
        self.launched.lock().unwrap().push(page.clone());
        Ok(Arc::new(page))
    }
}

// --- CSS subset -----------------------------------------------------------

#[derive(Debug)]
enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    Prefix(String),
    Suffix(String),
}

#[derive(Debug)]
struct AttrTest {
    name: String,
    op: AttrOp,
    ignore_case: bool,
}

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

#[derive(Debug)]
struct SelectorList(Vec<Compound>);

impl SelectorList {
    fn parse(css: &str) -> Result<Self> {
        let parts = split_top_level(css);
        if parts.iter().all(|p| p.trim().is_empty()) {
            bail!("Empty selector");
        }
        parts
            .iter()
            .map(|p| Compound::parse(p.trim()))
            .collect::<Result<Vec<_>>>()
            .map(SelectorList)
    }

    fn matches(&self, el: &FakeElement) -> bool {
        self.0.iter().any(|c| c.matches(el))
    }
}

fn split_top_level(css: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for ch in css.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth -= 1,
            (None, ',') if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    parts.push(current);
    parts
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

impl Compound {
    fn parse(src: &str) -> Result<Self> {
        let chars: Vec<char> = src.chars().collect();
        let mut i = 0;
        let mut compound = Compound::default();

        let take_ident = |i: &mut usize| -> String {
            let start = *i;
            while *i < chars.len() && is_ident(chars[*i]) {
                *i += 1;
            }
            chars[start..*i].iter().collect()
        };

        if i < chars.len() && is_ident(chars[i]) {
            compound.tag = Some(take_ident(&mut i).to_lowercase());
        } else if i < chars.len() && chars[i] == '*' {
            i += 1;
        }

        while i < chars.len() {
            match chars[i] {
                '#' => {
                    i += 1;
                    compound.id = Some(take_ident(&mut i));
                }
                '.' => {
                    i += 1;
                    compound.classes.push(take_ident(&mut i));
                }
                '[' => {
                    let end = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| i + p)
                        .ok_or_else(|| anyhow!("Unclosed attribute selector in '{}'", src))?;
                    let body: String = chars[i + 1..end].iter().collect();
                    compound.attrs.push(AttrTest::parse(&body)?);
                    i = end + 1;
                }
                c => bail!("Unsupported selector syntax '{}' in '{}'", c, src),
            }
        }

        Ok(compound)
    }

    fn matches(&self, el: &FakeElement) -> bool {
        if let Some(tag) = &self.tag {
            if &el.tag != tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if el.attributes.get("id") != Some(id) {
                return false;
            }
        }
        let classes: Vec<&str> = el
            .attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default();
        if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
        self.attrs.iter().all(|a| a.matches(el))
    }
}

impl AttrTest {
    fn parse(body: &str) -> Result<Self> {
        let body = body.trim();
        let op_pos = body.find(|c: char| matches!(c, '=' | '*' | '^' | '$'));
        let Some(pos) = op_pos else {
            return Ok(Self {
                name: body.to_string(),
                op: AttrOp::Exists,
                ignore_case: false,
            });
        };

        let name = body[..pos].trim().to_string();
        let rest = &body[pos..];
        let (kind, rest) = if let Some(r) = rest.strip_prefix("*=") {
            ("*", r)
        } else if let Some(r) = rest.strip_prefix("^=") {
            ("^", r)
        } else if let Some(r) = rest.strip_prefix("$=") {
            ("$", r)
        } else if let Some(r) = rest.strip_prefix('=') {
            ("=", r)
        } else {
            bail!("Unsupported attribute operator in '[{}]'", body);
        };

        let rest = rest.trim();
        let quote = rest
            .chars()
            .next()
            .filter(|c| *c == '\'' || *c == '"')
            .ok_or_else(|| anyhow!("Attribute value must be quoted in '[{}]'", body))?;
        let close = rest[1..]
            .find(quote)
            .map(|p| p + 1)
            .ok_or_else(|| anyhow!("Unclosed quote in '[{}]'", body))?;
        let value = rest[1..close].to_string();
        let flag = rest[close + 1..].trim();
        let ignore_case = match flag {
            "" => false,
            "i" | "I" => true,
            other => bail!("Unsupported attribute flag '{}'", other),
        };

        let op = match kind {
            "*" => AttrOp::Contains(value),
            "^" => AttrOp::Prefix(value),
            "$" => AttrOp::Suffix(value),
            _ => AttrOp::Equals(value),
        };
        Ok(Self {
            name,
            op,
            ignore_case,
        })
    }

    fn matches(&self, el: &FakeElement) -> bool {
        let Some(actual) = el.attributes.get(&self.name) else {
            return false;
        };
        let fold = |s: &str| {
            if self.ignore_case {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        };
        let actual = fold(actual);
        match &self.op {
            AttrOp::Exists => true,
            AttrOp::Equals(v) => actual == fold(v),
            AttrOp::Contains(v) => actual.contains(&fold(v)),
            AttrOp::Prefix(v) => actual.starts_with(&fold(v)),
            AttrOp::Suffix(v) => actual.ends_with(&fold(v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> FakePage {
        FakePage::new()
            .element(
                FakeElement::new("join", "button")
                    .attr("jsname", "Qx7uuf")
                    .attr("class", "btn primary")
                    .text("Join now"),
            )
            .element(
                FakeElement::new("mic", "div")
                    .attr("role", "button")
                    .attr("data-is-muted", "false")
                    .attr("aria-label", "Turn off Microphone (ctrl + d)"),
            )
            .element(FakeElement::new("name", "input").attr("id", "inputname"))
    }

    async fn keys(page: &FakePage, css: &str) -> Vec<String> {
        let state = page.state.lock().unwrap();
        FakePage::matching(&state, css)
            .unwrap()
            .into_iter()
            .map(|e| e.key.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_selector_subset() {
        let page = page();
        assert_eq!(keys(&page, "button[jsname='Qx7uuf']").await, vec!["join"]);
        assert_eq!(keys(&page, "button.btn.primary").await, vec!["join"]);
        assert_eq!(keys(&page, "input#inputname").await, vec!["name"]);
        assert_eq!(
            keys(&page, "[role='button'][aria-label*='microphone' i]").await,
            vec!["mic"]
        );
        assert!(keys(&page, "[aria-label*='microphone']").await.is_empty());
        assert_eq!(
            keys(&page, "button, [role='button']").await,
            vec!["join", "mic"]
        );
        assert_eq!(keys(&page, "[data-is-muted]").await, vec!["mic"]);
    }

    #[tokio::test]
    async fn test_unsupported_selector_is_rejected() {
        let page = page();
        assert!(page.query_all("div > button").await.is_err());
        assert!(page.query_all("button:has-text('Join')").await.is_err());
    }

    #[tokio::test]
    async fn test_click_applies_effects_and_records() {
        let page = page().on_click(
            "join",
            vec![
                Effect::RemoveElement("join".into()),
                Effect::SetUrl("https://meet.google.com/abc-defg-hij?joined".into()),
            ],
        );
        page.click("button", 0).await.unwrap();
        assert_eq!(page.clicks(), vec!["join"]);
        assert!(page.query_all("button").await.unwrap().is_empty());
        assert!(page.url().ends_with("?joined"));
    }

    #[tokio::test]
    async fn test_crash_and_transient_reads() {
        let page = page().crash_on_goto(1);
        assert!(page.goto("https://meet.google.com/x", 1000).await.is_err());
        assert!(!page.is_alive().await);

        let page = FakePage::new();
        page.fail_reads(1);
        assert!(page.current_url().await.is_err());
        assert_eq!(page.current_url().await.unwrap(), "about:blank");
    }
}

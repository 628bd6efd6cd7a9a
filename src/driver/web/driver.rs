//! Browser driver backed by Playwright
//!
//! Every session gets its own persistent Chromium context rooted at a private
//! profile directory, so cookies and storage never leak between meetings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use playwright::api::{BrowserContext, Cookie, Page, Viewport};
use playwright::Playwright;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::browser::credentials::{CookieRecord, Credentials, OriginStorage};
use crate::driver::traits::{BrowserDriver, DriverFactory, ElementInfo, LaunchProfile};
use crate::utils::config::BrowserConfig;

/// Hides the most common automation tell before any page script runs
const WEBDRIVER_MASK: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
Object.defineProperty(navigator, 'languages', { get: () => ['ru-RU', 'ru', 'en-US', 'en'] });
"#;

const QUERY_ALL_JS: &str = r#"
(css) => Array.from(document.querySelectorAll(css)).map((el) => {
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    const attributes = {};
    for (const attr of el.attributes) attributes[attr.name] = attr.value;
    const text = (el.innerText || el.value || el.textContent || '').trim();
    return {
        tag: el.tagName.toLowerCase(),
        text: text.slice(0, 300),
        attributes,
        visible: rect.width > 0 && rect.height > 0
            && style.visibility !== 'hidden' && style.display !== 'none',
        enabled: !el.disabled,
    };
})
"#;

const ALIVE_PROBE: Duration = Duration::from_secs(3);

/// Chromium arguments applied to every session
pub fn hardening_args() -> Vec<String> {
    [
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--disable-blink-features=AutomationControlled",
        "--use-fake-ui-for-media-stream",
        "--use-fake-device-for-media-stream",
        "--autoplay-policy=no-user-gesture-required",
        "--disable-notifications",
        "--no-first-run",
        "--no-default-browser-check",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Web Driver using Playwright
pub struct WebDriver {
    // Owns the driver process; dropping it ends the connection
    _playwright: Playwright,
    context: BrowserContext,
    page: Mutex<Page>,
    action_timeout: Duration,
}

impl WebDriver {
    pub async fn launch(config: &BrowserConfig, profile: &LaunchProfile) -> Result<Self> {
        std::fs::create_dir_all(&profile.profile_dir)
            .with_context(|| format!("Failed to create profile dir {:?}", profile.profile_dir))?;

        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;
        let chromium = playwright.chromium();

        let mut args = hardening_args();
        args.extend(config.extra_args.iter().cloned());
        let permissions = vec!["camera".to_string(), "microphone".to_string()];
        let executable = resolve_browser_executable(config);

        let mut launcher = chromium
            .persistent_context_launcher(&profile.profile_dir)
            .headless(config.headless)
            .args(&args)
            .user_agent(&config.user_agent)
            .permissions(&permissions)
            .viewport(Some(Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
            }));
        if let Some(ref path) = executable {
            info!("Using browser executable {}", path.display());
            launcher = launcher.executable(path);
        }

        let context = launcher
            .launch()
            .await
            .context("Failed to launch Chromium")?;

        context
            .add_init_script(WEBDRIVER_MASK)
            .await
            .context("Failed to install init script")?;
        apply_credentials(&context, &profile.credentials).await;

        let existing = context.pages().unwrap_or_default().into_iter().next();
        let page = match existing {
            Some(page) => page,
            None => context.new_page().await.context("Failed to open page")?,
        };

        debug!("Browser for session {} launched", profile.session_id);

        Ok(Self {
            _playwright: playwright,
            context,
            page: Mutex::new(page),
            action_timeout: Duration::from_millis(config.action_timeout_ms),
        })
    }
}

/// Cookies are added one at a time so a single rejected cookie does not
/// discard the rest
async fn apply_credentials(context: &BrowserContext, credentials: &Credentials) {
    let mut applied = 0usize;
    for record in &credentials.cookies {
        match context.add_cookies(&[to_playwright_cookie(record)]).await {
            Ok(()) => applied += 1,
            Err(e) => warn!("Cookie '{}' rejected by browser: {}", record.name, e),
        }
    }

    if let Some(script) = local_storage_script(&credentials.origins) {
        if let Err(e) = context.add_init_script(&script).await {
            warn!("Failed to install saved local storage: {}", e);
        }
    }

    if !credentials.is_empty() {
        info!(
            "Applied {}/{} saved cookie(s), {} origin(s) of local storage",
            applied,
            credentials.cookies.len(),
            credentials.origins.len()
        );
    }
}

fn to_playwright_cookie(record: &CookieRecord) -> Cookie {
    Cookie {
        name: record.name.clone(),
        value: record.value.clone(),
        url: None,
        domain: record.domain.clone(),
        path: Some(record.path.clone().unwrap_or_else(|| "/".to_string())),
        expires: record.expires.filter(|e| *e > 0.0),
        http_only: record.http_only,
        secure: record.secure,
        same_site: None,
    }
}

/// Init script restoring `localStorage` for the matching origin only
pub fn local_storage_script(origins: &[OriginStorage]) -> Option<String> {
    let entries: Vec<_> = origins
        .iter()
        .filter(|o| !o.local_storage.is_empty())
        .map(|o| {
            let items: Vec<(String, String)> = o
                .local_storage
                .iter()
                .map(|e| (e.name.clone(), e.value.clone()))
                .collect();
            (o.origin.trim_end_matches('/').to_string(), items)
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    let payload = serde_json::to_string(&entries).ok()?;
    Some(format!(
        r#"(() => {{
    const saved = {};
    for (const [origin, items] of saved) {{
        if (window.location.origin !== origin) continue;
        try {{ for (const [k, v] of items) if (localStorage.getItem(k) === null) localStorage.setItem(k, v); }} catch (e) {{}}
    }}
}})();"#,
        payload
    ))
}

#[async_trait]
impl BrowserDriver for WebDriver {
    async fn goto(&self, url: &str, timeout_ms: u64) -> Result<()> {
        let page = self.page.lock().await;
        tokio::time::timeout(Duration::from_millis(timeout_ms), page.goto_builder(url).goto())
            .await
            .with_context(|| format!("Navigation to {} timed out", url))?
            .with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let page = self.page.lock().await;
        let url: String = page
            .evaluate("() => window.location.href", ())
            .await
            .context("Failed to read page URL")?;
        Ok(url)
    }

    async fn query_all(&self, css: &str) -> Result<Vec<ElementInfo>> {
        let page = self.page.lock().await;
        let elements: Vec<ElementInfo> = tokio::time::timeout(
            self.action_timeout,
            page.evaluate(QUERY_ALL_JS, css.to_string()),
        )
        .await
        .with_context(|| format!("Query '{}' timed out", css))?
        .with_context(|| format!("Query '{}' failed", css))?;
        Ok(elements)
    }

    async fn click(&self, css: &str, index: usize) -> Result<()> {
        let page = self.page.lock().await;
        let handles = page.query_selector_all(css).await?;
        let handle = handles
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("No element #{} for '{}'", index, css))?;
        tokio::time::timeout(self.action_timeout, handle.click_builder().click())
            .await
            .with_context(|| format!("Click on '{}' timed out", css))??;
        Ok(())
    }

    async fn fill(&self, css: &str, index: usize, text: &str) -> Result<()> {
        let page = self.page.lock().await;
        let handles = page.query_selector_all(css).await?;
        let handle = handles
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("No element #{} for '{}'", index, css))?;
        tokio::time::timeout(self.action_timeout, handle.fill_builder(text).fill())
            .await
            .with_context(|| format!("Fill on '{}' timed out", css))??;
        Ok(())
    }

    async fn body_text(&self) -> Result<String> {
        let page = self.page.lock().await;
        let text: String = tokio::time::timeout(
            self.action_timeout,
            page.evaluate("() => document.body ? document.body.innerText : ''", ()),
        )
        .await
        .context("Reading page text timed out")??;
        Ok(text)
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let page = self.page.lock().await;
        page.screenshot_builder()
            .path(path.to_path_buf())
            .screenshot()
            .await
            .context("Failed to take screenshot")?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let page = self.page.lock().await;
        matches!(
            tokio::time::timeout(ALIVE_PROBE, page.evaluate::<(), bool>("() => true", ())).await,
            Ok(Ok(true))
        )
    }

    async fn close(&self) -> Result<()> {
        self.context
            .close()
            .await
            .context("Failed to close browser context")?;
        Ok(())
    }
}

/// Launches one Playwright-backed driver per session
pub struct PlaywrightFactory {
    config: BrowserConfig,
}

impl PlaywrightFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverFactory for PlaywrightFactory {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Arc<dyn BrowserDriver>> {
        let driver = WebDriver::launch(&self.config, profile).await?;
        Ok(Arc::new(driver))
    }
}

/// Configured path, then `PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH`, then a system
/// Chrome/Chromium. `None` lets Playwright use its bundled build.
pub fn resolve_browser_executable(config: &BrowserConfig) -> Option<PathBuf> {
    config
        .executable_path
        .clone()
        .or_else(|| {
            std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH")
                .ok()
                .map(PathBuf::from)
        })
        .or_else(find_system_browser)
}

pub fn find_system_browser() -> Option<PathBuf> {
    let common_paths = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    common_paths
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .or_else(|| {
            ["google-chrome", "chromium", "chromium-browser"]
                .iter()
                .find_map(|name| which::which(name).ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::credentials::StorageEntry;

    #[test]
    fn test_hardening_args_cover_media_and_automation_flags() {
        let args = hardening_args();
        for flag in [
            "--use-fake-ui-for-media-stream",
            "--disable-blink-features=AutomationControlled",
            "--no-sandbox",
        ] {
            assert!(args.iter().any(|a| a == flag), "{}", flag);
        }
    }

    #[test]
    fn test_cookie_conversion_defaults_path_and_drops_session_expiry() {
        let cookie = to_playwright_cookie(&CookieRecord {
            name: "SID".into(),
            value: "x".into(),
            domain: Some(".google.com".into()),
            path: None,
            expires: Some(-1.0),
            http_only: Some(true),
            secure: None,
            same_site: None,
        });
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert_eq!(cookie.expires, None);
        assert_eq!(cookie.http_only, Some(true));
    }

    #[test]
    fn test_local_storage_script_scoped_by_origin() {
        assert!(local_storage_script(&[]).is_none());

        let script = local_storage_script(&[OriginStorage {
            origin: "https://telemost.yandex.ru/".into(),
            local_storage: vec![StorageEntry {
                name: "theme".into(),
                value: "dark".into(),
            }],
        }])
        .unwrap();
        assert!(script.contains(r#"["https://telemost.yandex.ru",[["theme","dark"]]]"#));
        assert!(script.contains("window.location.origin !== origin"));
    }

    #[test]
    fn test_configured_executable_wins() {
        let config = BrowserConfig {
            executable_path: Some(PathBuf::from("/opt/chrome/chrome")),
            ..Default::default()
        };
        assert_eq!(
            resolve_browser_executable(&config),
            Some(PathBuf::from("/opt/chrome/chrome"))
        );
    }
}

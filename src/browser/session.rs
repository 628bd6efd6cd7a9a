//! Browser Session Manager
//!
//! Owns one isolated browser per meeting session: a private profile directory,
//! transparent recreation when the browser dies during navigation, and a
//! teardown that is safe to call any number of times.

use anyhow::{bail, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::credentials::{CredentialStore, Credentials};
use crate::driver::{BrowserDriver, DriverFactory, LaunchProfile};
use crate::error::SessionError;

const LAUNCH_ATTEMPTS: u32 = 2;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

struct HandleInner {
    session_id: String,
    profile_dir: PathBuf,
    credentials: Credentials,
    driver: RwLock<Option<Arc<dyn BrowserDriver>>>,
    generation: AtomicU32,
    destroyed: AtomicBool,
}

/// Opaque handle to one isolated browser session. Cheap to clone; all clones
/// refer to the same browser.
#[derive(Clone)]
pub struct BrowserSessionHandle {
    inner: Arc<HandleInner>,
}

impl BrowserSessionHandle {
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn profile_dir(&self) -> &Path {
        &self.inner.profile_dir
    }

    /// Incremented every time the browser is recreated
    pub fn generation(&self) -> u32 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Current driver, `None` once destroyed
    pub async fn driver(&self) -> Option<Arc<dyn BrowserDriver>> {
        if self.is_destroyed() {
            return None;
        }
        self.inner.driver.read().await.clone()
    }

    /// Read-only view for components that must never click or type
    pub fn observe(&self) -> PageObserver {
        PageObserver {
            handle: self.clone(),
        }
    }
}

impl std::fmt::Debug for BrowserSessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSessionHandle")
            .field("session_id", &self.inner.session_id)
            .field("generation", &self.generation())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Read-only access to a session's page
#[derive(Clone, Debug)]
pub struct PageObserver {
    handle: BrowserSessionHandle,
}

impl PageObserver {
    async fn driver(&self) -> Result<Arc<dyn BrowserDriver>> {
        match self.handle.driver().await {
            Some(driver) => Ok(driver),
            None => bail!("browser session {} is gone", self.handle.session_id()),
        }
    }

    /// True once the session was torn down; a conclusive signal
    pub fn is_gone(&self) -> bool {
        self.handle.is_destroyed()
    }

    pub async fn is_alive(&self) -> bool {
        match self.handle.driver().await {
            Some(driver) => driver.is_alive().await,
            None => false,
        }
    }

    pub async fn current_url(&self) -> Result<String> {
        self.driver().await?.current_url().await
    }

    pub async fn body_text(&self) -> Result<String> {
        self.driver().await?.body_text().await
    }

    /// Number of visible elements matching `css`
    pub async fn count_visible(&self, css: &str) -> Result<usize> {
        let elements = self.driver().await?.query_all(css).await?;
        Ok(elements.iter().filter(|e| e.visible).count())
    }

    pub async fn screenshot(&self, path: &Path) -> Result<()> {
        self.driver().await?.screenshot(path).await
    }
}

pub struct BrowserSessionManager {
    factory: Arc<dyn DriverFactory>,
    credentials: Arc<dyn CredentialStore>,
    profiles_dir: PathBuf,
    navigation_timeout_ms: u64,
    retry_delay: Duration,
}

impl BrowserSessionManager {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        credentials: Arc<dyn CredentialStore>,
        profiles_dir: PathBuf,
        navigation_timeout_ms: u64,
    ) -> Self {
        Self {
            factory,
            credentials,
            profiles_dir,
            navigation_timeout_ms,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Launch a new isolated browser for `session_id`. Saved credentials are
    /// applied when available; their absence never fails creation.
    pub async fn create(&self, session_id: &str) -> Result<BrowserSessionHandle, SessionError> {
        let profile_dir = self.profiles_dir.join(session_id);
        wipe_dir(&profile_dir);

        let credentials = self.credentials.load().await;
        let profile = LaunchProfile {
            session_id: session_id.to_string(),
            profile_dir: profile_dir.clone(),
            credentials: credentials.clone(),
        };

        let mut last_error = String::new();
        for attempt in 1..=LAUNCH_ATTEMPTS {
            match self.factory.launch(&profile).await {
                Ok(driver) => {
                    info!("Browser session {} created", session_id);
                    return Ok(BrowserSessionHandle {
                        inner: Arc::new(HandleInner {
                            session_id: session_id.to_string(),
                            profile_dir,
                            credentials,
                            driver: RwLock::new(Some(driver)),
                            generation: AtomicU32::new(0),
                            destroyed: AtomicBool::new(false),
                        }),
                    });
                }
                Err(e) => {
                    warn!("Browser launch attempt {} for {} failed: {:#}", attempt, session_id, e);
                    last_error = format!("{:#}", e);
                    wipe_dir(&profile_dir);
                }
            }
        }

        Err(SessionError::AutomationCrash {
            attempts: LAUNCH_ATTEMPTS,
            message: last_error,
        })
    }

    /// Load `url`, recreating the browser when it has died. Tries at most
    /// `max_retries + 1` times.
    pub async fn navigate(
        &self,
        handle: &BrowserSessionHandle,
        url: &str,
        max_retries: u32,
    ) -> Result<(), SessionError> {
        let total = max_retries + 1;
        let mut crashed = false;
        let mut last_error = String::new();

        for attempt in 1..=total {
            if handle.is_destroyed() {
                return Err(SessionError::Cancelled);
            }
            if attempt > 1 && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay * (attempt - 1)).await;
            }

            let current = handle.driver().await;
            let driver = match current {
                Some(driver) if driver.is_alive().await => driver,
                _ => match self.recreate(handle).await {
                    Ok(driver) => driver,
                    Err(e) => {
                        crashed = true;
                        last_error = format!("{:#}", e);
                        warn!("Recreating browser for {} failed: {}", handle.session_id(), last_error);
                        continue;
                    }
                },
            };

            match driver.goto(url, self.navigation_timeout_ms).await {
                Ok(()) => {
                    debug!("Navigated to {} (attempt {})", url, attempt);
                    return Ok(());
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                    crashed = !driver.is_alive().await;
                    warn!(
                        "Navigation to {} failed (attempt {}/{}, crashed: {}): {}",
                        url, attempt, total, crashed, last_error
                    );
                }
            }
        }

        if crashed {
            Err(SessionError::AutomationCrash {
                attempts: total,
                message: last_error,
            })
        } else {
            Err(SessionError::NavigationFailed {
                url: url.to_string(),
                attempts: total,
                message: last_error,
            })
        }
    }

    /// Replace a dead browser with a fresh one on a clean profile
    async fn recreate(&self, handle: &BrowserSessionHandle) -> Result<Arc<dyn BrowserDriver>> {
        let mut slot = handle.inner.driver.write().await;
        if handle.is_destroyed() {
            bail!("session was destroyed");
        }
        if let Some(old) = slot.take() {
            close_quietly(old.as_ref()).await;
        }
        wipe_dir(&handle.inner.profile_dir);

        let generation = handle.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Recreating browser for session {} (generation {})",
            handle.session_id(),
            generation
        );
        let profile = LaunchProfile {
            session_id: handle.inner.session_id.clone(),
            profile_dir: handle.inner.profile_dir.clone(),
            credentials: handle.inner.credentials.clone(),
        };
        let driver = self.factory.launch(&profile).await?;
        *slot = Some(driver.clone());
        Ok(driver)
    }

    /// Close the browser and delete its profile. Idempotent; never fails.
    pub async fn destroy(&self, handle: &BrowserSessionHandle) {
        if handle.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let driver = handle.inner.driver.write().await.take();
        if let Some(driver) = driver {
            close_quietly(driver.as_ref()).await;
        }
        wipe_dir(&handle.inner.profile_dir);
        info!("Browser session {} destroyed", handle.session_id());
    }
}

async fn close_quietly(driver: &dyn BrowserDriver) {
    match tokio::time::timeout(CLOSE_TIMEOUT, driver.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Closing browser failed: {}", e),
        Err(_) => warn!("Closing browser timed out"),
    }
}

fn wipe_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove profile dir {:?}: {}", dir, e),
    }
}

//! Join Verifier
//!
//! Independent check that the browser is inside a live meeting. Clicking a
//! join control proves nothing; the verdict is built from the page URL, the
//! presence of in-meeting controls and the absence of known error wording.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::browser::PageObserver;
use crate::locator::table::LocatorTable;
use crate::platform::{self, PlatformKind};
use crate::utils::config::VerifierConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotInMeetingReason {
    /// The browser is gone or does not answer
    SessionLost,
    /// Bounced to a sign-in page
    LoginRequired { url: String },
    /// Left the meeting service (marketing page, app download page, ...)
    OffPlatform { url: String },
    /// The page states why joining failed
    ExplicitError { phrase: String },
    /// Page text could not be read, so error wording cannot be ruled out
    TextUnreadable,
    InsufficientIndicators { found: usize, required: usize },
}

impl fmt::Display for NotInMeetingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionLost => write!(f, "browser session lost"),
            Self::LoginRequired { url } => write!(f, "redirected to sign-in page {}", url),
            Self::OffPlatform { url } => write!(f, "page left the meeting service: {}", url),
            Self::ExplicitError { phrase } => write!(f, "page reports \"{}\"", phrase),
            Self::TextUnreadable => write!(f, "page text could not be read"),
            Self::InsufficientIndicators { found, required } => write!(
                f,
                "{} in-meeting indicator(s) found, {} required",
                found, required
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    InMeeting { indicators: usize },
    NotInMeeting(NotInMeetingReason),
}

impl Verdict {
    pub fn is_in_meeting(&self) -> bool {
        matches!(self, Verdict::InMeeting { .. })
    }
}

pub struct JoinVerifier {
    table: Arc<LocatorTable>,
    config: VerifierConfig,
}

impl JoinVerifier {
    pub fn new(table: Arc<LocatorTable>, config: VerifierConfig) -> Self {
        Self { table, config }
    }

    async fn probe<T, F>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                debug!("Verification probe failed: {:#}", e);
                None
            }
            Err(_) => {
                debug!("Verification probe timed out");
                None
            }
        }
    }

    /// Authoritative verdict. A sign-in URL always loses, whatever else the
    /// page shows.
    pub async fn verify(&self, page: &PageObserver, platform: PlatformKind) -> Verdict {
        if self.config.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }

        let verdict = self.evaluate(page, platform).await;
        match &verdict {
            Verdict::InMeeting { indicators } => {
                info!("Verified in meeting on {} ({} indicator(s))", platform, indicators)
            }
            Verdict::NotInMeeting(reason) => info!("Not in meeting on {}: {}", platform, reason),
        }
        verdict
    }

    async fn evaluate(&self, page: &PageObserver, platform: PlatformKind) -> Verdict {
        if page.is_gone() {
            return Verdict::NotInMeeting(NotInMeetingReason::SessionLost);
        }

        let Some(url) = self.probe(page.current_url()).await else {
            return Verdict::NotInMeeting(NotInMeetingReason::SessionLost);
        };
        if platform::is_auth_url(&url) {
            return Verdict::NotInMeeting(NotInMeetingReason::LoginRequired { url });
        }
        if !platform.owns_url(&url) {
            return Verdict::NotInMeeting(NotInMeetingReason::OffPlatform { url });
        }

        let Some(text) = self.probe(page.body_text()).await else {
            return Verdict::NotInMeeting(NotInMeetingReason::TextUnreadable);
        };
        if let Some(phrase) = self.table.verification.error_phrases.find_in(&text) {
            return Verdict::NotInMeeting(NotInMeetingReason::ExplicitError {
                phrase: phrase.to_string(),
            });
        }

        let required = self.table.verification.min_indicators;
        let mut found = 0;
        for css in self.table.indicators(platform) {
            if let Some(count) = self.probe(page.count_visible(&css)).await {
                if count > 0 {
                    debug!("Indicator '{}' present", css);
                    found += 1;
                    if found >= required {
                        break;
                    }
                }
            }
        }

        if found >= required {
            Verdict::InMeeting { indicators: found }
        } else {
            Verdict::NotInMeeting(NotInMeetingReason::InsufficientIndicators { found, required })
        }
    }
}

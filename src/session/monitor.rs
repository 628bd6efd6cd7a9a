//! Liveness Monitor
//!
//! One polling task per recording session. It only reads the page (URL and
//! text) and returns the first conclusive end signal; the controller does
//! the stopping.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::audio::RecordingJob;
use crate::browser::PageObserver;
use crate::locator::table::LocatorTable;
use crate::platform::{self, PlatformKind};
use crate::utils::config::MonitorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EndReason {
    StopRequested,
    SessionGone,
    LeftMeeting { url: String },
    MeetingEnded { phrase: String },
    MaxDuration { secs: u64 },
    RecordingStopped,
    /// More consecutive failed polls than tolerated
    ProbeFailures { count: u32 },
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopRequested => write!(f, "stop requested"),
            Self::SessionGone => write!(f, "browser session gone"),
            Self::LeftMeeting { url } => write!(f, "page left the meeting: {}", url),
            Self::MeetingEnded { phrase } => write!(f, "meeting ended (\"{}\")", phrase),
            Self::MaxDuration { secs } => write!(f, "maximum duration of {}s reached", secs),
            Self::RecordingStopped => write!(f, "recorder exited"),
            Self::ProbeFailures { count } => write!(f, "{} consecutive failed polls", count),
        }
    }
}

enum Poll {
    Alive,
    Ended(EndReason),
    Inconclusive(String),
}

pub struct LivenessMonitor {
    table: Arc<LocatorTable>,
    interval: Duration,
    tolerated_failures: u32,
    probe_timeout: Duration,
    max_duration: Option<Duration>,
}

impl LivenessMonitor {
    pub fn new(table: Arc<LocatorTable>, config: &MonitorConfig) -> Self {
        Self {
            table,
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            tolerated_failures: config.tolerated_failed_polls,
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            max_duration: config.max_duration_secs.map(Duration::from_secs),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_duration(mut self, max: Option<Duration>) -> Self {
        self.max_duration = max;
        self
    }

    /// Poll until the meeting ends, the recorder stops or a stop is
    /// requested. Returns exactly once.
    pub async fn run(
        &self,
        page: PageObserver,
        platform: PlatformKind,
        job: &RecordingJob,
        mut stop: watch::Receiver<bool>,
    ) -> EndReason {
        let started = Instant::now();
        let mut failures = 0u32;

        loop {
            let stop_now = *stop.borrow();
            if stop_now {
                return EndReason::StopRequested;
            }

            let wait = match self.max_duration {
                Some(max) => self.interval.min(max.saturating_sub(started.elapsed())),
                None => self.interval,
            };
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        return EndReason::StopRequested;
                    }
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            job.status().await;
            if !job.is_running() {
                return EndReason::RecordingStopped;
            }
            if let Some(max) = self.max_duration {
                if started.elapsed() >= max {
                    info!("Session {} reached its time limit", job.session_id);
                    return EndReason::MaxDuration {
                        secs: max.as_secs(),
                    };
                }
            }

            match self.poll(&page, platform).await {
                Poll::Alive => failures = 0,
                Poll::Ended(reason) => {
                    info!("Meeting over for {}: {}", job.session_id, reason);
                    return reason;
                }
                Poll::Inconclusive(message) => {
                    failures += 1;
                    warn!(
                        "Liveness poll {} for {} failed: {}",
                        failures, job.session_id, message
                    );
                    // a live page keeps being polled; only a dead one ends the loop
                    if failures > self.tolerated_failures && !page.is_alive().await {
                        return EndReason::ProbeFailures { count: failures };
                    }
                }
            }
        }
    }

    async fn poll(&self, page: &PageObserver, platform: PlatformKind) -> Poll {
        if page.is_gone() {
            return Poll::Ended(EndReason::SessionGone);
        }

        let url = match tokio::time::timeout(self.probe_timeout, page.current_url()).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => return Poll::Inconclusive(format!("{:#}", e)),
            Err(_) => return Poll::Inconclusive("URL probe timed out".to_string()),
        };
        if !platform::is_meeting_url(&url) {
            return Poll::Ended(EndReason::LeftMeeting { url });
        }

        let text = match tokio::time::timeout(self.probe_timeout, page.body_text()).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Poll::Inconclusive(format!("{:#}", e)),
            Err(_) => return Poll::Inconclusive("text probe timed out".to_string()),
        };
        if let Some(phrase) = self.table.verification.end_phrases.find_in(&text) {
            return Poll::Ended(EndReason::MeetingEnded {
                phrase: phrase.to_string(),
            });
        }

        debug!("{} session still live at {}", platform, url);
        Poll::Alive
    }
}

//! Diagnostic Reporter
//!
//! On a failed session: snapshot the page (best effort, bounded) and hand a
//! `DiagnosticEvent` to the notifier without waiting for delivery.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::notify::{self, Notifier};
use crate::browser::PageObserver;
use crate::error::SessionError;
use crate::utils::config::NotificationConfig;

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    pub tag: String,
    pub session_id: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub snapshot: Option<PathBuf>,
    /// Operator has to do something (refresh credentials, fix audio, update selectors)
    pub action_required: bool,
}

impl DiagnosticEvent {
    pub fn message(&self) -> String {
        let mut message = format!(
            "Meeting session {} failed [{}]\nURL: {}\nReason: {}\nAt: {}",
            self.session_id,
            self.tag,
            self.url,
            self.reason,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if self.action_required {
            message.push_str("\nAction required.");
        }
        message
    }
}

pub struct DiagnosticReporter {
    notifier: Arc<dyn Notifier>,
    snapshot_dir: PathBuf,
    snapshot_timeout: Duration,
}

impl DiagnosticReporter {
    pub fn new(notifier: Arc<dyn Notifier>, config: &NotificationConfig) -> Self {
        Self {
            notifier,
            snapshot_dir: config.snapshot_dir.clone(),
            snapshot_timeout: Duration::from_millis(config.snapshot_timeout_ms),
        }
    }

    /// Build the event, taking a snapshot while the page is still there
    pub async fn capture(
        &self,
        session_id: &str,
        url: &str,
        error: &SessionError,
        page: Option<&PageObserver>,
    ) -> DiagnosticEvent {
        let timestamp = Utc::now();
        let snapshot = match page {
            Some(page) if !page.is_gone() => {
                let path = self.snapshot_dir.join(format!(
                    "{}_{}_{}.png",
                    session_id,
                    error.tag(),
                    timestamp.format("%Y%m%d_%H%M%S")
                ));
                self.snapshot(page, path).await
            }
            _ => None,
        };

        DiagnosticEvent {
            tag: error.tag().to_string(),
            session_id: session_id.to_string(),
            url: url.to_string(),
            timestamp,
            reason: error.to_string(),
            snapshot,
            action_required: error.notifies_operator(),
        }
    }

    async fn snapshot(&self, page: &PageObserver, path: PathBuf) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.snapshot_dir) {
            warn!("Cannot create {:?}: {}", self.snapshot_dir, e);
            return None;
        }
        match tokio::time::timeout(self.snapshot_timeout, page.screenshot(&path)).await {
            Ok(Ok(())) => {
                debug!("Failure snapshot saved to {:?}", path);
                Some(path)
            }
            Ok(Err(e)) => {
                warn!("Failure snapshot failed: {:#}", e);
                None
            }
            Err(_) => {
                warn!("Failure snapshot timed out");
                None
            }
        }
    }

    /// Fire-and-forget delivery
    pub fn send(&self, event: &DiagnosticEvent) -> tokio::task::JoinHandle<()> {
        notify::dispatch(self.notifier.clone(), event.message(), event.snapshot.clone())
    }

    pub async fn report(
        &self,
        session_id: &str,
        url: &str,
        error: &SessionError,
        page: Option<&PageObserver>,
    ) -> DiagnosticEvent {
        let event = self.capture(session_id, url, error, page).await;
        self.send(&event);
        event
    }
}

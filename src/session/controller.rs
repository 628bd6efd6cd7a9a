//! Session Controller
//!
//! Drives each meeting session through its lifecycle on its own task:
//! browser, join, verification, recording, liveness, teardown. The command
//! surface talks to it through `submit`, `status`, `stop`, `result` and `wait`.

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::events::{EventEmitter, SessionEvent};
use super::monitor::LivenessMonitor;
use super::registry::{RegistryError, SessionEntry, SessionRegistry};
use super::state::{MeetingSession, SessionState};
use crate::audio::{AudioCaptureManager, AudioSourceDescriptor, StopOutcome};
use crate::browser::{BrowserSessionManager, CredentialStore};
use crate::capabilities::{TranscriptOutcome, TranscriptReport};
use crate::driver::DriverFactory;
use crate::error::SessionError;
use crate::join::{JoinSequencer, JoinVerifier, NotInMeetingReason, Verdict};
use crate::locator::table::LocatorTable;
use crate::locator::LocatorEngine;
use crate::platform::{self, Classification, PlatformKind};
use crate::report::{DiagnosticReporter, Notifier};
use crate::utils::config::AppConfig;

/// Ten years
const MAX_RETENTION_SECS: u64 = 10 * 365 * 86_400;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error("{identity} already has an active session ({existing})")]
    RejectedDuplicate { identity: String, existing: String },

    #[error("unsupported meeting URL: {url}")]
    UnknownPlatform { url: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    #[error("no session {0}")]
    NotFound(String),

    #[error("session {id} is {state}, not done")]
    NotReady { id: String, state: SessionState },
}

#[derive(Debug, Clone, Serialize)]
pub struct StopAck {
    pub session_id: String,
    pub state: SessionState,
    /// False when a stop was already requested or the session had ended
    pub accepted: bool,
}

/// What a finished session leaves behind
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub session_id: String,
    pub recording_path: Option<PathBuf>,
    pub recording: Option<StopOutcome>,
    pub transcript: Option<TranscriptOutcome>,
    pub transcript_error: Option<String>,
    pub transcript_location: Option<String>,
}

/// External collaborators the controller is built from
pub struct Collaborators {
    pub factory: Arc<dyn DriverFactory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub notifier: Arc<dyn Notifier>,
    pub locators: Arc<LocatorTable>,
    pub audio_sources: Vec<AudioSourceDescriptor>,
}

pub struct SessionController {
    registry: SessionRegistry,
    browsers: Arc<BrowserSessionManager>,
    sequencer: JoinSequencer,
    verifier: JoinVerifier,
    capture: AudioCaptureManager,
    monitor: LivenessMonitor,
    reporter: DiagnosticReporter,
    events: EventEmitter,
    display_name: String,
    retention: chrono::Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A sign-in page needs fresh credentials; every other verdict means no
/// live-meeting evidence. A missing join control stays on the attempt record.
fn failure_for(reason: NotInMeetingReason) -> SessionError {
    match reason {
        NotInMeetingReason::LoginRequired { url } => SessionError::LoginRequired { url },
        reason => SessionError::VerificationFailed { reason },
    }
}

impl SessionController {
    pub fn new(config: &AppConfig, collaborators: Collaborators) -> Arc<Self> {
        let Collaborators {
            factory,
            credentials,
            notifier,
            locators,
            audio_sources,
        } = collaborators;

        let browsers = Arc::new(BrowserSessionManager::new(
            factory,
            credentials,
            config.browser.profiles_dir.clone(),
            config.browser.navigation_timeout_ms,
        ));
        let engine = Arc::new(LocatorEngine::new(locators.clone()));

        Arc::new(Self {
            registry: SessionRegistry::new(),
            sequencer: JoinSequencer::new(
                browsers.clone(),
                engine,
                config.join.clone(),
                config.browser.max_navigation_retries,
            ),
            verifier: JoinVerifier::new(locators.clone(), config.verifier.clone()),
            capture: AudioCaptureManager::new(&config.audio, audio_sources),
            monitor: LivenessMonitor::new(locators, &config.monitor),
            reporter: DiagnosticReporter::new(notifier, &config.notification),
            events: EventEmitter::default(),
            display_name: config.join.display_name.clone(),
            retention: chrono::Duration::seconds(
                config.sessions.retention_secs.min(MAX_RETENTION_SECS) as i64,
            ),
            browsers,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start a session for `identity`. Runs in the background; returns the
    /// session id immediately.
    pub fn submit(self: &Arc<Self>, identity: &str, url: &str) -> Result<String, SubmitError> {
        let url = url.trim();
        let platform = match platform::classify(url) {
            Classification::Known(platform) => platform,
            Classification::Unknown => {
                return Err(SubmitError::UnknownPlatform {
                    url: url.to_string(),
                })
            }
        };

        let pruned = self.registry.prune(self.retention, chrono::Utc::now());
        if pruned > 0 {
            debug!("Forgot {} ended session(s)", pruned);
        }

        let entry = self
            .registry
            .register(identity, url, platform)
            .map_err(|e| match e {
                RegistryError::Duplicate { identity, existing } => {
                    SubmitError::RejectedDuplicate { identity, existing }
                }
            })?;
        let session_id = entry.id().to_string();
        info!("Session {} submitted by {} for {} ({})", session_id, identity, url, platform);
        self.events.emit(SessionEvent::Submitted {
            session_id: session_id.clone(),
            identity: identity.to_string(),
            platform,
            url: url.to_string(),
        });

        let controller = self.clone();
        let task = tokio::spawn(async move { controller.drive(entry, platform).await });

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        Ok(session_id)
    }

    pub fn status(&self, session_id: &str) -> Option<MeetingSession> {
        self.registry.get(session_id).map(|e| e.snapshot())
    }

    pub fn sessions(&self) -> Vec<MeetingSession> {
        self.registry.list()
    }

    pub fn active_for(&self, identity: &str) -> Option<MeetingSession> {
        self.registry.active_for(identity).map(|e| e.snapshot())
    }

    /// Request the session to finish. Before recording this cancels the
    /// join; during recording it leads to Finalizing.
    pub fn stop(&self, session_id: &str) -> Result<StopAck, LookupError> {
        let entry = self.entry(session_id)?;
        let state = entry.state();
        let accepted = !state.is_terminal() && entry.request_stop();
        if accepted {
            info!("Stop requested for session {} ({})", session_id, state);
        }
        Ok(StopAck {
            session_id: session_id.to_string(),
            state,
            accepted,
        })
    }

    pub async fn wait(&self, session_id: &str) -> Result<MeetingSession, LookupError> {
        let entry = self.entry(session_id)?;
        Ok(entry.finished().await)
    }

    pub fn result(&self, session_id: &str) -> Result<SessionResult, LookupError> {
        let record = self.entry(session_id)?.snapshot();
        if record.state != SessionState::Done {
            return Err(LookupError::NotReady {
                id: record.id,
                state: record.state,
            });
        }
        Ok(SessionResult {
            session_id: record.id,
            recording_path: record.recording_path,
            recording: record.recording,
            transcript: record.transcript,
            transcript_error: record.transcript_error,
            transcript_location: record.transcript_location,
        })
    }

    /// Store the outcome of post-meeting transcription on the session
    pub fn attach_transcript(&self, session_id: &str, report: &TranscriptReport) -> Result<(), LookupError> {
        let entry = self.entry(session_id)?;
        entry.update(|s| {
            match &report.outcome {
                Ok(outcome) => s.transcript = Some(outcome.clone()),
                Err(e) => s.transcript_error = Some(e.user_message()),
            }
            s.transcript_location = report.location.clone();
        });
        Ok(())
    }

    /// Stop every active session and wait for their teardown
    pub async fn shutdown(&self) {
        for entry in self.registry.active() {
            entry.request_stop();
        }
        let tasks: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            tasks.drain(..).collect()
        };
        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!("Session task ended abnormally: {}", e);
            }
        }
    }

    fn entry(&self, session_id: &str) -> Result<Arc<SessionEntry>, LookupError> {
        self.registry
            .get(session_id)
            .ok_or_else(|| LookupError::NotFound(session_id.to_string()))
    }

    async fn drive(self: Arc<Self>, entry: Arc<SessionEntry>, platform: PlatformKind) {
        let url = entry.snapshot().url;

        match self.run(&entry, platform, &url).await {
            Ok(()) => {
                self.teardown(&entry).await;
                if let Err(e) = self.set_state(&entry, SessionState::Done) {
                    error!("Session {}: {}", entry.id(), e);
                }
            }
            Err(failure) => {
                // snapshot while the page is still open
                let page = entry.browser().map(|h| h.observe());
                self.reporter
                    .report(entry.id(), &url, &failure, page.as_ref())
                    .await;
                self.teardown(&entry).await;
                self.fail(&entry, failure);
            }
        }

        self.registry.release(&entry);
        self.events.emit(SessionEvent::Finished {
            session_id: entry.id().to_string(),
            state: entry.state(),
        });
    }

    async fn run(
        &self,
        entry: &SessionEntry,
        platform: PlatformKind,
        url: &str,
    ) -> Result<(), SessionError> {
        let id = entry.id().to_string();
        self.set_state(entry, SessionState::Joining)?;
        if entry.stop_requested() {
            return Err(SessionError::Cancelled);
        }

        let handle = self.browsers.create(&id).await?;
        entry.attach_browser(handle.clone());

        let mut attempt = tokio::select! {
            attempt = self.sequencer.join(&handle, platform, url, &self.display_name) => attempt,
            _ = entry.stopped() => return Err(SessionError::Cancelled),
        };
        for record in &attempt.steps {
            self.events.emit(SessionEvent::JoinStep {
                session_id: id.clone(),
                step: record.step,
                outcome: record.outcome,
            });
        }
        if let Some(halted) = attempt.halted.clone() {
            entry.update(|s| s.join = Some(attempt));
            return Err(halted);
        }

        let observer = handle.observe();
        let verdict = tokio::select! {
            verdict = self.verifier.verify(&observer, platform) => verdict,
            _ = entry.stopped() => return Err(SessionError::Cancelled),
        };
        attempt.verdict = Some(verdict.clone());
        entry.update(|s| s.join = Some(attempt));

        match verdict {
            Verdict::InMeeting { indicators } => self.events.emit(SessionEvent::Verified {
                session_id: id.clone(),
                in_meeting: true,
                detail: format!("{} indicator(s)", indicators),
            }),
            Verdict::NotInMeeting(reason) => {
                self.events.emit(SessionEvent::Verified {
                    session_id: id.clone(),
                    in_meeting: false,
                    detail: reason.to_string(),
                });
                return Err(failure_for(reason));
            }
        }
        self.set_state(entry, SessionState::InMeeting)?;

        if entry.stop_requested() {
            self.set_state(entry, SessionState::Finalizing)?;
            return Ok(());
        }

        // a stop while the recorder is still proving itself drops the candidate
        let job = tokio::select! {
            job = self.capture.start(&id) => job?,
            _ = entry.stopped() => {
                info!("Session {} stopped before recording began", id);
                self.set_state(entry, SessionState::Finalizing)?;
                return Ok(());
            }
        };
        entry.attach_recording(job.clone());
        entry.update(|s| {
            s.recording_path = Some(job.output_path.clone());
            s.recording_source = Some(job.source.name.clone());
        });
        self.set_state(entry, SessionState::Recording)?;
        self.events.emit(SessionEvent::RecordingStarted {
            session_id: id.clone(),
            path: job.output_path.clone(),
            source: job.source.name.clone(),
        });

        let reason = self
            .monitor
            .run(handle.observe(), platform, &job, entry.stop_signal())
            .await;
        entry.update(|s| s.end_reason = Some(reason.clone()));
        self.events.emit(SessionEvent::MeetingEnded {
            session_id: id.clone(),
            reason,
        });

        self.set_state(entry, SessionState::Finalizing)?;
        self.stop_recording(entry).await;
        Ok(())
    }

    /// Recording stop then browser destruction, once per session
    async fn teardown(&self, entry: &SessionEntry) {
        if !entry.begin_teardown() {
            return;
        }
        self.stop_recording(entry).await;
        if let Some(handle) = entry.browser() {
            self.browsers.destroy(&handle).await;
        }
    }

    async fn stop_recording(&self, entry: &SessionEntry) {
        let Some(job) = entry.recording() else {
            return;
        };
        match job.stop().await {
            Ok(outcome) => {
                let first = entry.update(|s| {
                    let first = s.recording.is_none();
                    s.recording = Some(outcome.clone());
                    first
                });
                if first {
                    self.events.emit(SessionEvent::RecordingStopped {
                        session_id: entry.id().to_string(),
                        outcome: Some(outcome),
                    });
                }
            }
            Err(e) => warn!("Stopping recorder for {} failed: {:#}", entry.id(), e),
        }
    }

    fn set_state(&self, entry: &SessionEntry, next: SessionState) -> Result<(), SessionError> {
        let from = entry.transition(next).map_err(SessionError::internal)?;
        info!("Session {}: {} -> {}", entry.id(), from, next);
        self.events.emit(SessionEvent::StateChanged {
            session_id: entry.id().to_string(),
            from,
            to: next,
        });
        Ok(())
    }

    fn fail(&self, entry: &SessionEntry, failure: SessionError) {
        warn!("Session {} failed: {}", entry.id(), failure);
        match entry.fail(failure.clone()) {
            Ok(from) => {
                self.events.emit(SessionEvent::StateChanged {
                    session_id: entry.id().to_string(),
                    from,
                    to: SessionState::Failed,
                });
                self.events.emit(SessionEvent::Failed {
                    session_id: entry.id().to_string(),
                    error: failure,
                });
            }
            Err(e) => error!("Session {}: {}", entry.id(), e),
        }
    }
}

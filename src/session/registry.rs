//! Session registry
//!
//! Every session by id, plus at most one active session per identity. A
//! second submission for a busy identity is rejected, never queued.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;

use super::state::{InvalidTransition, MeetingSession, SessionState};
use crate::audio::RecordingJob;
use crate::browser::BrowserSessionHandle;
use crate::error::SessionError;
use crate::platform::PlatformKind;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("{identity} already has an active session ({existing})")]
    Duplicate { identity: String, existing: String },
}

/// Live state of one session shared between its driver task, its monitor and
/// the command surface
pub struct SessionEntry {
    id: String,
    identity: String,
    record: Mutex<MeetingSession>,
    state_tx: watch::Sender<SessionState>,
    stop_tx: watch::Sender<bool>,
    browser: Mutex<Option<BrowserSessionHandle>>,
    recording: Mutex<Option<Arc<RecordingJob>>>,
    torn_down: AtomicBool,
}

impl SessionEntry {
    fn new(id: &str, identity: &str, url: &str, platform: PlatformKind) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (stop_tx, _) = watch::channel(false);
        Self {
            id: id.to_string(),
            identity: identity.to_string(),
            record: Mutex::new(MeetingSession::new(id, identity, url, platform)),
            state_tx,
            stop_tx,
            browser: Mutex::new(None),
            recording: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn snapshot(&self) -> MeetingSession {
        lock(&self.record).clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut MeetingSession) -> R) -> R {
        f(&mut lock(&self.record))
    }

    pub fn transition(&self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        let from = lock(&self.record).transition(next)?;
        self.state_tx.send_replace(next);
        Ok(from)
    }

    pub fn fail(&self, error: SessionError) -> Result<SessionState, InvalidTransition> {
        let from = lock(&self.record).fail(error)?;
        self.state_tx.send_replace(SessionState::Failed);
        Ok(from)
    }

    /// Returns true for the first request only
    pub fn request_stop(&self) -> bool {
        !self.stop_tx.send_replace(true)
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Resolves once a stop was requested
    pub async fn stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Resolves with the final record once the session is Done or Failed
    pub async fn finished(&self) -> MeetingSession {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.snapshot()
    }

    pub fn attach_browser(&self, handle: BrowserSessionHandle) {
        *lock(&self.browser) = Some(handle);
    }

    pub fn browser(&self) -> Option<BrowserSessionHandle> {
        lock(&self.browser).clone()
    }

    pub fn attach_recording(&self, job: Arc<RecordingJob>) {
        *lock(&self.recording) = Some(job);
    }

    pub fn recording(&self) -> Option<Arc<RecordingJob>> {
        lock(&self.recording).clone()
    }

    /// Returns true for the first caller only
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<SessionEntry>>,
    /// identity -> active session id
    active: HashMap<String, String>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        identity: &str,
        url: &str,
        platform: PlatformKind,
    ) -> Result<Arc<SessionEntry>, RegistryError> {
        let mut inner = lock(&self.inner);
        if let Some(existing) = inner.active.get(identity) {
            return Err(RegistryError::Duplicate {
                identity: identity.to_string(),
                existing: existing.clone(),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let entry = Arc::new(SessionEntry::new(&id, identity, url, platform));
        inner.sessions.insert(id.clone(), entry.clone());
        inner.active.insert(identity.to_string(), id);
        Ok(entry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        lock(&self.inner).sessions.get(id).cloned()
    }

    pub fn active_for(&self, identity: &str) -> Option<Arc<SessionEntry>> {
        let inner = lock(&self.inner);
        let id = inner.active.get(identity)?;
        inner.sessions.get(id).cloned()
    }

    pub fn active(&self) -> Vec<Arc<SessionEntry>> {
        let inner = lock(&self.inner);
        inner
            .active
            .values()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect()
    }

    /// Free the identity slot; the record stays retrievable by id
    pub fn release(&self, entry: &SessionEntry) {
        let mut inner = lock(&self.inner);
        if inner.active.get(entry.identity()).map(String::as_str) == Some(entry.id()) {
            inner.active.remove(entry.identity());
        }
    }

    /// Forget ended sessions whose last update is older than `retention`.
    /// Returns how many were dropped.
    pub fn prune(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - retention;
        let mut inner = lock(&self.inner);
        let Inner { sessions, active } = &mut *inner;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let record = lock(&entry.record);
            !record.state.is_terminal()
                || record.updated_at >= cutoff
                || active.values().any(|active_id| active_id == id)
        });
        before - sessions.len()
    }

    pub fn list(&self) -> Vec<MeetingSession> {
        let mut sessions: Vec<_> = lock(&self.inner)
            .sessions
            .values()
            .map(|e| e.snapshot())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}

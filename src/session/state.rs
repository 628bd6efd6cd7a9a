//! Session lifecycle
//!
//! `Idle → Joining → InMeeting → Recording → Finalizing → Done`, with
//! `Failed` reachable from every non-terminal state except `Finalizing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::monitor::EndReason;
use crate::audio::StopOutcome;
use crate::capabilities::TranscriptOutcome;
use crate::error::SessionError;
use crate::join::JoinAttempt;
use crate::platform::PlatformKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Joining,
    InMeeting,
    Recording,
    Finalizing,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Joining)
                | (Idle, Failed)
                | (Joining, InMeeting)
                | (Joining, Failed)
                | (InMeeting, Recording)
                | (InMeeting, Finalizing)
                | (InMeeting, Failed)
                | (Recording, Finalizing)
                | (Recording, Failed)
                | (Finalizing, Done)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Joining => "joining",
            SessionState::InMeeting => "in_meeting",
            SessionState::Recording => "recording",
            SessionState::Finalizing => "finalizing",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub state: SessionState,
    pub at: DateTime<Utc>,
}

/// Everything known about one meeting session. Snapshots of this are what
/// the command surface sees.
#[derive(Debug, Clone, Serialize)]
pub struct MeetingSession {
    pub id: String,
    pub identity: String,
    pub url: String,
    pub platform: PlatformKind,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<StateChange>,
    pub failure: Option<SessionError>,
    /// Human-readable reason for `failure`
    pub failure_message: Option<String>,
    pub join: Option<JoinAttempt>,
    pub recording_path: Option<PathBuf>,
    pub recording_source: Option<String>,
    pub recording: Option<StopOutcome>,
    pub end_reason: Option<EndReason>,
    pub transcript: Option<TranscriptOutcome>,
    pub transcript_error: Option<String>,
    pub transcript_location: Option<String>,
}

impl MeetingSession {
    pub fn new(id: &str, identity: &str, url: &str, platform: PlatformKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            identity: identity.to_string(),
            url: url.to_string(),
            platform,
            state: SessionState::Idle,
            created_at: now,
            updated_at: now,
            history: vec![StateChange {
                state: SessionState::Idle,
                at: now,
            }],
            failure: None,
            failure_message: None,
            join: None,
            recording_path: None,
            recording_source: None,
            recording: None,
            end_reason: None,
            transcript: None,
            transcript_error: None,
            transcript_location: None,
        }
    }

    /// Move to `next`; returns the previous state
    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        self.history.push(StateChange { state: next, at: now });
        Ok(from)
    }

    pub fn fail(&mut self, error: SessionError) -> Result<SessionState, InvalidTransition> {
        let from = self.transition(SessionState::Failed)?;
        self.failure_message = Some(error.user_message());
        self.failure = Some(error);
        Ok(from)
    }
}

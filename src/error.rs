//! Session failure taxonomy
//!
//! Every failure that ends a meeting session is one of these kinds. Internal
//! plumbing uses `anyhow`; component boundaries convert into `SessionError`
//! so the command surface always gets a specific, human-readable reason.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::join::verifier::NotInMeetingReason;

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionError {
    #[error("unsupported meeting URL: {url}")]
    ClassificationUnknown { url: String },

    #[error("platform requires login (landed on {url})")]
    LoginRequired { url: String },

    /// Recorded on the join attempt; the verifier decides the outcome
    #[error("join control not found")]
    JoinControlNotFound,

    #[error("join verification failed: {reason}")]
    VerificationFailed { reason: NotInMeetingReason },

    #[error("navigation to {url} failed after {attempts} attempt(s): {message}")]
    NavigationFailed {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("browser session crashed after {attempts} attempt(s): {message}")]
    AutomationCrash { attempts: u32, message: String },

    #[error("no audio source could be opened (tried: {})", tried.join(", "))]
    RecordingSourceExhausted { tried: Vec<String> },

    #[error("transcription failed: {message}")]
    TranscriptionFailed { message: String },

    #[error("session cancelled")]
    Cancelled,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SessionError {
    /// Short machine tag used for diagnostics and file names
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ClassificationUnknown { .. } => "classification_unknown",
            Self::LoginRequired { .. } => "login_required",
            Self::JoinControlNotFound => "join_control_not_found",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::NavigationFailed { .. } => "navigation_failed",
            Self::AutomationCrash { .. } => "automation_crash",
            Self::RecordingSourceExhausted { .. } => "recording_source_exhausted",
            Self::TranscriptionFailed { .. } => "transcription_failed",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }

    /// Reason shown to whoever submitted the meeting
    pub fn user_message(&self) -> String {
        match self {
            Self::ClassificationUnknown { .. } => {
                "Unsupported meeting link. Supported: Google Meet, Zoom, Yandex Telemost, Kontur.Talk, Microsoft Teams.".to_string()
            }
            Self::LoginRequired { .. } => {
                "The meeting requires a signed-in account. Refresh the saved credentials and try again.".to_string()
            }
            Self::JoinControlNotFound => "Could not find the join button on the meeting page.".to_string(),
            Self::VerificationFailed { reason } => format!(
                "Joining looked successful but the bot is not inside the meeting ({}). The meeting may be closed or its page layout changed.",
                reason
            ),
            Self::NavigationFailed { .. } => "Could not open the meeting page.".to_string(),
            Self::AutomationCrash { .. } => "The browser crashed repeatedly while opening the meeting.".to_string(),
            Self::RecordingSourceExhausted { .. } => {
                "Joined the meeting but could not start audio recording on this server.".to_string()
            }
            Self::TranscriptionFailed { .. } => "Recording finished but transcription failed.".to_string(),
            Self::Cancelled => "Stopped before the meeting was joined.".to_string(),
            Self::Internal { .. } => "Unexpected internal error.".to_string(),
        }
    }

    /// Failures that need operator action get an out-of-band notification
    pub fn notifies_operator(&self) -> bool {
        matches!(
            self,
            Self::VerificationFailed { .. }
                | Self::LoginRequired { .. }
                | Self::RecordingSourceExhausted { .. }
        )
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

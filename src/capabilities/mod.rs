//! Collaborator capabilities consumed after a session is done

pub mod persistence;
pub mod transcription;

use log::warn;
use std::path::Path;
use std::sync::Arc;

pub use persistence::{store_from_config, LocalTranscriptStore, TranscriptStore};
pub use transcription::{
    TranscriptOutcome, TranscriptSegment, Transcriber, WhisperCliTranscriber,
};

use crate::error::SessionError;
use crate::session::{LookupError, SessionController, SessionState};

/// What happened to a recording after the meeting
#[derive(Debug, Clone)]
pub struct TranscriptReport {
    pub outcome: Result<TranscriptOutcome, SessionError>,
    /// Where the rendered transcript was stored, when it was
    pub location: Option<String>,
}

/// Transcribe a finished recording and store the rendered text
pub struct TranscriptPipeline {
    transcriber: Arc<dyn Transcriber>,
    store: Arc<dyn TranscriptStore>,
    language: String,
}

impl TranscriptPipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        store: Arc<dyn TranscriptStore>,
        language: &str,
    ) -> Self {
        Self {
            transcriber,
            store,
            language: language.to_string(),
        }
    }

    pub async fn process(&self, recording: &Path) -> TranscriptReport {
        let outcome = self.transcriber.transcribe(recording, &self.language).await;

        let location = match &outcome {
            Ok(TranscriptOutcome::Segments(segments)) => {
                let name = persistence::transcript_file_name(recording);
                let content = transcription::render_segments(segments);
                match self.store.save(&name, &content).await {
                    Ok(location) => Some(location),
                    Err(e) => {
                        warn!("Failed to store transcript {}: {:#}", name, e);
                        None
                    }
                }
            }
            Ok(TranscriptOutcome::NoSpeech) => None,
            Err(e) => {
                warn!("Transcription of {:?} failed: {}", recording, e);
                None
            }
        };

        TranscriptReport { outcome, location }
    }

    /// Wait for a session to end; when it is Done with a recording,
    /// transcribe it and store the outcome on the session
    pub async fn process_session(
        &self,
        controller: &SessionController,
        session_id: &str,
    ) -> Result<Option<TranscriptReport>, LookupError> {
        let record = controller.wait(session_id).await?;
        if record.state != SessionState::Done {
            return Ok(None);
        }
        let Some(recording) = record.recording_path else {
            return Ok(None);
        };

        let report = self.process(&recording).await;
        controller.attach_transcript(session_id, &report)?;
        Ok(Some(report))
    }
}

//! Transcription capability
//!
//! Audio file in, ordered timestamped segments out. "No speech" is a valid
//! outcome and is kept distinct from a failed run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::SessionError;
use crate::utils::config::TranscriptionConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Seconds from the start of the recording
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "segments", rename_all = "snake_case")]
pub enum TranscriptOutcome {
    Segments(Vec<TranscriptSegment>),
    NoSpeech,
}

impl TranscriptOutcome {
    pub fn segments(&self) -> &[TranscriptSegment] {
        match self {
            Self::Segments(segments) => segments,
            Self::NoSpeech => &[],
        }
    }

    /// One line per segment: `[12.5s] text`
    pub fn render(&self) -> String {
        match self {
            Self::Segments(segments) => render_segments(segments),
            Self::NoSpeech => "(no speech detected)".to_string(),
        }
    }
}

pub fn render_segments(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| format!("[{:.1}s] {}", s.start, s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path, language: &str)
        -> Result<TranscriptOutcome, SessionError>;
}

#[derive(Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
}

/// Parse whisper's JSON output. Segments are trimmed, blank ones dropped and
/// the rest ordered by start time.
pub fn parse_whisper_json(json: &str) -> Result<TranscriptOutcome> {
    let output: WhisperOutput =
        serde_json::from_str(json).context("Invalid whisper JSON output")?;

    let mut segments: Vec<TranscriptSegment> = output
        .segments
        .into_iter()
        .filter_map(|mut s| {
            s.text = s.text.trim().to_string();
            (!s.text.is_empty()).then_some(s)
        })
        .collect();
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    if segments.is_empty() {
        Ok(TranscriptOutcome::NoSpeech)
    } else {
        Ok(TranscriptOutcome::Segments(segments))
    }
}

/// Runs a whisper-compatible CLI (`whisper <file> --model .. --language ..
/// --output_format json --output_dir ..`)
pub struct WhisperCliTranscriber {
    command: String,
    model: String,
    timeout: Duration,
    work_dir: PathBuf,
}

impl WhisperCliTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            command: config.command.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            work_dir: std::env::temp_dir().join("meetbot-whisper"),
        }
    }

    async fn run(&self, audio: &Path, language: &str) -> Result<TranscriptOutcome> {
        let out_dir = self.work_dir.join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create {:?}", out_dir))?;

        let mut command = Command::new(&self.command);
        command
            .arg(audio)
            .args(["--model", &self.model])
            .args(["--language", language])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(&out_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running {} on {:?}", self.command, audio);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self.command, self.timeout))?
            .with_context(|| format!("Failed to run {}", self.command))?;

        let result = if output.status.success() {
            let stem = audio
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let json_path = out_dir.join(format!("{}.json", stem));
            std::fs::read_to_string(&json_path)
                .with_context(|| format!("Missing transcription output {:?}", json_path))
                .and_then(|json| parse_whisper_json(&json))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(anyhow::anyhow!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.lines().last().unwrap_or_default()
            ))
        };

        let _ = std::fs::remove_dir_all(&out_dir);
        result
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
    ) -> Result<TranscriptOutcome, SessionError> {
        if !audio.is_file() {
            return Err(SessionError::TranscriptionFailed {
                message: format!("recording {:?} does not exist", audio),
            });
        }

        info!("Transcribing {:?} ({}, model {})", audio, language, self.model);
        self.run(audio, language)
            .await
            .map_err(|e| SessionError::TranscriptionFailed {
                message: format!("{:#}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orders_and_drops_blank_segments() {
        let json = r#"{
            "text": "hello there",
            "segments": [
                {"id": 1, "start": 12.5, "end": 14.0, "text": " there "},
                {"id": 0, "start": 0.0, "end": 2.2, "text": " hello"},
                {"id": 2, "start": 15.0, "end": 16.0, "text": "   "}
            ],
            "language": "en"
        }"#;

        let outcome = parse_whisper_json(json).unwrap();
        assert_eq!(outcome.segments().len(), 2);
        assert_eq!(outcome.render(), "[0.0s] hello\n[12.5s] there");
    }

    #[test]
    fn test_no_speech_is_distinct() {
        let outcome = parse_whisper_json(r#"{"text": "", "segments": []}"#).unwrap();
        assert_eq!(outcome, TranscriptOutcome::NoSpeech);
        assert!(parse_whisper_json("not json").is_err());

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "no_speech");
    }

    #[tokio::test]
    async fn test_missing_recording_fails() {
        let transcriber = WhisperCliTranscriber::new(&TranscriptionConfig::default());
        let err = transcriber
            .transcribe(Path::new("/nonexistent/meeting.wav"), "ru")
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "transcription_failed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_transcription_failure() {
        let audio = std::env::temp_dir().join(format!("meetbot-{}.wav", uuid::Uuid::new_v4()));
        std::fs::write(&audio, b"RIFF").unwrap();

        let config = TranscriptionConfig {
            command: "false".to_string(),
            ..Default::default()
        };
        let err = WhisperCliTranscriber::new(&config)
            .transcribe(&audio, "ru")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::TranscriptionFailed { .. }));
        std::fs::remove_file(audio).ok();
    }
}

//! Audio Capture Manager
//!
//! Runs one external recorder per session. Sources are tried in declared
//! order; the first process still alive after the liveness window wins.
//! Stopping is graceful first (SIGINT lets ffmpeg finalize the WAV header)
//! and forced after the grace period.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::sources::AudioSourceDescriptor;
use crate::error::SessionError;
use crate::utils::config::AudioConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopOutcome {
    pub size_bytes: u64,
    /// Artifact below the configured minimum; likely silence or a dead source
    pub suspiciously_small: bool,
    /// The recorder ignored the graceful stop and was killed
    pub forced: bool,
    /// The recorder had already exited before stop was requested
    pub exited_early: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Running,
    Stopped,
    Failed,
}

enum JobState {
    Running(Child),
    Stopped(StopOutcome),
    Failed(String),
}

/// One live recorder process bound to a session
pub struct RecordingJob {
    pub session_id: String,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub source: AudioSourceDescriptor,
    state: Mutex<JobState>,
    running: AtomicBool,
    grace: Duration,
    min_bytes: u64,
}

impl RecordingJob {
    /// Cheap check usable from polling loops
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> RecordingStatus {
        let mut state = self.state.lock().await;
        match &mut *state {
            JobState::Running(child) => match child.try_wait() {
                Ok(None) => RecordingStatus::Running,
                Ok(Some(status)) => {
                    warn!("Recorder for {} exited on its own ({})", self.session_id, status);
                    self.running.store(false, Ordering::SeqCst);
                    RecordingStatus::Stopped
                }
                Err(_) => RecordingStatus::Running,
            },
            JobState::Stopped(_) => RecordingStatus::Stopped,
            JobState::Failed(_) => RecordingStatus::Failed,
        }
    }

    /// Stop the recorder and report the artifact. Idempotent: later calls
    /// return the outcome of the first one.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut state = self.state.lock().await;
        let mut child = match std::mem::replace(&mut *state, JobState::Failed("stop in progress".into())) {
            JobState::Running(child) => child,
            JobState::Stopped(outcome) => {
                *state = JobState::Stopped(outcome.clone());
                return Ok(outcome);
            }
            JobState::Failed(message) => {
                *state = JobState::Failed(message.clone());
                return Err(anyhow!(message));
            }
        };

        let result = self.terminate(&mut child).await;
        self.running.store(false, Ordering::SeqCst);

        match result {
            Ok((forced, exited_early)) => {
                let size_bytes = std::fs::metadata(&self.output_path)
                    .map(|m| m.len())
                    .unwrap_or(0);
                let outcome = StopOutcome {
                    size_bytes,
                    suspiciously_small: size_bytes < self.min_bytes,
                    forced,
                    exited_early,
                };
                if outcome.suspiciously_small {
                    warn!(
                        "Recording {:?} is only {} bytes",
                        self.output_path, size_bytes
                    );
                }
                info!(
                    "Recording for {} stopped: {} bytes{}",
                    self.session_id,
                    size_bytes,
                    if forced { " (forced)" } else { "" }
                );
                *state = JobState::Stopped(outcome.clone());
                Ok(outcome)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                *state = JobState::Failed(message.clone());
                Err(anyhow!(message))
            }
        }
    }

    /// Returns (forced, exited_early)
    async fn terminate(&self, child: &mut Child) -> Result<(bool, bool)> {
        if child.try_wait()?.is_some() {
            return Ok((false, true));
        }

        request_graceful_stop(child);
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(status) => {
                debug!("Recorder exited with {}", status?);
                Ok((false, false))
            }
            Err(_) => {
                warn!(
                    "Recorder for {} ignored stop request for {:?}; killing",
                    self.session_id, self.grace
                );
                child.kill().await.context("Failed to kill recorder")?;
                Ok((true, false))
            }
        }
    }
}

#[cfg(unix)]
fn request_graceful_stop(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a child we own
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            warn!("Failed to signal recorder {}", pid);
        }
    }
}

#[cfg(not(unix))]
fn request_graceful_stop(child: &mut Child) {
    let _ = child.start_kill();
}

pub struct AudioCaptureManager {
    sources: Vec<AudioSourceDescriptor>,
    record_dir: PathBuf,
    liveness: Duration,
    grace: Duration,
    min_bytes: u64,
}

impl AudioCaptureManager {
    pub fn new(config: &AudioConfig, sources: Vec<AudioSourceDescriptor>) -> Self {
        Self {
            sources,
            record_dir: config.record_dir.clone(),
            liveness: Duration::from_millis(config.liveness_check_ms),
            grace: Duration::from_millis(config.stop_grace_ms),
            min_bytes: config.min_artifact_bytes,
        }
    }

    pub fn sources(&self) -> &[AudioSourceDescriptor] {
        &self.sources
    }

    /// `meeting_<YYYYmmdd_HHMMSS>_<short id>.wav`
    pub fn artifact_path(&self, session_id: &str) -> PathBuf {
        let short: String = session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.record_dir.join(format!("meeting_{}_{}.wav", stamp, short))
    }

    /// Start recording for a session with the first source that stays alive
    pub async fn start(&self, session_id: &str) -> Result<Arc<RecordingJob>, SessionError> {
        std::fs::create_dir_all(&self.record_dir).map_err(|e| {
            SessionError::internal(format!("cannot create {:?}: {}", self.record_dir, e))
        })?;

        let output_path = self.artifact_path(session_id);
        let log_path = output_path.with_extension("log");
        let mut tried = Vec::new();

        for source in &self.sources {
            tried.push(source.name.clone());
            match self.try_source(source, &output_path, &log_path).await {
                Ok(child) => {
                    info!(
                        "Recording {} from '{}' to {:?}",
                        session_id, source.name, output_path
                    );
                    return Ok(Arc::new(RecordingJob {
                        session_id: session_id.to_string(),
                        output_path,
                        log_path,
                        started_at: Utc::now(),
                        source: source.clone(),
                        state: Mutex::new(JobState::Running(child)),
                        running: AtomicBool::new(true),
                        grace: self.grace,
                        min_bytes: self.min_bytes,
                    }));
                }
                Err(e) => warn!("Audio source '{}' unusable: {:#}", source.name, e),
            }
        }

        Err(SessionError::RecordingSourceExhausted { tried })
    }

    /// Spawn one candidate and keep it only if it survives the liveness
    /// window. A failed candidate is always reaped.
    async fn try_source(
        &self,
        source: &AudioSourceDescriptor,
        output_path: &Path,
        log_path: &Path,
    ) -> Result<Child> {
        let _ = std::fs::remove_file(output_path);

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open {:?}", log_path))?;
        writeln!(log, "== {} ({}) ==", source.name, Local::now().to_rfc3339())?;

        let mut child = Command::new(&source.program)
            .args(source.command_args(output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", source.program))?;

        tokio::time::sleep(self.liveness).await;

        match child.try_wait() {
            Ok(None) => Ok(child),
            Ok(Some(status)) => Err(anyhow!("exited during liveness check ({})", status)),
            Err(e) => {
                let _ = child.kill().await;
                Err(anyhow!("cannot poll recorder: {}", e))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> AudioSourceDescriptor {
        AudioSourceDescriptor {
            name: name.to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "{output}".to_string()],
        }
    }

    const RECORDER: &str =
        "trap 'exit 0' INT; head -c 4096 /dev/zero > \"$0\"; while true; do sleep 0.1; done";
    const STUBBORN: &str = "trap '' INT; : > \"$0\"; while true; do sleep 0.1; done";

    fn manager(sources: Vec<AudioSourceDescriptor>) -> (AudioCaptureManager, PathBuf) {
        let dir = std::env::temp_dir().join(format!("meetbot-rec-{}", uuid::Uuid::new_v4()));
        let config = AudioConfig {
            record_dir: dir.clone(),
            liveness_check_ms: 300,
            stop_grace_ms: 500,
            ..Default::default()
        };
        (AudioCaptureManager::new(&config, sources), dir)
    }

    #[tokio::test]
    async fn test_first_surviving_source_wins() {
        let (manager, dir) = manager(vec![
            sh("dead", "exit 3"),
            AudioSourceDescriptor {
                name: "missing".into(),
                program: "/nonexistent/recorder".into(),
                args: vec![],
            },
            sh("live", RECORDER),
            sh("also-live", RECORDER),
        ]);

        let job = manager.start("5f0c1a2b-aaaa-bbbb").await.unwrap();
        assert_eq!(job.source.name, "live");
        assert!(job.is_running());
        assert_eq!(job.status().await, RecordingStatus::Running);
        let name = job.output_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("meeting_") && name.ends_with("_5f0c1a2b.wav"), "{}", name);

        job.stop().await.unwrap();
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_exhausted() {
        let (manager, dir) = manager(vec![sh("a", "exit 1"), sh("b", "exit 2")]);

        let err = manager.start("s").await.err().unwrap();
        assert_eq!(
            err,
            SessionError::RecordingSourceExhausted {
                tried: vec!["a".into(), "b".into()]
            }
        );
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_graceful_stop_is_idempotent() {
        let (manager, dir) = manager(vec![sh("live", RECORDER)]);
        let job = manager.start("s").await.unwrap();

        let first = job.stop().await.unwrap();
        let second = job.stop().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.size_bytes, 4096);
        assert!(!first.forced);
        assert!(!first.suspiciously_small);
        assert!(!job.is_running());
        assert_eq!(job.status().await, RecordingStatus::Stopped);
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_stubborn_recorder_is_killed_and_flagged_small() {
        let (manager, dir) = manager(vec![sh("stubborn", STUBBORN)]);
        let job = manager.start("s").await.unwrap();

        let outcome = job.stop().await.unwrap();
        assert!(outcome.forced);
        assert_eq!(outcome.size_bytes, 0);
        assert!(outcome.suspiciously_small);
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_recorder_exiting_mid_session() {
        let (manager, dir) = manager(vec![sh(
            "short",
            "head -c 2048 /dev/zero > \"$0\"; sleep 0.6",
        )]);
        let job = manager.start("s").await.unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(job.status().await, RecordingStatus::Stopped);
        assert!(!job.is_running());

        let outcome = job.stop().await.unwrap();
        assert!(outcome.exited_early);
        assert_eq!(outcome.size_bytes, 2048);
        std::fs::remove_dir_all(dir).ok();
    }
}

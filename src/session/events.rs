use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

use super::monitor::EndReason;
use super::state::SessionState;
use crate::audio::StopOutcome;
use crate::error::SessionError;
use crate::join::{StepOutcome, SubStep};
use crate::platform::PlatformKind;

/// Session lifecycle events for real-time updates
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Submitted {
        session_id: String,
        identity: String,
        platform: PlatformKind,
        url: String,
    },
    StateChanged {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },
    JoinStep {
        session_id: String,
        step: SubStep,
        outcome: StepOutcome,
    },
    Verified {
        session_id: String,
        in_meeting: bool,
        detail: String,
    },
    RecordingStarted {
        session_id: String,
        path: PathBuf,
        source: String,
    },
    MeetingEnded {
        session_id: String,
        reason: EndReason,
    },
    RecordingStopped {
        session_id: String,
        outcome: Option<StopOutcome>,
    },
    Failed {
        session_id: String,
        error: SessionError,
    },
    Finished {
        session_id: String,
        state: SessionState,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Submitted { session_id, .. }
            | Self::StateChanged { session_id, .. }
            | Self::JoinStep { session_id, .. }
            | Self::Verified { session_id, .. }
            | Self::RecordingStarted { session_id, .. }
            | Self::MeetingEnded { session_id, .. }
            | Self::RecordingStopped { session_id, .. }
            | Self::Failed { session_id, .. }
            | Self::Finished { session_id, .. } => session_id,
        }
    }
}

/// Event emitter for broadcasting session events
pub struct EventEmitter {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<SessionEvent>) {
        let (sender, receiver) = broadcast::channel(256);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

fn short(session_id: &str) -> String {
    session_id.chars().take(8).collect()
}

/// Console event listener printing session progress
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<SessionEvent>) {
        // Hidden draw target when piped, to keep escape codes out of logs
        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        let style = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("  {spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let mut spinners: HashMap<String, ProgressBar> = HashMap::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let id = short(event.session_id());

            match event {
                SessionEvent::Submitted { platform, url, identity, .. } => {
                    multi
                        .println(format!(
                            "\n{} Session {} for {}: {} ({})",
                            "▶".green().bold(),
                            id.cyan(),
                            identity,
                            url,
                            platform.to_string().white().bold()
                        ))
                        .ok();
                }

                SessionEvent::StateChanged { to, .. } => {
                    if let Some(pb) = spinners.remove(&id) {
                        pb.finish_and_clear();
                    }
                    match to {
                        SessionState::Joining | SessionState::Recording | SessionState::Finalizing => {
                            let pb = multi.add(ProgressBar::new_spinner());
                            pb.set_style(style.clone());
                            pb.set_message(format!("{} {}", id.cyan(), to.to_string().bold()));
                            pb.enable_steady_tick(Duration::from_millis(100));
                            spinners.insert(id, pb);
                        }
                        _ => {
                            multi
                                .println(format!("  {} {} {}", "→".blue(), id.cyan(), to))
                                .ok();
                        }
                    }
                }

                SessionEvent::JoinStep { step, outcome, .. } => {
                    let mark = match outcome {
                        StepOutcome::Succeeded => "✓".green(),
                        StepOutcome::AlreadySatisfied | StepOutcome::Skipped => "○".yellow(),
                        StepOutcome::NotFound | StepOutcome::Failed => "✗".red(),
                    };
                    multi
                        .println(format!("    {} {:?} {}", mark, step, format!("{:?}", outcome).dimmed()))
                        .ok();
                }

                SessionEvent::Verified { in_meeting, detail, .. } => {
                    let verdict = if in_meeting {
                        "IN MEETING".green().bold()
                    } else {
                        "NOT IN MEETING".red().bold()
                    };
                    multi.println(format!("  {} {} ({})", "◆".blue(), verdict, detail)).ok();
                }

                SessionEvent::RecordingStarted { path, source, .. } => {
                    multi
                        .println(format!(
                            "  {} Recording to {} via {}",
                            "●".red(),
                            path.display(),
                            source.dimmed()
                        ))
                        .ok();
                }

                SessionEvent::MeetingEnded { reason, .. } => {
                    multi.println(format!("  {} {}", "■".blue(), reason)).ok();
                }

                SessionEvent::RecordingStopped { outcome, .. } => {
                    let line = match outcome {
                        Some(o) if o.suspiciously_small => {
                            format!("{} bytes (suspiciously small)", o.size_bytes).yellow()
                        }
                        Some(o) => format!("{} bytes", o.size_bytes).normal(),
                        None => "no artifact".red(),
                    };
                    multi.println(format!("  {} Recording stopped: {}", "■".blue(), line)).ok();
                }

                SessionEvent::Failed { error, .. } => {
                    if let Some(pb) = spinners.remove(&id) {
                        pb.finish_and_clear();
                    }
                    multi
                        .println(format!(
                            "  {} {} {}",
                            "✗".red().bold(),
                            error.tag().red(),
                            error.user_message()
                        ))
                        .ok();
                }

                SessionEvent::Finished { state, .. } => {
                    if let Some(pb) = spinners.remove(&id) {
                        pb.finish_and_clear();
                    }
                    let status = match state {
                        SessionState::Done => "DONE".green().bold(),
                        _ => "FAILED".red().bold(),
                    };
                    multi
                        .println(format!("{} Session {} [{}]", "■".blue().bold(), id.cyan(), status))
                        .ok();
                }
            }
        }

        for (_, pb) in spinners.drain() {
            pb.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let (emitter, mut first) = EventEmitter::new();
        let mut second = emitter.subscribe();

        emitter.emit(SessionEvent::StateChanged {
            session_id: "abc".into(),
            from: SessionState::Idle,
            to: SessionState::Joining,
        });

        for rx in [&mut first, &mut second] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.session_id(), "abc");
        }
    }

    #[tokio::test]
    async fn test_console_listener_stops_when_emitter_dropped() {
        let (emitter, receiver) = EventEmitter::new();
        let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

        emitter.emit(SessionEvent::Finished {
            session_id: "abc".into(),
            state: SessionState::Done,
        });
        drop(emitter);

        tokio::time::timeout(Duration::from_secs(2), listener)
            .await
            .unwrap()
            .unwrap();
    }
}

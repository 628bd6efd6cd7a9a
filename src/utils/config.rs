use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::sources::AudioSourceDescriptor;

/// Application configuration
///
/// Loaded from YAML; every field has a default so a partial (or missing) file
/// is valid. Environment overrides are applied on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub browser: BrowserConfig,
    pub join: JoinConfig,
    pub verifier: VerifierConfig,
    pub monitor: MonitorConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub notification: NotificationConfig,
    pub persistence: PersistenceConfig,
    pub credentials: CredentialsConfig,
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Chrome/Chromium executable; Playwright's bundled Chromium when unset
    pub executable_path: Option<PathBuf>,
    /// Parent directory for per-session profiles
    pub profiles_dir: PathBuf,
    pub user_agent: String,
    pub viewport_width: i32,
    pub viewport_height: i32,
    /// Appended to the built-in hardening arguments
    pub extra_args: Vec<String>,
    pub navigation_timeout_ms: u64,
    pub max_navigation_retries: u32,
    /// Bound on a single click/fill/query
    pub action_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable_path: None,
            profiles_dir: std::env::temp_dir().join("meetbot-profiles"),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
            extra_args: Vec::new(),
            navigation_timeout_ms: 30_000,
            max_navigation_retries: 2,
            action_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub display_name: String,
    /// Wait after clicking the join control
    pub settle_ms: u64,
    /// Pause between pre-join steps so the page can react
    pub step_delay_ms: u64,
    /// External locator table replacing the embedded one
    pub locators_path: Option<PathBuf>,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            display_name: "Meeting Bot".to_string(),
            settle_ms: 5_000,
            step_delay_ms: 1_000,
            locators_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub settle_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            settle_ms: 3_000,
            probe_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    /// Consecutive failed polls tolerated before the session counts as lost
    pub tolerated_failed_polls: u32,
    pub probe_timeout_ms: u64,
    pub max_duration_secs: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            tolerated_failed_polls: 1,
            probe_timeout_ms: 10_000,
            max_duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub record_dir: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,
    pub sample_rate: u32,
    pub channels: u32,
    pub liveness_check_ms: u64,
    pub stop_grace_ms: u64,
    pub min_artifact_bytes: u64,
    /// Explicit source list; discovered defaults are used when empty
    pub sources: Vec<AudioSourceDescriptor>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            record_dir: PathBuf::from("recordings"),
            ffmpeg_path: None,
            sample_rate: 16_000,
            channels: 1,
            liveness_check_ms: 1_500,
            stop_grace_ms: 5_000,
            min_artifact_bytes: 1_024,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Whisper-compatible CLI
    pub command: String,
    pub model: String,
    pub language: String,
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            command: "whisper".to_string(),
            model: "medium".to_string(),
            language: "ru".to_string(),
            timeout_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Failure snapshots are written here
    pub snapshot_dir: PathBuf,
    pub snapshot_timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            snapshot_dir: PathBuf::from("diagnostics"),
            snapshot_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub local_dir: PathBuf,
    pub github_token: Option<String>,
    /// `owner/name`
    pub github_repo: Option<String>,
    pub github_branch: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("transcripts"),
            github_token: None,
            github_repo: None,
            github_branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub cookies_path: PathBuf,
    pub storage_path: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            cookies_path: PathBuf::from("cookies.json"),
            storage_path: PathBuf::from("storage.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Ended sessions stay queryable this long before they are forgotten
    pub retention_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 86_400,
        }
    }
}

impl AppConfig {
    /// Load from an optional YAML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("MEETBOT_HEADLESS") {
            self.browser.headless = !matches!(v.to_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Some(v) = non_empty("MEETBOT_DISPLAY_NAME") {
            self.join.display_name = v;
        }
        if let Some(v) = non_empty("MEETBOT_RECORD_DIR") {
            self.audio.record_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("MEETBOT_BROWSER_PATH") {
            self.browser.executable_path = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty("TELEGRAM_BOT_TOKEN") {
            self.notification.telegram_bot_token = Some(v);
        }
        if let Some(v) = non_empty("TELEGRAM_CHAT_ID") {
            self.notification.telegram_chat_id = Some(v);
        }
        if let Some(v) = non_empty("GITHUB_TOKEN") {
            self.persistence.github_token = Some(v);
        }
        if let Some(v) = non_empty("GITHUB_REPO") {
            self.persistence.github_repo = Some(v);
        }
        if let Some(v) = non_empty("WHISPER_MODEL") {
            self.transcription.model = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml(
            r#"
join:
  display_name: "Notes"
monitor:
  poll_interval_secs: 10
  max_duration_secs: 3600
"#,
        )
        .unwrap();

        assert_eq!(config.join.display_name, "Notes");
        assert_eq!(config.join.settle_ms, 5_000);
        assert_eq!(config.monitor.poll_interval_secs, 10);
        assert_eq!(config.monitor.max_duration_secs, Some(3600));
        assert_eq!(config.monitor.tolerated_failed_polls, 1);
        assert_eq!(config.audio.sample_rate, 16_000);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = AppConfig::from_yaml("  \n").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.transcription.language, "ru");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MEETBOT_HEADLESS", "false"),
            ("MEETBOT_DISPLAY_NAME", "Recorder"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("GITHUB_REPO", "acme/notes"),
            ("WHISPER_MODEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert!(!config.browser.headless);
        assert_eq!(config.join.display_name, "Recorder");
        assert_eq!(config.notification.telegram_bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.persistence.github_repo.as_deref(), Some("acme/notes"));
        // blank values do not override
        assert_eq!(config.transcription.model, "medium");
    }
}

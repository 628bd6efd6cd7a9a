//! Notification capability
//!
//! Message plus optional image out to operators. Delivery is fire-and-forget:
//! callers go through [`dispatch`], which logs failures and never returns them.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::utils::config::NotificationConfig;

/// Telegram rejects longer photo captions
const CAPTION_LIMIT: usize = 1024;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, image: Option<&Path>) -> Result<()>;
}

/// Send in the background; errors are logged only
pub fn dispatch(
    notifier: Arc<dyn Notifier>,
    message: String,
    image: Option<std::path::PathBuf>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&message, image.as_deref()).await {
            warn!("Notification delivery failed: {:#}", e);
        }
    })
}

/// Writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str, image: Option<&Path>) -> Result<()> {
        match image {
            Some(image) => info!("[notify] {} (snapshot: {:?})", message, image),
            None => info!("[notify] {}", message),
        }
        Ok(())
    }
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base: format!("https://api.telegram.org/bot{}", token),
            chat_id: chat_id.to_string(),
        }
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/sendMessage", self.api_base))
            .json(&serde_json::json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            .context("sendMessage request failed")?;
        if !response.status().is_success() {
            bail!("sendMessage returned {}", response.status());
        }
        Ok(())
    }

    async fn send_photo(&self, caption: &str, image: &Path) -> Result<()> {
        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("Failed to read {:?}", image))?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "snapshot.png".to_string());

        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", truncate_chars(caption, CAPTION_LIMIT))
            .part(
                "photo",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let response = self
            .client
            .post(format!("{}/sendPhoto", self.api_base))
            .multipart(form)
            .send()
            .await
            .context("sendPhoto request failed")?;
        if !response.status().is_success() {
            bail!("sendPhoto returned {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str, image: Option<&Path>) -> Result<()> {
        if let Some(image) = image {
            match self.send_photo(message, image).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Snapshot upload failed, sending text only: {:#}", e),
            }
        }
        self.send_message(message).await
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Telegram when both token and chat are configured, the log otherwise
pub fn notifier_from_config(config: &NotificationConfig) -> Arc<dyn Notifier> {
    match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Arc::new(TelegramNotifier::new(token, chat_id)),
        _ => Arc::new(LogNotifier),
    }
}

/// Test notifier that keeps every message
#[cfg(test)]
#[derive(Default)]
pub struct CollectingNotifier {
    pub sent: std::sync::Mutex<Vec<(String, Option<std::path::PathBuf>)>>,
    pub fail: bool,
}

#[cfg(test)]
impl CollectingNotifier {
    pub fn messages(&self) -> Vec<(String, Option<std::path::PathBuf>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, message: &str, image: Option<&Path>) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((message.to_string(), image.map(Path::to_path_buf)));
        if self.fail {
            bail!("delivery refused");
        }
        Ok(())
    }
}

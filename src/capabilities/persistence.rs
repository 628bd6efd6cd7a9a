//! Persistence capability: transcript content in, location out

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::info;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::utils::config::PersistenceConfig;

#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Save `content` as `name`; returns where it ended up
    async fn save(&self, name: &str, content: &str) -> Result<String>;
}

/// `transcript_<recording stem>.txt`
pub fn transcript_file_name(recording: &Path) -> String {
    let stem = recording
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "meeting".to_string());
    format!("transcript_{}.txt", stem)
}

pub struct LocalTranscriptStore {
    dir: PathBuf,
}

impl LocalTranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TranscriptStore for LocalTranscriptStore {
    async fn save(&self, name: &str, content: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {:?}", self.dir))?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("Transcript saved to {:?}", path);
        Ok(path.display().to_string())
    }
}

/// Commits transcripts to `transcripts/<name>` through the GitHub contents API
pub struct GithubTranscriptStore {
    client: reqwest::Client,
    token: String,
    repo: String,
    branch: String,
    api_base: String,
}

impl GithubTranscriptStore {
    pub fn new(token: &str, repo: &str, branch: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            api_base: "https://api.github.com".to_string(),
        }
    }

    fn contents_url(&self, name: &str) -> String {
        format!(
            "{}/repos/{}/contents/transcripts/{}",
            self.api_base, self.repo, name
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "meetbot")
    }

    async fn existing_sha(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("GitHub lookup failed: {}", response.status());
        }
        let body: Value = response.json().await?;
        Ok(body["sha"].as_str().map(String::from))
    }
}

/// Body of a contents API create/update request
pub fn contents_put_body(name: &str, content: &str, branch: &str, sha: Option<&str>) -> Value {
    let mut body = json!({
        "message": format!("Add transcript {}", name),
        "content": STANDARD.encode(content.as_bytes()),
        "branch": branch,
    });
    if let Some(sha) = sha {
        body["sha"] = json!(sha);
        body["message"] = json!(format!("Update transcript {}", name));
    }
    body
}

#[async_trait]
impl TranscriptStore for GithubTranscriptStore {
    async fn save(&self, name: &str, content: &str) -> Result<String> {
        let url = self.contents_url(name);
        let sha = self.existing_sha(&url).await?;
        let body = contents_put_body(name, content, &self.branch, sha.as_deref());

        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await
            .context("GitHub upload failed")?;
        if !response.status().is_success() {
            bail!("GitHub upload failed: {}", response.status());
        }

        let body: Value = response.json().await?;
        let location = body["content"]["html_url"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| format!("github:{}/transcripts/{}", self.repo, name));
        info!("Transcript committed to {}", location);
        Ok(location)
    }
}

/// GitHub when a token and repository are configured, local files otherwise
pub fn store_from_config(config: &PersistenceConfig) -> Arc<dyn TranscriptStore> {
    match (&config.github_token, &config.github_repo) {
        (Some(token), Some(repo)) => Arc::new(GithubTranscriptStore::new(
            token,
            repo,
            &config.github_branch,
        )),
        _ => Arc::new(LocalTranscriptStore::new(config.local_dir.clone())),
    }
}

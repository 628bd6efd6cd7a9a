//! Environment doctor: checks the external tools a recording session needs

use colored::Colorize;
use std::path::Path;

use crate::audio::sources;
use crate::driver::web::driver::resolve_browser_executable;
use crate::locator::table::LocatorTable;
use crate::utils::binary_resolver;
use crate::utils::config::AppConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum CheckStatus {
    Ok(String),
    /// Works, but degraded
    Warn(String),
    /// Sessions will fail without it
    Missing(String),
}

#[derive(Debug, Clone)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
}

impl Check {
    fn new(name: &'static str, status: CheckStatus) -> Self {
        Self { name, status }
    }
}

pub async fn run_checks(config: &AppConfig) -> Vec<Check> {
    let mut checks = Vec::new();

    let ffmpeg = config
        .audio
        .ffmpeg_path
        .clone()
        .filter(|p| p.is_file())
        .map(Ok)
        .unwrap_or_else(binary_resolver::find_ffmpeg);
    checks.push(Check::new(
        "ffmpeg",
        match ffmpeg {
            Ok(path) => CheckStatus::Ok(path.display().to_string()),
            Err(_) => CheckStatus::Missing("not found; audio recording is impossible".into()),
        },
    ));

    let pactl = binary_resolver::find_pactl();
    checks.push(Check::new(
        "pactl",
        match &pactl {
            Ok(path) => CheckStatus::Ok(path.display().to_string()),
            Err(_) => CheckStatus::Warn("not found; PulseAudio sources cannot be discovered".into()),
        },
    ));
    if pactl.is_ok() {
        checks.push(Check::new(
            "monitor source",
            match sources::discover_monitor_source().await {
                Some(name) => CheckStatus::Ok(name),
                None => CheckStatus::Warn(
                    "none; meeting audio will only be captured from the default input".into(),
                ),
            },
        ));
    }

    checks.push(Check::new(
        "browser",
        match resolve_browser_executable(&config.browser) {
            Some(path) if path.exists() => CheckStatus::Ok(path.display().to_string()),
            Some(path) => CheckStatus::Missing(format!("{} does not exist", path.display())),
            None => CheckStatus::Warn("no system Chrome; Playwright's bundled Chromium will be used".into()),
        },
    ));

    checks.push(Check::new(
        "transcriber",
        match which::which(&config.transcription.command) {
            Ok(path) => CheckStatus::Ok(format!("{} (model {})", path.display(), config.transcription.model)),
            Err(_) => CheckStatus::Warn(format!(
                "'{}' not on PATH; recordings will not be transcribed",
                config.transcription.command
            )),
        },
    ));

    checks.push(Check::new(
        "record dir",
        writable_dir(&config.audio.record_dir),
    ));

    checks.push(Check::new(
        "locators",
        match LocatorTable::load(config.join.locators_path.as_deref()) {
            Ok(table) => CheckStatus::Ok(format!("version {}", table.version)),
            Err(e) => CheckStatus::Missing(format!("{:#}", e)),
        },
    ));

    let notification = &config.notification;
    checks.push(Check::new(
        "notifications",
        if notification.telegram_bot_token.is_some() && notification.telegram_chat_id.is_some() {
            CheckStatus::Ok("telegram".into())
        } else {
            CheckStatus::Warn("telegram not configured; failures are only logged".into())
        },
    ));

    checks
}

fn writable_dir(dir: &Path) -> CheckStatus {
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckStatus::Missing(format!("cannot create {}: {}", dir.display(), e));
    }
    let probe = dir.join(".meetbot-write-test");
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(probe);
            CheckStatus::Ok(dir.display().to_string())
        }
        Err(e) => CheckStatus::Missing(format!("{} is not writable: {}", dir.display(), e)),
    }
}

/// Print the checks; returns false when something required is missing
pub fn print_report(checks: &[Check]) -> bool {
    println!("{}", "Checking meetbot environment...".blue().bold());
    let mut healthy = true;
    for check in checks {
        let (mark, detail) = match &check.status {
            CheckStatus::Ok(detail) => ("✓".green(), detail.normal()),
            CheckStatus::Warn(detail) => ("!".yellow(), detail.yellow()),
            CheckStatus::Missing(detail) => {
                healthy = false;
                ("✗".red(), detail.red())
            }
        };
        println!("  {} {:<15} {}", mark, check.name, detail);
    }
    if healthy {
        println!("\n{}", "Ready to record meetings.".green().bold());
    } else {
        println!("\n{}", "Some required components are missing.".red().bold());
    }
    healthy
}

//! Audio source descriptors
//!
//! A descriptor is an external command line that records one input to a WAV
//! file. `{output}` in the arguments is replaced by the artifact path.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::utils::binary_resolver;
use crate::utils::config::AudioConfig;

pub const OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSourceDescriptor {
    /// Short label used in logs and failure reports
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
}

impl AudioSourceDescriptor {
    /// ffmpeg capturing `device` of `input_format` as mono/16 kHz PCM WAV
    pub fn ffmpeg(
        name: &str,
        ffmpeg: &str,
        input_format: &str,
        device: &str,
        config: &AudioConfig,
    ) -> Self {
        let args = [
            "-hide_banner",
            "-loglevel",
            "warning",
            "-nostdin",
            "-y",
            "-f",
            input_format,
            "-i",
            device,
            "-ac",
            &config.channels.to_string(),
            "-ar",
            &config.sample_rate.to_string(),
            "-acodec",
            "pcm_s16le",
            OUTPUT_PLACEHOLDER,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            name: name.to_string(),
            program: ffmpeg.to_string(),
            args,
        }
    }

    pub fn command_args(&self, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace(OUTPUT_PLACEHOLDER, &output))
            .collect()
    }
}

/// Pick a monitor source (loopback of an output sink) from
/// `pactl list short sources`. A running one is preferred.
pub fn parse_monitor_source(pactl_output: &str) -> Option<String> {
    let monitors: Vec<(&str, bool)> = pactl_output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            let name = *columns.get(1)?;
            if !name.ends_with(".monitor") {
                return None;
            }
            let running = columns.iter().any(|c| c.eq_ignore_ascii_case("RUNNING"));
            Some((name, running))
        })
        .collect();

    monitors
        .iter()
        .find(|(_, running)| *running)
        .or_else(|| monitors.first())
        .map(|(name, _)| name.to_string())
}

pub async fn discover_monitor_source() -> Option<String> {
    let pactl = binary_resolver::find_pactl().ok()?;
    let output = tokio::time::timeout(
        Duration::from_secs(3),
        Command::new(pactl).args(["list", "short", "sources"]).output(),
    )
    .await;

    match output {
        Ok(Ok(output)) if output.status.success() => {
            let source = parse_monitor_source(&String::from_utf8_lossy(&output.stdout));
            debug!("Discovered monitor source: {:?}", source);
            source
        }
        Ok(Ok(output)) => {
            warn!("pactl exited with {}", output.status);
            None
        }
        Ok(Err(e)) => {
            warn!("Failed to run pactl: {}", e);
            None
        }
        Err(_) => {
            warn!("pactl timed out");
            None
        }
    }
}

/// Configured sources, or in order: the PulseAudio monitor source (when one
/// exists), PulseAudio `default`, ALSA `default`
pub async fn default_sources(config: &AudioConfig) -> Vec<AudioSourceDescriptor> {
    if !config.sources.is_empty() {
        return config.sources.clone();
    }

    let ffmpeg = config
        .ffmpeg_path
        .clone()
        .or_else(|| binary_resolver::find_ffmpeg().ok())
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "ffmpeg".to_string());

    let monitor = discover_monitor_source().await;
    build_sources(&ffmpeg, monitor.as_deref(), config)
}

fn build_sources(
    ffmpeg: &str,
    monitor: Option<&str>,
    config: &AudioConfig,
) -> Vec<AudioSourceDescriptor> {
    let mut sources = Vec::new();
    if let Some(monitor) = monitor {
        sources.push(AudioSourceDescriptor::ffmpeg(
            "pulse-monitor",
            ffmpeg,
            "pulse",
            monitor,
            config,
        ));
    }
    sources.push(AudioSourceDescriptor::ffmpeg(
        "pulse-default",
        ffmpeg,
        "pulse",
        "default",
        config,
    ));
    sources.push(AudioSourceDescriptor::ffmpeg(
        "alsa-default",
        ffmpeg,
        "alsa",
        "default",
        config,
    ));
    sources
}

use crate::flags::CapabilityFlag;
use crate::PlaybackProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use tune_relay_core::{NotificationConfig, PlaybackSource, PlaybackState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    #[serde(default)]
    package_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

/// Scrapes the OS notification list for the music app's media notification.
pub struct NotificationProvider {
    enabled: CapabilityFlag,
    command: String,
    package: String,
    timeout: Duration,
}

impl NotificationProvider {
    pub fn new(cfg: &NotificationConfig, enabled: CapabilityFlag) -> Self {
        Self {
            enabled,
            command: cfg.command.clone(),
            package: cfg.package.clone(),
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }

    fn pick(&self, stdout: &str, now_ms: u64) -> Result<Option<PlaybackState>> {
        let notifications: Vec<Notification> =
            serde_json::from_str(stdout.trim()).context("invalid JSON from notification list")?;

        Ok(notifications
            .into_iter()
            .find(|n| n.package_name == self.package)
            .map(|n| PlaybackState {
                source: PlaybackSource::OsNotification,
                // A visible media notification is taken to mean playing.
                is_playing: true,
                title: n.title,
                artist: n.content,
                observed_at_ms: now_ms,
                ..PlaybackState::default()
            }))
    }
}

#[async_trait]
impl PlaybackProvider for NotificationProvider {
    fn name(&self) -> &'static str {
        "os_notification"
    }

    fn source(&self) -> PlaybackSource {
        PlaybackSource::OsNotification
    }

    async fn poll(&self, now_ms: u64) -> Result<Option<PlaybackState>> {
        if !self.enabled.get() {
            return Ok(None);
        }

        let run = Command::new(&self.command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(output) => output.with_context(|| format!("failed to run {}", self.command))?,
            Err(_) => {
                debug!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "notification scrape timed out"
                );
                return Ok(None);
            }
        };

        if !output.status.success() {
            debug!(status = ?output.status, "notification scrape exited non-zero");
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        self.pick(&stdout, now_ms)
    }
}

use anyhow::Result;
use serde::Serialize;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "linux")]
mod mpris;
#[cfg(target_os = "windows")]
mod windows;

/// The OS's notion of the current media session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSession {
    pub is_playing: bool,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_ms: Option<u64>,
}

/// `Ok(None)` when no player has an active session.
pub async fn read_current() -> Result<Option<MediaSession>> {
    platform::read_current().await
}

#[cfg(target_os = "linux")]
mod platform {
    pub use super::mpris::read_current;
}

#[cfg(target_os = "windows")]
mod platform {
    pub use super::windows::read_current;
}

#[cfg(target_os = "macos")]
mod platform {
    pub use super::macos::read_current;
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
mod platform {
    use super::MediaSession;
    use anyhow::{anyhow, Result};

    pub async fn read_current() -> Result<Option<MediaSession>> {
        Err(anyhow!("media sessions are not supported on this platform"))
    }
}

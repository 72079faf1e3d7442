use serde::{Deserialize, Serialize};

/// Where a [`PlaybackState`] came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackSource {
    ExternalPush,
    LocalHelper,
    OsNotification,
    #[default]
    None,
}

/// One immutable snapshot of "what is playing". Replaced wholesale, never patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    #[serde(default)]
    pub source: PlaybackSource,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_ms: Option<u64>,
    /// When the snapshot was produced, not when it was consumed.
    #[serde(default)]
    pub observed_at_ms: u64,
    /// Raw timestamped lyric text, when the source shipped it along.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
}

impl PlaybackState {
    /// The terminal fallback: nothing is known to be playing.
    pub fn nothing_playing(observed_at_ms: u64) -> Self {
        Self {
            observed_at_ms,
            ..Self::default()
        }
    }

    /// Title and artist are both known, enough to look the song up in the catalog.
    pub fn has_identity(&self) -> bool {
        !self.title.is_empty() && !self.artist.is_empty()
    }
}

/// Last report pushed by the user's own device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPushRecord {
    pub state: PlaybackState,
    pub received_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl ExternalPushRecord {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.received_at_ms)
    }

    pub fn is_fresh(&self, now_ms: u64, window_ms: u64) -> bool {
        self.age_ms(now_ms) < window_ms
    }
}

use crate::lyrics::{LyricTimeline, DEFAULT_BUFFER_MS};
use serde::Serialize;
use tune_relay_core::PlaybackState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SongIdentity {
    pub id: Option<String>,
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackClock {
    pub current_position_ms: u64,
    pub duration_ms: Option<u64>,
    pub is_playing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LyricExcerpt {
    pub current: Vec<String>,
    pub next: Vec<String>,
}

/// What gets injected into a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPayload {
    pub song: SongIdentity,
    pub playback: PlaybackClock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<LyricExcerpt>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,
}

impl PromptPayload {
    pub fn to_json(&self) -> String {
        // Plain structs of strings and integers always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PromptSliceGenerator {
    buffer_ms: u64,
}

impl Default for PromptSliceGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_MS)
    }
}

impl PromptSliceGenerator {
    pub fn new(buffer_ms: u64) -> Self {
        Self { buffer_ms }
    }

    /// Pure: the same state and timeline always give the same payload.
    pub fn build(&self, state: &PlaybackState, timeline: Option<&LyricTimeline>) -> PromptPayload {
        let position = state.position_ms.unwrap_or(0);
        let song = SongIdentity {
            id: state.catalog_id.clone(),
            title: state.title.clone(),
            artist: state.artist.clone(),
        };
        let playback = PlaybackClock {
            current_position_ms: position,
            duration_ms: state.duration_ms,
            is_playing: state.is_playing,
        };

        if !state.is_playing {
            return PromptPayload {
                song,
                playback,
                lyrics: None,
                paused: true,
            };
        }

        let lyrics = timeline.map(|t| {
            let slice = t.slice(position, self.buffer_ms);
            LyricExcerpt {
                current: slice.past.iter().map(|l| l.text.clone()).collect(),
                next: slice.upcoming.iter().map(|l| l.text.clone()).collect(),
            }
        });

        PromptPayload {
            song,
            playback,
            lyrics,
            paused: false,
        }
    }
}

/// Advances a snapshot's position by the wall time since it was observed,
/// while playing, clamped to the track duration when known.
pub fn extrapolate_position(state: &PlaybackState, now_ms: u64) -> u64 {
    let base = state.position_ms.unwrap_or(0);
    if !state.is_playing {
        return base;
    }
    let advanced = base.saturating_add(now_ms.saturating_sub(state.observed_at_ms));
    match state.duration_ms {
        Some(duration) if duration > 0 => advanced.min(duration),
        _ => advanced,
    }
}

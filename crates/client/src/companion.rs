use crate::relay::LyricFetcher;
use std::sync::Arc;
use tracing::{debug, warn};
use tune_relay_core::PlaybackState;
use tune_relay_engine::{
    extrapolate_position, LyricCache, LyricTimeline, PromptPayload, PromptSliceGenerator,
};

/// Consumer of poll-loop change events. Keeps the lyric timeline of the
/// current song loaded so a prompt payload can be pulled at any time.
pub struct Companion {
    fetcher: Arc<dyn LyricFetcher>,
    cache: LyricCache,
    generator: PromptSliceGenerator,
    current: Option<PlaybackState>,
    timeline: Option<Arc<LyricTimeline>>,
}

impl Companion {
    pub fn new(fetcher: Arc<dyn LyricFetcher>, buffer_ms: u64) -> Self {
        Self {
            fetcher,
            cache: LyricCache::default(),
            generator: PromptSliceGenerator::new(buffer_ms),
            current: None,
            timeline: None,
        }
    }

    pub fn current(&self) -> Option<&PlaybackState> {
        self.current.as_ref()
    }

    pub fn timeline(&self) -> Option<&LyricTimeline> {
        self.timeline.as_deref()
    }

    /// Lyrics are (re)loaded when the song changes or none are loaded yet.
    pub async fn on_change(&mut self, state: PlaybackState) {
        let same_song = self.current.as_ref().is_some_and(|prev| {
            prev.catalog_id == state.catalog_id && prev.title == state.title
        });
        if !same_song || self.timeline.is_none() {
            self.timeline = self.load_timeline(&state).await;
            debug!(
                title = %state.title,
                lines = self.timeline.as_ref().map_or(0, |t| t.len()),
                "lyrics loaded"
            );
        }
        self.current = Some(state);
    }

    async fn load_timeline(&mut self, state: &PlaybackState) -> Option<Arc<LyricTimeline>> {
        let carried = state.lyrics.as_deref().filter(|raw| !raw.trim().is_empty());
        let Some(id) = state.catalog_id.as_deref() else {
            return carried.map(|raw| Arc::new(LyricTimeline::parse(raw)));
        };
        if let Some(cached) = self.cache.get(id) {
            return Some(cached);
        }
        match self.fetcher.fetch_lyric(id).await {
            Ok(Some(raw)) => return Some(self.cache.get_or_parse(id, &raw)),
            Ok(None) => debug!(id, "no lyrics in catalog"),
            Err(err) => warn!(error = %err, id, "lyric fetch failed"),
        }
        carried.map(|raw| self.cache.get_or_parse(id, raw))
    }

    /// Payload for the playback clock extrapolated to `now_ms`.
    pub fn prompt(&self, now_ms: u64) -> Option<PromptPayload> {
        let state = self.current.as_ref()?;
        let mut at_now = state.clone();
        at_now.position_ms = Some(extrapolate_position(state, now_ms));
        Some(self.generator.build(&at_now, self.timeline.as_deref()))
    }

    pub fn prompt_payload(&self, now_ms: u64) -> Option<String> {
        self.prompt(now_ms).map(|p| p.to_json())
    }
}

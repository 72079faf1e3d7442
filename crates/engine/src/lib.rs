pub mod cache;
pub mod change;
pub mod lyrics;
pub mod prompt;

pub use cache::LyricCache;
pub use change::{should_emit, ChangeDecision, ChangeDetector, ChangeKey, DiffKind};
pub use lyrics::{LyricLine, LyricSlice, LyricTimeline, DEFAULT_BUFFER_MS, PAST_LINE_LIMIT};
pub use prompt::{
    extrapolate_position, LyricExcerpt, PlaybackClock, PromptPayload, PromptSliceGenerator,
    SongIdentity,
};

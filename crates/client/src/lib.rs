//! Consumer side of the relay: fetches playback state, detects transitions
//! and keeps the lyric-synchronised prompt payload ready.

pub mod companion;
pub mod poll;
pub mod relay;

pub use companion::Companion;
pub use poll::{PollHandle, PollLoop, PollOptions};
pub use relay::{LyricFetcher, PlaybackFeed, RelayClient};

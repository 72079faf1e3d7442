use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

/// Lines kept in the `past` half of a slice, however long the song is.
pub const PAST_LINE_LIMIT: usize = 5;
pub const DEFAULT_BUFFER_MS: u64 = 3_000;

// [mm:ss.xx] or [mm:ss.xxx]; one or more leading tags share the same text.
static TIME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{2}):(\d{2})\.(\d{2,3})\]").expect("time tag pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricLine {
    pub time_ms: u64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LyricSlice<'a> {
    /// At most [`PAST_LINE_LIMIT`] lines with `time_ms <= position`.
    pub past: &'a [LyricLine],
    /// Lines with `position < time_ms <= position + buffer`.
    pub upcoming: &'a [LyricLine],
}

/// Timestamped lyric track, sorted by time and immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricTimeline {
    lines: Vec<LyricLine>,
}

impl LyricTimeline {
    pub fn parse(raw: &str) -> Self {
        let mut lines = Vec::new();
        let mut skipped = 0usize;

        for raw_line in raw.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((times, text)) => {
                    lines.extend(times.into_iter().map(|time_ms| LyricLine {
                        time_ms,
                        text: text.to_string(),
                    }));
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            debug!(skipped, kept = lines.len(), "dropped lyric lines without timestamp or text");
        }

        // Stable: ties keep encounter order.
        lines.sort_by_key(|l| l.time_ms);
        Self { lines }
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn slice(&self, position_ms: u64, buffer_ms: u64) -> LyricSlice<'_> {
        let past_end = self.lines.partition_point(|l| l.time_ms <= position_ms);
        let past_start = past_end.saturating_sub(PAST_LINE_LIMIT);

        let horizon = position_ms.saturating_add(buffer_ms);
        let mut upcoming_end = past_end;
        for line in &self.lines[past_end..] {
            if line.time_ms > horizon {
                break;
            }
            upcoming_end += 1;
        }

        LyricSlice {
            past: &self.lines[past_start..past_end],
            upcoming: &self.lines[past_end..upcoming_end],
        }
    }
}

fn parse_line(line: &str) -> Option<(Vec<u64>, &str)> {
    let mut rest = line;
    let mut times = Vec::new();

    while let Some(caps) = TIME_TAG.captures(rest) {
        let minutes: u64 = caps[1].parse().ok()?;
        let seconds: u64 = caps[2].parse().ok()?;
        let fraction = &caps[3];
        let mut millis: u64 = fraction.parse().ok()?;
        if fraction.len() == 2 {
            millis *= 10;
        }
        times.push(minutes * 60_000 + seconds * 1_000 + millis);
        rest = &rest[caps[0].len()..];
    }

    let text = rest.trim();
    if times.is_empty() || text.is_empty() {
        return None;
    }
    Some((times, text))
}

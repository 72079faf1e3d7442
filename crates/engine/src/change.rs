use std::fmt;
use tune_relay_core::PlaybackState;

/// Compact `<catalog id or title>-<is playing>` key. Two states with the same
/// key are the same transition as far as downstream consumers care.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeKey(String);

impl ChangeKey {
    pub fn of(state: &PlaybackState) -> Self {
        let identity = state.catalog_id.as_deref().unwrap_or(&state.title);
        Self(format!("{}-{}", identity, state.is_playing))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    First,
    TrackChanged,
    StateChanged,
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDecision {
    pub emit: bool,
    pub key: ChangeKey,
}

/// `None` is the "no prior state" sentinel and always emits.
pub fn should_emit(previous: Option<&ChangeKey>, candidate: &PlaybackState) -> ChangeDecision {
    let key = ChangeKey::of(candidate);
    let emit = previous != Some(&key);
    ChangeDecision { emit, key }
}

/// Remembers the last emitted key and the last full state.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last_key: Option<ChangeKey>,
    last_state: Option<PlaybackState>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `candidate` and reports what kind of transition it was.
    /// `DiffKind::Nothing` means the candidate should not be propagated.
    pub fn observe(&mut self, candidate: &PlaybackState) -> DiffKind {
        let decision = should_emit(self.last_key.as_ref(), candidate);
        let kind = if !decision.emit {
            DiffKind::Nothing
        } else {
            match &self.last_state {
                None => DiffKind::First,
                Some(prev) if same_song(prev, candidate) => DiffKind::StateChanged,
                Some(_) => DiffKind::TrackChanged,
            }
        };

        self.last_key = Some(decision.key);
        self.last_state = Some(candidate.clone());
        kind
    }

    pub fn last_key(&self) -> Option<&ChangeKey> {
        self.last_key.as_ref()
    }

    pub fn last_state(&self) -> Option<&PlaybackState> {
        self.last_state.as_ref()
    }

    pub fn reset(&mut self) {
        self.last_key = None;
        self.last_state = None;
    }
}

fn same_song(prev: &PlaybackState, curr: &PlaybackState) -> bool {
    match (&prev.catalog_id, &curr.catalog_id) {
        (Some(a), Some(b)) => a == b,
        _ => prev.title == curr.title,
    }
}

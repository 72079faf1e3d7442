use super::MediaSession;
use anyhow::{Context, Result};
use windows::Media::Control::{
    GlobalSystemMediaTransportControlsSessionManager,
    GlobalSystemMediaTransportControlsSessionPlaybackStatus,
};

// Timeline values are 100ns ticks.
fn ticks_to_ms(ticks: i64) -> Option<u64> {
    (ticks > 0).then(|| (ticks as u64) / 10_000)
}

fn read_blocking() -> Result<Option<MediaSession>> {
    let manager = GlobalSystemMediaTransportControlsSessionManager::RequestAsync()?.get()?;
    let session = match manager.GetCurrentSession() {
        Ok(s) => s,
        Err(_) => return Ok(None),
    };

    let props = session.TryGetMediaPropertiesAsync()?.get()?;
    let playback = session.GetPlaybackInfo()?;
    let timeline = session.GetTimelineProperties()?;

    let title = props.Title()?.to_string_lossy();
    let artist = props.Artist()?.to_string_lossy();
    let album = props.AlbumTitle()?.to_string_lossy();
    if title.is_empty() && artist.is_empty() {
        return Ok(None);
    }

    let status = playback.PlaybackStatus()?;
    let duration = timeline.EndTime()?.Duration - timeline.StartTime()?.Duration;

    Ok(Some(MediaSession {
        is_playing: status == GlobalSystemMediaTransportControlsSessionPlaybackStatus::Playing,
        title,
        artist,
        album,
        duration_ms: ticks_to_ms(duration),
        position_ms: ticks_to_ms(timeline.Position()?.Duration),
    }))
}

pub async fn read_current() -> Result<Option<MediaSession>> {
    // The WinRT `.get()` calls block the calling thread.
    tokio::task::spawn_blocking(read_blocking)
        .await
        .context("media session reader panicked")?
}

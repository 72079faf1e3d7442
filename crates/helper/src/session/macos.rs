use super::MediaSession;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tokio::process::Command;

const NOW_PLAYING_JXA: &str = r#"
(() => {
  const music = Application("Music");
  if (!music.running()) return JSON.stringify({ state: "stopped" });
  const state = music.playerState();
  if (state !== "playing" && state !== "paused") return JSON.stringify({ state: "stopped" });
  const t = music.currentTrack;
  return JSON.stringify({
    state: state,
    title: t.name(),
    artist: t.artist(),
    album: t.album(),
    duration: Math.round(t.duration() * 1000),
    position: Math.round(music.playerPosition() * 1000)
  });
})()
"#;

#[derive(Debug, Deserialize)]
struct JxaResult {
    state: String,
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    duration: Option<u64>,
    position: Option<u64>,
}

pub async fn read_current() -> Result<Option<MediaSession>> {
    let output = Command::new("osascript")
        .arg("-l")
        .arg("JavaScript")
        .arg("-e")
        .arg(NOW_PLAYING_JXA)
        .kill_on_drop(true)
        .output()
        .await
        .context("failed to run osascript for Music")?;

    if !output.status.success() {
        return Err(anyhow!(
            "osascript failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let stdout = String::from_utf8(output.stdout).context("invalid UTF-8 from osascript")?;
    let parsed: JxaResult =
        serde_json::from_str(stdout.trim()).context("invalid JSON from jxa script")?;

    match parsed.state.as_str() {
        "playing" | "paused" => Ok(Some(MediaSession {
            is_playing: parsed.state == "playing",
            title: parsed.title.unwrap_or_default(),
            artist: parsed.artist.unwrap_or_default(),
            album: parsed.album.unwrap_or_default(),
            duration_ms: parsed.duration,
            position_ms: parsed.position,
        })),
        _ => Ok(None),
    }
}

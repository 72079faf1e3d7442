use super::MediaSession;
use anyhow::{Context, Result};
use std::collections::HashMap;
use zbus::zvariant::{OwnedValue, Str};
use zbus::{Connection, Proxy};

async fn find_player(conn: &Connection) -> Result<Option<String>> {
    let proxy = Proxy::new(
        conn,
        "org.freedesktop.DBus",
        "/org/freedesktop/DBus",
        "org.freedesktop.DBus",
    )
    .await?;

    let names: Vec<String> = proxy.call("ListNames", &()).await?;
    let mut players: Vec<String> = names
        .into_iter()
        .filter(|n| n.starts_with("org.mpris.MediaPlayer2."))
        .collect();
    players.sort();
    Ok(players.into_iter().next())
}

fn value_to_string(v: &OwnedValue) -> Option<String> {
    let owned = v.try_clone().ok()?;
    if let Ok(s) = String::try_from(owned.try_clone().ok()?) {
        return Some(s);
    }
    Str::try_from(owned).ok().map(|s| s.to_string())
}

fn value_to_micros(v: &OwnedValue) -> Option<u64> {
    if let Ok(i) = <i64>::try_from(v) {
        return u64::try_from(i).ok();
    }
    <u64>::try_from(v).ok()
}

fn joined_artists(v: &OwnedValue) -> Option<String> {
    let artists = Vec::<String>::try_from(v.try_clone().ok()?).ok()?;
    Some(artists.join("/"))
}

pub async fn read_current() -> Result<Option<MediaSession>> {
    let conn = Connection::session()
        .await
        .context("failed to connect DBus session")?;
    let Some(player) = find_player(&conn).await? else {
        return Ok(None);
    };

    let proxy = Proxy::new_owned(
        conn.clone(),
        player,
        "/org/mpris/MediaPlayer2",
        "org.mpris.MediaPlayer2.Player",
    )
    .await?;

    let status: String = proxy.get_property("PlaybackStatus").await?;
    if status == "Stopped" {
        return Ok(None);
    }

    let metadata: HashMap<String, OwnedValue> = proxy.get_property("Metadata").await?;
    let text = |key: &str| metadata.get(key).and_then(value_to_string).unwrap_or_default();

    // MPRIS reports microseconds.
    let duration_ms = metadata
        .get("mpris:length")
        .and_then(value_to_micros)
        .map(|us| us / 1_000);
    let position_ms = proxy
        .get_property::<i64>("Position")
        .await
        .ok()
        .and_then(|us| u64::try_from(us).ok())
        .map(|us| us / 1_000);

    Ok(Some(MediaSession {
        is_playing: status == "Playing",
        title: text("xesam:title"),
        artist: metadata
            .get("xesam:artist")
            .and_then(joined_artists)
            .unwrap_or_default(),
        album: text("xesam:album"),
        duration_ms,
        position_ms,
    }))
}

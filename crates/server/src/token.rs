use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;
use tune_relay_core::RelayConfig;

pub const TOKEN_FILE: &str = "api_token.txt";

/// Configured token, else the persisted one, else a fresh one written to
/// `state_dir`. `None` leaves `/device/push` open.
pub fn resolve_api_token(cfg: &RelayConfig, state_dir: Option<&Path>) -> Result<Option<String>> {
    if let Some(token) = cfg.api_token.as_deref().map(str::trim) {
        if !token.is_empty() {
            return Ok(Some(token.to_string()));
        }
    }
    if !cfg.generate_token {
        return Ok(None);
    }
    let Some(dir) = state_dir else {
        return Ok(None);
    };

    let path = dir.join(TOKEN_FILE);
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(Some(existing.to_string()));
        }
    }

    let token: String = rand::random::<[u8; 16]>()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create state directory {}", dir.display()))?;
    std::fs::write(&path, &token)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "generated device push token");
    Ok(Some(token))
}

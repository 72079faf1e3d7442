use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

pub const FLAGS_FILE: &str = "media_enable.json";

/// Durable [`FLAGS_FILE`] record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlags {
    /// Helper-based sourcing is on.
    #[serde(default)]
    pub enabled: bool,
    /// OS-notification scraping is on.
    #[serde(default)]
    pub mobile: bool,
}

/// Reads and writes [`MediaFlags`]. Without a path nothing is persisted and
/// every load returns the defaults.
#[derive(Debug, Clone, Default)]
pub struct MediaFlagStore {
    path: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl MediaFlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Arc::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Missing or unreadable files load as all-disabled.
    pub fn load(&self) -> MediaFlags {
        let Some(path) = &self.path else {
            return MediaFlags::default();
        };
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|err| {
                warn!(error = %err, path = %path.display(), "ignoring malformed media flag file");
                MediaFlags::default()
            }),
            Err(_) => MediaFlags::default(),
        }
    }

    pub fn update(&self, apply: impl FnOnce(&mut MediaFlags)) -> Result<MediaFlags> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut flags = self.load();
        apply(&mut flags);
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let json = serde_json::to_string_pretty(&flags)?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(flags)
    }
}

/// A runtime on/off switch shared between the relay routes and a provider.
#[derive(Debug, Clone, Default)]
pub struct CapabilityFlag(Arc<AtomicBool>);

impl CapabilityFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

use crate::PlaybackProvider;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tune_relay_core::{ExternalPushRecord, PlaybackSource, PlaybackState};

/// Holds the last pushed record. Every push replaces it whole.
#[derive(Debug, Clone, Default)]
pub struct PushStore {
    inner: Arc<RwLock<Option<ExternalPushRecord>>>,
}

impl PushStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, record: ExternalPushRecord) {
        *self.inner.write().await = Some(record);
    }

    pub async fn snapshot(&self) -> Option<ExternalPushRecord> {
        self.inner.read().await.clone()
    }
}

/// Serves the pushed record verbatim while it is younger than the window.
pub struct ExternalPushProvider {
    store: PushStore,
    freshness_ms: u64,
}

impl ExternalPushProvider {
    pub fn new(store: PushStore, freshness_ms: u64) -> Self {
        Self {
            store,
            freshness_ms,
        }
    }
}

#[async_trait]
impl PlaybackProvider for ExternalPushProvider {
    fn name(&self) -> &'static str {
        "external_push"
    }

    fn source(&self) -> PlaybackSource {
        PlaybackSource::ExternalPush
    }

    async fn poll(&self, now_ms: u64) -> Result<Option<PlaybackState>> {
        Ok(self
            .store
            .snapshot()
            .await
            .filter(|record| record.is_fresh(now_ms, self.freshness_ms))
            .map(|record| record.state))
    }
}

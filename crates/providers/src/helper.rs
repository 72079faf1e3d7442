use crate::supervisor::HelperProcessSupervisor;
use crate::PlaybackProvider;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tune_relay_core::{PlaybackSource, PlaybackState};

/// Asks the supervised helper, only while it is running. No retry here;
/// the poll cadence is the retry.
pub struct LocalHelperProvider {
    supervisor: Arc<Mutex<HelperProcessSupervisor>>,
}

impl LocalHelperProvider {
    pub fn new(supervisor: Arc<Mutex<HelperProcessSupervisor>>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl PlaybackProvider for LocalHelperProvider {
    fn name(&self) -> &'static str {
        "local_helper"
    }

    fn source(&self) -> PlaybackSource {
        PlaybackSource::LocalHelper
    }

    async fn poll(&self, _now_ms: u64) -> Result<Option<PlaybackState>> {
        // Release the lock before the network round trip.
        let client = {
            let mut supervisor = self.supervisor.lock().await;
            supervisor.refresh().await;
            if !supervisor.is_running() {
                return Ok(None);
            }
            supervisor.client()
        };
        client.current().await
    }
}

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use tune_relay_core::{now_ms, NotificationConfig, PlaybackSource, PlaybackState};

pub mod flags;
pub mod helper;
pub mod notification;
pub mod push;
pub mod supervisor;

pub use flags::{CapabilityFlag, MediaFlagStore, MediaFlags, FLAGS_FILE};
pub use helper::LocalHelperProvider;
pub use notification::NotificationProvider;
pub use push::{ExternalPushProvider, PushStore};
pub use supervisor::{
    helper_candidates, locate_executable, EnableError, HelperClient, HelperProcessSupervisor,
    HelperState, RestartPolicy, SupervisorOptions, HELPER_PORT_ENV,
};

/// One source of "what is playing". `Ok(None)` means nothing usable right
/// now; errors are treated the same way by the aggregator.
#[async_trait]
pub trait PlaybackProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn source(&self) -> PlaybackSource;
    async fn poll(&self, now_ms: u64) -> Result<Option<PlaybackState>>;
}

/// Ordered provider list; the first provider with a result wins.
pub struct PlaybackSourceAggregator {
    providers: Vec<Box<dyn PlaybackProvider>>,
}

impl PlaybackSourceAggregator {
    pub fn new(providers: Vec<Box<dyn PlaybackProvider>>) -> Self {
        Self { providers }
    }

    /// Never fails; falls back to the `none` state.
    pub async fn resolve_current(&self) -> PlaybackState {
        self.resolve_at(now_ms()).await
    }

    pub async fn resolve_at(&self, now_ms: u64) -> PlaybackState {
        for provider in &self.providers {
            match provider.poll(now_ms).await {
                Ok(Some(mut state)) => {
                    state.source = provider.source();
                    return state;
                }
                Ok(None) => {
                    debug!(provider = provider.name(), "no playback from provider");
                }
                Err(err) => {
                    debug!(provider = provider.name(), error = %err, "provider failed; falling through");
                }
            }
        }
        PlaybackState::nothing_playing(now_ms)
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

/// Everything the relay shares with its providers.
pub struct ProviderParts {
    pub push: PushStore,
    pub push_freshness_ms: u64,
    pub notification: NotificationConfig,
    pub notification_enabled: CapabilityFlag,
    pub supervisor: Arc<Mutex<HelperProcessSupervisor>>,
}

/// Push first, then the notification scrape, then the helper.
pub fn build_aggregator(parts: ProviderParts) -> PlaybackSourceAggregator {
    let providers: Vec<Box<dyn PlaybackProvider>> = vec![
        Box::new(ExternalPushProvider::new(parts.push, parts.push_freshness_ms)),
        Box::new(NotificationProvider::new(
            &parts.notification,
            parts.notification_enabled,
        )),
        Box::new(LocalHelperProvider::new(parts.supervisor)),
    ];
    PlaybackSourceAggregator::new(providers)
}

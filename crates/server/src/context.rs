use crate::catalog::{CatalogLookup, CatalogMatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tune_relay_core::{
    ExternalPushRecord, NotificationConfig, PlaybackSource, PlaybackState, RelayConfig,
};
use tune_relay_providers::{
    build_aggregator, CapabilityFlag, EnableError, HelperProcessSupervisor, MediaFlagStore,
    PlaybackSourceAggregator, ProviderParts, PushStore,
};

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub push_freshness_ms: u64,
    pub mobile_active_ms: u64,
    pub catalog_timeout: Duration,
    pub api_token: Option<String>,
}

impl RelayOptions {
    pub fn from_config(cfg: &RelayConfig, api_token: Option<String>) -> Self {
        Self {
            push_freshness_ms: cfg.push_freshness_ms,
            mobile_active_ms: cfg.mobile_active_ms,
            catalog_timeout: Duration::from_millis(cfg.catalog_lookup_timeout_ms),
            api_token,
        }
    }
}

/// Body of `POST /device/push`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(default)]
    pub is_playing: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<Value>,
    #[serde(default)]
    pub position_ms: Option<Value>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
}

fn millis(v: Option<&Value>) -> Option<u64> {
    v.and_then(Value::as_f64)
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f as u64)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl PushPayload {
    fn into_record(self, received_at_ms: u64) -> ExternalPushRecord {
        let state = PlaybackState {
            source: PlaybackSource::ExternalPush,
            is_playing: matches!(self.is_playing, Some(Value::Bool(true))),
            title: self.title.unwrap_or_default(),
            artist: self.artist.unwrap_or_default(),
            album: self.album.unwrap_or_default(),
            cover_url: non_empty(self.cover_url),
            catalog_id: None,
            duration_ms: millis(self.duration_ms.as_ref()),
            position_ms: millis(self.position_ms.as_ref()),
            observed_at_ms: received_at_ms,
            lyrics: non_empty(self.lyrics),
        };
        ExternalPushRecord {
            state,
            received_at_ms,
            device_id: non_empty(self.device_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentResponse {
    #[serde(flatten)]
    pub state: PlaybackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileStatus {
    pub ok: bool,
    pub has_data: bool,
    pub last_update: Option<u64>,
    pub age_ms: Option<u64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaStatus {
    pub enabled: bool,
    pub helper: bool,
    pub mobile: bool,
}

/// Everything the relay owns. One instance per running relay; tests build
/// as many as they like.
pub struct RelayContext {
    opts: RelayOptions,
    push: PushStore,
    aggregator: PlaybackSourceAggregator,
    supervisor: Arc<Mutex<HelperProcessSupervisor>>,
    mobile: CapabilityFlag,
    flags: MediaFlagStore,
    catalog: Arc<dyn CatalogLookup>,
    /// Last successful lookup, keyed by title and artist.
    last_match: StdMutex<Option<(String, String, CatalogMatch)>>,
}

impl RelayContext {
    pub fn new(
        opts: RelayOptions,
        notification: NotificationConfig,
        supervisor: HelperProcessSupervisor,
        flags: MediaFlagStore,
        catalog: Arc<dyn CatalogLookup>,
    ) -> Self {
        let push = PushStore::new();
        let mobile = CapabilityFlag::new(flags.load().mobile);
        let supervisor = Arc::new(Mutex::new(supervisor));
        let aggregator = build_aggregator(ProviderParts {
            push: push.clone(),
            push_freshness_ms: opts.push_freshness_ms,
            notification,
            notification_enabled: mobile.clone(),
            supervisor: supervisor.clone(),
        });
        Self {
            opts,
            push,
            aggregator,
            supervisor,
            mobile,
            flags,
            catalog,
            last_match: StdMutex::new(None),
        }
    }

    pub fn api_token(&self) -> Option<&str> {
        self.opts.api_token.as_deref()
    }

    pub fn catalog(&self) -> &dyn CatalogLookup {
        self.catalog.as_ref()
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.aggregator.provider_names()
    }

    /// Replaces the push record wholesale. Returns the receive timestamp.
    pub async fn accept_push(&self, payload: PushPayload, now_ms: u64) -> u64 {
        let record = payload.into_record(now_ms);
        debug!(device = ?record.device_id, title = %record.state.title, "device push");
        self.push.replace(record).await;
        now_ms
    }

    /// Aggregated state, enriched from the catalog when possible.
    pub async fn current_at(&self, now_ms: u64) -> CurrentResponse {
        let state = self.aggregator.resolve_at(now_ms).await;
        let last_update = if state.source == PlaybackSource::ExternalPush {
            self.push.snapshot().await.map(|r| r.received_at_ms)
        } else {
            None
        };
        CurrentResponse {
            state: self.enrich(state).await,
            last_update,
        }
    }

    async fn enrich(&self, mut state: PlaybackState) -> PlaybackState {
        if !state.has_identity() || state.catalog_id.is_some() || !self.catalog.is_configured() {
            return state;
        }
        let found = match self.remembered(&state) {
            Some(found) => Some(found),
            None => self.lookup(&state).await,
        };
        if let Some(found) = found {
            state.catalog_id = Some(found.id);
            state.duration_ms = state.duration_ms.or(found.duration_ms);
            state.cover_url = state.cover_url.or(found.cover_url);
        }
        state
    }

    fn remembered(&self, state: &PlaybackState) -> Option<CatalogMatch> {
        let last = self.last_match.lock().ok()?;
        last.as_ref()
            .filter(|(title, artist, _)| *title == state.title && *artist == state.artist)
            .map(|(_, _, found)| found.clone())
    }

    async fn lookup(&self, state: &PlaybackState) -> Option<CatalogMatch> {
        let outcome = tokio::time::timeout(
            self.opts.catalog_timeout,
            self.catalog.search(&state.title, &state.artist),
        )
        .await;
        match outcome {
            Ok(Ok(Some(found))) => {
                if let Ok(mut last) = self.last_match.lock() {
                    *last = Some((state.title.clone(), state.artist.clone(), found.clone()));
                }
                Some(found)
            }
            Ok(Ok(None)) => {
                debug!(title = %state.title, "no catalog match");
                None
            }
            Ok(Err(err)) => {
                warn!(error = %err, "catalog search failed for playback");
                None
            }
            Err(_) => {
                debug!("catalog search timed out; returning basic info");
                None
            }
        }
    }

    pub async fn mobile_status(&self, now_ms: u64) -> MobileStatus {
        let record = self.push.snapshot().await;
        let age_ms = record.as_ref().map(|r| r.age_ms(now_ms));
        MobileStatus {
            ok: true,
            has_data: record.is_some(),
            last_update: record.map(|r| r.received_at_ms),
            age_ms,
            active: age_ms.is_some_and(|age| age < self.opts.mobile_active_ms),
        }
    }

    pub async fn media_status(&self) -> MediaStatus {
        let mut supervisor = self.supervisor.lock().await;
        supervisor.refresh().await;
        let helper = supervisor.is_running();
        MediaStatus {
            enabled: self.flags.load().enabled || helper,
            helper,
            mobile: self.mobile.get(),
        }
    }

    pub async fn set_helper_enabled(&self, enable: bool) -> Result<bool, EnableError> {
        let mut supervisor = self.supervisor.lock().await;
        if enable {
            supervisor.enable().await?;
        } else {
            supervisor.disable().await;
        }
        Ok(supervisor.is_running())
    }

    pub fn set_mobile_enabled(&self, enable: bool) -> bool {
        self.mobile.set(enable);
        if let Err(err) = self.flags.update(|f| f.mobile = enable) {
            warn!(error = %err, "failed to persist notification flag; keeping in-memory state");
        }
        enable
    }

    /// Re-applies the persisted helper flag.
    pub async fn restore(&self) {
        if self.supervisor.lock().await.restore().await {
            info!("helper restored from persisted state");
        }
    }

    /// Stops the helper process without clearing its persisted flag.
    pub async fn shutdown(&self) {
        self.supervisor.lock().await.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::{PushPayload, RelayContext, RelayOptions};
    use crate::catalog::{CatalogLookup, CatalogMatch, NoCatalog};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tune_relay_core::{NotificationConfig, PlaybackSource};
    use tune_relay_engine::{ChangeDetector, DiffKind};
    use tune_relay_providers::{
        HelperProcessSupervisor, MediaFlagStore, RestartPolicy, SupervisorOptions,
    };

    enum Catalog {
        Found,
        Slow,
        Broken,
        /// Answers once, then hangs.
        FoundOnce(AtomicUsize),
    }

    #[async_trait]
    impl CatalogLookup for Catalog {
        async fn search(&self, _title: &str, _artist: &str) -> Result<Option<CatalogMatch>> {
            match self {
                Catalog::Found => Ok(Some(CatalogMatch {
                    id: "99".to_string(),
                    duration_ms: Some(180_000),
                    cover_url: Some("http://img".to_string()),
                })),
                Catalog::Slow => {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(None)
                }
                Catalog::Broken => Err(anyhow!("502")),
                Catalog::FoundOnce(calls) => {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(Some(CatalogMatch {
                            id: "99".to_string(),
                            duration_ms: None,
                            cover_url: None,
                        }))
                    } else {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(None)
                    }
                }
            }
        }

        async fn lyric(&self, _id: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn context(catalog: Arc<dyn CatalogLookup>) -> RelayContext {
        let flags = MediaFlagStore::in_memory();
        let supervisor = HelperProcessSupervisor::new(
            SupervisorOptions {
                candidates: Vec::new(),
                port: 1,
                query_timeout: Duration::from_millis(100),
                stop_grace: Duration::from_millis(100),
                restart: RestartPolicy::Never,
            },
            flags.clone(),
        );
        RelayContext::new(
            RelayOptions {
                push_freshness_ms: 300_000,
                mobile_active_ms: 120_000,
                catalog_timeout: Duration::from_secs(2),
                api_token: None,
            },
            NotificationConfig::default(),
            supervisor,
            flags,
            catalog,
        )
    }

    fn push(title: &str, artist: &str, playing: bool) -> PushPayload {
        serde_json::from_value(json!({
            "isPlaying": playing,
            "title": title,
            "artist": artist,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn push_then_poll_emits_once_per_transition() {
        let relay = context(Arc::new(NoCatalog));
        let mut detector = ChangeDetector::new();

        relay.accept_push(push("A", "B", true), 0).await;

        let first = relay.current_at(1_000).await;
        assert_eq!(first.state.source, PlaybackSource::ExternalPush);
        assert_eq!(first.last_update, Some(0));
        let kind = detector.observe(&first.state);
        assert_ne!(kind, DiffKind::Nothing);
        assert_eq!(detector.last_key().unwrap().as_str(), "A-true");

        let second = relay.current_at(4_000).await;
        assert_eq!(
            detector.observe(&second.state),
            DiffKind::Nothing
        );

        let stale = relay.current_at(310_000).await;
        assert_eq!(stale.state.source, PlaybackSource::None);
        assert!(!stale.state.is_playing);
        assert_ne!(
            detector.observe(&stale.state),
            DiffKind::Nothing
        );
        assert_eq!(detector.last_key().unwrap().as_str(), "-false");
    }

    #[tokio::test]
    async fn freshness_boundary_is_five_minutes() {
        let relay = context(Arc::new(NoCatalog));
        relay.accept_push(push("A", "B", true), 1_000).await;

        assert_eq!(
            relay.current_at(1_000 + 299_000).await.state.source,
            PlaybackSource::ExternalPush
        );
        assert_eq!(
            relay.current_at(1_000 + 301_000).await.state.source,
            PlaybackSource::None
        );
    }

    #[tokio::test]
    async fn lenient_push_fields() {
        let relay = context(Arc::new(NoCatalog));
        let payload: PushPayload = serde_json::from_value(json!({
            "isPlaying": "yes",
            "durationMs": 2000.5,
            "positionMs": -3,
            "coverUrl": "",
            "deviceId": "phone"
        }))
        .unwrap();
        relay.accept_push(payload, 5).await;

        let state = relay.current_at(6).await.state;
        assert!(!state.is_playing);
        assert_eq!(state.title, "");
        assert_eq!(state.duration_ms, Some(2_000));
        assert_eq!(state.position_ms, None);
        assert_eq!(state.cover_url, None);
    }

    #[tokio::test]
    async fn enrichment_fills_missing_catalog_fields() {
        let relay = context(Arc::new(Catalog::Found));
        relay.accept_push(push("A", "B", true), 0).await;

        let state = relay.current_at(1).await.state;
        assert_eq!(state.catalog_id.as_deref(), Some("99"));
        assert_eq!(state.duration_ms, Some(180_000));
        assert_eq!(state.cover_url.as_deref(), Some("http://img"));
    }

    #[tokio::test]
    async fn enrichment_needs_title_and_artist() {
        let relay = context(Arc::new(Catalog::Found));
        relay.accept_push(push("A", "", true), 0).await;
        assert_eq!(relay.current_at(1).await.state.catalog_id, None);
    }

    #[tokio::test]
    async fn catalog_failure_degrades_to_plain_state() {
        let relay = context(Arc::new(Catalog::Broken));
        relay.accept_push(push("A", "B", true), 0).await;
        let state = relay.current_at(1).await.state;
        assert_eq!(state.title, "A");
        assert_eq!(state.catalog_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn catalog_timeout_degrades_to_plain_state() {
        let relay = context(Arc::new(Catalog::Slow));
        relay.accept_push(push("A", "B", true), 0).await;
        let state = relay.current_at(1).await.state;
        assert_eq!(state.title, "A");
        assert_eq!(state.catalog_id, None);
    }

    #[tokio::test]
    async fn mobile_status_reports_age() {
        let relay = context(Arc::new(NoCatalog));
        let empty = relay.mobile_status(10).await;
        assert!(!empty.has_data);
        assert_eq!(empty.age_ms, None);
        assert!(!empty.active);

        relay.accept_push(push("A", "B", true), 1_000).await;
        let recent = relay.mobile_status(61_000).await;
        assert!(recent.has_data);
        assert_eq!(recent.age_ms, Some(60_000));
        assert!(recent.active);

        assert!(!relay.mobile_status(200_000).await.active);
    }

    #[tokio::test]
    async fn helper_enable_failure_reports_error() {
        let relay = context(Arc::new(NoCatalog));
        assert!(relay.set_helper_enabled(true).await.is_err());

        let status = relay.media_status().await;
        assert!(!status.enabled);
        assert!(!status.helper);
        assert!(!relay.set_helper_enabled(false).await.unwrap());
    }

    #[tokio::test]
    async fn mobile_flag_toggles_notification_provider() {
        let relay = context(Arc::new(NoCatalog));
        assert!(!relay.media_status().await.mobile);
        assert!(relay.set_mobile_enabled(true));
        assert!(relay.media_status().await.mobile);
    }

    #[tokio::test(start_paused = true)]
    async fn remembered_match_survives_a_slow_catalog() {
        let catalog = Arc::new(Catalog::FoundOnce(AtomicUsize::new(0)));
        let relay = context(catalog.clone());
        relay.accept_push(push("A", "B", true), 0).await;

        assert_eq!(relay.current_at(1).await.state.catalog_id.as_deref(), Some("99"));
        assert_eq!(relay.current_at(2).await.state.catalog_id.as_deref(), Some("99"));
        let Catalog::FoundOnce(calls) = catalog.as_ref() else {
            unreachable!()
        };
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        relay.accept_push(push("C", "D", true), 3).await;
        assert_eq!(relay.current_at(4).await.state.catalog_id, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_leaves_helper_enabled_for_restore() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("helper");
        std::fs::write(&helper, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();
        let flags_path = dir.path().join("media_enable.json");

        let relay_with = |flags: MediaFlagStore| {
            let supervisor = HelperProcessSupervisor::new(
                SupervisorOptions {
                    candidates: vec![helper.clone()],
                    port: 1,
                    query_timeout: Duration::from_millis(100),
                    stop_grace: Duration::from_millis(500),
                    restart: RestartPolicy::Never,
                },
                flags.clone(),
            );
            RelayContext::new(
                RelayOptions {
                    push_freshness_ms: 300_000,
                    mobile_active_ms: 120_000,
                    catalog_timeout: Duration::from_secs(2),
                    api_token: None,
                },
                NotificationConfig::default(),
                supervisor,
                flags,
                Arc::new(NoCatalog),
            )
        };

        let first = relay_with(MediaFlagStore::new(&flags_path));
        assert!(first.set_helper_enabled(true).await.unwrap());
        first.shutdown().await;
        assert!(!first.media_status().await.helper);
        assert!(MediaFlagStore::new(&flags_path).load().enabled);

        let second = relay_with(MediaFlagStore::new(&flags_path));
        second.restore().await;
        let status = second.media_status().await;
        assert!(status.helper);
        assert!(status.enabled);
        second.shutdown().await;
    }
}

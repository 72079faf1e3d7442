use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tune_relay_core::urls::relay_endpoint;
use tune_relay_core::{ClientConfig, PlaybackState};

/// Source of aggregated playback snapshots.
#[async_trait]
pub trait PlaybackFeed: Send + Sync {
    async fn fetch_current(&self) -> Result<PlaybackState>;
}

/// Source of raw timestamped lyric text by catalog id.
#[async_trait]
pub trait LyricFetcher: Send + Sync {
    async fn fetch_lyric(&self, catalog_id: &str) -> Result<Option<String>>;
}

pub struct RelayClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_token: None,
        }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        let mut client = Self::new(
            cfg.relay_url.clone(),
            Duration::from_millis(cfg.request_timeout_ms),
        );
        client.api_token = cfg.api_token.clone().filter(|t| !t.trim().is_empty());
        client
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<reqwest::Response> {
        let url = relay_endpoint(&self.base_url, path)
            .with_context(|| format!("invalid relay url {}", self.base_url))?;
        let mut req = self.client.post(url);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        req.send().await.context("relay request failed")
    }

    /// `GET /health` body.
    pub async fn health(&self) -> Result<Value> {
        let url = relay_endpoint(&self.base_url, "/health")
            .with_context(|| format!("invalid relay url {}", self.base_url))?;
        let resp = self.client.get(url).send().await.context("relay unreachable")?;
        resp.json().await.context("invalid JSON from relay /health")
    }
}

fn error_field(body: &Value) -> Option<&str> {
    body.get("error").and_then(Value::as_str)
}

#[async_trait]
impl PlaybackFeed for RelayClient {
    async fn fetch_current(&self) -> Result<PlaybackState> {
        let resp = self.post("/current", None).await?;
        let status = resp.status();
        let body: Value = resp.json().await.context("invalid JSON from relay /current")?;
        if let Some(err) = error_field(&body) {
            return Err(anyhow!("relay reported error: {err}"));
        }
        if !status.is_success() {
            return Err(anyhow!("relay /current failed: HTTP {status}"));
        }
        serde_json::from_value(body).context("unexpected /current body")
    }
}

#[async_trait]
impl LyricFetcher for RelayClient {
    async fn fetch_lyric(&self, catalog_id: &str) -> Result<Option<String>> {
        let resp = self.post("/lyric", Some(json!({ "id": catalog_id }))).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = resp.json().await.context("invalid JSON from relay /lyric")?;
        if let Some(err) = error_field(&body) {
            return Err(anyhow!("relay reported error: {err}"));
        }
        if !status.is_success() {
            return Err(anyhow!("relay /lyric failed: HTTP {status}"));
        }
        Ok(body
            .get("lyric")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::{LyricFetcher, PlaybackFeed, RelayClient};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tune_relay_core::{NotificationConfig, PlaybackSource};
    use tune_relay_providers::{
        HelperProcessSupervisor, MediaFlagStore, RestartPolicy, SupervisorOptions,
    };
    use tune_relay_server::{
        CatalogLookup, CatalogMatch, NoCatalog, PushPayload, RelayContext, RelayOptions,
        RelayServer,
    };

    struct Lyrics;

    #[async_trait]
    impl CatalogLookup for Lyrics {
        async fn search(&self, _title: &str, _artist: &str) -> Result<Option<CatalogMatch>> {
            Ok(None)
        }

        async fn lyric(&self, id: &str) -> Result<Option<String>> {
            Ok((id == "1").then(|| "[00:00.50]la".to_string()))
        }
    }

    async fn relay(catalog: Arc<dyn CatalogLookup>) -> (RelayServer, Arc<RelayContext>, String) {
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
        let ctx = Arc::new(RelayContext::new(
            RelayOptions {
                push_freshness_ms: 300_000,
                mobile_active_ms: 120_000,
                catalog_timeout: Duration::from_secs(1),
                api_token: None,
            },
            NotificationConfig::default(),
            supervisor,
            flags,
            catalog,
        ));
        let mut server = RelayServer::new("127.0.0.1:0".parse().unwrap(), ctx.clone());
        let addr = server.start().await.unwrap();
        (server, ctx, format!("http://{addr}"))
    }

    #[tokio::test]
    async fn fetches_current_state_from_relay() {
        let (_server, ctx, base) = relay(Arc::new(NoCatalog)).await;
        let client = RelayClient::new(base, Duration::from_secs(2));

        let idle = client.fetch_current().await.unwrap();
        assert_eq!(idle.source, PlaybackSource::None);

        let payload: PushPayload =
            serde_json::from_str(r#"{"isPlaying":true,"title":"A","artist":"B"}"#).unwrap();
        ctx.accept_push(payload, tune_relay_core::now_ms()).await;

        let current = client.fetch_current().await.unwrap();
        assert_eq!(current.source, PlaybackSource::ExternalPush);
        assert_eq!(current.title, "A");
        assert!(current.is_playing);
    }

    #[tokio::test]
    async fn lyric_fetch_distinguishes_missing_from_unavailable() {
        let (_server, _ctx, base) = relay(Arc::new(Lyrics)).await;
        let client = RelayClient::new(base, Duration::from_secs(2));
        assert_eq!(
            client.fetch_lyric("1").await.unwrap().as_deref(),
            Some("[00:00.50]la")
        );
        assert_eq!(client.fetch_lyric("2").await.unwrap(), None);

        let (_bare, _ctx, bare_base) = relay(Arc::new(NoCatalog)).await;
        let bare = RelayClient::new(bare_base, Duration::from_secs(2));
        assert!(bare.fetch_lyric("1").await.is_err());
    }

    #[tokio::test]
    async fn unreachable_relay_is_an_error() {
        let client = RelayClient::new("http://127.0.0.1:1", Duration::from_millis(500));
        assert!(client.fetch_current().await.is_err());
    }
}

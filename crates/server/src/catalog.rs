use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use tune_relay_core::urls::{catalog_lyric_url, catalog_search_url};
use tune_relay_core::CatalogConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogMatch {
    pub id: String,
    pub duration_ms: Option<u64>,
    pub cover_url: Option<String>,
}

/// The external music catalog, reduced to what the relay needs.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }
    async fn search(&self, title: &str, artist: &str) -> Result<Option<CatalogMatch>>;
    async fn lyric(&self, id: &str) -> Result<Option<String>>;
}

pub struct NoCatalog;

#[async_trait]
impl CatalogLookup for NoCatalog {
    fn is_configured(&self) -> bool {
        false
    }

    async fn search(&self, _title: &str, _artist: &str) -> Result<Option<CatalogMatch>> {
        Ok(None)
    }

    async fn lyric(&self, _id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Talks to a NeteaseCloudMusicApi-compatible server.
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("catalog request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("catalog request failed: HTTP {status}"));
        }
        resp.json().await.context("invalid JSON from catalog")
    }
}

pub fn catalog_from_config(cfg: &CatalogConfig) -> Box<dyn CatalogLookup> {
    match cfg.base_url.as_deref().map(str::trim) {
        Some(base) if !base.is_empty() => Box::new(HttpCatalog::new(
            base,
            Duration::from_millis(cfg.request_timeout_ms),
        )),
        _ => Box::new(NoCatalog),
    }
}

#[async_trait]
impl CatalogLookup for HttpCatalog {
    async fn search(&self, title: &str, artist: &str) -> Result<Option<CatalogMatch>> {
        let url = catalog_search_url(&self.base_url, title, artist);
        debug!(%url, "catalog search");
        let json = self.get_json(&url).await?;
        Ok(parse_search(&json))
    }

    async fn lyric(&self, id: &str) -> Result<Option<String>> {
        let json = self.get_json(&catalog_lyric_url(&self.base_url, id)).await?;
        Ok(json
            .pointer("/lrc/lyric")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string))
    }
}

fn id_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn parse_search(json: &Value) -> Option<CatalogMatch> {
    let song = json.pointer("/result/songs/0")?;
    Some(CatalogMatch {
        id: id_to_string(song.get("id")?)?,
        duration_ms: song.get("dt").and_then(Value::as_u64),
        cover_url: song
            .pointer("/al/picUrl")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

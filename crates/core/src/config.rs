use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: String,
    pub api_token: Option<String>,
    pub generate_token: bool,
    /// Holds `api_token.txt` and `media_enable.json`. Defaults to the platform data dir.
    pub state_dir: Option<PathBuf>,
    pub push_freshness_ms: u64,
    pub mobile_active_ms: u64,
    pub catalog_lookup_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            api_token: None,
            generate_token: true,
            state_dir: None,
            push_freshness_ms: 5 * 60 * 1_000,
            mobile_active_ms: 2 * 60 * 1_000,
            catalog_lookup_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    pub port: u16,
    pub executable_name: String,
    pub path: Option<PathBuf>,
    pub query_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub restart_on_crash: bool,
    pub restart_delay_ms: u64,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            port: 3131,
            executable_name: "tune-relay-helper".to_string(),
            path: None,
            query_timeout_ms: 2_000,
            stop_grace_ms: 1_000,
            restart_on_crash: true,
            restart_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub command: String,
    pub package: String,
    pub timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            command: "termux-notification-list".to_string(),
            package: "com.netease.cloudmusic".to_string(),
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Base URL of a NeteaseCloudMusicApi-compatible server. Unset disables lookups.
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_url: String,
    pub api_token: Option<String>,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub lyric_buffer_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:3000".to_string(),
            api_token: None,
            poll_interval_ms: 3_000,
            request_timeout_ms: 5_000,
            lyric_buffer_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub helper: HelperConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            log_level: default_log_level(),
            relay: RelayConfig::default(),
            helper: HelperConfig::default(),
            notification: NotificationConfig::default(),
            catalog: CatalogConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn partial_file_keeps_section_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
log_level = "debug"

[helper]
port = 4000
"#,
        )
        .unwrap();

        assert_eq!(cfg.schema_version, 1);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.helper.port, 4000);
        assert_eq!(cfg.helper.query_timeout_ms, 2_000);
        assert_eq!(cfg.relay.push_freshness_ms, 300_000);
        assert_eq!(cfg.client.poll_interval_ms, 3_000);
    }

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.relay.bind, "127.0.0.1:3000");
        assert_eq!(back.notification.package, "com.netease.cloudmusic");
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tune_relay_client::{Companion, PlaybackFeed, PollLoop, PollOptions, RelayClient};
use tune_relay_core::{now_ms, AppConfig, PlaybackState};
use tune_relay_providers::{
    helper_candidates, locate_executable, HelperProcessSupervisor, MediaFlagStore,
    SupervisorOptions, FLAGS_FILE, HELPER_PORT_ENV,
};
use tune_relay_server::{
    catalog_from_config, resolve_api_token, CatalogLookup, RelayContext, RelayOptions, RelayServer,
};

#[derive(Parser, Debug)]
#[command(
    name = "tune-relay",
    about = "Now playing -> relay -> lyric-synchronised prompt slices"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay.
    Serve,
    /// Poll the relay and print the prompt payload on every change.
    Watch,
    /// One `/current` call.
    Status,
    Doctor,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Serve);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_and_init_logging(&cfg_path)?;
            doctor(&cfg, &cfg_path).await
        }
        Commands::Status => {
            let cfg = load_and_init_logging(&cfg_path)?;
            status(&cfg).await
        }
        Commands::Watch => {
            let cfg = load_and_init_logging(&cfg_path)?;
            watch(&cfg).await
        }
        Commands::Serve => {
            let cfg = load_and_init_logging(&cfg_path)?;
            serve(cfg).await
        }
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    let state_dir = state_dir(&cfg);
    let token = resolve_api_token(&cfg.relay, state_dir.as_deref())?;
    let flags = match &state_dir {
        Some(dir) => MediaFlagStore::new(dir.join(FLAGS_FILE)),
        None => MediaFlagStore::in_memory(),
    };
    let supervisor =
        HelperProcessSupervisor::new(SupervisorOptions::from_config(&cfg.helper), flags.clone());
    let catalog: Arc<dyn CatalogLookup> = Arc::from(catalog_from_config(&cfg.catalog));

    let context = Arc::new(RelayContext::new(
        RelayOptions::from_config(&cfg.relay, token.clone()),
        cfg.notification.clone(),
        supervisor,
        flags,
        catalog,
    ));
    context.restore().await;

    let addr: SocketAddr = cfg
        .relay
        .bind
        .parse()
        .with_context(|| format!("invalid relay bind address {}", cfg.relay.bind))?;
    let mut server = RelayServer::new(addr, context.clone());
    let bound = server.start().await?;
    info!(
        addr = %bound,
        push_auth = token.is_some(),
        state_dir = ?state_dir,
        "tune-relay started"
    );

    wait_for_shutdown().await;

    server.stop().await;
    context.shutdown().await;
    info!("tune-relay stopped");
    Ok(())
}

async fn watch(cfg: &AppConfig) -> Result<()> {
    let client = Arc::new(RelayClient::from_config(&cfg.client));
    let handle = PollLoop::start_with(client.clone(), PollOptions::from_config(&cfg.client));
    let mut changes = handle.subscribe();
    let mut companion = Companion::new(client, cfg.client.lyric_buffer_ms);

    info!(relay = %cfg.client.relay_url, "watching relay");
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(state) => {
                    log_change(&state);
                    companion.on_change(state).await;
                    if let Some(payload) = companion.prompt_payload(now_ms()) {
                        println!("{payload}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change events dropped; catching up");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn log_change(state: &PlaybackState) {
    if state.title.is_empty() {
        info!(source = ?state.source, "nothing playing");
    } else {
        info!(
            source = ?state.source,
            playing = state.is_playing,
            "{} - {}",
            state.artist,
            state.title
        );
    }
}

async fn status(cfg: &AppConfig) -> Result<()> {
    let client = RelayClient::from_config(&cfg.client);
    let state = client
        .fetch_current()
        .await
        .with_context(|| format!("failed to query relay at {}", client.base_url()))?;

    println!("source: {:?}", state.source);
    println!("playing: {}", state.is_playing);
    if state.title.is_empty() {
        println!("track: <none>");
    } else {
        println!("track: {} - {}", state.artist, state.title);
        if !state.album.is_empty() {
            println!("album: {}", state.album);
        }
    }
    if let Some(id) = &state.catalog_id {
        println!("catalog id: {id}");
    }
    if let Some(pos) = state.position_ms {
        println!("position: {pos} ms");
    }
    Ok(())
}

async fn doctor(cfg: &AppConfig, cfg_path: &Path) -> Result<()> {
    println!("== tune-relay doctor ==");
    println!(
        "Config: {} ({})",
        cfg_path.display(),
        if cfg_path.exists() { "found" } else { "defaults" }
    );

    let client = RelayClient::from_config(&cfg.client);
    match client.health().await {
        Ok(body) => println!("Relay {}: reachable ({body})", client.base_url()),
        Err(err) => println!("Relay {}: not reachable ({err:#})", client.base_url()),
    }

    let candidates = helper_candidates(&cfg.helper);
    match locate_executable(&candidates) {
        Some(path) => println!("Helper executable: {}", path.display()),
        None => {
            println!("Helper executable: not found; searched");
            for c in &candidates {
                println!("  {}", c.display());
            }
        }
    }
    println!("Helper port: {} (${HELPER_PORT_ENV})", cfg.helper.port);

    match state_dir(cfg) {
        Some(dir) => {
            let flags = MediaFlagStore::new(dir.join(FLAGS_FILE)).load();
            println!("State dir: {}", dir.display());
            println!(
                "Persisted flags: helper={} notification={}",
                flags.enabled, flags.mobile
            );
        }
        None => println!("State dir: <none>; flags and token are not persisted"),
    }

    match cfg.catalog.base_url.as_deref() {
        Some(url) if !url.trim().is_empty() => println!("Catalog: {url}"),
        _ => println!("Catalog: not configured; enrichment and /lyric disabled"),
    }
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received ctrl-c; shutting down"),
                    _ = term.recv() => info!("received SIGTERM; shutting down"),
                }
                return;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    }
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
    }
    info!("received ctrl-c; shutting down");
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("tune-relay").join("config.toml")
}

fn state_dir(cfg: &AppConfig) -> Option<PathBuf> {
    cfg.relay
        .state_dir
        .clone()
        .or_else(|| dirs::data_dir().map(|d| d.join("tune-relay")))
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

/// Loads the config, installs logging, then reports any ignored overrides.
fn load_and_init_logging(path: &Path) -> Result<AppConfig> {
    let (cfg, ignored) = load_or_default(path)?;
    init_logging(&cfg.log_level);
    for problem in ignored {
        warn!("{problem}");
    }
    Ok(cfg)
}

fn load_or_default(path: &Path) -> Result<(AppConfig, Vec<String>)> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    let ignored = apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok((cfg, ignored))
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

/// Returns a description of each override that was present but unusable.
fn apply_env_overrides(
    cfg: &mut AppConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let mut ignored = Vec::new();
    let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("TUNE_RELAY_LOG_LEVEL") {
        cfg.log_level = v;
    }
    if let Some(v) = non_empty("TUNE_RELAY_API_TOKEN") {
        cfg.relay.api_token = Some(v.clone());
        cfg.client.api_token = Some(v);
    }
    if let Some(v) = non_empty("TUNE_RELAY_URL") {
        cfg.client.relay_url = v;
    }
    if let Some(v) = non_empty("TUNE_RELAY_HELPER_PATH") {
        cfg.helper.path = Some(PathBuf::from(v));
    }
    if let Some(v) = non_empty(HELPER_PORT_ENV) {
        match v.trim().parse::<u16>() {
            Ok(port) => cfg.helper.port = port,
            Err(_) => ignored.push(format!("ignoring invalid {HELPER_PORT_ENV}={v:?}")),
        }
    }
    ignored
}

#[cfg(test)]
mod tests {
    use super::{apply_env_overrides, init_config, load_or_default};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tune_relay_core::AppConfig;

    #[test]
    fn env_overrides_apply_and_ignore_blank_or_invalid_values() {
        let env: HashMap<&str, &str> = [
            ("TUNE_RELAY_LOG_LEVEL", "debug"),
            ("TUNE_RELAY_API_TOKEN", "tok"),
            ("TUNE_RELAY_URL", "  "),
            ("TUNE_RELAY_HELPER_PATH", "/opt/helper"),
            ("TUNE_RELAY_HELPER_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();
        let mut cfg = AppConfig::default();
        let ignored = apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.relay.api_token.as_deref(), Some("tok"));
        assert_eq!(cfg.client.api_token.as_deref(), Some("tok"));
        assert_eq!(cfg.client.relay_url, "http://127.0.0.1:3000");
        assert_eq!(cfg.helper.path, Some(PathBuf::from("/opt/helper")));
        assert_eq!(cfg.helper.port, 3131);
        assert_eq!(ignored.len(), 1);
        assert!(ignored[0].contains("TUNE_RELAY_HELPER_PORT"));
    }

    #[test]
    fn helper_port_override_parses() {
        let mut cfg = AppConfig::default();
        let ignored = apply_env_overrides(&mut cfg, |k| {
            (k == "TUNE_RELAY_HELPER_PORT").then(|| "4242".to_string())
        });
        assert_eq!(cfg.helper.port, 4242);
        assert!(ignored.is_empty());
    }

    #[test]
    fn init_then_load_round_trips_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        init_config(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.relay.bind, "127.0.0.1:3000");
        assert_eq!(parsed.helper.port, 3131);

        let missing = load_or_default(&dir.path().join("absent.toml"));
        assert!(missing.is_ok());
    }
}

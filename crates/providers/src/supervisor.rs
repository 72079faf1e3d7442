use crate::flags::MediaFlagStore;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use tune_relay_core::{now_ms, HelperConfig, PlaybackSource, PlaybackState};

pub const HELPER_PORT_ENV: &str = "TUNE_RELAY_HELPER_PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    Stopped,
    Starting,
    Running,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    OnCrash { delay: Duration },
}

#[derive(Debug, Error)]
pub enum EnableError {
    #[error("helper executable not found (searched {searched:?})")]
    NotFound { searched: Vec<PathBuf> },
    #[error("failed to spawn helper {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Checked in order; the first existing file wins.
    pub candidates: Vec<PathBuf>,
    pub port: u16,
    pub query_timeout: Duration,
    pub stop_grace: Duration,
    pub restart: RestartPolicy,
}

impl SupervisorOptions {
    pub fn from_config(cfg: &HelperConfig) -> Self {
        Self {
            candidates: helper_candidates(cfg),
            port: cfg.port,
            query_timeout: Duration::from_millis(cfg.query_timeout_ms),
            stop_grace: Duration::from_millis(cfg.stop_grace_ms),
            restart: if cfg.restart_on_crash {
                RestartPolicy::OnCrash {
                    delay: Duration::from_millis(cfg.restart_delay_ms),
                }
            } else {
                RestartPolicy::Never
            },
        }
    }
}

/// Configured path first, then `helper/<name>` next to and above the running
/// executable, then under the working directory.
pub fn helper_candidates(cfg: &HelperConfig) -> Vec<PathBuf> {
    let file_name = format!("{}{}", cfg.executable_name, std::env::consts::EXE_SUFFIX);
    let mut candidates = Vec::new();

    if let Some(path) = &cfg.path {
        candidates.push(path.clone());
    }
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join("helper").join(&file_name));
        candidates.push(exe_dir.join("..").join("helper").join(&file_name));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("helper").join(&file_name));
    }
    candidates
}

pub fn locate_executable(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelperResponse {
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: String,
    duration_ms: Option<u64>,
    position_ms: Option<u64>,
    error: Option<String>,
}

/// One-shot `GET /current` against the helper's loopback port.
#[derive(Debug, Clone)]
pub struct HelperClient {
    http: reqwest::Client,
    url: String,
}

impl HelperClient {
    pub fn new(port: u16, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: format!("http://127.0.0.1:{port}/current"),
        }
    }

    /// `Ok(None)` when the helper answered with an error body.
    pub async fn current(&self) -> Result<Option<PlaybackState>> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("helper request failed")?
            .text()
            .await
            .context("helper response unreadable")?;
        let parsed: HelperResponse =
            serde_json::from_str(&body).context("invalid JSON from helper")?;

        if let Some(err) = parsed.error {
            debug!(error = %err, "helper reported no session");
            return Ok(None);
        }

        Ok(Some(PlaybackState {
            source: PlaybackSource::LocalHelper,
            is_playing: parsed.is_playing,
            title: parsed.title,
            artist: parsed.artist,
            album: parsed.album,
            duration_ms: parsed.duration_ms,
            position_ms: parsed.position_ms,
            observed_at_ms: now_ms(),
            ..PlaybackState::default()
        }))
    }
}

/// Owns zero or one helper subprocess and the persisted enabled flag.
pub struct HelperProcessSupervisor {
    opts: SupervisorOptions,
    flags: MediaFlagStore,
    client: HelperClient,
    state: HelperState,
    child: Option<Child>,
    executable: Option<PathBuf>,
    crashed_at: Option<Instant>,
}

impl HelperProcessSupervisor {
    pub fn new(opts: SupervisorOptions, flags: MediaFlagStore) -> Self {
        let client = HelperClient::new(opts.port, opts.query_timeout);
        Self {
            opts,
            flags,
            client,
            state: HelperState::Stopped,
            child: None,
            executable: None,
            crashed_at: None,
        }
    }

    pub fn state(&self) -> HelperState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == HelperState::Running
    }

    pub fn client(&self) -> HelperClient {
        self.client.clone()
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.opts.candidates
    }

    /// Starts the helper unless it already runs. On failure the persisted
    /// flag is rolled back to disabled.
    pub async fn enable(&mut self) -> Result<(), EnableError> {
        self.refresh().await;
        if self.is_running() {
            return Ok(());
        }

        let previous = self.state;
        self.state = HelperState::Starting;
        let spawned = match locate_executable(&self.opts.candidates) {
            Some(path) => self.spawn(&path).map(|child| (path, child)),
            None => Err(EnableError::NotFound {
                searched: self.opts.candidates.clone(),
            }),
        };

        match spawned {
            Ok((path, child)) => {
                info!(path = %path.display(), pid = ?child.id(), "helper started");
                self.child = Some(child);
                self.executable = Some(path);
                self.crashed_at = None;
                self.state = HelperState::Running;
                self.persist(true);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "helper could not be started");
                self.state = if previous == HelperState::Failed {
                    HelperState::Failed
                } else {
                    HelperState::Stopped
                };
                self.persist(false);
                Err(err)
            }
        }
    }

    /// Terminates the helper, if any, and persists the disabled flag.
    pub async fn disable(&mut self) {
        self.stop_process().await;
        self.persist(false);
    }

    /// Terminates the helper for owner shutdown. The persisted flag is left
    /// alone so `restore` brings the helper back on the next start.
    pub async fn shutdown(&mut self) {
        self.stop_process().await;
    }

    async fn stop_process(&mut self) {
        if let Some(child) = self.child.take() {
            match terminate(child, self.opts.stop_grace).await {
                Ok(status) => info!(?status, "helper stopped"),
                Err(err) => warn!(error = %err, "helper did not stop cleanly"),
            }
        }
        self.state = HelperState::Stopped;
        self.crashed_at = None;
    }

    /// Re-applies the persisted flag at startup.
    pub async fn restore(&mut self) -> bool {
        if !self.flags.load().enabled {
            return false;
        }
        match self.enable().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "helper was enabled before restart but cannot start now; disabling");
                false
            }
        }
    }

    /// Reaps an exited helper and applies the restart policy.
    pub async fn refresh(&mut self) {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(?status, "helper exited unexpectedly");
                    self.child = None;
                    self.state = HelperState::Failed;
                    self.crashed_at = Some(Instant::now());
                }
                Ok(None) => {}
                Err(err) => debug!(error = %err, "helper status unavailable"),
            }
        }

        if self.state != HelperState::Failed {
            return;
        }
        let RestartPolicy::OnCrash { delay } = self.opts.restart else {
            return;
        };
        let due = self.crashed_at.map_or(true, |at| at.elapsed() >= delay);
        let Some(path) = self.executable.clone().filter(|_| due) else {
            return;
        };

        match self.spawn(&path) {
            Ok(child) => {
                info!(path = %path.display(), "helper restarted after crash");
                self.child = Some(child);
                self.crashed_at = None;
                self.state = HelperState::Running;
            }
            Err(err) => {
                warn!(error = %err, "helper restart failed");
                self.crashed_at = Some(Instant::now());
            }
        }
    }

    /// Single round trip with the configured timeout. Any failure is `None`.
    pub async fn query(&mut self) -> Option<PlaybackState> {
        self.refresh().await;
        if !self.is_running() {
            return None;
        }
        match self.client.current().await {
            Ok(state) => state,
            Err(err) => {
                debug!(error = %err, "helper query failed");
                None
            }
        }
    }

    fn spawn(&self, path: &Path) -> Result<Child, EnableError> {
        let mut cmd = Command::new(path);
        cmd.env(HELPER_PORT_ENV, self.opts.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|source| EnableError::Spawn {
            path: path.to_path_buf(),
            source,
        })
    }

    fn persist(&self, enabled: bool) {
        if let Err(err) = self.flags.update(|f| f.enabled = enabled) {
            warn!(error = %err, enabled, "failed to persist helper flag; keeping in-memory state");
        }
    }
}

async fn terminate(mut child: Child, grace: Duration) -> Result<ExitStatus> {
    request_stop(&mut child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.context("failed waiting for helper"),
        Err(_) => {
            debug!("helper ignored the stop request; killing");
            child.kill().await.context("failed to kill helper")?;
            child
                .try_wait()
                .context("failed to reap helper")?
                .ok_or_else(|| anyhow!("helper still running after kill"))
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(error = %err, "SIGTERM to helper failed");
        }
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "kill request to helper failed");
    }
}

#[cfg(test)]
mod tests {
    use super::{
        helper_candidates, locate_executable, EnableError, HelperProcessSupervisor, HelperState,
        RestartPolicy, SupervisorOptions,
    };
    use crate::flags::MediaFlagStore;
    use std::path::PathBuf;
    use std::time::Duration;
    use tune_relay_core::HelperConfig;

    fn options(candidates: Vec<PathBuf>, restart: RestartPolicy) -> SupervisorOptions {
        SupervisorOptions {
            candidates,
            port: 1,
            query_timeout: Duration::from_millis(200),
            stop_grace: Duration::from_millis(500),
            restart,
        }
    }

    #[cfg(unix)]
    fn script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn configured_path_is_first_candidate() {
        let cfg = HelperConfig {
            path: Some(PathBuf::from("/opt/helper/bin")),
            ..HelperConfig::default()
        };
        let candidates = helper_candidates(&cfg);
        assert_eq!(candidates[0], PathBuf::from("/opt/helper/bin"));
        assert!(candidates.len() >= 2);
    }

    #[test]
    fn locate_picks_first_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("b");
        let third = dir.path().join("c");
        std::fs::write(&second, "").unwrap();
        std::fs::write(&third, "").unwrap();

        let found = locate_executable(&[dir.path().join("a"), second.clone(), third]);
        assert_eq!(found, Some(second));
        assert_eq!(locate_executable(&[dir.path().to_path_buf()]), None);
    }

    #[tokio::test]
    async fn enable_without_candidates_fails_and_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let flags = MediaFlagStore::new(dir.path().join("media_enable.json"));
        flags.update(|f| f.enabled = true).unwrap();

        let mut sup = HelperProcessSupervisor::new(
            options(vec![dir.path().join("missing")], RestartPolicy::Never),
            flags.clone(),
        );
        let err = sup.enable().await.unwrap_err();

        assert!(matches!(err, EnableError::NotFound { .. }));
        assert_eq!(sup.state(), HelperState::Stopped);
        assert!(!flags.load().enabled);
        assert!(sup.query().await.is_none());
    }

    #[tokio::test]
    async fn restore_rolls_back_flag_when_helper_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let flags = MediaFlagStore::new(dir.path().join("media_enable.json"));
        flags.update(|f| f.enabled = true).unwrap();

        let mut sup =
            HelperProcessSupervisor::new(options(Vec::new(), RestartPolicy::Never), flags.clone());

        assert!(!sup.restore().await);
        assert!(!flags.load().enabled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn enable_and_disable_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script(dir.path(), "helper", "exec sleep 30");
        let flags = MediaFlagStore::new(dir.path().join("media_enable.json"));
        let mut sup =
            HelperProcessSupervisor::new(options(vec![helper], RestartPolicy::Never), flags.clone());

        sup.enable().await.unwrap();
        assert_eq!(sup.state(), HelperState::Running);
        assert!(flags.load().enabled);

        sup.enable().await.unwrap();
        assert_eq!(sup.state(), HelperState::Running);

        sup.disable().await;
        assert_eq!(sup.state(), HelperState::Stopped);
        assert!(!flags.load().enabled);

        sup.disable().await;
        assert_eq!(sup.state(), HelperState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashed_helper_is_marked_failed_without_restart_policy() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script(dir.path(), "helper", "exit 3");
        let mut sup = HelperProcessSupervisor::new(
            options(vec![helper], RestartPolicy::Never),
            MediaFlagStore::in_memory(),
        );

        sup.enable().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        sup.refresh().await;

        assert_eq!(sup.state(), HelperState::Failed);
        sup.disable().await;
        assert_eq!(sup.state(), HelperState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashed_helper_restarts_on_crash_policy() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("starts");
        let helper = script(
            dir.path(),
            "helper",
            &format!("echo x >> {}\nexit 1", marker.display()),
        );
        let mut sup = HelperProcessSupervisor::new(
            options(
                vec![helper],
                RestartPolicy::OnCrash {
                    delay: Duration::ZERO,
                },
            ),
            MediaFlagStore::in_memory(),
        );

        sup.enable().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        sup.refresh().await;
        assert_eq!(sup.state(), HelperState::Running);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let starts = std::fs::read_to_string(&marker).unwrap_or_default();
        assert_eq!(starts.lines().count(), 2);
        sup.disable().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_keeps_flag_for_next_start() {
        let dir = tempfile::tempdir().unwrap();
        let helper = script(dir.path(), "helper", "exec sleep 30");
        let flags = MediaFlagStore::new(dir.path().join("media_enable.json"));

        let mut first = HelperProcessSupervisor::new(
            options(vec![helper.clone()], RestartPolicy::Never),
            flags.clone(),
        );
        first.enable().await.unwrap();
        first.shutdown().await;
        assert_eq!(first.state(), HelperState::Stopped);
        assert!(flags.load().enabled);

        let mut second =
            HelperProcessSupervisor::new(options(vec![helper], RestartPolicy::Never), flags.clone());
        assert!(second.restore().await);
        assert_eq!(second.state(), HelperState::Running);
        second.disable().await;
        assert!(!flags.load().enabled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_helper_query_times_out_to_none() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accepts connections and never answers.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let helper = script(dir.path(), "helper", "exec sleep 30");
        let mut sup = HelperProcessSupervisor::new(
            SupervisorOptions {
                port,
                ..options(vec![helper], RestartPolicy::Never)
            },
            MediaFlagStore::in_memory(),
        );
        sup.enable().await.unwrap();

        let started = std::time::Instant::now();
        assert!(sup.query().await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sup.state(), HelperState::Running);

        sup.disable().await;
        server.abort();
    }

    #[cfg(not(unix))]
    #[tokio::test]
    async fn terminate_kills_without_waiting_out_the_grace() {
        let child = tokio::process::Command::new("ping")
            .args(["-n", "30", "127.0.0.1"])
            .stdout(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let started = std::time::Instant::now();
        super::terminate(child, Duration::from_secs(10)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

use crate::relay::PlaybackFeed;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tune_relay_core::{ClientConfig, PlaybackState};
use tune_relay_engine::{ChangeDetector, DiffKind};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl PollOptions {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            request_timeout: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.poll_interval_ms),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        }
    }
}

pub struct PollLoop;

impl PollLoop {
    pub fn start(feed: Arc<dyn PlaybackFeed>, interval: Duration) -> PollHandle {
        Self::start_with(feed, PollOptions::new(interval))
    }

    /// Spawns the loop on the current runtime. Ticks never overlap: the next
    /// one is scheduled `interval - elapsed` after the previous one started.
    pub fn start_with(feed: Arc<dyn PlaybackFeed>, opts: PollOptions) -> PollHandle {
        let alive = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());
        // Held for the first subscriber so the initial emit is never lost.
        let (events, first) = broadcast::channel(EVENT_CAPACITY);
        let (latest_tx, latest_rx) = watch::channel(None);

        info!(interval_ms = opts.interval.as_millis() as u64, "poll loop started");
        let task = tokio::spawn(run(
            feed,
            opts,
            alive.clone(),
            wake.clone(),
            events.clone(),
            latest_tx,
        ));

        PollHandle {
            alive,
            wake,
            events,
            first: Mutex::new(Some(first)),
            latest: latest_rx,
            task: Some(task),
        }
    }
}

async fn run(
    feed: Arc<dyn PlaybackFeed>,
    opts: PollOptions,
    alive: Arc<AtomicBool>,
    wake: Arc<Notify>,
    events: broadcast::Sender<PlaybackState>,
    latest: watch::Sender<Option<PlaybackState>>,
) {
    let mut detector = ChangeDetector::new();

    while alive.load(Ordering::SeqCst) {
        let started = Instant::now();
        let outcome = tokio::time::timeout(opts.request_timeout, feed.fetch_current()).await;

        if !alive.load(Ordering::SeqCst) {
            break;
        }
        match outcome {
            Ok(Ok(state)) => {
                let kind = detector.observe(&state);
                latest.send_replace(Some(state.clone()));
                if kind != DiffKind::Nothing {
                    debug!(?kind, key = ?detector.last_key().map(|k| k.as_str()), "playback changed");
                    // No subscribers is not an error.
                    let _ = events.send(state);
                }
            }
            Ok(Err(err)) => warn!(error = %err, "poll failed; no update this tick"),
            Err(_) => warn!(
                timeout_ms = opts.request_timeout.as_millis() as u64,
                "poll timed out; no update this tick"
            ),
        }

        let wait = opts.interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = wake.notified() => {}
        }
    }
    debug!("poll loop exited");
}

/// Owner of a running [`PollLoop`]. Dropping it stops the loop.
pub struct PollHandle {
    alive: Arc<AtomicBool>,
    wake: Arc<Notify>,
    events: broadcast::Sender<PlaybackState>,
    first: Mutex<Option<broadcast::Receiver<PlaybackState>>>,
    latest: watch::Receiver<Option<PlaybackState>>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Change events. The first subscriber also sees everything emitted
    /// since the loop started; later ones see events after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackState> {
        self.first
            .lock()
            .ok()
            .and_then(|mut first| first.take())
            .unwrap_or_else(|| self.events.subscribe())
    }

    /// The last full state observed, whether or not it was a change.
    pub fn latest(&self) -> Option<PlaybackState> {
        self.latest.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// An in-flight request is allowed to finish; its result is discarded.
    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        if self.task.take().is_some() {
            info!("poll loop stopped");
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

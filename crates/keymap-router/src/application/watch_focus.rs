//! FocusWatcher: samples the foreground process and announces changes.
//!
//! A background task asks a [`ForegroundProcessSource`] which process owns
//! input focus, once per polling interval. Whenever the normalized name
//! differs (case-insensitively) from the last one seen, it is broadcast to
//! every subscriber. Samples that resolve to nothing (no window, access
//! denied, process gone) are ignored rather than treated as a change.
//!
//! # Architecture
//!
//! The OS query is injected as a trait object so the watcher can be driven
//! by a scripted source in tests. The query runs on the blocking pool since
//! platform implementations may perform synchronous IPC.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use keymap_router_core::domain::rules::{
    normalize_process_name, MAX_POLL_INTERVAL_MS, MIN_POLL_INTERVAL_MS,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long `stop` waits for the sampling task to finish.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Focus-change notifications buffered per subscriber.
const FOCUS_CHANNEL_CAPACITY: usize = 16;

/// Trait for querying which process currently owns input focus.
///
/// Infrastructure implementations call the OS; test implementations replay
/// a script.
pub trait ForegroundProcessSource: Send + Sync {
    /// Returns the executable name (or path) of the focused process, or
    /// `None` if it cannot be determined right now.
    fn current_foreground_process(&self) -> Option<String>;
}

struct WatcherShared {
    source: Arc<dyn ForegroundProcessSource>,
    interval_ms: AtomicU64,
    last_seen: Mutex<Option<String>>,
    events: broadcast::Sender<String>,
}

impl WatcherShared {
    /// Records a raw sample and returns the normalized name if it is a change.
    fn observe(&self, raw: &str) -> Option<String> {
        let name = normalize_process_name(raw);
        if name.is_empty() {
            return None;
        }

        let mut last = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        let unchanged = last
            .as_deref()
            .is_some_and(|previous| previous.eq_ignore_ascii_case(&name));
        if unchanged {
            return None;
        }
        *last = Some(name.clone());
        Some(name)
    }

    async fn sample(&self) -> Option<String> {
        let source = Arc::clone(&self.source);
        match tokio::task::spawn_blocking(move || source.current_foreground_process()).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("foreground process query panicked: {e}");
                None
            }
        }
    }
}

struct SamplingTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic, edge-triggered foreground process observer.
pub struct FocusWatcher {
    shared: Arc<WatcherShared>,
    task: Mutex<Option<SamplingTask>>,
}

impl FocusWatcher {
    /// Creates a stopped watcher. `poll_interval_ms` is clamped to the
    /// supported range.
    pub fn new(source: Arc<dyn ForegroundProcessSource>, poll_interval_ms: u64) -> Self {
        let (events, _) = broadcast::channel(FOCUS_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(WatcherShared {
                source,
                interval_ms: AtomicU64::new(clamp_interval(poll_interval_ms)),
                last_seen: Mutex::new(None),
                events,
            }),
            task: Mutex::new(None),
        }
    }

    /// Returns a receiver for normalized process names on every focus change.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.shared.events.subscribe()
    }

    /// Starts the sampling loop. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            run_sampling_loop(shared, loop_token).await;
        });

        debug!(
            interval_ms = self.interval_ms(),
            "foreground process watcher started"
        );
        *task = Some(SamplingTask { token, handle });
    }

    /// Stops the sampling loop and waits (bounded) for it to finish.
    ///
    /// Clears the last seen process so the next `start` re-announces the
    /// current focus. Does nothing if the watcher is not running.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(SamplingTask { token, handle }) = task {
            token.cancel();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!("foreground process watcher did not stop within {STOP_TIMEOUT:?}");
            }
            debug!("foreground process watcher stopped");
        }

        // Cleared only after the loop has exited, so an in-flight sample
        // cannot record itself again.
        *self
            .shared
            .last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Changes the sampling period from the next tick on. Clamped to the
    /// supported range.
    pub fn update_interval(&self, poll_interval_ms: u64) {
        self.shared
            .interval_ms
            .store(clamp_interval(poll_interval_ms), Ordering::Relaxed);
    }

    /// Returns the current sampling period in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        self.shared.interval_ms.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for FocusWatcher {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.token.cancel();
        }
    }
}

async fn run_sampling_loop(shared: Arc<WatcherShared>, token: CancellationToken) {
    while !token.is_cancelled() {
        let sample = shared.sample().await;
        // The sample is not cancellable; drop results that land after `stop`.
        if token.is_cancelled() {
            break;
        }
        if let Some(raw) = sample {
            if let Some(name) = shared.observe(&raw) {
                debug!(process = %name, "foreground process changed");
                // Err only means nobody is subscribed.
                let _ = shared.events.send(name);
            }
        }

        let delay = Duration::from_millis(shared.interval_ms.load(Ordering::Relaxed));
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn clamp_interval(poll_interval_ms: u64) -> u64 {
    poll_interval_ms.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

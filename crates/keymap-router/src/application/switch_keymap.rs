//! KeymapSwitcher: keeps the keyboard's keymap in step with the focused application.
//!
//! This use case is the heart of the application. It listens to the
//! [`FocusWatcher`], asks the [`RoutingTable`] whether the device needs a new
//! target, applies the companion-app pause policy, and drives the
//! [`KeymapTransport`]. A background retry loop re-attempts the switch for the
//! current focus on a fixed interval, which recovers from an unplugged device
//! and from switches skipped while paused.
//!
//! # Architecture
//!
//! This use case depends only on traits (`KeymapTransport`,
//! `ForegroundProcessSource`, `ProcessSnapshot`) and core types. All
//! infrastructure implementations are injected at construction time, making
//! the use case fully unit-testable.
//!
//! Every switch attempt, whether triggered by a focus change, by `start`,
//! by `apply_config`, or by a retry tick, runs its decide/act/commit sequence
//! under a single async gate. Attempts are therefore totally ordered, and the
//! routing table only records a target after the device accepted it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use keymap_router_core::domain::rules::{normalize, AppConfig, RawConfig, ValidationError};
use keymap_router_core::protocol::{toggle_layer_command, ProtocolError};
use keymap_router_core::{RoutingTable, RoutingTarget};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::status::{StatusBus, SwitchStatus};
use super::watch_focus::{FocusWatcher, ForegroundProcessSource};

/// Process-name fragments identifying the keyboard vendor's companion agent,
/// compared after stripping non-alphanumerics and upper-casing.
const COMPANION_MARKERS: [&str; 2] = ["UHKAGENT", "ULTIMATEHACKINGKEYBOARDAGENT"];

/// Error raised by a [`KeymapTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Discovery found no compatible device interface.
    #[error("no compatible keyboard interface found")]
    DeviceNotFound,

    /// A recent failure put the transport in its reconnect back-off.
    #[error("keyboard is temporarily unavailable (retry in {remaining:?})")]
    CoolingDown { remaining: Duration },

    /// Opening or writing to the device failed.
    #[error("keyboard I/O failed: {0}")]
    Device(String),

    /// The caller passed a keymap or command that cannot be framed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Returns `true` for failures the retry loop can recover from.
    ///
    /// Protocol misuse is a caller bug and retrying cannot fix it.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, TransportError::Protocol(_))
    }
}

/// Trait for delivering commands to the keyboard.
///
/// Infrastructure implementations write HID reports; test implementations
/// record calls.
#[async_trait]
pub trait KeymapTransport: Send + Sync {
    /// Activates the keymap identified by `keymap` (an upper-case code).
    async fn switch_keymap(&self, keymap: &str) -> Result<(), TransportError>;

    /// Runs a firmware macro command such as `toggleLayer fn`.
    async fn execute_macro_command(&self, command: &str) -> Result<(), TransportError>;
}

/// Trait for listing the names of running processes.
///
/// Only used to detect the companion application; failures should yield an
/// empty list.
pub trait ProcessSnapshot: Send + Sync {
    fn running_process_names(&self) -> Vec<String>;
}

/// Returns `true` if `process_name` looks like the vendor's companion agent.
pub fn is_companion_process(process_name: &str) -> bool {
    let folded: String = process_name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_uppercase();
    COMPANION_MARKERS.iter().any(|marker| folded.contains(marker))
}

/// Error returned by [`KeymapSwitcher::apply_config`].
#[derive(Debug, Error)]
pub enum ApplyConfigError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Runtime tunables that are not part of the user configuration.
#[derive(Debug, Clone)]
pub struct SwitcherOptions {
    /// Period of the background retry loop.
    pub retry_interval: Duration,
    /// Upper bound on how long `stop` waits for each background task.
    pub stop_timeout: Duration,
}

impl Default for SwitcherOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

struct SwitcherShared {
    routing: RoutingTable,
    watcher: FocusWatcher,
    transport: Arc<dyn KeymapTransport>,
    focus: Arc<dyn ForegroundProcessSource>,
    processes: Arc<dyn ProcessSnapshot>,
    pause_while_companion_running: AtomicBool,
    running: AtomicBool,
    switch_gate: tokio::sync::Mutex<()>,
    status: StatusBus,
    options: SwitcherOptions,
}

struct BackgroundTasks {
    token: CancellationToken,
    dispatch: JoinHandle<()>,
    retry: JoinHandle<()>,
}

/// The keymap switching service.
///
/// States are `Stopped` (initial) and `Running`. Configuration can be
/// applied in either state.
pub struct KeymapSwitcher {
    shared: Arc<SwitcherShared>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl KeymapSwitcher {
    /// Creates a stopped switcher for an already normalized configuration.
    pub fn new(
        config: &AppConfig,
        transport: Arc<dyn KeymapTransport>,
        focus: Arc<dyn ForegroundProcessSource>,
        processes: Arc<dyn ProcessSnapshot>,
        options: SwitcherOptions,
    ) -> Self {
        let watcher = FocusWatcher::new(Arc::clone(&focus), config.poll_interval_ms);
        Self {
            shared: Arc::new(SwitcherShared {
                routing: RoutingTable::new(config),
                watcher,
                transport,
                focus,
                processes,
                pause_while_companion_running: AtomicBool::new(
                    config.pause_while_companion_running,
                ),
                running: AtomicBool::new(false),
                switch_gate: tokio::sync::Mutex::new(()),
                status: StatusBus::new(),
                options,
            }),
            tasks: Mutex::new(None),
        }
    }

    /// Starts switching: resets routing state, starts the focus watcher and
    /// the retry loop, then immediately switches for the current focus.
    ///
    /// Does nothing if already running. Must be called from within a Tokio
    /// runtime.
    pub async fn start(&self) {
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if tasks.is_some() {
                return;
            }

            self.shared.routing.reset();
            self.shared.running.store(true, Ordering::SeqCst);

            let focus_changes = self.shared.watcher.subscribe();
            self.shared.watcher.start();

            let token = CancellationToken::new();
            let dispatch = tokio::spawn(dispatch_focus_changes(
                Arc::clone(&self.shared),
                focus_changes,
                token.clone(),
            ));
            let retry = tokio::spawn(retry_loop(Arc::clone(&self.shared), token.clone()));
            *tasks = Some(BackgroundTasks {
                token,
                dispatch,
                retry,
            });
        }

        info!("keymap switching started");
        self.shared.status.publish(SwitchStatus::Started);
        self.shared.switch_for_current_process().await;
    }

    /// Stops switching: stops the focus watcher, then cancels and joins the
    /// background loops (bounded wait). Routing state is left as-is.
    ///
    /// Does nothing if not running.
    pub async fn stop(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(BackgroundTasks {
            token,
            dispatch,
            retry,
        }) = tasks
        else {
            return;
        };

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.watcher.stop().await;
        token.cancel();

        let timeout = self.shared.options.stop_timeout;
        for (name, handle) in [("focus dispatch", dispatch), ("retry", retry)] {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("{name} task did not stop within {timeout:?}");
            }
        }

        info!("keymap switching stopped");
        self.shared.status.publish(SwitchStatus::Stopped);
    }

    /// Replaces the configuration in either state.
    ///
    /// The configuration is re-validated; on success the routing table,
    /// polling interval, and pause policy are updated, routing state is
    /// reset, and, when running, the current focus is switched again.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyConfigError::Invalid`] and changes nothing if the
    /// configuration does not validate.
    pub async fn apply_config(&self, config: &AppConfig) -> Result<(), ApplyConfigError> {
        let config = normalize(&RawConfig::from(config)).map_err(ApplyConfigError::Invalid)?;

        self.shared.routing.update_config(&config);
        self.shared.watcher.update_interval(config.poll_interval_ms);
        self.shared
            .pause_while_companion_running
            .store(config.pause_while_companion_running, Ordering::SeqCst);
        self.shared.routing.reset();

        info!(
            rules = config.rules.len(),
            default_keymap = %config.default_keymap,
            "configuration applied"
        );
        self.shared.status.publish(SwitchStatus::ConfigApplied);

        if self.is_running() {
            self.shared.switch_for_current_process().await;
        }
        Ok(())
    }

    /// Runs one switch attempt for `process_name`, exactly as a focus-change
    /// event would.
    pub async fn switch_for_process(&self, process_name: &str) {
        self.shared.try_switch(process_name).await;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Returns a receiver for status events published from now on.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SwitchStatus> {
        self.shared.status.subscribe()
    }

    /// Returns the most recent status event, if any.
    pub fn last_status(&self) -> Option<SwitchStatus> {
        self.shared.status.last_status()
    }

    /// Returns the target the device last confirmed, if known.
    pub fn last_applied(&self) -> Option<RoutingTarget> {
        self.shared.routing.last_applied()
    }
}

impl Drop for KeymapSwitcher {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(tasks) = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            tasks.token.cancel();
        }
    }
}

impl SwitcherShared {
    async fn switch_for_current_process(&self) {
        let focus = Arc::clone(&self.focus);
        let current = tokio::task::spawn_blocking(move || focus.current_foreground_process())
            .await
            .ok()
            .flatten();

        match current {
            Some(process) if !process.trim().is_empty() => self.try_switch(&process).await,
            _ => debug!("no foreground process to switch for"),
        }
    }

    async fn try_switch(&self, process: &str) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let _gate = self.switch_gate.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let (needed, target) = self.routing.should_switch(process);
        if !needed {
            return;
        }

        if self.pause_while_companion_running.load(Ordering::SeqCst) && self.companion_running().await
        {
            info!(process, target = %target, "switch skipped: companion agent is running");
            self.status.publish(SwitchStatus::Paused {
                process: process.to_string(),
                target,
            });
            return;
        }

        match self.apply_target(&target).await {
            Ok(()) => {
                self.routing.mark_applied(&target);
                info!(
                    process,
                    keymap = target.keymap(),
                    layer = %target.layer(),
                    "keymap switched"
                );
                self.status.publish(SwitchStatus::Switched {
                    process: process.to_string(),
                    target,
                });
            }
            Err(e) => {
                warn!(
                    process,
                    target = %target,
                    retriable = e.is_retriable(),
                    "keymap switch failed: {e}"
                );
                self.status.publish(SwitchStatus::Failed {
                    process: process.to_string(),
                    target,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn apply_target(&self, target: &RoutingTarget) -> Result<(), TransportError> {
        self.transport.switch_keymap(target.keymap()).await?;
        if !target.layer().is_base() {
            self.transport
                .execute_macro_command(&toggle_layer_command(target.layer()))
                .await?;
        }
        Ok(())
    }

    // Not cached: the agent can start or exit at any time.
    async fn companion_running(&self) -> bool {
        let processes = Arc::clone(&self.processes);
        tokio::task::spawn_blocking(move || {
            processes
                .running_process_names()
                .iter()
                .any(|name| is_companion_process(name))
        })
        .await
        .unwrap_or(false)
    }
}

async fn dispatch_focus_changes(
    shared: Arc<SwitcherShared>,
    mut focus_changes: broadcast::Receiver<String>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = focus_changes.recv() => event,
        };

        match event {
            Ok(process) => shared.try_switch(&process).await,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "focus dispatcher lagged; older changes dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn retry_loop(shared: Arc<SwitcherShared>, token: CancellationToken) {
    let interval = shared.options.retry_interval;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        shared.switch_for_current_process().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Status publish/subscribe bus for the switching service.
//!
//! Consumers (the CLI log pump, a tray icon, a settings window) subscribe to
//! a bounded, ordered [`tokio::sync::broadcast`] channel. Dropping the
//! receiver unsubscribes; publishing with no subscribers is not an error.
//! The most recent status is remembered so a late subscriber can show it
//! immediately.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use keymap_router_core::RoutingTarget;
use tokio::sync::broadcast;

/// Buffered statuses per subscriber before the oldest are dropped.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Something the switching service wants its observers to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchStatus {
    Started,
    Stopped,
    ConfigApplied,
    Switched {
        process: String,
        target: RoutingTarget,
    },
    /// The companion application is running, so the switch was skipped.
    Paused {
        process: String,
        target: RoutingTarget,
    },
    Failed {
        process: String,
        target: RoutingTarget,
        reason: String,
    },
}

impl fmt::Display for SwitchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchStatus::Started => f.write_str("Automatic switching started."),
            SwitchStatus::Stopped => f.write_str("Automatic switching stopped."),
            SwitchStatus::ConfigApplied => f.write_str("Configuration applied."),
            SwitchStatus::Switched { process, target } => write!(
                f,
                "Switched to keymap '{}', layer '{}' for process '{process}'.",
                target.keymap(),
                target.layer()
            ),
            SwitchStatus::Paused { process, target } => write!(
                f,
                "Skipped switch to keymap '{}' for process '{process}' because the companion agent is running.",
                target.keymap()
            ),
            SwitchStatus::Failed {
                process,
                target,
                reason,
            } => write!(
                f,
                "Failed to switch to keymap '{}', layer '{}' for process '{process}': {reason}",
                target.keymap(),
                target.layer()
            ),
        }
    }
}

/// Fan-out channel for [`SwitchStatus`] events.
#[derive(Debug)]
pub struct StatusBus {
    sender: broadcast::Sender<SwitchStatus>,
    last: Mutex<Option<SwitchStatus>>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            sender,
            last: Mutex::new(None),
        }
    }

    /// Records `status` as the latest and delivers it to every subscriber.
    pub fn publish(&self, status: SwitchStatus) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(status.clone());
        // Err only means nobody is listening right now.
        let _ = self.sender.send(status);
    }

    /// Returns a receiver for statuses published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SwitchStatus> {
        self.sender.subscribe()
    }

    /// Returns the most recently published status, if any.
    pub fn last_status(&self) -> Option<SwitchStatus> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

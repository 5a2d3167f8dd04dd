//! Mock OS queries for unit testing and `--dry-run` on headless machines.

use std::sync::{Mutex, PoisonError};

use super::{ForegroundProcessSource, ProcessSnapshot};

/// A [`ForegroundProcessSource`] whose answer is set by the test.
#[derive(Debug, Default)]
pub struct MockForegroundSource {
    current: Mutex<Option<String>>,
}

impl MockForegroundSource {
    /// Creates a source that reports `process` as focused.
    pub fn new(process: Option<&str>) -> Self {
        Self {
            current: Mutex::new(process.map(str::to_string)),
        }
    }

    /// Changes the focused process (simulates the user switching windows).
    pub fn set_foreground(&self, process: Option<&str>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = process.map(str::to_string);
    }
}

impl ForegroundProcessSource for MockForegroundSource {
    fn current_foreground_process(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A [`ProcessSnapshot`] returning a fixed list of process names.
#[derive(Debug, Default)]
pub struct MockProcessSnapshot {
    names: Mutex<Vec<String>>,
}

impl MockProcessSnapshot {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
        }
    }

    /// Replaces the running process list.
    pub fn set_running(&self, names: &[&str]) {
        *self.names.lock().unwrap_or_else(PoisonError::into_inner) =
            names.iter().map(|n| n.to_string()).collect();
    }
}

impl ProcessSnapshot for MockProcessSnapshot {
    fn running_process_names(&self) -> Vec<String> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

//! Fallback for platforms without a foreground-window API binding.
//!
//! Reports no focused process and no running processes. Automatic switching
//! never fires on these platforms; one-shot `switch` still works.

use super::{ForegroundProcessSource, ProcessSnapshot};

#[derive(Debug, Default)]
pub struct UnsupportedForegroundSource;

impl UnsupportedForegroundSource {
    pub fn new() -> Self {
        Self
    }
}

impl ForegroundProcessSource for UnsupportedForegroundSource {
    fn current_foreground_process(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Default)]
pub struct UnsupportedProcessSnapshot;

impl UnsupportedProcessSnapshot {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSnapshot for UnsupportedProcessSnapshot {
    fn running_process_names(&self) -> Vec<String> {
        Vec::new()
    }
}

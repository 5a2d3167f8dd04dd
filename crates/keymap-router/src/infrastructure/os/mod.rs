//! Platform-specific foreground-process and running-process queries.
//!
//! Implements the two OS ports of the application layer:
//! [`ForegroundProcessSource`] (which process owns input focus) and
//! [`ProcessSnapshot`] (which processes are running, used to detect the
//! companion agent).
//!
//! # Platform implementations
//!
//! The correct implementation is selected at compile time via
//! `#[cfg(target_os = ...)]` and re-exported as `NativeForegroundSource` /
//! `NativeProcessSnapshot`:
//!
//! | Module        | OS      | API used                                                   |
//! |---------------|---------|------------------------------------------------------------|
//! | `windows`     | Windows | `GetForegroundWindow` + `QueryFullProcessImageNameW`, Toolhelp32 |
//! | `linux`       | Linux   | X11 `_NET_ACTIVE_WINDOW` + `_NET_WM_PID`, `/proc`          |
//! | `unsupported` | other   | none; always reports nothing                               |
//!
//! The [`mock`] module is always compiled so tests on any platform can use
//! it without a desktop session.
//!
//! Every query swallows OS failures (process exited mid-query, access
//! denied, no display) and reports them as "nothing found".

pub mod mock;

pub use crate::application::switch_keymap::ProcessSnapshot;
pub use crate::application::watch_focus::ForegroundProcessSource;
pub use mock::{MockForegroundSource, MockProcessSnapshot};

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "windows")]
pub use windows::{
    WindowsForegroundSource as NativeForegroundSource,
    WindowsProcessSnapshot as NativeProcessSnapshot,
};

// ── Linux implementation ──────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::{
    ProcfsProcessSnapshot as NativeProcessSnapshot, X11ForegroundSource as NativeForegroundSource,
};

// ── Fallback for other platforms ──────────────────────────────────────────────

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
pub mod unsupported;

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
pub use unsupported::{
    UnsupportedForegroundSource as NativeForegroundSource,
    UnsupportedProcessSnapshot as NativeProcessSnapshot,
};

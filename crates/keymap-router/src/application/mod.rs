//! Application layer use cases for keymap-router.
//!
//! Use cases in this layer orchestrate core types to fulfil a user goal,
//! depend on abstractions (traits) rather than concrete implementations, and
//! contain no OS calls, HID I/O, or file system access.
//!
//! # Sub-modules
//!
//! - **`switch_keymap`** – Decides whether the keyboard needs a new keymap
//!   for the focused process and drives the transport. This is the most
//!   critical use case; every focus change and retry tick passes through it.
//!
//! - **`watch_focus`** – Samples the foreground process on a timer and
//!   broadcasts changes.
//!
//! - **`status`** – The publish/subscribe bus that reports what the switcher
//!   did.

pub mod status;
pub mod switch_keymap;
pub mod watch_focus;

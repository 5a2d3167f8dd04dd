//! Infrastructure layer.
//!
//! Contains OS-facing adapters: HID device access, foreground-window and
//! process queries, and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `keymap_router_core`, but MUST NOT be imported by the `application` or
//! domain layers.

pub mod hid;
pub mod os;
pub mod storage;

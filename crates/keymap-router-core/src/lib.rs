//! # keymap-router-core
//!
//! Shared library for keymap-router containing the configuration rule
//! normalizer, the routing table, and the HID report framing used to talk to
//! the keyboard.
//!
//! This crate has zero dependencies on OS APIs, HID libraries, or async
//! runtimes. Everything here is deterministic and can be unit-tested on any
//! platform without a device attached.
//!
//! # Architecture overview
//!
//! keymap-router watches which application owns input focus and asks the
//! keyboard to switch to the keymap (and optionally layer) configured for
//! that application. This crate holds the pieces with no I/O:
//!
//! - **`domain::rules`** – Turns a raw, user-edited configuration into a
//!   normalized [`AppConfig`], or a complete list of [`ValidationError`]s.
//!
//! - **`domain::routing`** – The [`RoutingTable`]: given a process name,
//!   decides which [`RoutingTarget`] should be active and whether that
//!   differs from what the device was last told.
//!
//! - **`protocol`** – Bit-exact construction of the output reports sent to
//!   the device (switch keymap, execute macro command).

pub mod domain;
pub mod protocol;

pub use domain::routing::{RoutingTable, RoutingTarget};
pub use domain::rules::{
    normalize, normalize_keymap, normalize_process_name, AppConfig, Layer, ProcessRule, RawConfig,
    RawRule, ValidationError,
};
pub use protocol::report::{encode_macro_command, encode_switch_keymap, ProtocolError};

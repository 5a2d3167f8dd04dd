//! HID device access for the keyboard's communication interface.
//!
//! # How the keyboard is found
//!
//! The keyboard exposes several HID interfaces (keyboard, mouse, media keys,
//! and a vendor-defined communication interface). Only the communication
//! interface accepts commands. It is identified by:
//!
//! | Field       | Value(s)                                      |
//! |-------------|-----------------------------------------------|
//! | Vendor ID   | `0x37A8`                                      |
//! | Product ID  | `0x0009`                                      |
//! | Usage pair  | `(0x0080, 0x0081)` legacy, `(0xFF00, 0x0001)` |
//!
//! Firmware revisions differ in which usage pair they advertise, so both are
//! accepted.
//!
//! # Structure
//!
//! Enumeration and opening are abstracted behind [`DeviceLocator`] so the
//! framing and back-off logic in [`transport`] can be tested without
//! hardware:
//!
//! | Implementation        | Backend                               |
//! |-----------------------|---------------------------------------|
//! | [`HidApiLocator`]     | `hidapi` (hidraw / IOKit / Win32 HID) |
//! | [`MockDeviceLocator`] | canned candidates, recorded reports   |
//!
//! A device handle ([`HidChannel`]) is opened for one write and dropped
//! immediately after; it is never cached because the keyboard may be
//! unplugged between switches.

pub mod mock;
pub mod native;
pub mod transport;

pub use mock::MockDeviceLocator;
pub use native::HidApiLocator;
pub use transport::{HidKeymapTransport, HidTransportConfig};

use thiserror::Error;

/// Vendor ID of Ultimate Gadget Laboratories.
pub const UHK_VENDOR_ID: u16 = 0x37A8;

/// Product IDs of supported keyboards.
pub const SUPPORTED_PRODUCT_IDS: [u16; 1] = [
    0x0009, // UHK 80 right half
];

/// `(usage_page, usage)` pairs of the communication interface.
pub const COMMUNICATION_USAGES: [(u16, u16); 2] = [
    (0x0080, 0x0081), // legacy firmware
    (0xFF00, 0x0001), // current firmware
];

/// Error type for device enumeration and I/O.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The HID subsystem could not be initialised.
    #[error("HID subsystem unavailable: {0}")]
    Init(String),

    /// Listing HID interfaces failed.
    #[error("failed to enumerate HID devices: {0}")]
    Enumerate(String),

    /// The interface was found but could not be opened.
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    /// Writing the output report failed.
    #[error("failed to write report to {path}: {reason}")]
    Write { path: String, reason: String },

    /// The OS accepted fewer bytes than the report length.
    #[error("short write to {path}: {written} of {expected} bytes")]
    ShortWrite {
        path: String,
        written: usize,
        expected: usize,
    },
}

/// A matching interface found by one discovery pass.
///
/// Never cached across transport calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// OS-specific interface path, as accepted by [`DeviceLocator::open`].
    pub device_path: String,
    /// Advertised output report length in bytes; `0` if unreported.
    pub max_output_report_length: usize,
}

/// An open, exclusive handle to one device interface.
///
/// Dropping the channel closes the handle.
pub trait HidChannel: Send {
    /// Writes one complete output report (report ID in byte 0).
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Write`] or [`DeviceError::ShortWrite`].
    fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError>;
}

/// Trait for discovering and opening the keyboard's communication interface.
pub trait DeviceLocator: Send + Sync {
    /// Runs a fresh discovery pass and returns every matching interface,
    /// best first.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the HID subsystem cannot be queried. An
    /// empty list is not an error.
    fn find_candidates(&self) -> Result<Vec<DeviceCandidate>, DeviceError>;

    /// Opens `candidate` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Open`] if the interface is gone or inaccessible.
    fn open(&self, candidate: &DeviceCandidate) -> Result<Box<dyn HidChannel>, DeviceError>;
}

/// Returns `true` if an interface with these identifiers is the keyboard's
/// communication interface.
pub fn is_supported_interface(vendor_id: u16, product_id: u16, usage_page: u16, usage: u16) -> bool {
    vendor_id == UHK_VENDOR_ID
        && SUPPORTED_PRODUCT_IDS.contains(&product_id)
        && COMMUNICATION_USAGES.contains(&(usage_page, usage))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

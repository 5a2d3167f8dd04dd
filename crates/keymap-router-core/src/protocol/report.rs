//! HID output report framing for the keyboard's command channel.
//!
//! Switch keymap report:
//! ```text
//! [report_id:1][0x11:1][len:1][ascii keymap:len][padding...]
//! ```
//!
//! Execute macro command report:
//! ```text
//! [report_id:1][0x14:1][ascii command:N][0x00:1][padding...]
//! ```
//!
//! Both reports are at least as long as the interface's advertised output
//! report length (65 bytes when the interface reports zero) and grow when the
//! payload would not fit. Padding bytes are zero.

use thiserror::Error;

use crate::domain::rules::Layer;

/// Command byte for "switch keymap".
pub const SWITCH_KEYMAP_COMMAND: u8 = 0x11;
/// Command byte for "execute macro command".
pub const EXEC_MACRO_COMMAND: u8 = 0x14;
/// Report identifier used by the keyboard's communication interface.
pub const DEFAULT_REPORT_ID: u8 = 4;
/// Output report length assumed when an interface advertises none.
pub const DEFAULT_REPORT_LENGTH: usize = 65;
/// Bytes preceding (or, for macros, surrounding) the payload.
pub const REPORT_HEADER_LEN: usize = 3;
/// Largest payload either command accepts.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Caller-side misuse of the report encoders.
///
/// These are contract violations, not device failures, and are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("keymap code is required")]
    EmptyKeymap,

    #[error("keymap code must be ASCII only")]
    NonAsciiKeymap,

    #[error("keymap code is too long: {len} bytes (max {max})")]
    KeymapTooLong { len: usize, max: usize },

    #[error("macro command is required")]
    EmptyCommand,

    #[error("macro command must be ASCII only")]
    NonAsciiCommand,

    #[error("macro command is too long: {len} bytes (max {max})")]
    CommandTooLong { len: usize, max: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Returns `advertised`, or [`DEFAULT_REPORT_LENGTH`] when it is zero.
pub fn effective_report_length(advertised: usize) -> usize {
    if advertised == 0 {
        DEFAULT_REPORT_LENGTH
    } else {
        advertised
    }
}

/// Checks that `keymap` can be framed into a switch report.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the code is empty, not ASCII, or longer than
/// 255 bytes.
pub fn validate_keymap(keymap: &str) -> Result<(), ProtocolError> {
    if keymap.is_empty() {
        return Err(ProtocolError::EmptyKeymap);
    }
    if !keymap.is_ascii() {
        return Err(ProtocolError::NonAsciiKeymap);
    }
    if keymap.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::KeymapTooLong {
            len: keymap.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

/// Checks that `command` can be framed into a macro report.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the command is empty, not ASCII, or longer
/// than 255 bytes.
pub fn validate_macro_command(command: &str) -> Result<(), ProtocolError> {
    if command.is_empty() {
        return Err(ProtocolError::EmptyCommand);
    }
    if !command.is_ascii() {
        return Err(ProtocolError::NonAsciiCommand);
    }
    if command.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::CommandTooLong {
            len: command.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

/// Builds a "switch keymap" output report.
///
/// `keymap` is sent as-is; callers normalize it first.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the keymap code cannot be framed.
///
/// # Examples
///
/// ```rust
/// use keymap_router_core::protocol::encode_switch_keymap;
///
/// let report = encode_switch_keymap(4, "DEV", 0).unwrap();
/// assert_eq!(report.len(), 65);
/// assert_eq!(&report[..6], &[4, 0x11, 3, b'D', b'E', b'V']);
/// ```
pub fn encode_switch_keymap(
    report_id: u8,
    keymap: &str,
    advertised_len: usize,
) -> Result<Vec<u8>, ProtocolError> {
    validate_keymap(keymap)?;
    let payload = keymap.as_bytes();

    let len = effective_report_length(advertised_len).max(payload.len() + REPORT_HEADER_LEN);
    let mut buf = vec![0u8; len];
    buf[0] = report_id;
    buf[1] = SWITCH_KEYMAP_COMMAND;
    // validate_keymap bounds the payload to 255 bytes
    buf[2] = payload.len() as u8;
    buf[REPORT_HEADER_LEN..REPORT_HEADER_LEN + payload.len()].copy_from_slice(payload);
    Ok(buf)
}

/// Builds an "execute macro command" output report carrying a
/// null-terminated ASCII command string.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the command cannot be framed.
pub fn encode_macro_command(
    report_id: u8,
    command: &str,
    advertised_len: usize,
) -> Result<Vec<u8>, ProtocolError> {
    validate_macro_command(command)?;
    let payload = command.as_bytes();

    let len = effective_report_length(advertised_len).max(payload.len() + REPORT_HEADER_LEN);
    let mut buf = vec![0u8; len];
    buf[0] = report_id;
    buf[1] = EXEC_MACRO_COMMAND;
    buf[2..2 + payload.len()].copy_from_slice(payload);
    // Terminator at 2 + len is already zero.
    Ok(buf)
}

/// Returns the macro command that toggles `layer` on the device.
pub fn toggle_layer_command(layer: Layer) -> String {
    format!("toggleLayer {}", layer.as_str())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

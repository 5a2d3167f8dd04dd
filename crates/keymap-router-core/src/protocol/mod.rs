//! Protocol module containing the HID output report framing.

pub mod report;

pub use report::{
    effective_report_length, encode_macro_command, encode_switch_keymap, toggle_layer_command,
    validate_keymap, validate_macro_command, ProtocolError, DEFAULT_REPORT_ID,
    DEFAULT_REPORT_LENGTH, EXEC_MACRO_COMMAND, SWITCH_KEYMAP_COMMAND,
};

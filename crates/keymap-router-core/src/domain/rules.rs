//! Rule normalizer: raw configuration in, normalized configuration or errors out.
//!
//! The configuration a user edits ([`RawConfig`]) is lenient: every field has
//! a default, names may carry paths or stray whitespace, and keymap codes may
//! be typed in any case. [`normalize`] turns it into an [`AppConfig`] whose
//! invariants the rest of the system relies on:
//!
//! - `process_name` is trimmed, reduced to its file-name component, and gets
//!   an `.exe` suffix when it has no extension.
//! - Keymap codes are trimmed, upper-cased, non-empty, ASCII-only, and at
//!   most 255 bytes (they are sent to the device length-prefixed by one byte).
//! - Layer names belong to the closed [`Layer`] set; blank means `base`.
//! - No two rules share a process name (compared case-insensitively).
//!
//! Validation is all-or-nothing. Every applicable error is collected and
//! returned together; a malformed rule row stops checks on that row only.
//! Rows that are completely blank are dropped silently.
//!
//! # Example
//!
//! ```rust
//! use keymap_router_core::domain::rules::{normalize, RawConfig, RawRule, Layer};
//!
//! let raw = RawConfig {
//!     default_keymap: " def ".to_string(),
//!     rules: vec![RawRule {
//!         process_name: r"C:\Program Files\Code\Code".to_string(),
//!         keymap: "dev".to_string(),
//!         layer: "FN".to_string(),
//!     }],
//!     ..RawConfig::default()
//! };
//!
//! let config = normalize(&raw).unwrap();
//! assert_eq!(config.default_keymap, "DEF");
//! assert_eq!(config.rules[0].process_name, "Code.exe");
//! assert_eq!(config.rules[0].keymap, "DEV");
//! assert_eq!(config.rules[0].layer, Layer::Fn);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest accepted focus polling interval, inclusive.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
/// Largest accepted focus polling interval, inclusive.
pub const MAX_POLL_INTERVAL_MS: u64 = 1000;
/// Polling interval used when the configuration does not specify one.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
/// Keymap codes travel with a one-byte length prefix.
pub const MAX_KEYMAP_LEN: usize = 255;
/// Keymap selected when no rule matches and nothing else is configured.
pub const DEFAULT_KEYMAP: &str = "DEF";

/// Suffix appended to process names that carry no extension.
const PROCESS_SUFFIX: &str = ".exe";

// ── Layer ─────────────────────────────────────────────────────────────────────

/// A layer the keyboard firmware can toggle on top of the active keymap.
///
/// The set is closed: anything the firmware does not know is rejected at
/// normalization time rather than sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layer {
    #[default]
    Base,
    Fn,
    Mod,
    Mouse,
    Fn2,
    Fn3,
    Fn4,
    Fn5,
    Alt,
    Shift,
    Super,
    Ctrl,
}

impl Layer {
    /// Every supported layer, in firmware order.
    pub const ALL: [Layer; 12] = [
        Layer::Base,
        Layer::Fn,
        Layer::Mod,
        Layer::Mouse,
        Layer::Fn2,
        Layer::Fn3,
        Layer::Fn4,
        Layer::Fn5,
        Layer::Alt,
        Layer::Shift,
        Layer::Super,
        Layer::Ctrl,
    ];

    /// Returns the lower-case name used in configuration files and macro commands.
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Fn => "fn",
            Layer::Mod => "mod",
            Layer::Mouse => "mouse",
            Layer::Fn2 => "fn2",
            Layer::Fn3 => "fn3",
            Layer::Fn4 => "fn4",
            Layer::Fn5 => "fn5",
            Layer::Alt => "alt",
            Layer::Shift => "shift",
            Layer::Super => "super",
            Layer::Ctrl => "ctrl",
        }
    }

    /// Returns `true` for the base layer, which needs no toggle command.
    pub fn is_base(self) -> bool {
        self == Layer::Base
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a layer name is not in the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported layer name '{0}'")]
pub struct UnknownLayer(pub String);

impl FromStr for Layer {
    type Err = UnknownLayer;

    /// Parses a layer name after trimming and lower-casing it.
    ///
    /// A blank name parses as [`Layer::Base`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(Layer::Base);
        }
        Layer::ALL
            .into_iter()
            .find(|layer| layer.as_str() == normalized)
            .ok_or(UnknownLayer(normalized))
    }
}

// ── Raw (user-facing) configuration ───────────────────────────────────────────

/// Configuration exactly as the user wrote it.
///
/// Every field is defaulted so that partial files (or files written by an
/// older version) still deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// Keymap code used when no rule matches the focused process.
    pub default_keymap: String,
    /// Focus sampling period in milliseconds.
    pub poll_interval_ms: i64,
    /// Whether the application registers itself to run at login.
    pub start_with_system: bool,
    /// Whether switching pauses while the vendor's companion app is running.
    pub pause_while_companion_running: bool,
    /// Per-process rules, in priority-free input order.
    pub rules: Vec<RawRule>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            default_keymap: DEFAULT_KEYMAP.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS as i64,
            start_with_system: true,
            pause_while_companion_running: true,
            rules: Vec::new(),
        }
    }
}

/// One unvalidated rule row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRule {
    pub process_name: String,
    pub keymap: String,
    pub layer: String,
}

// ── Normalized configuration ──────────────────────────────────────────────────

/// A fully normalized and validated configuration.
///
/// Produced only by [`normalize`]; the routing table and the switching
/// service consume nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub default_keymap: String,
    pub poll_interval_ms: u64,
    pub start_with_system: bool,
    pub pause_while_companion_running: bool,
    pub rules: Vec<ProcessRule>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_keymap: DEFAULT_KEYMAP.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            start_with_system: true,
            pause_while_companion_running: true,
            rules: Vec::new(),
        }
    }
}

/// A normalized rule: which keymap and layer to activate for a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRule {
    pub process_name: String,
    pub keymap: String,
    pub layer: Layer,
}

impl From<&AppConfig> for RawConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_keymap: config.default_keymap.clone(),
            poll_interval_ms: i64::try_from(config.poll_interval_ms).unwrap_or(i64::MAX),
            start_with_system: config.start_with_system,
            pause_while_companion_running: config.pause_while_companion_running,
            rules: config
                .rules
                .iter()
                .map(|rule| RawRule {
                    process_name: rule.process_name.clone(),
                    keymap: rule.keymap.clone(),
                    layer: rule.layer.as_str().to_string(),
                })
                .collect(),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A single reason a configuration was rejected.
///
/// Messages name the offending field the way the configuration editor shows
/// it, so they can be displayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("defaultKeymap is required")]
    DefaultKeymapMissing,

    #[error("defaultKeymap must contain only ASCII characters")]
    DefaultKeymapNotAscii,

    #[error("defaultKeymap must be <= {max} bytes (got {len})")]
    DefaultKeymapTooLong { len: usize, max: usize },

    #[error("pollIntervalMs must be between {min} and {max} (got {value})")]
    PollIntervalOutOfRange { value: i64, min: u64, max: u64 },

    #[error("rules[{index}].processName is required")]
    ProcessNameMissing { index: usize },

    #[error("rules[{index}].keymap is required")]
    KeymapMissing { index: usize },

    #[error("rules[{index}].keymap must contain only ASCII characters")]
    KeymapNotAscii { index: usize },

    #[error("rules[{index}].keymap must be <= {max} bytes (got {len})")]
    KeymapTooLong { index: usize, len: usize, max: usize },

    #[error("rules[{index}].layer '{layer}' is not a supported layer")]
    UnsupportedLayer { index: usize, layer: String },

    #[error("duplicate process rule found for '{process_name}' at rules[{index}]")]
    DuplicateProcess { index: usize, process_name: String },
}

/// Why a keymap code failed validation, independent of where it appeared.
enum KeymapProblem {
    Missing,
    NotAscii,
    TooLong(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Normalizes and validates a raw configuration.
///
/// Returns the normalized configuration when there are no errors, otherwise
/// every error found. Rule order is preserved.
///
/// # Errors
///
/// Returns a non-empty `Vec<ValidationError>` if any field or rule is invalid.
pub fn normalize(raw: &RawConfig) -> Result<AppConfig, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let default_keymap = normalize_keymap(&raw.default_keymap);
    match check_keymap(&default_keymap) {
        Ok(()) => {}
        Err(KeymapProblem::Missing) => errors.push(ValidationError::DefaultKeymapMissing),
        Err(KeymapProblem::NotAscii) => errors.push(ValidationError::DefaultKeymapNotAscii),
        Err(KeymapProblem::TooLong(len)) => errors.push(ValidationError::DefaultKeymapTooLong {
            len,
            max: MAX_KEYMAP_LEN,
        }),
    }

    let poll_interval_ms = match u64::try_from(raw.poll_interval_ms) {
        Ok(ms) if (MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&ms) => ms,
        _ => {
            errors.push(ValidationError::PollIntervalOutOfRange {
                value: raw.poll_interval_ms,
                min: MIN_POLL_INTERVAL_MS,
                max: MAX_POLL_INTERVAL_MS,
            });
            DEFAULT_POLL_INTERVAL_MS
        }
    };

    let mut seen_processes = HashSet::new();
    let mut rules = Vec::with_capacity(raw.rules.len());

    for (index, row) in raw.rules.iter().enumerate() {
        let process_name = normalize_process_name(&row.process_name);
        let keymap = normalize_keymap(&row.keymap);
        let layer = row.layer.parse::<Layer>();

        // A row is only blank when the layer is also left at its default;
        // a lone non-base layer is reported as a missing process name.
        if process_name.is_empty() && keymap.is_empty() && layer == Ok(Layer::Base) {
            continue;
        }

        if process_name.is_empty() {
            errors.push(ValidationError::ProcessNameMissing { index });
            continue;
        }

        if let Err(problem) = check_keymap(&keymap) {
            errors.push(match problem {
                KeymapProblem::Missing => ValidationError::KeymapMissing { index },
                KeymapProblem::NotAscii => ValidationError::KeymapNotAscii { index },
                KeymapProblem::TooLong(len) => ValidationError::KeymapTooLong {
                    index,
                    len,
                    max: MAX_KEYMAP_LEN,
                },
            });
            continue;
        }

        let layer = match layer {
            Ok(layer) => layer,
            Err(UnknownLayer(layer)) => {
                errors.push(ValidationError::UnsupportedLayer { index, layer });
                continue;
            }
        };

        if !seen_processes.insert(process_key(&process_name)) {
            errors.push(ValidationError::DuplicateProcess {
                index,
                process_name,
            });
            continue;
        }

        rules.push(ProcessRule {
            process_name,
            keymap,
            layer,
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(AppConfig {
        default_keymap,
        poll_interval_ms,
        start_with_system: raw.start_with_system,
        pause_while_companion_running: raw.pause_while_companion_running,
        rules,
    })
}

/// Normalizes a process name or path to the form used for rule matching.
///
/// Trims whitespace, keeps only the file-name component (both `/` and `\`
/// count as separators), and appends `.exe` when there is no extension.
/// Returns an empty string when nothing usable remains.
pub fn normalize_process_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let file_name = trimmed
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    if file_name.is_empty() {
        return String::new();
    }

    if file_name.contains('.') {
        file_name.to_string()
    } else {
        format!("{file_name}{PROCESS_SUFFIX}")
    }
}

/// Normalizes a keymap code: trimmed and upper-cased.
pub fn normalize_keymap(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Returns the case-folded key under which a normalized process name is matched.
pub fn process_key(process_name: &str) -> String {
    process_name.to_lowercase()
}

fn check_keymap(keymap: &str) -> Result<(), KeymapProblem> {
    if keymap.is_empty() {
        return Err(KeymapProblem::Missing);
    }
    if !keymap.is_ascii() {
        return Err(KeymapProblem::NotAscii);
    }
    if keymap.len() > MAX_KEYMAP_LEN {
        return Err(KeymapProblem::TooLong(keymap.len()));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

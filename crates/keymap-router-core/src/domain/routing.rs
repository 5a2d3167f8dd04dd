//! Routing table: resolves a focused process to the target the keyboard should be in.
//!
//! The table owns three pieces of state behind one lock:
//!
//! - the per-process rules, keyed by the case-folded normalized process name,
//! - the default target (default keymap on the base layer),
//! - the last target the device confirmed, or `None` when unknown.
//!
//! `None` for the last applied target means "must (re)apply on next
//! resolution". It is reset whenever the configuration is replaced or the
//! switching service restarts, so the device is always re-synchronized.
//!
//! All operations are synchronous hash lookups with no suspension points, so
//! a `std::sync::Mutex` is sufficient.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::rules::{normalize_keymap, normalize_process_name, process_key, AppConfig, Layer};

/// The keymap and layer that should be active for a process.
///
/// Immutable and compared by value. Equality is what suppresses redundant
/// device writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingTarget {
    keymap: String,
    layer: Layer,
}

impl RoutingTarget {
    /// Creates a target, normalizing the keymap code.
    pub fn new(keymap: impl AsRef<str>, layer: Layer) -> Self {
        Self {
            keymap: normalize_keymap(keymap.as_ref()),
            layer,
        }
    }

    /// Returns the upper-case keymap code.
    pub fn keymap(&self) -> &str {
        &self.keymap
    }

    /// Returns the layer to toggle on top of the keymap.
    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Returns a re-normalized copy of this target.
    pub fn normalized(&self) -> Self {
        Self::new(&self.keymap, self.layer)
    }
}

impl fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.keymap, self.layer)
    }
}

#[derive(Debug)]
struct TableState {
    rules: HashMap<String, RoutingTarget>,
    default_target: RoutingTarget,
    last_applied: Option<RoutingTarget>,
}

impl TableState {
    fn from_config(config: &AppConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                (
                    process_key(&normalize_process_name(&rule.process_name)),
                    RoutingTarget::new(&rule.keymap, rule.layer),
                )
            })
            .collect();

        Self {
            rules,
            default_target: RoutingTarget::new(&config.default_keymap, Layer::Base),
            last_applied: None,
        }
    }

    fn resolve(&self, process_name: &str) -> RoutingTarget {
        let normalized = normalize_process_name(process_name);
        if normalized.is_empty() {
            return self.default_target.clone();
        }
        self.rules
            .get(&process_key(&normalized))
            .unwrap_or(&self.default_target)
            .clone()
    }
}

/// Thread-safe process → target table with last-applied tracking.
///
/// Shared by reference (`Arc<RoutingTable>`) between the focus-event handler,
/// the retry loop, and configuration updates.
#[derive(Debug)]
pub struct RoutingTable {
    state: Mutex<TableState>,
}

impl RoutingTable {
    /// Builds a table from a normalized configuration. Nothing is applied yet.
    pub fn new(config: &AppConfig) -> Self {
        Self {
            state: Mutex::new(TableState::from_config(config)),
        }
    }

    /// Replaces the rules and default target wholesale and forgets the last
    /// applied target.
    pub fn update_config(&self, config: &AppConfig) {
        let next = TableState::from_config(config);
        let mut state = self.lock();
        debug!(
            rules = next.rules.len(),
            default = %next.default_target,
            "routing table configuration replaced"
        );
        *state = next;
    }

    /// Returns the target for `process_name`, falling back to the default
    /// target on a miss or an empty name.
    pub fn resolve(&self, process_name: &str) -> RoutingTarget {
        self.lock().resolve(process_name)
    }

    /// Resolves `process_name` and reports whether the result differs from
    /// the last applied target. Always `true` when nothing has been applied.
    pub fn should_switch(&self, process_name: &str) -> (bool, RoutingTarget) {
        let state = self.lock();
        let target = state.resolve(process_name);
        let differs = state.last_applied.as_ref() != Some(&target);
        (differs, target)
    }

    /// Records `target` as the state the device is now in.
    pub fn mark_applied(&self, target: &RoutingTarget) {
        let target = target.normalized();
        debug!(target = %target, "routing target applied");
        self.lock().last_applied = Some(target);
    }

    /// Forgets the last applied target so the next resolution always switches.
    pub fn reset(&self) {
        self.lock().last_applied = None;
    }

    /// Returns the last applied target, if any.
    pub fn last_applied(&self) -> Option<RoutingTarget> {
        self.lock().last_applied.clone()
    }

    /// Returns the target used when no rule matches.
    pub fn default_target(&self) -> RoutingTarget {
        self.lock().default_target.clone()
    }

    // Table state is always left consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::ProcessRule;

    fn rule(process_name: &str, keymap: &str, layer: Layer) -> ProcessRule {
        ProcessRule {
            process_name: process_name.to_string(),
            keymap: keymap.to_string(),
            layer,
        }
    }

    fn config_with(rules: Vec<ProcessRule>) -> AppConfig {
        AppConfig {
            default_keymap: "DEF".to_string(),
            rules,
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_resolve_returns_default_target_on_miss() {
        // Arrange
        let table = RoutingTable::new(&config_with(vec![rule("Code.exe", "DEV", Layer::Fn)]));

        // Act
        let target = table.resolve("chrome.exe");

        // Assert
        assert_eq!(target, RoutingTarget::new("DEF", Layer::Base));
    }

    #[test]
    fn test_resolve_returns_default_target_for_empty_name() {
        let table = RoutingTable::new(&config_with(vec![rule("Code.exe", "DEV", Layer::Fn)]));

        assert_eq!(table.resolve(""), table.default_target());
        assert_eq!(table.resolve("   "), table.default_target());
    }

    #[test]
    fn test_resolve_matches_process_names_case_insensitively() {
        let table = RoutingTable::new(&config_with(vec![rule("Code.exe", "DEV", Layer::Fn)]));
        let expected = RoutingTarget::new("DEV", Layer::Fn);

        assert_eq!(table.resolve("code.exe"), expected);
        assert_eq!(table.resolve("CODE.EXE"), expected);
    }

    #[test]
    fn test_resolve_normalizes_paths_and_missing_extension() {
        let table = RoutingTable::new(&config_with(vec![rule("Code.exe", "DEV", Layer::Base)]));
        let expected = RoutingTarget::new("DEV", Layer::Base);

        assert_eq!(table.resolve(r"C:\Users\me\AppData\Code.exe"), expected);
        assert_eq!(table.resolve("/usr/share/code/code"), expected);
    }

    #[test]
    fn test_should_switch_is_true_before_anything_is_applied() {
        let table = RoutingTable::new(&AppConfig::default());

        let (switch, target) = table.should_switch("anything.exe");

        assert!(switch);
        assert_eq!(target.keymap(), "DEF");
    }

    #[test]
    fn test_should_switch_is_false_after_same_target_applied() {
        // Arrange
        let table = RoutingTable::new(&config_with(vec![rule("Code.exe", "DEV", Layer::Fn)]));
        let (_, target) = table.should_switch("code.exe");

        // Act
        table.mark_applied(&target);
        let (switch, _) = table.should_switch("CODE.exe");

        // Assert
        assert!(!switch);
    }

    #[test]
    fn test_should_switch_when_only_layer_differs() {
        // Arrange
        let table = RoutingTable::new(&config_with(vec![
            rule("a.exe", "DEV", Layer::Fn),
            rule("b.exe", "DEV", Layer::Mod),
        ]));
        let (_, a) = table.should_switch("a.exe");
        table.mark_applied(&a);

        // Act
        let (switch, b) = table.should_switch("b.exe");

        // Assert
        assert!(switch);
        assert_eq!(b.layer(), Layer::Mod);
    }

    #[test]
    fn test_update_config_forces_switch_for_previous_process() {
        // Arrange
        let config = config_with(vec![rule("Code.exe", "DEV", Layer::Base)]);
        let table = RoutingTable::new(&config);
        let (_, target) = table.should_switch("code.exe");
        table.mark_applied(&target);

        // Act – identical config still clears the applied state
        table.update_config(&config);
        let (switch, _) = table.should_switch("code.exe");

        // Assert
        assert!(switch);
        assert_eq!(table.last_applied(), None);
    }

    #[test]
    fn test_update_config_replaces_rules_and_default() {
        let table = RoutingTable::new(&config_with(vec![rule("Code.exe", "DEV", Layer::Base)]));

        table.update_config(&AppConfig {
            default_keymap: "QWR".to_string(),
            ..AppConfig::default()
        });

        assert_eq!(table.resolve("code.exe"), RoutingTarget::new("QWR", Layer::Base));
    }

    #[test]
    fn test_reset_clears_last_applied() {
        let table = RoutingTable::new(&AppConfig::default());
        table.mark_applied(&table.default_target());

        table.reset();

        assert_eq!(table.last_applied(), None);
    }

    #[test]
    fn test_mark_applied_renormalizes_target() {
        let table = RoutingTable::new(&AppConfig::default());

        table.mark_applied(&RoutingTarget::new(" def ", Layer::Base));

        let (switch, _) = table.should_switch("unmatched.exe");
        assert!(!switch);
    }

    #[test]
    fn test_routing_target_display_shows_keymap_and_layer() {
        assert_eq!(RoutingTarget::new("dev", Layer::Fn2).to_string(), "DEV/fn2");
    }
}

//! Integration tests for the keymap-router-core public API.
//!
//! These tests drive the normalizer and the routing table together the way
//! the switching service does: normalize a raw configuration, build a table,
//! and replay a sequence of observed foreground processes, committing every
//! switch the table asks for.

use keymap_router_core::{
    encode_switch_keymap, normalize, Layer, RawConfig, RawRule, RoutingTable, RoutingTarget,
};

fn raw_rule(process_name: &str, keymap: &str, layer: &str) -> RawRule {
    RawRule {
        process_name: process_name.to_string(),
        keymap: keymap.to_string(),
        layer: layer.to_string(),
    }
}

/// Replays `observed` against `table`, marking every requested switch as
/// applied, and returns the targets that would have been sent to the device.
fn replay(table: &RoutingTable, observed: &[&str]) -> Vec<Option<RoutingTarget>> {
    observed
        .iter()
        .map(|process| {
            let (switch, target) = table.should_switch(process);
            if switch {
                table.mark_applied(&target);
                Some(target)
            } else {
                None
            }
        })
        .collect()
}

#[test]
fn test_focus_sequence_switches_only_on_target_change() {
    // Arrange
    let raw = RawConfig {
        default_keymap: "DEF".to_string(),
        rules: vec![raw_rule("Code.exe", "DEV", "fn")],
        ..RawConfig::default()
    };
    let config = normalize(&raw).expect("config must be valid");
    let table = RoutingTable::new(&config);

    // Act
    let switches = replay(&table, &["chrome.exe", "code.exe", "code.exe"]);

    // Assert
    assert_eq!(
        switches,
        vec![
            Some(RoutingTarget::new("DEF", Layer::Base)),
            Some(RoutingTarget::new("DEV", Layer::Fn)),
            None,
        ]
    );
}

#[test]
fn test_layer_difference_alone_triggers_every_switch() {
    // Arrange
    let raw = RawConfig {
        rules: vec![raw_rule("a.exe", "DEV", "fn"), raw_rule("b.exe", "DEV", "mod")],
        ..RawConfig::default()
    };
    let table = RoutingTable::new(&normalize(&raw).unwrap());

    // Act
    let switches = replay(&table, &["a.exe", "b.exe", "a.exe", "b.exe"]);

    // Assert
    assert!(switches.iter().all(Option::is_some));
}

#[test]
fn test_unapplied_switch_is_requested_again() {
    // Arrange – a failed device write never reaches mark_applied
    let table = RoutingTable::new(&normalize(&RawConfig::default()).unwrap());

    // Act
    let (first, _) = table.should_switch("term.exe");
    let (second, _) = table.should_switch("term.exe");

    // Assert
    assert!(first);
    assert!(second);
}

#[test]
fn test_config_update_resynchronizes_previous_process() {
    // Arrange
    let raw = RawConfig {
        rules: vec![raw_rule("code", "dev", "")],
        ..RawConfig::default()
    };
    let config = normalize(&raw).unwrap();
    let table = RoutingTable::new(&config);
    replay(&table, &["code.exe"]);

    // Act
    table.update_config(&config);

    // Assert
    assert_eq!(replay(&table, &["code.exe"]), vec![Some(RoutingTarget::new("DEV", Layer::Base))]);
}

#[test]
fn test_duplicate_rules_never_reach_the_table() {
    let raw = RawConfig {
        rules: vec![raw_rule("Code.exe", "DEV", ""), raw_rule("CODE", "OTHER", "")],
        ..RawConfig::default()
    };

    let errors = normalize(&raw).unwrap_err();

    assert!(!errors.is_empty());
}

#[test]
fn test_poll_interval_scenario_bounds() {
    for (value, accepted) in [(50, false), (100, true), (1000, true)] {
        let raw = RawConfig {
            poll_interval_ms: value,
            ..RawConfig::default()
        };

        assert_eq!(normalize(&raw).is_ok(), accepted, "poll_interval_ms = {value}");
    }
}

#[test]
fn test_resolved_target_frames_into_switch_report() {
    // Arrange
    let raw = RawConfig {
        rules: vec![raw_rule(r"C:\Apps\Term.exe", "trm", "")],
        ..RawConfig::default()
    };
    let table = RoutingTable::new(&normalize(&raw).unwrap());

    // Act
    let target = table.resolve("term.EXE");
    let report = encode_switch_keymap(4, target.keymap(), 0).unwrap();

    // Assert
    assert_eq!(&report[..6], &[4, 0x11, 3, b'T', b'R', b'M']);
}

//! Domain entities for keymap-router.
//!
//! Pure business logic with no infrastructure dependencies: the rule set a
//! user configures, and the table that resolves a focused process to the
//! keymap/layer pair the keyboard should be in.
//!
//! Code in the application crate depends on these types, but nothing here
//! depends on the application crate, so every rule can be tested in
//! isolation.

/// Configuration normalization and validation.
///
/// See [`rules::normalize`] for the entry point.
pub mod rules;

/// Process-to-target resolution with redundant-switch suppression.
///
/// See [`routing::RoutingTable`] for the main type.
pub mod routing;

//! HidKeymapTransport: delivers switch and macro commands over HID.
//!
//! Every call runs a fresh discovery pass, opens the first matching
//! interface, writes one report, and closes the handle again. Failures arm
//! a reconnect back-off; calls made before it expires fail fast with
//! [`TransportError::CoolingDown`] without touching the HID stack. A
//! successful write clears the back-off.
//!
//! Discovery, open, and write run under one lock, so at most one operation
//! is in flight and writes never interleave. Arguments are validated before
//! the lock is taken; a malformed keymap is reported as
//! [`TransportError::Protocol`] and never arms the back-off.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keymap_router_core::domain::rules::normalize_keymap;
use keymap_router_core::protocol::{
    encode_macro_command, encode_switch_keymap, validate_keymap, validate_macro_command,
    ProtocolError, DEFAULT_REPORT_ID,
};
use tracing::debug;

use super::{DeviceCandidate, DeviceLocator};
use crate::application::switch_keymap::{KeymapTransport, TransportError};

/// Transport settings not exposed in the user configuration.
#[derive(Debug, Clone)]
pub struct HidTransportConfig {
    /// Report ID placed in byte 0 of every output report.
    pub report_id: u8,
    /// How long to wait after a failure before discovering again.
    pub reconnect_interval: Duration,
}

impl Default for HidTransportConfig {
    fn default() -> Self {
        Self {
            report_id: DEFAULT_REPORT_ID,
            reconnect_interval: Duration::from_secs(2),
        }
    }
}

struct TransportInner {
    locator: Arc<dyn DeviceLocator>,
    config: HidTransportConfig,
    /// Earliest time the next discovery may run; `None` when not backing off.
    next_attempt: Mutex<Option<Instant>>,
}

impl TransportInner {
    fn send<F>(&self, encode: F) -> Result<(), TransportError>
    where
        F: FnOnce(usize) -> Result<Vec<u8>, ProtocolError>,
    {
        let mut next_attempt = self
            .next_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        if let Some(deadline) = *next_attempt {
            if now < deadline {
                return Err(TransportError::CoolingDown {
                    remaining: deadline - now,
                });
            }
        }

        match self.discover_and_write(encode) {
            Ok(path) => {
                debug!(path = %path, "HID report written");
                *next_attempt = None;
                Ok(())
            }
            Err(e) => {
                if e.is_retriable() {
                    *next_attempt = Some(Instant::now() + self.config.reconnect_interval);
                }
                debug!("HID operation failed: {e}");
                Err(e)
            }
        }
    }

    /// Returns the path the report was written to.
    fn discover_and_write<F>(&self, encode: F) -> Result<String, TransportError>
    where
        F: FnOnce(usize) -> Result<Vec<u8>, ProtocolError>,
    {
        let candidate: DeviceCandidate = self
            .locator
            .find_candidates()
            .map_err(|e| TransportError::Device(e.to_string()))?
            .into_iter()
            .next()
            .ok_or(TransportError::DeviceNotFound)?;

        let report = encode(candidate.max_output_report_length)?;

        let mut channel = self
            .locator
            .open(&candidate)
            .map_err(|e| TransportError::Device(e.to_string()))?;
        channel
            .write_report(&report)
            .map_err(|e| TransportError::Device(e.to_string()))?;

        Ok(candidate.device_path)
    }
}

/// [`KeymapTransport`] implementation that talks to the keyboard over HID.
///
/// Cheap to clone; clones share the back-off state.
#[derive(Clone)]
pub struct HidKeymapTransport {
    inner: Arc<TransportInner>,
}

impl HidKeymapTransport {
    pub fn new(locator: Arc<dyn DeviceLocator>, config: HidTransportConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                locator,
                config,
                next_attempt: Mutex::new(None),
            }),
        }
    }

    /// Returns `true` while the reconnect back-off is active.
    pub fn is_cooling_down(&self) -> bool {
        self.inner
            .next_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|deadline| Instant::now() < deadline)
    }

    async fn send<F>(&self, encode: F) -> Result<(), TransportError>
    where
        F: FnOnce(usize) -> Result<Vec<u8>, ProtocolError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.send(encode))
            .await
            .map_err(|e| TransportError::Device(format!("HID task failed: {e}")))?
    }
}

#[async_trait]
impl KeymapTransport for HidKeymapTransport {
    async fn switch_keymap(&self, keymap: &str) -> Result<(), TransportError> {
        let keymap = normalize_keymap(keymap);
        validate_keymap(&keymap)?;

        let report_id = self.inner.config.report_id;
        self.send(move |len| encode_switch_keymap(report_id, &keymap, len))
            .await
    }

    async fn execute_macro_command(&self, command: &str) -> Result<(), TransportError> {
        validate_macro_command(command)?;

        let report_id = self.inner.config.report_id;
        let command = command.to_string();
        self.send(move |len| encode_macro_command(report_id, &command, len))
            .await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::hid::MockDeviceLocator;

    fn transport_with(locator: &Arc<MockDeviceLocator>, reconnect_ms: u64) -> HidKeymapTransport {
        HidKeymapTransport::new(
            locator.clone(),
            HidTransportConfig {
                report_id: 4,
                reconnect_interval: Duration::from_millis(reconnect_ms),
            },
        )
    }

    fn candidate(path: &str, len: usize) -> DeviceCandidate {
        DeviceCandidate {
            device_path: path.to_string(),
            max_output_report_length: len,
        }
    }

    #[tokio::test]
    async fn test_switch_writes_framed_report_to_first_candidate() {
        // Arrange
        let locator = Arc::new(MockDeviceLocator::new(vec![
            candidate("first", 65),
            candidate("second", 65),
        ]));
        let transport = transport_with(&locator, 2000);

        // Act
        transport.switch_keymap(" dev ").await.unwrap();

        // Assert
        let reports = locator.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].device_path, "first");
        assert_eq!(reports[0].bytes.len(), 65);
        assert_eq!(&reports[0].bytes[..6], &[4, 0x11, 3, b'D', b'E', b'V']);
    }

    #[tokio::test]
    async fn test_switch_uses_advertised_report_length_or_default() {
        let locator = Arc::new(MockDeviceLocator::new(vec![candidate("a", 33)]));
        let transport = transport_with(&locator, 2000);
        transport.switch_keymap("DEF").await.unwrap();

        locator.set_candidates(vec![candidate("a", 0)]);
        transport.switch_keymap("DEF").await.unwrap();

        let reports = locator.reports();
        assert_eq!(reports[0].bytes.len(), 33);
        assert_eq!(reports[1].bytes.len(), 65);
    }

    #[tokio::test]
    async fn test_macro_command_is_framed_with_exec_command_byte() {
        let locator = Arc::new(MockDeviceLocator::with_single_device());
        let transport = transport_with(&locator, 2000);

        transport
            .execute_macro_command("toggleLayer fn")
            .await
            .unwrap();

        let reports = locator.reports();
        let bytes = &reports[0].bytes;
        assert_eq!(bytes[1], 0x14);
        assert_eq!(&bytes[2..16], b"toggleLayer fn");
        assert_eq!(bytes[16], 0);
    }

    #[tokio::test]
    async fn test_missing_device_arms_backoff_and_fails_fast() {
        // Arrange
        let locator = Arc::new(MockDeviceLocator::empty());
        let transport = transport_with(&locator, 60_000);

        // Act
        let first = transport.switch_keymap("DEF").await;
        locator.set_candidates(vec![candidate("late", 65)]);
        let second = transport.switch_keymap("DEF").await;

        // Assert
        assert!(matches!(first, Err(TransportError::DeviceNotFound)));
        assert!(matches!(second, Err(TransportError::CoolingDown { .. })));
        assert_eq!(locator.find_calls(), 1, "cool-down must skip discovery");
        assert!(transport.is_cooling_down());
    }

    #[tokio::test]
    async fn test_discovery_resumes_after_backoff_expires() {
        // Arrange
        let locator = Arc::new(MockDeviceLocator::empty());
        let transport = transport_with(&locator, 50);
        let _ = transport.switch_keymap("DEF").await;
        locator.set_candidates(vec![candidate("late", 65)]);

        // Act
        tokio::time::sleep(Duration::from_millis(80)).await;
        let result = transport.switch_keymap("DEF").await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(locator.find_calls(), 2);
        assert!(!transport.is_cooling_down());
    }

    #[tokio::test]
    async fn test_open_failure_is_retriable_device_error() {
        let locator = Arc::new(MockDeviceLocator::with_single_device());
        locator.set_fail_open(true);
        let transport = transport_with(&locator, 60_000);

        let result = transport.switch_keymap("DEF").await;

        match result {
            Err(e @ TransportError::Device(_)) => assert!(e.is_retriable()),
            other => panic!("expected Device error, got {other:?}"),
        }
        assert!(transport.is_cooling_down());
    }

    #[tokio::test]
    async fn test_write_failure_arms_backoff() {
        let locator = Arc::new(MockDeviceLocator::with_single_device());
        locator.set_fail_write(true);
        let transport = transport_with(&locator, 60_000);

        let result = transport.switch_keymap("DEF").await;

        assert!(matches!(result, Err(TransportError::Device(_))));
        assert!(transport.is_cooling_down());
        assert!(locator.reports().is_empty());
    }

    #[tokio::test]
    async fn test_protocol_misuse_does_not_touch_device_or_backoff() {
        // Arrange
        let locator = Arc::new(MockDeviceLocator::with_single_device());
        let transport = transport_with(&locator, 60_000);

        // Act
        let bad = transport.switch_keymap("DÉF").await;
        let empty = transport.switch_keymap("   ").await;
        let good = transport.switch_keymap("DEF").await;

        // Assert
        assert!(matches!(
            bad,
            Err(TransportError::Protocol(ProtocolError::NonAsciiKeymap))
        ));
        assert!(matches!(
            empty,
            Err(TransportError::Protocol(ProtocolError::EmptyKeymap))
        ));
        assert!(good.is_ok());
        assert_eq!(locator.find_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_interleave_writes() {
        // Arrange
        let locator = Arc::new(MockDeviceLocator::with_single_device());
        locator.set_write_delay(Duration::from_millis(20));
        let transport = transport_with(&locator, 2000);
        let keymaps = ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"];

        // Act
        let mut callers = tokio::task::JoinSet::new();
        for keymap in keymaps {
            let transport = transport.clone();
            callers.spawn(async move { transport.switch_keymap(keymap).await });
        }
        while let Some(joined) = callers.join_next().await {
            joined.unwrap().unwrap();
        }

        // Assert
        assert_eq!(locator.max_concurrent_writes(), 1);
        let mut written: Vec<Vec<u8>> = locator
            .reports()
            .into_iter()
            .map(|r| r.bytes[..6].to_vec())
            .collect();
        written.sort();
        let expected: Vec<Vec<u8>> = keymaps
            .iter()
            .map(|k| [&[4u8, 0x11, 3][..], k.as_bytes()].concat())
            .collect();
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn test_each_call_runs_fresh_discovery_and_open() {
        let locator = Arc::new(MockDeviceLocator::with_single_device());
        let transport = transport_with(&locator, 2000);

        transport.switch_keymap("A").await.unwrap();
        transport.switch_keymap("B").await.unwrap();

        assert_eq!(locator.find_calls(), 2);
        assert_eq!(locator.open_calls(), 2);
    }
}

//! Mock device locator for unit testing and `--dry-run`.
//!
//! Returns canned [`DeviceCandidate`]s and records every report written to
//! them, so framing and back-off can be verified without a keyboard.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::{DeviceCandidate, DeviceError, DeviceLocator, HidChannel};

/// Path of the simulated device returned by [`MockDeviceLocator::with_single_device`].
pub const MOCK_DEVICE_PATH: &str = "mock://uhk80/communication";

/// A written report together with the path it was written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReport {
    pub device_path: String,
    pub bytes: Vec<u8>,
}

/// A mock implementation of [`DeviceLocator`].
pub struct MockDeviceLocator {
    candidates: Mutex<Vec<DeviceCandidate>>,
    reports: Arc<Mutex<Vec<RecordedReport>>>,
    find_calls: AtomicUsize,
    open_calls: AtomicUsize,
    fail_open: AtomicBool,
    fail_write: Arc<AtomicBool>,
    writes: Arc<WriteTracker>,
}

/// Simulated write latency and the overlap it exposes.
#[derive(Default)]
struct WriteTracker {
    delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDeviceLocator {
    /// Creates a locator that always discovers `candidates`.
    pub fn new(candidates: Vec<DeviceCandidate>) -> Self {
        Self {
            candidates: Mutex::new(candidates),
            reports: Arc::new(Mutex::new(Vec::new())),
            find_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            fail_open: AtomicBool::new(false),
            fail_write: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(WriteTracker::default()),
        }
    }

    /// Creates a locator with no devices attached.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Creates a locator with one device advertising a 65-byte output report.
    pub fn with_single_device() -> Self {
        Self::new(vec![DeviceCandidate {
            device_path: MOCK_DEVICE_PATH.to_string(),
            max_output_report_length: 65,
        }])
    }

    /// Replaces the devices returned by later discovery passes
    /// (simulates plugging or unplugging).
    pub fn set_candidates(&self, candidates: Vec<DeviceCandidate>) {
        *self
            .candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = candidates;
    }

    /// Makes subsequent `open` calls fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Makes writes on subsequently opened channels fail.
    pub fn set_fail_write(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::SeqCst);
    }

    /// Makes every write block for `delay`, like a slow USB round trip.
    pub fn set_write_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.writes.delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Returns the largest number of writes that were ever in progress at
    /// the same time.
    pub fn max_concurrent_writes(&self) -> usize {
        self.writes.max_in_flight.load(Ordering::SeqCst)
    }

    /// Returns every report written so far, oldest first.
    pub fn reports(&self) -> Vec<RecordedReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns how many discovery passes have run.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    /// Returns how many channels have been opened.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockDeviceLocator {
    fn default() -> Self {
        Self::with_single_device()
    }
}

impl DeviceLocator for MockDeviceLocator {
    fn find_candidates(&self) -> Result<Vec<DeviceCandidate>, DeviceError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn open(&self, candidate: &DeviceCandidate) -> Result<Box<dyn HidChannel>, DeviceError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DeviceError::Open {
                path: candidate.device_path.clone(),
                reason: "simulated open failure".to_string(),
            });
        }

        Ok(Box::new(MockChannel {
            device_path: candidate.device_path.clone(),
            reports: Arc::clone(&self.reports),
            fail_write: Arc::clone(&self.fail_write),
            writes: Arc::clone(&self.writes),
        }))
    }
}

struct MockChannel {
    device_path: String,
    reports: Arc<Mutex<Vec<RecordedReport>>>,
    fail_write: Arc<AtomicBool>,
    writes: Arc<WriteTracker>,
}

impl HidChannel for MockChannel {
    fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError> {
        let now = self.writes.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.writes.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.writes.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let result = self.record(report);
        self.writes.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl MockChannel {
    fn record(&self, report: &[u8]) -> Result<(), DeviceError> {
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(DeviceError::Write {
                path: self.device_path.clone(),
                reason: "simulated write failure".to_string(),
            });
        }

        debug!(path = %self.device_path, len = report.len(), "mock report written");
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedReport {
                device_path: self.device_path.clone(),
                bytes: report.to_vec(),
            });
        Ok(())
    }
}

//! Production [`DeviceLocator`] backed by `hidapi`.
//!
//! `hidapi` only allows one `HidApi` context per process, so the locator
//! creates it lazily, keeps it behind a mutex, and refreshes its device list
//! on every discovery pass instead of re-initialising.
//!
//! `hidapi` does not expose the interface's output report length, so
//! candidates carry `0` and the report framing falls back to the default
//! length the communication interface uses.

use std::collections::HashSet;
use std::ffi::CString;
use std::sync::{Mutex, PoisonError};

use hidapi::{HidApi, HidDevice};
use tracing::debug;

use super::{is_supported_interface, DeviceCandidate, DeviceError, DeviceLocator, HidChannel};

/// Locates the keyboard through the platform HID stack.
pub struct HidApiLocator {
    api: Mutex<Option<HidApi>>,
}

impl HidApiLocator {
    pub fn new() -> Self {
        Self {
            api: Mutex::new(None),
        }
    }

    fn with_api<T>(
        &self,
        f: impl FnOnce(&mut HidApi) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut slot = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        let api = match slot.take() {
            Some(api) => api,
            None => HidApi::new().map_err(|e| DeviceError::Init(e.to_string()))?,
        };
        f(slot.insert(api))
    }
}

impl Default for HidApiLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLocator for HidApiLocator {
    fn find_candidates(&self) -> Result<Vec<DeviceCandidate>, DeviceError> {
        self.with_api(|api| {
            api.refresh_devices()
                .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

            let mut seen = HashSet::new();
            let candidates: Vec<DeviceCandidate> = api
                .device_list()
                .filter(|d| {
                    is_supported_interface(d.vendor_id(), d.product_id(), d.usage_page(), d.usage())
                })
                .map(|d| d.path().to_string_lossy().into_owned())
                .filter(|path| seen.insert(path.clone()))
                .map(|device_path| DeviceCandidate {
                    device_path,
                    max_output_report_length: 0,
                })
                .collect();

            debug!(count = candidates.len(), "HID discovery pass finished");
            Ok(candidates)
        })
    }

    fn open(&self, candidate: &DeviceCandidate) -> Result<Box<dyn HidChannel>, DeviceError> {
        let open_error = |reason: String| DeviceError::Open {
            path: candidate.device_path.clone(),
            reason,
        };

        let path = CString::new(candidate.device_path.as_bytes())
            .map_err(|e| open_error(e.to_string()))?;
        let device = self.with_api(|api| api.open_path(&path).map_err(|e| open_error(e.to_string())))?;

        Ok(Box::new(HidApiChannel {
            device,
            path: candidate.device_path.clone(),
        }))
    }
}

/// An open `hidapi` device. Closed on drop.
struct HidApiChannel {
    device: HidDevice,
    path: String,
}

impl HidChannel for HidApiChannel {
    fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError> {
        let written = self.device.write(report).map_err(|e| DeviceError::Write {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        if written < report.len() {
            return Err(DeviceError::ShortWrite {
                path: self.path.clone(),
                written,
                expected: report.len(),
            });
        }
        Ok(())
    }
}

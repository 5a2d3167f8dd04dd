//! Windows foreground-process lookup via `GetForegroundWindow` and the
//! Tool Help snapshot API.
//!
//! The image name of the focused window's process is read with
//! `QueryFullProcessImageNameW`, which works for elevated processes as long
//! as `PROCESS_QUERY_LIMITED_INFORMATION` is granted.

use std::path::Path;

use tracing::debug;
use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};

use super::{ForegroundProcessSource, ProcessSnapshot};

/// Upper bound for `QueryFullProcessImageNameW`; long-path aware.
const IMAGE_PATH_CAPACITY: usize = 32_768;

/// Closes the wrapped handle on drop.
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by a successful Win32 call and is
        // closed exactly once, here.
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// [`ForegroundProcessSource`] backed by the Win32 window manager.
#[derive(Debug, Default)]
pub struct WindowsForegroundSource;

impl WindowsForegroundSource {
    pub fn new() -> Self {
        Self
    }
}

impl ForegroundProcessSource for WindowsForegroundSource {
    fn current_foreground_process(&self) -> Option<String> {
        // SAFETY: GetForegroundWindow has no preconditions; a null handle
        // means no window has focus (e.g. during a desktop switch).
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.0.is_null() {
            return None;
        }

        let mut pid: u32 = 0;
        // SAFETY: `pid` is a valid, writable u32 for the duration of the call.
        unsafe {
            GetWindowThreadProcessId(hwnd, Some(&mut pid as *mut u32));
        }
        if pid == 0 {
            return None;
        }

        image_name_for_pid(pid)
    }
}

fn image_name_for_pid(pid: u32) -> Option<String> {
    // SAFETY: OpenProcess has no pointer arguments; the returned handle is
    // owned by `OwnedHandle` and closed on drop.
    let handle = match unsafe {
        OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), pid)
    } {
        Ok(handle) => OwnedHandle(handle),
        Err(e) => {
            debug!(pid, "OpenProcess failed: {e}");
            return None;
        }
    };

    let mut buf = vec![0u16; IMAGE_PATH_CAPACITY];
    let mut len = buf.len() as u32;
    // SAFETY: `buf` holds `len` u16 elements and outlives the call; the API
    // writes at most `len` characters and updates `len` with the count.
    let result = unsafe {
        QueryFullProcessImageNameW(
            handle.0,
            PROCESS_NAME_WIN32,
            PWSTR(buf.as_mut_ptr()),
            &mut len,
        )
    };
    if let Err(e) = result {
        debug!(pid, "QueryFullProcessImageNameW failed: {e}");
        return None;
    }

    let full_path = String::from_utf16_lossy(&buf[..len as usize]);
    Path::new(&full_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// [`ProcessSnapshot`] backed by `CreateToolhelp32Snapshot`.
#[derive(Debug, Default)]
pub struct WindowsProcessSnapshot;

impl WindowsProcessSnapshot {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSnapshot for WindowsProcessSnapshot {
    fn running_process_names(&self) -> Vec<String> {
        // SAFETY: no pointer arguments; the handle is closed by `OwnedHandle`.
        let snapshot = match unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) } {
            Ok(handle) => OwnedHandle(handle),
            Err(e) => {
                debug!("CreateToolhelp32Snapshot failed: {e}");
                return Vec::new();
            }
        };

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };

        let mut names = Vec::new();
        // SAFETY: `entry` is initialised with the correct `dwSize` and stays
        // valid across every Process32*W call on the same snapshot handle.
        let mut more = unsafe { Process32FirstW(snapshot.0, &mut entry) }.is_ok();
        while more {
            let exe = &entry.szExeFile;
            let end = exe.iter().position(|&c| c == 0).unwrap_or(exe.len());
            if end > 0 {
                names.push(String::from_utf16_lossy(&exe[..end]));
            }
            // SAFETY: see above.
            more = unsafe { Process32NextW(snapshot.0, &mut entry) }.is_ok();
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_contains_current_process() {
        // Arrange
        let own = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()));

        // Act
        let names = WindowsProcessSnapshot::new().running_process_names();

        // Assert
        let own = own.expect("test binary has a file name");
        assert!(names.iter().any(|n| n.to_lowercase() == own));
    }

    #[test]
    fn test_image_name_for_own_pid() {
        let name = image_name_for_pid(std::process::id());

        assert!(name.is_some_and(|n| n.to_lowercase().ends_with(".exe")));
    }
}

//! Linux foreground-process lookup via X11 and `/proc`.
//!
//! The focused window is read from the root window's `_NET_ACTIVE_WINDOW`
//! property, its owning PID from `_NET_WM_PID`, and the executable name from
//! `/proc/<pid>/exe` (falling back to `/proc/<pid>/comm`, which the kernel
//! truncates to 15 bytes).
//!
//! The X11 connection is opened lazily and dropped on any protocol error, so
//! a restarted X server is picked up on the next sample. Wayland sessions
//! without XWayland report nothing.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{self, Atom, AtomEnum, Window};
use x11rb::rust_connection::RustConnection;

use super::{ForegroundProcessSource, ProcessSnapshot};

struct X11Session {
    conn: RustConnection,
    root: Window,
    net_active_window: Atom,
    net_wm_pid: Atom,
}

impl X11Session {
    fn connect() -> Result<Self, String> {
        let (conn, screen_num) =
            RustConnection::connect(None).map_err(|e| format!("X11 connect failed: {e}"))?;

        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| format!("X11 screen {screen_num} not found"))?;

        let net_active_window = intern(&conn, b"_NET_ACTIVE_WINDOW")?;
        let net_wm_pid = intern(&conn, b"_NET_WM_PID")?;

        Ok(Self {
            conn,
            root,
            net_active_window,
            net_wm_pid,
        })
    }

    /// Returns the PID owning the active window, or `None` if there is no
    /// active window or it does not advertise a PID.
    fn active_window_pid(&self) -> Result<Option<u32>, String> {
        let Some(window) =
            self.read_u32_property(self.root, self.net_active_window, AtomEnum::WINDOW)?
        else {
            return Ok(None);
        };
        if window == 0 {
            return Ok(None);
        }

        self.read_u32_property(window, self.net_wm_pid, AtomEnum::CARDINAL)
    }

    fn read_u32_property(
        &self,
        window: Window,
        property: Atom,
        kind: AtomEnum,
    ) -> Result<Option<u32>, String> {
        let reply = xproto::get_property(&self.conn, false, window, property, kind, 0, 1)
            .map_err(|e| format!("get_property: {e}"))?
            .reply()
            .map_err(|e| format!("get_property reply: {e}"))?;

        // `value32` is `None` unless the property has 32-bit format.
        Ok(reply.value32().and_then(|mut values| values.next()))
    }
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom, String> {
    Ok(xproto::intern_atom(conn, false, name)
        .map_err(|e| format!("intern_atom: {e}"))?
        .reply()
        .map_err(|e| format!("intern_atom reply: {e}"))?
        .atom)
}

/// [`ForegroundProcessSource`] for X11 desktops (including XWayland).
pub struct X11ForegroundSource {
    session: Mutex<Option<X11Session>>,
}

impl X11ForegroundSource {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }
}

impl Default for X11ForegroundSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundProcessSource for X11ForegroundSource {
    fn current_foreground_process(&self) -> Option<String> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        let session = match slot.take() {
            Some(session) => session,
            None => match X11Session::connect() {
                Ok(session) => session,
                Err(e) => {
                    debug!("foreground lookup unavailable: {e}");
                    return None;
                }
            },
        };

        match session.active_window_pid() {
            Ok(pid) => {
                *slot = Some(session);
                pid.and_then(process_name_for_pid)
            }
            Err(e) => {
                debug!("X11 query failed, reconnecting on next sample: {e}");
                None
            }
        }
    }
}

/// Returns the executable file name of `pid`, or `None` if the process is
/// gone or inaccessible.
fn process_name_for_pid(pid: u32) -> Option<String> {
    let proc_dir = Path::new("/proc").join(pid.to_string());

    if let Ok(exe) = fs::read_link(proc_dir.join("exe")) {
        if let Some(name) = exe.file_name() {
            return Some(name.to_string_lossy().into_owned());
        }
    }

    read_comm(&proc_dir)
}

fn read_comm(proc_dir: &Path) -> Option<String> {
    let comm = fs::read_to_string(proc_dir.join("comm")).ok()?;
    let name = comm.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// [`ProcessSnapshot`] that lists `/proc/<pid>/comm` for every process.
#[derive(Debug, Default)]
pub struct ProcfsProcessSnapshot;

impl ProcfsProcessSnapshot {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSnapshot for ProcfsProcessSnapshot {
    fn running_process_names(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir("/proc") else {
            return Vec::new();
        };

        entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
            })
            .filter_map(|entry| read_comm(&entry.path()))
            .collect()
    }
}

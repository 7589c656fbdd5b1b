//! X11 probes: foreground window and user idle time

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::screensaver::{self, ConnectionExt as ScreensaverExt};
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as XprotoExt, Window};
use x11rb::rust_connection::RustConnection;

use super::{ForegroundSource, procfs};
use crate::constants::paths;
use crate::idle::IdleSource;
use crate::matcher::Foreground;

/// Pre-cached X11 atoms to avoid repeated roundtrips
pub struct CachedAtoms {
    pub wm_name: Atom,
    pub net_wm_name: Atom,
    pub utf8_string: Atom,
    pub net_wm_pid: Atom,
    pub net_active_window: Atom,
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom> {
    let label = String::from_utf8_lossy(name);
    Ok(conn
        .intern_atom(false, name)
        .with_context(|| format!("Failed to intern {label} atom"))?
        .reply()
        .with_context(|| format!("Failed to get reply for {label} atom"))?
        .atom)
}

impl CachedAtoms {
    pub fn new(conn: &RustConnection) -> Result<Self> {
        Ok(Self {
            wm_name: intern(conn, b"WM_NAME")?,
            net_wm_name: intern(conn, b"_NET_WM_NAME")?,
            utf8_string: intern(conn, b"UTF8_STRING")?,
            net_wm_pid: intern(conn, b"_NET_WM_PID")?,
            net_active_window: intern(conn, b"_NET_ACTIVE_WINDOW")?,
        })
    }
}

/// Connection to the X server used by the scheduler thread
pub struct X11Session {
    conn: RustConnection,
    root: Window,
    atoms: CachedAtoms,
    has_screensaver: bool,
    proc_root: PathBuf,
}

impl X11Session {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X11 server")?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .context("X11 screen not found")?;
        let atoms = CachedAtoms::new(&conn)?;
        let has_screensaver = conn
            .extension_information(screensaver::X11_EXTENSION_NAME)
            .context("Failed to query screensaver extension")?
            .is_some();
        info!(screen = screen_num, screensaver = has_screensaver, "Connected to X11");

        Ok(Self {
            conn,
            root,
            atoms,
            has_screensaver,
            proc_root: PathBuf::from(paths::PROC),
        })
    }

    pub fn active_window(&self) -> Result<Option<Window>> {
        let prop = self
            .conn
            .get_property(false, self.root, self.atoms.net_active_window, AtomEnum::WINDOW, 0, 1)
            .context("Failed to query _NET_ACTIVE_WINDOW property")?
            .reply()
            .context("Failed to get reply for _NET_ACTIVE_WINDOW query")?;
        Ok(prop.value32().and_then(|mut values| values.next()).filter(|w| *w != 0))
    }

    pub fn window_pid(&self, window: Window) -> Result<Option<u32>> {
        let prop = self
            .conn
            .get_property(false, window, self.atoms.net_wm_pid, AtomEnum::CARDINAL, 0, 1)
            .with_context(|| format!("Failed to query _NET_WM_PID property for window {window}"))?
            .reply()
            .with_context(|| format!("Failed to get _NET_WM_PID reply for window {window}"))?;
        Ok(prop.value32().and_then(|mut values| values.next()))
    }

    /// `_NET_WM_NAME`, falling back to `WM_NAME`
    pub fn window_title(&self, window: Window) -> Result<String> {
        for (atom, kind) in [
            (self.atoms.net_wm_name, self.atoms.utf8_string),
            (self.atoms.wm_name, AtomEnum::STRING.into()),
        ] {
            let prop = self
                .conn
                .get_property(false, window, atom, kind, 0, 1024)
                .with_context(|| format!("Failed to query title property for window {window}"))?
                .reply()
                .with_context(|| format!("Failed to get title reply for window {window}"))?;
            if !prop.value.is_empty() {
                return Ok(String::from_utf8_lossy(&prop.value).into_owned());
            }
        }
        Ok(String::new())
    }

    fn query_foreground(&self) -> Result<Option<Foreground>> {
        let Some(window) = self.active_window()? else {
            return Ok(None);
        };
        let Some(pid) = self.window_pid(window)? else {
            debug!(window, "_NET_WM_PID not set on active window");
            return Ok(None);
        };
        let Some(process) = procfs::process_name(&self.proc_root, pid) else {
            debug!(window, pid, "Cannot resolve process of active window");
            return Ok(None);
        };
        let title = self.window_title(window)?;
        Ok(Some(Foreground { process, title }))
    }
}

impl ForegroundSource for X11Session {
    fn foreground(&self) -> Option<Foreground> {
        self.query_foreground()
            .inspect_err(|e| debug!(error = ?e, "Foreground query failed"))
            .ok()
            .flatten()
    }
}

impl IdleSource for X11Session {
    fn idle_time(&self) -> Option<Duration> {
        if !self.has_screensaver {
            return None;
        }
        let reply = self
            .conn
            .screensaver_query_info(self.root)
            .context("Failed to query screensaver info")
            .and_then(|cookie| cookie.reply().context("Failed to get screensaver info reply"))
            .inspect_err(|e| debug!(error = ?e, "Idle query failed"))
            .ok()?;
        Some(Duration::from_millis(u64::from(reply.ms_since_user_input)))
    }
}

//! Desktop-environment probes the scheduler reads every tick
//!
//! Each probe is a trait so the engine runs headless and tests inject fakes.

pub mod procfs;
pub mod x11;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::constants::{paths, timing};
use crate::idle::{IdleSource, NeverIdle};
use crate::matcher::Foreground;

/// Process and title of the focused window
pub trait ForegroundSource: Send + Sync {
    fn foreground(&self) -> Option<Foreground>;
}

/// Whether a process with the given (case-insensitive) name is running
pub trait ProcessSource: Send + Sync {
    fn is_running(&self, process: &str) -> bool;

    fn any_running(&self, processes: &[String]) -> bool {
        processes.iter().any(|p| self.is_running(p))
    }
}

/// No display: nothing is ever focused, so the desktop profile is current
#[derive(Debug, Default, Clone, Copy)]
pub struct NoForeground;

impl ForegroundSource for NoForeground {
    fn foreground(&self) -> Option<Foreground> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProcesses;

impl ProcessSource for NoProcesses {
    fn is_running(&self, _process: &str) -> bool {
        false
    }
}

/// Probes for the current session
pub struct Platform {
    pub foreground: Arc<dyn ForegroundSource>,
    pub processes: Arc<dyn ProcessSource>,
    pub idle: Arc<dyn IdleSource>,
}

impl Platform {
    pub fn headless() -> Self {
        Self {
            foreground: Arc::new(NoForeground),
            processes: Arc::new(procfs::ProcessMonitor::new(
                paths::PROC,
                Duration::from_millis(timing::PROCESS_SCAN_INTERVAL_MS),
            )),
            idle: Arc::new(NeverIdle),
        }
    }

    /// X11 when a display is reachable, headless otherwise
    pub fn detect() -> Self {
        let mut platform = Self::headless();
        match x11::X11Session::connect() {
            Ok(session) => {
                let session = Arc::new(session);
                platform.foreground = session.clone();
                platform.idle = session;
            }
            Err(e) => {
                warn!(error = ?e, "No X11 display, running headless");
            }
        }
        info!("Platform probes ready");
        platform
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Foreground fake driven by the test
    #[derive(Debug, Default)]
    pub struct FakeForeground(pub Mutex<Option<Foreground>>);

    impl FakeForeground {
        pub fn set(&self, process: &str, title: &str) {
            *self.0.lock() = Some(Foreground {
                process: process.to_string(),
                title: title.to_string(),
            });
        }
    }

    impl ForegroundSource for FakeForeground {
        fn foreground(&self) -> Option<Foreground> {
            self.0.lock().clone()
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeProcesses(pub Mutex<HashSet<String>>);

    impl FakeProcesses {
        pub fn start(&self, process: &str) {
            self.0.lock().insert(process.to_lowercase());
        }
    }

    impl ProcessSource for FakeProcesses {
        fn is_running(&self, process: &str) -> bool {
            self.0.lock().contains(&process.to_lowercase())
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeIdle(pub Mutex<Option<Duration>>);

    impl IdleSource for FakeIdle {
        fn idle_time(&self) -> Option<Duration> {
            *self.0.lock()
        }
    }
}

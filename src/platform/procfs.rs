//! Process inspection through `/proc`
//!
//! Wine-hosted games show up as `wine64-preloader`; their real executable is
//! recovered from the command line.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::ProcessSource;
use crate::constants::wine;

/// Lowercased executable name of a process, wine-aware
pub fn process_name(proc_root: &Path, pid: u32) -> Option<String> {
    let dir = proc_root.join(pid.to_string());
    let exe = fs::read_link(dir.join("exe")).ok();

    let hosted_by_wine = exe.as_ref().is_none_or(|path| {
        let path = path.to_string_lossy();
        path.contains(wine::WINE64_PRELOADER) || path.contains(wine::WINE_PRELOADER)
    });

    if hosted_by_wine
        && let Some(name) = fs::read(dir.join("cmdline")).ok().and_then(|c| exe_from_cmdline(&c))
    {
        return Some(name);
    }

    if let Some(name) = exe
        .as_ref()
        .and_then(|path| path.file_name())
        .map(|n| n.to_string_lossy().to_lowercase())
    {
        return Some(name);
    }

    fs::read_to_string(dir.join("comm"))
        .ok()
        .map(|comm| comm.trim().to_lowercase())
        .filter(|comm| !comm.is_empty())
}

/// First `*.exe` argument of a NUL-separated command line, file name only
pub fn exe_from_cmdline(cmdline: &[u8]) -> Option<String> {
    cmdline
        .split(|b| *b == 0)
        .map(String::from_utf8_lossy)
        .find(|arg| arg.to_lowercase().ends_with(".exe"))
        .map(|arg| {
            let name = arg.rsplit(['\\', '/']).next().unwrap_or(arg.as_ref());
            name.to_lowercase()
        })
}

/// Names of every process visible under `proc_root`
pub fn scan(proc_root: &Path) -> HashSet<String> {
    let Ok(entries) = fs::read_dir(proc_root) else {
        debug!(path = %proc_root.display(), "Process root not readable");
        return HashSet::new();
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| process_name(proc_root, pid))
        .collect()
}

#[derive(Debug)]
struct ScanCache {
    names: HashSet<String>,
    scanned_at: Option<Instant>,
}

fn timed_scan(root: &Path) -> HashSet<String> {
    let started = Instant::now();
    let names = scan(root);
    trace!(count = names.len(), elapsed_us = started.elapsed().as_micros() as u64, "Rescanned running processes");
    names
}

/// Running-process lookup backed by a periodically refreshed `/proc` scan
///
/// Only the first lookup scans inline. Later refreshes run on a helper
/// thread while callers keep reading the previous scan.
#[derive(Debug)]
pub struct ProcessMonitor {
    root: PathBuf,
    max_age: Duration,
    cache: Arc<Mutex<ScanCache>>,
    refreshing: Arc<AtomicBool>,
}

impl ProcessMonitor {
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            root: root.into(),
            max_age,
            cache: Arc::new(Mutex::new(ScanCache {
                names: HashSet::new(),
                scanned_at: None,
            })),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn refresh_in_background(&self) {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return;
        }
        let root = self.root.clone();
        let cache = self.cache.clone();
        let refreshing = self.refreshing.clone();
        let spawned = thread::Builder::new()
            .name("lightstack-procscan".to_string())
            .spawn(move || {
                let names = timed_scan(&root);
                let mut cache = cache.lock();
                cache.names = names;
                cache.scanned_at = Some(Instant::now());
                refreshing.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn process scan thread");
            self.refreshing.store(false, Ordering::Release);
        }
    }
}

impl ProcessSource for ProcessMonitor {
    fn is_running(&self, process: &str) -> bool {
        let process = process.to_lowercase();
        let mut cache = self.cache.lock();
        match cache.scanned_at {
            None => {
                cache.names = timed_scan(&self.root);
                cache.scanned_at = Some(Instant::now());
            }
            Some(at) if at.elapsed() >= self.max_age => {
                drop(cache);
                self.refresh_in_background();
                return self.cache.lock().names.contains(&process);
            }
            Some(_) => {}
        }
        cache.names.contains(&process)
    }
}

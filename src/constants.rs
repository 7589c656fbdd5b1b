//! Application-wide constants
//!
//! Magic numbers and string literals used throughout the engine, kept in one
//! place so timing and storage conventions have a single source of truth.

/// Update loop timing
pub mod timing {
    /// Default target interval between tick starts
    pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 30;

    /// Lower bound for the post-tick sleep, keeps the loop from spinning
    pub const MIN_TICK_SLEEP_MS: u64 = 1;

    /// Quiet period after the last mutation before a variant is written
    pub const SAVE_DEBOUNCE_MS: u64 = 850;

    /// Delay between successive profile initializations at startup
    pub const INIT_STAGGER_MS: u64 = 25;

    /// How long shutdown waits for in-flight initialization
    pub const SHUTDOWN_WAIT_MS: u64 = 3000;

    /// How often the running-process list is rescanned
    pub const PROCESS_SCAN_INTERVAL_MS: u64 = 1000;
}

/// Concurrency limits
pub mod workers {
    /// Maximum number of profile initializations running at once
    pub const MAX_CONCURRENT_INITS: usize = 4;
}

/// Config file location
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "lightstack";

    /// Settings file name
    pub const FILENAME: &str = "settings.json";

    /// Directory holding one sub-directory per profile
    pub const PROFILES_DIR: &str = "profiles";
}

/// Persisted variant layout
pub mod storage {
    /// Per-profile manifest (selected variant and variant order)
    pub const MANIFEST_FILENAME: &str = "profile.json";

    /// Extension of variant documents
    pub const VARIANT_EXTENSION: &str = "json";

    /// Suffix of the in-progress write
    pub const TEMP_SUFFIX: &str = "tmp";

    /// Suffix of the previous good copy
    pub const BACKUP_SUFFIX: &str = "bak";

    /// Suffix given to files that failed to parse
    pub const CORRUPT_SUFFIX: &str = "corrupt";

    /// Name of the variant created when a profile has none on disk
    pub const DEFAULT_VARIANT_NAME: &str = "default";
}

/// Profile identities the engine relies on
pub mod profiles {
    /// Fallback profile used when nothing else matches
    pub const DESKTOP_ID: &str = "desktop";
}

/// Control socket
pub mod ipc {
    /// Socket path below `XDG_RUNTIME_DIR` (or the cache dir as fallback)
    pub const SOCKET_RELATIVE_PATH: &str = "lightstack/control.sock";

    /// Maximum accepted message size
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

    /// How often the listener checks for connections and shutdown
    pub const ACCEPT_POLL_MS: u64 = 100;

    /// A client silent for this long is disconnected
    pub const CLIENT_READ_TIMEOUT_MS: u64 = 5000;
}

/// Wine process detection constants
pub mod wine {
    /// Wine 64-bit preloader process name
    pub const WINE64_PRELOADER: &str = "wine64-preloader";

    /// Wine 32-bit preloader process name
    pub const WINE_PRELOADER: &str = "wine-preloader";
}

/// Procfs paths
pub mod paths {
    /// Root of the process filesystem
    pub const PROC: &str = "/proc";
}

/// Validation ranges for settings
pub mod validation {
    /// Smallest accepted update interval
    pub const MIN_UPDATE_INTERVAL_MS: u64 = 5;

    /// Largest accepted update interval
    pub const MAX_UPDATE_INTERVAL_MS: u64 = 1000;

    /// Largest accepted diagnostic delay
    pub const MAX_DEBUG_DELAY_MS: u64 = 5000;
}

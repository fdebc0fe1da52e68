//! Central path resolution for taskdeck data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `TASKDECK_DATA_DIR` env > `~/.taskdeck`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Initialize the global data directory. Returns the resolved path.
///
/// Priority: `explicit` arg > `TASKDECK_DATA_DIR` env > `~/.taskdeck`, falling
/// back to the system temp dir when there is no home directory.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("TASKDECK_DATA_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".taskdeck")
    };

    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir.clone());
    dir
}

/// Current data directory; the default location if `init_data_dir` was never called.
pub fn data_dir() -> PathBuf {
    let current = DATA_DIR
        .read()
        .map(|guard| guard.clone())
        .unwrap_or_else(|e| e.into_inner().clone());
    current.unwrap_or_else(|| init_data_dir(None))
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(log_dir())
}

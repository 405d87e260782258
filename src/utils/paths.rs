//! Locations of the application's on-disk state.
//!
//! Everything lives under `~/.shex` (falling back to the current directory
//! when no home directory can be determined). Kept dependency-free on
//! purpose; OS-native config dirs can come later.

use std::path::PathBuf;

/// The application directory, `~/.shex`.
pub fn app_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".shex")
}

/// Environment file consulted for credentials (`~/.shex/env`).
pub fn env_path() -> PathBuf {
    app_dir().join("env")
}

/// Query history file (`~/.shex/history`).
pub fn history_path() -> PathBuf {
    app_dir().join("history")
}

/// Persisted conversation context (`~/.shex/context.json`).
pub fn context_path() -> PathBuf {
    app_dir().join("context.json")
}

/// Directory for log files (`~/.shex/logs`).
pub fn log_dir() -> PathBuf {
    app_dir().join("logs")
}

//! Logging initialization and configuration.
//!
//! Logs go to files under `~/.shex/logs/` so they never interfere with the
//! interactive terminal session. One file per day; repeated runs on the same
//! day append to it.
//!
//! # Configuration
//!
//! The log level is controlled via the `RUST_LOG` environment variable:
//! - `RUST_LOG=debug` - Show debug and higher level logs
//! - `RUST_LOG=info` - Show info and higher level logs (default)
//! - `RUST_LOG=warn` - Show warnings and errors only

use std::fs;

use chrono::Local;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Initialize the logging system.
///
/// Sets up file-based logging under the application directory, writing to a
/// daily file such as `~/.shex/logs/shex.2024-12-06.log`. The log level
/// defaults to `info` when `RUST_LOG` is not set.
pub fn init_logging() {
    let log_dir = paths::log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        return;
    }

    let log_path = log_dir.join(format!("shex.{}.log", Local::now().format("%Y-%m-%d")));
    let log_file = match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Failed to open log file: {}", e);
            return;
        }
    };

    // Non-blocking writer so slow disks never stall the session.
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // No ANSI colors in log files
        .with_target(true);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    // Keep the non-blocking writer alive for the whole program lifetime.
    std::mem::forget(guard);

    tracing::info!("Logging initialized - writing to {}", log_path.display());
}

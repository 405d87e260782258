//! Query history.
//!
//! Every query is appended to a plain text file, one per line, skipping an
//! immediate duplicate of the last entry. History is best-effort: failures
//! are logged and never interrupt the run.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use super::paths;

/// Append `query` to the default history file, best-effort.
pub fn save_query(query: &str) {
    if let Err(e) = append_query(&paths::history_path(), query) {
        warn!("Failed to save history: {:#}", e);
    }
}

/// Append `query` to the history file at `path`, unless it repeats the last
/// saved entry.
pub fn append_query(path: &Path, query: &str) -> Result<()> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing.lines().next_back() == Some(query) {
            return Ok(());
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{query}").context("Failed to append history entry")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("shex-history-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_appends_queries_in_order() {
        let path = temp_path("order");
        fs::remove_file(&path).ok();

        append_query(&path, "first").unwrap();
        append_query(&path, "second").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_skips_duplicate_of_last_entry() {
        let path = temp_path("dedupe");
        fs::remove_file(&path).ok();

        append_query(&path, "same").unwrap();
        append_query(&path, "same").unwrap();
        append_query(&path, "other").unwrap();
        append_query(&path, "same").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(content, "same\nother\nsame\n");
    }
}

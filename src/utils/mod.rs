//! Utility modules for common functionality.
//!
//! This module contains utility functions and helpers used throughout
//! the application: logging configuration, on-disk paths, and query history.

pub mod history;
pub mod logger;
pub mod paths;

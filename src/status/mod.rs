//! Terminal status reporting.

pub mod spinner;

pub use spinner::Spinner;

//! Formatted output helpers for CLI commands.
//!
//! Provides consistent table cells for optional values and timestamps.

use std::fmt::Display;
use std::time::SystemTime;

use chrono::{DateTime, Local};

/// Placeholder for a missing table cell.
pub const MISSING: &str = "-";

/// Formats a creation time in local time, e.g. `2024-05-01 12:30:00`.
#[must_use]
pub fn format_created(created: Option<SystemTime>) -> String {
    created.map_or_else(
        || MISSING.to_string(),
        |time| DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

/// Formats an optional value, using [`MISSING`] when absent.
#[must_use]
pub fn or_missing<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| v.to_string())
}

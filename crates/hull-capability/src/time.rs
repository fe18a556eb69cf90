// SPDX-License-Identifier: MIT OR Apache-2.0
//! Clocks: monotonic for intervals, wall-clock for timestamps.
//!
//! No ambient timezone beyond UTC; formatting takes a per-call format
//! string.

use chrono::{TimeZone, Utc};
use hull_core::{CapError, CapResult};
use std::fmt::Write as _;
use std::time::Instant;

/// Process clocks.
#[derive(Debug, Clone)]
pub struct Clock {
    start: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Start the monotonic reference at construction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the clock was created. Never goes backward.
    #[must_use]
    pub fn monotonic_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Wall-clock milliseconds since the Unix epoch.
    #[must_use]
    pub fn now_unix_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Format a Unix-millisecond timestamp in UTC.
    ///
    /// # Errors
    ///
    /// `Invalid` for an out-of-range timestamp or a malformed format
    /// string.
    pub fn format_utc(&self, unix_ms: i64, fmt: &str) -> CapResult<String> {
        let dt = Utc
            .timestamp_millis_opt(unix_ms)
            .single()
            .ok_or_else(|| CapError::Invalid(format!("timestamp out of range: {unix_ms}")))?;
        let mut out = String::new();
        write!(out, "{}", dt.format(fmt))
            .map_err(|_| CapError::Invalid(format!("bad format string: {fmt}")))?;
        Ok(out)
    }
}

//! Production Environment implementation using the tokio clock.
//!
//! `SystemEnv` reads monotonic time from `tokio::time::Instant`, so the same
//! code runs under paused tokio time in tests, and wall-clock time from the
//! system clock for message timestamps.

use chrono::{DateTime, Utc};
use medichat_core::Environment;

/// Production environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

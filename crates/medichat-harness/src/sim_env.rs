//! Simulated environment for deterministic tests.
//!
//! Monotonic time is tokio's clock, so tests run with paused time and advance
//! it explicitly. Wall-clock time is a fixed epoch plus the time elapsed since
//! the environment was created, which makes message timestamps identical on
//! every run.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use medichat_core::Environment;
use tokio::time::Instant;

/// Deterministic environment.
#[derive(Debug, Clone)]
pub struct SimEnv {
    start: Instant,
    epoch: DateTime<Utc>,
}

impl SimEnv {
    /// Environment whose wall clock starts at 2025-01-06 09:00:00 UTC.
    pub fn new() -> Self {
        let epoch = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).single().unwrap_or_default();
        Self::with_epoch(epoch)
    }

    /// Environment whose wall clock starts at `epoch`.
    pub fn with_epoch(epoch: DateTime<Utc>) -> Self {
        Self { start: Instant::now(), epoch }
    }

    /// Wall-clock time at which this environment started.
    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(Instant::now() - self.start).unwrap_or(TimeDelta::MAX);
        self.epoch + elapsed
    }
}

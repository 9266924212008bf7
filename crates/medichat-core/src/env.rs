//! Environment abstraction for deterministic testing.
//!
//! Decouples the chat core from the system clock. Production uses tokio's
//! clock and the real wall clock; simulation uses paused tokio time and a
//! wall clock derived from it, so every run of a test sees the same
//! timestamps.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Abstract environment providing monotonic and wall-clock time.
///
/// # Invariants
///
/// - `now()` never goes backwards
/// - `wall_clock()` is only used for message timestamps, never for timers
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type used for timers.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time, used to timestamp optimistic messages.
    fn wall_clock(&self) -> DateTime<Utc>;
}

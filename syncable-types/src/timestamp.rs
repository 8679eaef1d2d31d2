//! Wall-clock timestamps and the server logical clock.
//!
//! Two notions of time coexist:
//! - [`Timestamp`]: milliseconds since the Unix epoch, used for `_createdAt`
//!   and `_updatedAt` bookkeeping
//! - the logical clock: a plain `u64` assigned by the authoritative server,
//!   handed out by [`LogicalClock`] and stamped as `_clock`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_millis() as u64;

        Self(millis)
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of strictly increasing logical clock values.
///
/// The authoritative server owns one of these and passes `tick()` to every
/// change it processes, so confirmed state is totally ordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogicalClock {
    last: u64,
}

impl LogicalClock {
    /// Creates a clock starting after `last`.
    #[must_use]
    pub const fn starting_at(last: u64) -> Self {
        Self { last }
    }

    /// Returns the last value handed out.
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.last
    }

    /// Advances the clock and returns the new value.
    pub fn tick(&mut self) -> u64 {
        self.last = self.last.saturating_add(1);
        self.last
    }

    /// Moves the clock forward so the next tick is greater than `observed`.
    pub fn observe(&mut self, observed: u64) {
        self.last = self.last.max(observed);
    }
}

//! Timestamps, slots and the clock abstraction.
//!
//! Block timestamps are seconds since the network epoch. A slot is the
//! discrete bucket a timestamp falls into for a given block time; slots are
//! only ever compared, never stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the network epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The network epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// The slot this timestamp falls into.
    ///
    /// A zero block time would make every slot undefined; the milestone
    /// schedule rejects it, so it is treated as one second here.
    pub fn slot(&self, blocktime: u64) -> u64 {
        self.0 / blocktime.max(1)
    }

    /// Seconds elapsed since this timestamp (relative to `now`).
    pub fn elapsed_since(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Source of "now" for slot and sync decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock, expressed relative to the network epoch.
#[derive(Clone, Debug)]
pub struct SystemClock {
    epoch_unix_secs: u64,
}

impl SystemClock {
    /// `epoch_unix_secs` is the Unix time of the network epoch.
    pub fn new(epoch_unix_secs: u64) -> Self {
        Self { epoch_unix_secs }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // A clock set before 1970 reads as the network epoch.
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Timestamp(unix.saturating_sub(self.epoch_unix_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_integer_division() {
        assert_eq!(Timestamp::new(0).slot(8), 0);
        assert_eq!(Timestamp::new(7).slot(8), 0);
        assert_eq!(Timestamp::new(8).slot(8), 1);
        assert_eq!(Timestamp::new(17).slot(8), 2);
    }

    #[test]
    fn system_clock_is_relative_to_epoch() {
        let clock = SystemClock::new(u64::MAX);
        assert_eq!(clock.now(), Timestamp::EPOCH);
    }
}

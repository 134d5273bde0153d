// Copyright (C) 2023 Nitrokey GmbH
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::time::Duration;

/// Device clock, synchronized by the host.
///
/// Reads 0 until the first TIME_SYNC. Afterwards it advances with the platform uptime.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Clock {
    synced: Option<SyncPoint>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct SyncPoint {
    timestamp: u64,
    uptime: Duration,
}

impl Clock {
    pub fn sync(&mut self, timestamp: u64, uptime: Duration) {
        self.synced = Some(SyncPoint { timestamp, uptime });
    }

    /// Unix time in seconds, given the current platform uptime.
    pub fn now(&self, uptime: Duration) -> u64 {
        match self.synced {
            None => 0,
            Some(sync) => sync
                .timestamp
                .saturating_add(uptime.saturating_sub(sync.uptime).as_secs()),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced.is_some()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsynced_clock_reads_zero() {
        let clock = Clock::default();
        assert!(!clock.is_synced());
        assert_eq!(clock.now(Duration::from_secs(1000)), 0);
    }

    #[test]
    fn advances_with_uptime_after_sync() {
        let mut clock = Clock::default();
        clock.sync(1_700_000_000, Duration::from_millis(5_500));
        assert_eq!(clock.now(Duration::from_millis(5_500)), 1_700_000_000);
        assert_eq!(clock.now(Duration::from_millis(6_499)), 1_700_000_000);
        assert_eq!(clock.now(Duration::from_secs(65)), 1_700_000_059);
    }

    #[test]
    fn resync_overwrites_and_reset_clears() {
        let mut clock = Clock::default();
        clock.sync(100, Duration::from_secs(10));
        clock.sync(59, Duration::from_secs(20));
        assert_eq!(clock.now(Duration::from_secs(20)), 59);
        clock.reset();
        assert_eq!(clock.now(Duration::from_secs(30)), 0);
    }

    #[test]
    fn does_not_overflow() {
        let mut clock = Clock::default();
        clock.sync(u64::MAX, Duration::ZERO);
        assert_eq!(clock.now(Duration::from_secs(10)), u64::MAX);
    }
}

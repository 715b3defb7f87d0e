//! Wall-clock reconstruction for monotonic capture timestamps
//!
//! Samples are stamped with device uptime because the wall clock is unknown
//! until network time arrives. [`ClockEpoch`] records the wall-clock time of
//! uptime zero once a time source reports it, and [`ClockReconciler`] turns a
//! capture timestamp into nanoseconds since the Unix epoch.
//!
//! Synchronization is one-way: once an epoch offset has been set it can be
//! corrected, but the clock never goes back to unsynchronized.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::info;
use thiserror_no_std::Error;

/// Wall clocks earlier than 2016-01-01T00:00:00Z have not been set yet.
pub const MIN_VALID_UNIX_SECS: u64 = 1_451_606_400;

const NANOS_PER_MICRO: i64 = 1_000;
const MICROS_PER_SEC: u64 = 1_000_000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("Wall clock reads {unix_secs}s since the Unix epoch and has not been set")]
    WallClockNotSet { unix_secs: u64 },
}

/// Absolute timestamp in nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixNanos(pub i64);

impl UnixNanos {
    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for UnixNanos {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide record of the wall-clock time at boot
///
/// Written by the time-sync collaborator, read by the uploader. `None` means
/// not yet synchronized.
pub struct ClockEpoch {
    epoch_offset_usec: Mutex<CriticalSectionRawMutex, Cell<Option<i64>>>,
}

impl ClockEpoch {
    pub const fn new() -> Self {
        Self {
            epoch_offset_usec: Mutex::new(Cell::new(None)),
        }
    }

    /// Record the wall-clock time of uptime zero, in microseconds since the Unix epoch.
    ///
    /// Calling this again only moves the offset; the epoch stays synchronized.
    pub fn synchronize(&self, epoch_offset_usec: i64) {
        let previous = self
            .epoch_offset_usec
            .lock(|offset| offset.replace(Some(epoch_offset_usec)));
        match previous {
            None => info!("Clock synchronized, boot epoch {}us", epoch_offset_usec),
            Some(old) => info!(
                "Clock corrected by {}us",
                epoch_offset_usec.saturating_sub(old)
            ),
        }
    }

    /// Derive the boot epoch from a wall-clock reading taken at `uptime_usec`.
    ///
    /// Rejects wall clocks before 2016, which mean the RTC still holds its
    /// power-on default.
    pub fn synchronize_from_wall_clock(
        &self,
        unix_usec: u64,
        uptime_usec: u64,
    ) -> Result<(), ClockError> {
        let unix_secs = unix_usec / MICROS_PER_SEC;
        if unix_secs < MIN_VALID_UNIX_SECS {
            return Err(ClockError::WallClockNotSet { unix_secs });
        }
        let offset = saturating_i64(unix_usec).saturating_sub(saturating_i64(uptime_usec));
        self.synchronize(offset);
        Ok(())
    }

    pub fn is_synchronized(&self) -> bool {
        self.offset().is_some()
    }

    /// Current boot epoch in microseconds, if known.
    pub fn offset(&self) -> Option<i64> {
        self.epoch_offset_usec.lock(Cell::get)
    }
}

impl Default for ClockEpoch {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts monotonic capture timestamps into wall-clock timestamps
#[derive(Clone, Copy)]
pub struct ClockReconciler<'a> {
    epoch: &'a ClockEpoch,
}

impl<'a> ClockReconciler<'a> {
    pub const fn new(epoch: &'a ClockEpoch) -> Self {
        Self { epoch }
    }

    /// Wall-clock time of `capture_monotonic`, or `None` before synchronization.
    pub fn reconstruct(&self, capture_monotonic: u64) -> Option<UnixNanos> {
        self.snapshot()
            .map(|epoch| epoch.reconstruct(capture_monotonic))
    }

    /// Freeze the current offset so a whole batch is stamped against one epoch.
    pub fn snapshot(&self) -> Option<EpochSnapshot> {
        self.epoch
            .offset()
            .map(|epoch_offset_usec| EpochSnapshot { epoch_offset_usec })
    }
}

/// A fixed boot epoch; pure, so it can be applied to the same sample repeatedly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochSnapshot {
    epoch_offset_usec: i64,
}

impl EpochSnapshot {
    pub const fn epoch_offset_usec(&self) -> i64 {
        self.epoch_offset_usec
    }

    pub fn reconstruct(&self, capture_monotonic: u64) -> UnixNanos {
        let micros = self
            .epoch_offset_usec
            .saturating_add(saturating_i64(capture_monotonic));
        UnixNanos(micros.saturating_mul(NANOS_PER_MICRO))
    }
}

/// Source of device uptime
pub trait Monotonic {
    /// Microseconds since boot; never decreases.
    fn now_micros(&self) -> u64;
}

/// Uptime from the embassy time driver
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyMonotonic;

impl Monotonic for EmbassyMonotonic {
    fn now_micros(&self) -> u64 {
        embassy_time::Instant::now().as_micros()
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOT_USEC: i64 = 1_700_000_000_000_000;

    #[test]
    fn test_unsynchronized_returns_none() {
        let epoch = ClockEpoch::new();
        let reconciler = ClockReconciler::new(&epoch);
        assert!(!epoch.is_synchronized());
        assert_eq!(reconciler.reconstruct(5_000_000), None);
        assert!(reconciler.snapshot().is_none());
    }

    #[test]
    fn test_reconstruct_after_sync() {
        let epoch = ClockEpoch::new();
        epoch.synchronize(BOOT_USEC);
        let reconciler = ClockReconciler::new(&epoch);

        let ts = reconciler.reconstruct(2_500_000).unwrap();
        assert_eq!(ts, UnixNanos((BOOT_USEC + 2_500_000) * 1_000));
        // Pure: asking again gives the same answer
        assert_eq!(reconciler.reconstruct(2_500_000), Some(ts));
    }

    #[test]
    fn test_reconstruct_is_monotonic() {
        let epoch = ClockEpoch::new();
        epoch.synchronize(BOOT_USEC);
        let reconciler = ClockReconciler::new(&epoch);

        let captures = [0u64, 1, 999, 1_000_000, 1_000_001, 86_400_000_000];
        for pair in captures.windows(2) {
            let ts1 = reconciler.reconstruct(pair[0]).unwrap();
            let ts2 = reconciler.reconstruct(pair[1]).unwrap();
            assert!(ts1 <= ts2);
        }
    }

    #[test]
    fn test_correction_keeps_synchronized() {
        let epoch = ClockEpoch::new();
        epoch.synchronize(BOOT_USEC);
        epoch.synchronize(BOOT_USEC + 1_500);

        assert!(epoch.is_synchronized());
        assert_eq!(epoch.offset(), Some(BOOT_USEC + 1_500));
    }

    #[test]
    fn test_sync_from_wall_clock() {
        let epoch = ClockEpoch::new();
        let unix_usec = 1_700_000_100_000_000u64;
        let uptime_usec = 100_000_000u64;

        epoch
            .synchronize_from_wall_clock(unix_usec, uptime_usec)
            .unwrap();
        assert_eq!(epoch.offset(), Some(BOOT_USEC));

        let reconciler = ClockReconciler::new(&epoch);
        assert_eq!(
            reconciler.reconstruct(uptime_usec),
            Some(UnixNanos(unix_usec as i64 * 1_000))
        );
    }

    #[test]
    fn test_sync_rejects_unset_wall_clock() {
        let epoch = ClockEpoch::new();
        // Ten minutes after 1970: the RTC was never set
        let result = epoch.synchronize_from_wall_clock(600_000_000, 600_000_000);
        assert_eq!(result, Err(ClockError::WallClockNotSet { unix_secs: 600 }));
        assert!(!epoch.is_synchronized());
    }

    #[test]
    fn test_snapshot_is_stable_across_correction() {
        let epoch = ClockEpoch::new();
        epoch.synchronize(BOOT_USEC);
        let snapshot = ClockReconciler::new(&epoch).snapshot().unwrap();
        epoch.synchronize(BOOT_USEC + 10);

        assert_eq!(snapshot.epoch_offset_usec(), BOOT_USEC);
        assert_eq!(
            snapshot.reconstruct(0),
            UnixNanos(BOOT_USEC * 1_000)
        );
    }
}

//! Process-wide pipeline counters and the periodic status line

use core::fmt::Display;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::ring::SampleRing;

/// Monotonic pipeline counters
///
/// Incremented by the sampler and uploader, read by anyone through
/// [`Stats::snapshot`]. Counters wrap at `u32::MAX`.
#[derive(Debug, Default)]
pub struct Stats {
    sensors_pass: AtomicU32,
    sensors_fail: AtomicU32,
    api_pass: AtomicU32,
    api_fail: AtomicU32,
    samples_dropped: AtomicU32,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            sensors_pass: AtomicU32::new(0),
            sensors_fail: AtomicU32::new(0),
            api_pass: AtomicU32::new(0),
            api_fail: AtomicU32::new(0),
            samples_dropped: AtomicU32::new(0),
        }
    }

    pub(crate) fn record_sensor_pass(&self) {
        self.sensors_pass.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sensor_fail(&self) {
        self.sensors_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_api_pass(&self) {
        self.api_pass.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_api_fail(&self) {
        self.api_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sensors_pass: self.sensors_pass.load(Ordering::Relaxed),
            sensors_fail: self.sensors_fail.load(Ordering::Relaxed),
            api_pass: self.api_pass.load(Ordering::Relaxed),
            api_fail: self.api_fail.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Successful sensor reads
    pub sensors_pass: u32,
    /// Failed sensor reads
    pub sensors_fail: u32,
    /// Upload cycles acknowledged by the endpoint
    pub api_pass: u32,
    /// Upload cycles that ended without acknowledgement
    pub api_fail: u32,
    /// Samples rejected because the ring was full
    pub samples_dropped: u32,
}

/// Human-readable status line emitted by the status task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub pending: usize,
    pub captured: usize,
    pub stats: StatsSnapshot,
}

impl StatusReport {
    pub fn capture<const N: usize>(ring: &SampleRing<N>, stats: &Stats) -> Self {
        Self {
            pending: ring.pending(),
            captured: ring.total_captured(),
            stats: stats.snapshot(),
        }
    }
}

impl Display for StatusReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Pending: {}, Count: {}: Sensor pass {} fail {} API pass {} fail {} dropped {}",
            self.pending,
            self.captured,
            self.stats.sensors_pass,
            self.stats.sensors_fail,
            self.stats.api_pass,
            self.stats.api_fail,
            self.stats.samples_dropped
        )
    }
}

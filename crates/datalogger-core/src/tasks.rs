//! Periodic task loops
//!
//! The sampler, the uploader and the status reporter each run on their own
//! ticker and only meet through the sample ring and the counters. On the
//! device every loop is spawned as a separate executor task so a slow network
//! call never delays a sensor poll:
//!
//! ```rust,ignore
//! #[embassy_executor::task]
//! async fn sampler_task(mut sampler: BoardSampler, period: Duration) {
//!     run_sampler(&mut sampler, period, &SHUTDOWN).await;
//! }
//! ```

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Ticker};
use log::info;

use crate::clock::Monotonic;
use crate::ring::SampleRing;
use crate::sampler::Sampler;
use crate::sensors::{ClimateSensor, HeapGauge, PulseCounter};
use crate::shutdown::Shutdown;
use crate::stats::{Stats, StatusReport};
use crate::uploader::{Transport, Uploader};

/// Poll the sensor every `period` until shutdown is requested.
pub async fn run_sampler<S, P, M, const N: usize>(
    sampler: &mut Sampler<'_, S, P, M, N>,
    period: Duration,
    shutdown: &Shutdown,
) where
    S: ClimateSensor,
    P: PulseCounter,
    M: Monotonic,
{
    info!("Sampler running every {}ms", period.as_millis());
    let mut ticker = Ticker::every(period);
    loop {
        sampler.sample_once().await;
        if !next_tick(&mut ticker, shutdown).await {
            break;
        }
    }
    info!("Sampler stopped");
}

/// Drain the ring every `period` until shutdown is requested.
pub async fn run_uploader<T, M, H, const N: usize>(
    uploader: &mut Uploader<'_, T, M, H, N>,
    period: Duration,
    shutdown: &Shutdown,
) where
    T: Transport,
    M: Monotonic,
    H: HeapGauge,
{
    info!("Uploader running every {}s", period.as_secs());
    let mut ticker = Ticker::every(period);
    loop {
        uploader.upload_once().await;
        if !next_tick(&mut ticker, shutdown).await {
            break;
        }
    }
    info!("Uploader stopped");
}

/// Log a [`StatusReport`] every `period` until shutdown is requested.
pub async fn run_status<const N: usize>(
    ring: &SampleRing<N>,
    stats: &Stats,
    period: Duration,
    shutdown: &Shutdown,
) {
    let mut ticker = Ticker::every(period);
    loop {
        info!("{}", StatusReport::capture(ring, stats));
        if !next_tick(&mut ticker, shutdown).await {
            break;
        }
    }
}

/// Wait for the next tick; `false` once shutdown has been requested.
async fn next_tick(ticker: &mut Ticker, shutdown: &Shutdown) -> bool {
    if shutdown.is_requested() {
        return false;
    }
    match select(ticker.next(), shutdown.wait()).await {
        Either::First(()) => !shutdown.is_requested(),
        Either::Second(()) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockEpoch;
    use crate::config::UploadConfig;
    use crate::sensors::{ClimateReading, NoFlowMeter, SensorError};
    use crate::uploader::PostError;
    use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use embassy_futures::block_on;

    struct SteadySensor;

    impl ClimateSensor for SteadySensor {
        async fn read(&mut self) -> Result<ClimateReading, SensorError> {
            Ok(ClimateReading {
                temperature_deci_celsius: 215,
                humidity_deci_percent: 600,
            })
        }
    }

    /// Strictly increasing fake uptime, shareable across threads.
    struct CountingClock(AtomicU64);

    impl Monotonic for &CountingClock {
        fn now_micros(&self) -> u64 {
            self.0.fetch_add(1_000, Ordering::Relaxed)
        }
    }

    struct NoHeap;

    impl HeapGauge for NoHeap {
        fn free_bytes(&self) -> u32 {
            0
        }
    }

    /// Accepts everything and counts the lines it was sent.
    struct CountingTransport<'a> {
        lines: &'a AtomicUsize,
    }

    impl Transport for CountingTransport<'_> {
        type Error = ();

        async fn post(&mut self, body: &[u8]) -> Result<u16, PostError<()>> {
            let lines = body.iter().filter(|&&b| b == b'\n').count();
            self.lines.fetch_add(lines, Ordering::Relaxed);
            Ok(204)
        }
    }

    #[test]
    fn test_requested_shutdown_finishes_current_cycle() {
        let ring: SampleRing<4> = SampleRing::new();
        let stats = Stats::new();
        let clock = CountingClock(AtomicU64::new(0));
        let (writer, _reader) = ring.split().unwrap();
        let mut sampler = Sampler::new(SteadySensor, NoFlowMeter, &clock, writer, &stats);

        let shutdown = Shutdown::new();
        shutdown.request();
        block_on(run_sampler(&mut sampler, Duration::from_secs(60), &shutdown));

        assert_eq!(ring.pending(), 1);
        assert_eq!(stats.snapshot().sensors_pass, 1);

        block_on(run_status(&ring, &stats, Duration::from_secs(60), &shutdown));
    }

    #[test]
    fn test_sampler_and_uploader_on_separate_threads() {
        let ring: SampleRing<32> = SampleRing::new();
        let stats = Stats::new();
        let epoch = ClockEpoch::new();
        epoch.synchronize(1_700_000_000_000_000);
        let clock = CountingClock(AtomicU64::new(0));
        let lines = AtomicUsize::new(0);
        let shutdown = Shutdown::new();
        let config = UploadConfig::default();

        let (writer, reader) = ring.split().unwrap();
        let mut sampler = Sampler::new(SteadySensor, NoFlowMeter, &clock, writer, &stats);
        let mut uploader = Uploader::new(
            reader,
            &epoch,
            &stats,
            CountingTransport { lines: &lines },
            &clock,
            NoHeap,
            &config,
        );

        std::thread::scope(|scope| {
            scope.spawn(|| {
                block_on(run_sampler(&mut sampler, Duration::from_millis(2), &shutdown))
            });
            scope.spawn(|| {
                block_on(run_uploader(&mut uploader, Duration::from_millis(7), &shutdown))
            });
            std::thread::sleep(std::time::Duration::from_millis(150));
            shutdown.request();
        });

        // Drain whatever was captured after the uploader's last cycle
        block_on(uploader.upload_once());

        let snapshot = stats.snapshot();
        let captured = ring.total_captured();
        assert!(captured > 0);
        assert_eq!(captured as u32, snapshot.sensors_pass - snapshot.samples_dropped);
        assert_eq!(ring.pending(), 0);
        assert_eq!(lines.load(Ordering::Relaxed), captured * 4);
        assert_eq!(snapshot.api_fail, 0);
    }
}

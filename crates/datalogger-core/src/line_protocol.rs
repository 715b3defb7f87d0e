//! Line-protocol encoder for the time-series endpoint
//!
//! Every sample becomes four lines, always in this order:
//!
//! ```text
//! environment,sensor=humidity value=48.3 1700000002500000000
//! environment,sensor=temperature value=21.7 1700000002500000000
//! environment,sensor=uptime value=93000000 1700000002500000000
//! environment,sensor=heap_size value=181244 1700000002500000000
//! ```
//!
//! Humidity and temperature carry one decimal. The uptime and heap gauges are
//! device-wide values taken when the batch is serialized and are written as
//! plain integers.

use alloc::string::String;
use core::fmt::{self, Display, Write};

use crate::clock::{EpochSnapshot, UnixNanos};
use crate::ring::{Sample, Tenths};

/// Lines emitted per sample.
pub const LINES_PER_SAMPLE: usize = 4;

/// Upper estimate of one encoded line, used to pre-size the request body.
pub const LINE_BYTES_ESTIMATE: usize = 96;

/// Device-wide gauges reported next to every sample of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceGauges {
    /// Uptime when the batch was serialized, in microseconds
    pub uptime_usec: u64,
    /// Free heap when the batch was serialized, in bytes
    pub free_heap_bytes: u32,
}

/// Renders samples into line protocol under one measurement name
#[derive(Debug, Clone, Copy)]
pub struct LineProtocolEncoder<'a> {
    measurement: &'a str,
}

impl<'a> LineProtocolEncoder<'a> {
    pub const fn new(measurement: &'a str) -> Self {
        Self { measurement }
    }

    /// Body capacity needed for `samples` samples.
    pub const fn body_capacity(samples: usize) -> usize {
        samples * LINES_PER_SAMPLE * LINE_BYTES_ESTIMATE
    }

    /// Append the four lines of one sample.
    pub fn encode_sample<W: Write>(
        &self,
        out: &mut W,
        sample: &Sample,
        timestamp: UnixNanos,
        gauges: &DeviceGauges,
    ) -> fmt::Result {
        self.line(out, "humidity", Tenths(sample.humidity), timestamp)?;
        self.line(out, "temperature", Tenths(sample.temperature), timestamp)?;
        self.line(out, "uptime", gauges.uptime_usec, timestamp)?;
        self.line(out, "heap_size", gauges.free_heap_bytes, timestamp)
    }

    /// Replace `body` with the encoding of `samples`, in iteration order.
    ///
    /// Every sample is stamped against the same `epoch` so one batch never
    /// mixes two clock corrections. Returns the number of samples written.
    pub fn encode_batch<I>(
        &self,
        body: &mut String,
        samples: I,
        epoch: &EpochSnapshot,
        gauges: &DeviceGauges,
    ) -> usize
    where
        I: IntoIterator<Item = Sample>,
    {
        body.clear();
        let mut count = 0;
        for sample in samples {
            let timestamp = epoch.reconstruct(sample.capture_monotonic);
            // Writing into a String cannot fail
            let _ = self.encode_sample(body, &sample, timestamp, gauges);
            count += 1;
        }
        count
    }

    fn line<W: Write>(
        &self,
        out: &mut W,
        sensor: &str,
        value: impl Display,
        timestamp: UnixNanos,
    ) -> fmt::Result {
        writeln!(
            out,
            "{},sensor={} value={} {}",
            Escaped(self.measurement),
            sensor,
            value,
            timestamp
        )
    }
}

/// Escapes commas and spaces in a measurement name.
struct Escaped<'a>(&'a str);

impl Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            if c == ',' || c == ' ' {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockEpoch, ClockReconciler};
    use alloc::vec::Vec;

    const BOOT_USEC: i64 = 1_700_000_000_000_000;

    fn epoch() -> EpochSnapshot {
        let epoch = ClockEpoch::new();
        epoch.synchronize(BOOT_USEC);
        ClockReconciler::new(&epoch).snapshot().unwrap()
    }

    const GAUGES: DeviceGauges = DeviceGauges {
        uptime_usec: 93_000_000,
        free_heap_bytes: 181_244,
    };

    #[test]
    fn test_single_sample_lines() {
        let encoder = LineProtocolEncoder::new("environment");
        let mut body = String::new();
        let sample = Sample::new(217, 483, 0, 2_500_000);

        let count = encoder.encode_batch(&mut body, [sample], &epoch(), &GAUGES);

        assert_eq!(count, 1);
        assert_eq!(
            body,
            "environment,sensor=humidity value=48.3 1700000002500000000\n\
             environment,sensor=temperature value=21.7 1700000002500000000\n\
             environment,sensor=uptime value=93000000 1700000002500000000\n\
             environment,sensor=heap_size value=181244 1700000002500000000\n"
        );
    }

    #[test]
    fn test_batch_preserves_window_order() {
        let encoder = LineProtocolEncoder::new("environment");
        let mut body = String::new();
        let samples = [
            Sample::new(100, 500, 0, 1_000_000),
            Sample::new(-15, 501, 0, 2_000_000),
            Sample::new(102, 502, 0, 3_000_000),
        ];

        encoder.encode_batch(&mut body, samples, &epoch(), &GAUGES);

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3 * LINES_PER_SAMPLE);
        for (i, block) in lines.chunks(LINES_PER_SAMPLE).enumerate() {
            assert!(block[0].contains("sensor=humidity"));
            assert!(block[1].contains("sensor=temperature"));
            assert!(block[2].contains("sensor=uptime"));
            assert!(block[3].contains("sensor=heap_size"));

            let expected_ts = alloc::format!(" {}", (BOOT_USEC + (i as i64 + 1) * 1_000_000) * 1_000);
            assert!(block.iter().all(|line| line.ends_with(expected_ts.as_str())));
        }
        assert!(lines[5].contains("value=-1.5 "));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_batch_replaces_previous_body() {
        let encoder = LineProtocolEncoder::new("environment");
        let mut body = String::from("stale");
        let count = encoder.encode_batch(&mut body, core::iter::empty(), &epoch(), &GAUGES);
        assert_eq!(count, 0);
        assert!(body.is_empty());
    }

    #[test]
    fn test_measurement_is_escaped() {
        let encoder = LineProtocolEncoder::new("garden shed,north");
        let mut line = String::new();
        encoder
            .encode_sample(
                &mut line,
                &Sample::new(0, 0, 0, 0),
                UnixNanos(1),
                &GAUGES,
            )
            .unwrap();
        assert!(line.starts_with("garden\\ shed\\,north,sensor=humidity value=0.0 1\n"));
    }

    #[test]
    fn test_body_capacity_covers_worst_case_sample() {
        let encoder = LineProtocolEncoder::new("environment");
        let mut body = String::new();
        let sample = Sample::new(i16::MIN, i16::MIN, u32::MAX, u64::MAX);
        let gauges = DeviceGauges {
            uptime_usec: u64::MAX,
            free_heap_bytes: u32::MAX,
        };
        encoder.encode_batch(&mut body, [sample], &epoch(), &gauges);
        assert!(body.len() <= LineProtocolEncoder::body_capacity(1));
    }
}

//! Periodic sensor capture into the sample ring
//!
//! Each cycle performs one sensor read and, on success, pushes a stamped
//! [`Sample`] through the ring's writer handle. There is no retry inside a
//! cycle: a failed read is counted and the next poll tries again.

use log::{debug, warn};

use crate::clock::Monotonic;
use crate::ring::{RingWriter, Sample};
use crate::sensors::{ClimateSensor, PulseCounter, SensorError};
use crate::stats::Stats;

/// Result of one sampler cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// The sample is in the ring awaiting upload
    Stored(Sample),
    /// The sensor read failed; nothing was pushed
    SensorFailed(SensorError),
    /// The ring was full and the sample was discarded
    Dropped(Sample),
}

/// Producer side of the pipeline
pub struct Sampler<'a, S, P, M, const N: usize> {
    sensor: S,
    pulses: P,
    clock: M,
    writer: RingWriter<'a, N>,
    stats: &'a Stats,
}

impl<'a, S, P, M, const N: usize> Sampler<'a, S, P, M, N>
where
    S: ClimateSensor,
    P: PulseCounter,
    M: Monotonic,
{
    pub fn new(sensor: S, pulses: P, clock: M, writer: RingWriter<'a, N>, stats: &'a Stats) -> Self {
        Self {
            sensor,
            pulses,
            clock,
            writer,
            stats,
        }
    }

    /// Run one `Sampling → Success | Failure` cycle.
    pub async fn sample_once(&mut self) -> SampleOutcome {
        let reading = match self.sensor.read().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Sensor read failed: {}", e);
                self.stats.record_sensor_fail();
                return SampleOutcome::SensorFailed(e);
            }
        };
        self.stats.record_sensor_pass();

        let sample = Sample::new(
            reading.temperature_deci_celsius,
            reading.humidity_deci_percent,
            self.pulses.take_pulses(),
            self.clock.now_micros(),
        );

        match self.writer.push(sample) {
            Ok(()) => {
                debug!("{}", sample);
                SampleOutcome::Stored(sample)
            }
            Err(_) => {
                warn!(
                    "Sample ring full ({} pending), dropping newest sample",
                    self.writer.pending()
                );
                self.stats.record_sample_dropped();
                SampleOutcome::Dropped(sample)
            }
        }
    }
}

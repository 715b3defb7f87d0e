//! Sensor collaborator interfaces
//!
//! The pipeline does not decode any sensor protocol itself. A board crate
//! implements these traits on top of its drivers and hands them to the
//! sampler and uploader.

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} failed to {operation}: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor} timed out while waiting to {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor} returned a frame with a bad checksum")]
    ChecksumMismatch { sensor: &'static str },
    #[error("Unknown sensor error")]
    Unknown,
}

/// One temperature/humidity measurement in fixed-point tenths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimateReading {
    /// Temperature in tenths of a degree Celsius (21.7°C → 217)
    pub temperature_deci_celsius: i16,
    /// Relative humidity in tenths of a percent (48.3% → 483)
    pub humidity_deci_percent: i16,
}

/// Single-shot temperature/humidity sensor (DHT11/DHT22/AM2301 class)
pub trait ClimateSensor {
    /// Perform one measurement.
    fn read(&mut self) -> impl Future<Output = Result<ClimateReading, SensorError>>;
}

/// Flow meter pulse source sampled alongside each climate reading
pub trait PulseCounter {
    /// Pulses seen since the previous call.
    fn take_pulses(&mut self) -> u32;
}

/// Placeholder for boards without a flow meter; always reports zero pulses
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFlowMeter;

impl PulseCounter for NoFlowMeter {
    fn take_pulses(&mut self) -> u32 {
        0
    }
}

/// Free-heap gauge reported with every uploaded sample
pub trait HeapGauge {
    fn free_bytes(&self) -> u32;
}

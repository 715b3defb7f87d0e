use core::fmt::Display;

/// One captured reading, recorded by the sampler task
///
/// Values are stored as signed fixed-point tenths, exactly as the DHT-class
/// sensors report them:
/// - Temperature: 21.7°C → 217 (deci-degrees)
/// - Humidity: 48.3% → 483 (deci-percent)
///
/// A sample never changes after it has been pushed into the ring; the ring
/// hands out copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    /// Temperature in tenths of a degree Celsius
    pub temperature: i16,
    /// Relative humidity in tenths of a percent
    pub humidity: i16,
    /// Flow meter pulses counted since the previous sample
    pub flow_pulse_count: u32,
    /// Device uptime at capture, in microseconds
    pub capture_monotonic: u64,
}

impl Sample {
    /// Zeroed sample used to fill unused ring slots.
    pub const EMPTY: Self = Self {
        temperature: 0,
        humidity: 0,
        flow_pulse_count: 0,
        capture_monotonic: 0,
    };

    pub const fn new(
        temperature: i16,
        humidity: i16,
        flow_pulse_count: u32,
        capture_monotonic: u64,
    ) -> Self {
        Self {
            temperature,
            humidity,
            flow_pulse_count,
            capture_monotonic,
        }
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[Sample] uptime: {}us, temperature: {}°C, humidity: {}%, flow pulses: {}",
            self.capture_monotonic,
            Tenths(self.temperature),
            Tenths(self.humidity),
            self.flow_pulse_count
        )
    }
}

/// Formats a fixed-point tenths value with exactly one decimal place.
///
/// Integer-only so the encoder never touches the FPU: `-5` renders as `-0.5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenths(pub i16);

impl Display for Tenths {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let value = i32::from(self.0);
        let sign = if value < 0 { "-" } else { "" };
        let magnitude = value.unsigned_abs();
        write!(f, "{}{}.{}", sign, magnitude / 10, magnitude % 10)
    }
}

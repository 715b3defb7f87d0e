//! Hardware-independent core library for the datalogger
//!
//! This crate contains the capture-and-forward pipeline of the datalogger
//! telemetry device: the bounded sample ring shared by the sampler and the
//! uploader, timestamp reconstruction from the monotonic clock, the
//! line-protocol encoder, the HTTP transport and the periodic task glue.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod clock;
pub mod config;
pub mod http;
pub mod line_protocol;
pub mod ring;
pub mod sampler;
pub mod sensors;
pub mod shutdown;
pub mod stats;
pub mod tasks;
pub mod uploader;

pub use clock::{ClockEpoch, ClockReconciler, UnixNanos};
pub use ring::{RingReader, RingWriter, Sample, SampleRing, Window};
pub use stats::{Stats, StatsSnapshot, StatusReport};

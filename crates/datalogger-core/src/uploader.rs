//! Draining the sample ring to the time-series endpoint
//!
//! One upload cycle walks `Draining → Serializing → Sending` and ends in
//! exactly one of:
//!
//! - nothing to do (empty window, no request made),
//! - deferred (clock not yet synchronized, samples stay pending),
//! - committed (the endpoint acknowledged the batch),
//! - failed (the window stays pending and is resent verbatim next cycle).
//!
//! ## Delivery guarantee
//!
//! The endpoint's acknowledgement is the only thing that advances the commit
//! sequence, so no sample is released before it has been accepted. If the
//! acknowledgement itself is lost on the way back, the next cycle sends the
//! same window again and the endpoint stores it twice. Delivery is therefore
//! at-least-once; there is no idempotency token.

use alloc::string::String;

use embassy_time::{Duration, Timer};
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::clock::{ClockEpoch, ClockReconciler, Monotonic};
use crate::config::UploadConfig;
use crate::line_protocol::{DeviceGauges, LineProtocolEncoder};
use crate::ring::{RingError, RingReader};
use crate::sensors::HeapGauge;
use crate::stats::Stats;

/// Why a transport attempt did not produce a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostError<E> {
    /// Transient condition; the same request may be retried shortly
    TryAgain,
    /// The request could not be delivered
    Failed(E),
}

/// Network collaborator that delivers one request body
pub trait Transport {
    type Error: core::fmt::Debug;

    /// POST `body` to the configured endpoint and return the response status.
    fn post(&mut self, body: &[u8]) -> impl Future<Output = Result<u16, PostError<Self::Error>>>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    #[error("Clock is not synchronized yet")]
    ClockNotSynchronized,
    #[error("Endpoint still busy after {attempts} attempts")]
    RetriesExhausted { attempts: u8 },
    #[error("Transport failed to deliver the batch")]
    Transport,
    #[error("Endpoint rejected the batch with status {status}")]
    Rejected { status: u16 },
    #[error("Commit failed: {0}")]
    Commit(RingError),
}

/// Result of one upload cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The window was empty; no request was made
    NoData,
    /// The clock is unsynchronized; the window stays pending and nothing is counted
    Deferred { pending: usize },
    /// The endpoint acknowledged the batch and the commit sequence advanced
    Committed { samples: usize },
    /// The batch was not acknowledged; the window stays pending
    Failed(UploadError),
}

/// Limits applied to every upload cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_batch_samples: usize,
    pub success_status: u16,
    pub max_attempts: u8,
    pub retry_backoff: Duration,
}

impl UploadPolicy {
    pub fn from_config(config: &UploadConfig<'_>) -> Self {
        Self {
            max_batch_samples: usize::from(config.max_batch_samples).max(1),
            success_status: config.success_status,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// Consumer side of the pipeline
pub struct Uploader<'a, T, M, H, const N: usize> {
    reader: RingReader<'a, N>,
    reconciler: ClockReconciler<'a>,
    stats: &'a Stats,
    transport: T,
    clock: M,
    heap: H,
    encoder: LineProtocolEncoder<'a>,
    policy: UploadPolicy,
    body: String,
}

impl<'a, T, M, H, const N: usize> Uploader<'a, T, M, H, N>
where
    T: Transport,
    M: Monotonic,
    H: HeapGauge,
{
    pub fn new(
        reader: RingReader<'a, N>,
        epoch: &'a ClockEpoch,
        stats: &'a Stats,
        transport: T,
        clock: M,
        heap: H,
        config: &UploadConfig<'a>,
    ) -> Self {
        let policy = UploadPolicy::from_config(config);
        let batch = policy.max_batch_samples.min(N);
        Self {
            reader,
            reconciler: ClockReconciler::new(epoch),
            stats,
            transport,
            clock,
            heap,
            encoder: LineProtocolEncoder::new(config.measurement),
            policy,
            body: String::with_capacity(LineProtocolEncoder::body_capacity(batch)),
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Run one full upload cycle.
    pub async fn upload_once(&mut self) -> CycleOutcome {
        let window = self
            .reader
            .peek_window()
            .truncated(self.policy.max_batch_samples);
        if window.is_empty() {
            debug!("No pending samples, skipping upload");
            return CycleOutcome::NoData;
        }

        let Some(epoch) = self.reconciler.snapshot() else {
            debug!(
                "Clock not synchronized, holding {} pending samples",
                self.reader.pending()
            );
            return CycleOutcome::Deferred {
                pending: self.reader.pending(),
            };
        };

        let gauges = DeviceGauges {
            uptime_usec: self.clock.now_micros(),
            free_heap_bytes: self.heap.free_bytes(),
        };
        let samples = match self.reader.samples(window) {
            Ok(samples) => samples,
            Err(e) => return self.fail(UploadError::Commit(e)),
        };
        let count = self
            .encoder
            .encode_batch(&mut self.body, samples, &epoch, &gauges);
        debug!(
            "Serialized {} samples into {} bytes",
            count,
            self.body.len()
        );

        let status = match self.send().await {
            Ok(status) => status,
            Err(e) => return self.fail(e),
        };
        if status != self.policy.success_status {
            return self.fail(UploadError::Rejected { status });
        }

        match self.reader.commit(window.end()) {
            Ok(samples) => {
                info!("Endpoint accepted {} samples (status {})", samples, status);
                self.stats.record_api_pass();
                CycleOutcome::Committed { samples }
            }
            Err(e) => self.fail(UploadError::Commit(e)),
        }
    }

    /// Deliver the serialized body, retrying only while the transport asks to.
    async fn send(&mut self) -> Result<u16, UploadError> {
        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            match self.transport.post(self.body.as_bytes()).await {
                Ok(status) => {
                    debug!("POST status {} on attempt {}/{}", status, attempt, attempts);
                    return Ok(status);
                }
                Err(PostError::TryAgain) => {
                    if attempt < attempts {
                        warn!(
                            "Endpoint busy on attempt {}/{}, retrying in {}ms",
                            attempt,
                            attempts,
                            self.policy.retry_backoff.as_millis()
                        );
                        Timer::after(self.policy.retry_backoff).await;
                    }
                }
                Err(PostError::Failed(e)) => {
                    error!("POST request failed: {:?}", e);
                    return Err(UploadError::Transport);
                }
            }
        }
        Err(UploadError::RetriesExhausted { attempts })
    }

    fn fail(&mut self, e: UploadError) -> CycleOutcome {
        error!(
            "Upload failed, {} samples stay pending: {}",
            self.reader.pending(),
            e
        );
        self.stats.record_api_fail();
        CycleOutcome::Failed(e)
    }
}

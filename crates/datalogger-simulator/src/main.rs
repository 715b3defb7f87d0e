//! Desktop simulator for the datalogger capture-and-forward pipeline.
//!
//! Runs the datalogger-core sampler, uploader and status tasks on separate OS
//! threads against a synthetic DHT22. Batches go to a simulated endpoint that
//! misbehaves on a fixed schedule, or to a real InfluxDB-style write endpoint
//! when `DATALOGGER_URL` is set. The wall clock becomes "known" a few seconds
//! after start, the way SNTP does on the device, so the deferral path is
//! exercised on every run.
//!
//! # Environment
//!
//! Variables may also come from a `.env` file in the working directory.
//!
//! | Variable                     | Default     | Meaning                          |
//! |------------------------------|-------------|----------------------------------|
//! | `DATALOGGER_URL`             | (simulated) | `http://host[:port]/write?db=..` |
//! | `DATALOGGER_RUN_SECS`        | 30          | Stop after this many seconds     |
//! | `DATALOGGER_SAMPLE_MS`       | 500         | Sensor poll period               |
//! | `DATALOGGER_UPLOAD_SECS`     | 5           | Upload cycle period              |
//! | `DATALOGGER_SYNC_AFTER_SECS` | 3           | Delay before the clock is set    |
//! | `DATALOGGER_STATUS_SECS`     | 60          | Status line period               |
//!
//! `RUST_LOG=debug` shows every attempt and stored sample.

use std::convert::Infallible;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use embassy_futures::select::{Either, select};
use embassy_time::Timer;
use futures::executor::block_on;
use log::{debug, error, info, warn};

use datalogger_core::clock::{EmbassyMonotonic, Monotonic};
use datalogger_core::config::{Config, Endpoint, StatusConfig};
use datalogger_core::http::{Connector, HttpTransport};
use datalogger_core::sampler::Sampler;
use datalogger_core::sensors::{
    ClimateReading, ClimateSensor, HeapGauge, PulseCounter, SensorError,
};
use datalogger_core::shutdown::Shutdown;
use datalogger_core::tasks::{run_sampler, run_status, run_uploader};
use datalogger_core::uploader::{PostError, Transport, Uploader};
use datalogger_core::{ClockEpoch, Sample, SampleRing, Stats, StatusReport};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Samples buffered between uploads.
const RING_CAPACITY: usize = 1024;

/// Every Nth sensor read fails its checksum.
const SENSOR_FAILURE_EVERY: u32 = 17;

/// Free heap reported with an empty ring.
const BASE_FREE_HEAP: u32 = 180_000;

/// Connect, read and write timeout for the real endpoint.
const TCP_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

struct Settings {
    url: Option<String>,
    run_for: Duration,
    sample_ms: u32,
    upload_secs: u32,
    sync_after: Duration,
    status_secs: u32,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            url: std::env::var("DATALOGGER_URL").ok(),
            run_for: Duration::from_secs(env_or("DATALOGGER_RUN_SECS", 30)),
            sample_ms: env_or("DATALOGGER_SAMPLE_MS", 500),
            upload_secs: env_or("DATALOGGER_UPLOAD_SECS", 5),
            sync_after: Duration::from_secs(env_or("DATALOGGER_SYNC_AFTER_SECS", 3)),
            status_secs: env_or("DATALOGGER_STATUS_SECS", StatusConfig::default().interval_secs),
        }
    }
}

/// Parse `name` from the environment, falling back to `default`.
fn env_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring {}={:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Simulated collaborators
// ---------------------------------------------------------------------------

/// DHT22 stand-in producing slowly varying readings.
struct SyntheticDht {
    started: Instant,
    reads: u32,
}

impl SyntheticDht {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            reads: 0,
        }
    }
}

impl ClimateSensor for SyntheticDht {
    async fn read(&mut self) -> Result<ClimateReading, SensorError> {
        self.reads += 1;
        if self.reads % SENSOR_FAILURE_EVERY == 0 {
            return Err(SensorError::ChecksumMismatch {
                sensor: "DHT22 (simulated)",
            });
        }

        let t = self.started.elapsed().as_secs_f64();

        // Temperature: 20–26 °C, humidity: 40–60 %
        let temperature = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();
        let humidity = 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();

        Ok(ClimateReading {
            temperature_deci_celsius: (temperature * 10.0).round() as i16,
            humidity_deci_percent: (humidity * 10.0).round() as i16,
        })
    }
}

/// Flow meter that sees a trickle of pulses on every read.
struct SyntheticFlowMeter {
    reads: u32,
}

impl PulseCounter for SyntheticFlowMeter {
    fn take_pulses(&mut self) -> u32 {
        self.reads = self.reads.wrapping_add(1);
        self.reads % 5
    }
}

/// Free heap shrinks as samples pile up in the ring.
struct SimulatedHeap<'a> {
    ring: &'a SampleRing<RING_CAPACITY>,
}

impl HeapGauge for SimulatedHeap<'_> {
    fn free_bytes(&self) -> u32 {
        let used = self.ring.pending() * core::mem::size_of::<Sample>();
        BASE_FREE_HEAP.saturating_sub(used as u32)
    }
}

/// Endpoint that asks to try again, errors out and accepts on a fixed schedule.
///
/// Request 4 of every 10 is answered with a busy signal, request 7 with a
/// server error, everything else with 204.
struct FlakyEndpoint {
    requests: u32,
    lines_stored: usize,
}

impl Transport for FlakyEndpoint {
    type Error = Infallible;

    async fn post(&mut self, body: &[u8]) -> Result<u16, PostError<Infallible>> {
        self.requests += 1;
        match self.requests % 10 {
            4 => {
                debug!("Endpoint busy (request {})", self.requests);
                Err(PostError::TryAgain)
            }
            7 => Ok(500),
            _ => {
                let lines = body.iter().filter(|&&b| b == b'\n').count();
                self.lines_stored += lines;
                info!(
                    "Endpoint stored {} lines ({} total)",
                    lines, self.lines_stored
                );
                Ok(204)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Real endpoint over std TCP
// ---------------------------------------------------------------------------

/// Blocking socket exposed through the async I/O traits.
///
/// Each task owns its own thread, so blocking inside `read`/`write` only stalls
/// the uploader.
struct TcpConnection(TcpStream);

impl embedded_io_async::ErrorType for TcpConnection {
    type Error = embedded_io::ErrorKind;
}

impl embedded_io_async::Read for TcpConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, embedded_io::ErrorKind> {
        io::Read::read(&mut self.0, buf).map_err(|e| error_kind(&e))
    }
}

impl embedded_io_async::Write for TcpConnection {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, embedded_io::ErrorKind> {
        io::Write::write(&mut self.0, buf).map_err(|e| error_kind(&e))
    }

    async fn flush(&mut self) -> Result<(), embedded_io::ErrorKind> {
        io::Write::flush(&mut self.0).map_err(|e| error_kind(&e))
    }
}

/// Socket timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
fn error_kind(e: &io::Error) -> embedded_io::ErrorKind {
    use embedded_io::ErrorKind;

    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ErrorKind::TimedOut,
        io::ErrorKind::Interrupted => ErrorKind::Interrupted,
        io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
        io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
        io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionAborted,
        io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
        io::ErrorKind::NotConnected => ErrorKind::NotConnected,
        _ => ErrorKind::Other,
    }
}

struct TcpConnector;

impl Connector for TcpConnector {
    type Connection<'c> = TcpConnection;
    type Error = io::Error;

    async fn connect(&mut self, host: &str, port: u16) -> Result<TcpConnection, io::Error> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host did not resolve")
        })?;
        let stream = TcpStream::connect_timeout(&addr, TCP_TIMEOUT)?;
        stream.set_read_timeout(Some(TCP_TIMEOUT))?;
        stream.set_write_timeout(Some(TCP_TIMEOUT))?;
        Ok(TcpConnection(stream))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Set the clock after `delay`, as SNTP would once Wi-Fi is up.
async fn simulate_time_sync(epoch: &ClockEpoch, delay: Duration, shutdown: &Shutdown) {
    let delay = embassy_time::Duration::from_millis(delay.as_millis() as u64);
    if let Either::Second(()) = select(Timer::after(delay), shutdown.wait()).await {
        return;
    }

    let unix_usec = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    if let Err(e) = epoch.synchronize_from_wall_clock(unix_usec, EmbassyMonotonic.now_micros()) {
        error!("Time sync failed: {}", e);
    }
}

fn run_pipeline<T>(config: &Config<'_>, transport: T, settings: &Settings)
where
    T: Transport + Send,
{
    let ring: SampleRing<RING_CAPACITY> = SampleRing::new();
    let stats = Stats::new();
    let epoch = ClockEpoch::new();
    let shutdown = Shutdown::new();

    let (writer, reader) = match ring.split() {
        Ok(handles) => handles,
        Err(e) => {
            error!("Could not split sample ring: {}", e);
            return;
        }
    };

    let mut sampler = Sampler::new(
        SyntheticDht::new(),
        SyntheticFlowMeter { reads: 0 },
        EmbassyMonotonic,
        writer,
        &stats,
    );
    let mut uploader = Uploader::new(
        reader,
        &epoch,
        &stats,
        transport,
        EmbassyMonotonic,
        SimulatedHeap { ring: &ring },
        &config.upload,
    );

    std::thread::scope(|scope| {
        scope.spawn(|| {
            block_on(run_sampler(
                &mut sampler,
                config.sampling.interval(),
                &shutdown,
            ))
        });
        scope.spawn(|| {
            block_on(run_uploader(
                &mut uploader,
                config.upload.interval(),
                &shutdown,
            ))
        });
        scope.spawn(|| block_on(run_status(&ring, &stats, config.status.interval(), &shutdown)));
        scope.spawn(|| block_on(simulate_time_sync(&epoch, settings.sync_after, &shutdown)));

        std::thread::sleep(settings.run_for);
        info!("Run time elapsed, stopping tasks");
        shutdown.request();
    });

    info!("Final: {}", StatusReport::capture(&ring, &stats));
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Apply `.env` first, then configure the logger from the merged environment.
///
/// The order matters: a `RUST_LOG` that only lives in `.env` must reach the
/// logger.
fn load_environment(
    load: impl FnOnce() -> dotenvy::Result<PathBuf>,
) -> (env_logger::Builder, dotenvy::Result<PathBuf>) {
    let loaded = load();
    (env_logger::Builder::from_default_env(), loaded)
}

fn main() {
    let (mut logger, dotenv) = load_environment(dotenvy::dotenv);
    logger.init();
    match dotenv {
        Ok(path) => debug!("Loaded {}", path.display()),
        Err(e) => debug!("No .env file loaded: {}", e),
    }

    let settings = Settings::from_env();

    let mut config = Config::default();
    config.sampling.interval_ms = settings.sample_ms;
    config.upload.interval_secs = settings.upload_secs;
    config.status.interval_secs = settings.status_secs;
    if let Some(url) = settings.url.as_deref() {
        config.upload.url = url;
    }

    info!("Starting datalogger simulator");
    info!(
        "Sampling every {}ms, uploading every {}s, running for {}s",
        config.sampling.interval_ms,
        config.upload.interval_secs,
        settings.run_for.as_secs()
    );

    match settings.url.as_deref() {
        Some(url) => {
            let endpoint = match Endpoint::parse(url) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    error!("DATALOGGER_URL {:?}: {}", url, e);
                    std::process::exit(1);
                }
            };
            info!(
                "Uploading to {}:{}{}",
                endpoint.host, endpoint.port, endpoint.path
            );
            let transport = match HttpTransport::new(TcpConnector, endpoint) {
                Ok(transport) => transport,
                Err(e) => {
                    error!("DATALOGGER_URL {:?}: {}", url, e);
                    std::process::exit(1);
                }
            };
            run_pipeline(&config, transport, &settings);
        }
        None => {
            info!("No DATALOGGER_URL set, using the simulated endpoint");
            let endpoint = FlakyEndpoint {
                requests: 0,
                lines_stored: 0,
            };
            run_pipeline(&config, endpoint, &settings);
        }
    }

    info!("Simulator exiting");
}

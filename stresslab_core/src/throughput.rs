//! Single producer / single consumer throughput measurement.
//!
//! Publishes one irregular-rate `Benchmark` stream, connects an inlet to it
//! in the same thread and alternates timed pushes and pulls of a fixed
//! chunk until the sample cap is reached.

use crate::communication::{
    ChannelFormat, ChunkBuffer, EndpointConfig, Inlet, Outlet, ResolveFilter, Transport,
    IRREGULAR_RATE,
};
use crate::error::{StressError, StressResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backlog requested for both endpoints, in the transport's units.
const MAX_BUFFERED: u32 = 360;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughputConfig {
    pub channels: u32,
    pub format: ChannelFormat,
    pub max_samples: u64,
    pub chunk_size: usize,
    /// One `push_sample` per sample instead of one `push_chunk` per batch
    pub push_single: bool,
    /// One `pull_sample` per sample instead of one `pull_chunk` per batch
    pub pull_single: bool,
    pub resolve_wait: Duration,
    pub connect_timeout: Duration,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            channels: 32,
            format: ChannelFormat::Float32,
            max_samples: 500_000,
            chunk_size: 100,
            push_single: false,
            pull_single: false,
            resolve_wait: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ThroughputConfig {
    /// `PushSamples_floatx32`, `PushSamples_strx4`, ...
    pub fn stream_name(&self) -> String {
        let kind = match self.format {
            ChannelFormat::String => "str",
            ChannelFormat::Float32 => "float",
            other => other.as_str(),
        };
        format!("PushSamples_{}x{}", kind, self.channels)
    }

    pub fn batches(&self) -> u64 {
        self.max_samples / self.chunk_size as u64
    }

    pub fn validate(&self) -> StressResult<()> {
        if self.channels == 0 {
            return Err(StressError::InvalidInput("channel count must be > 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(StressError::InvalidInput("chunk size must be > 0".into()));
        }
        Ok(())
    }
}

/// Timing of one transfer direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionReport {
    pub samples: u64,
    pub elapsed_secs: f64,
    pub samples_per_sec: f64,
    /// Batched mode only
    pub operations: Option<u64>,
    pub ops_per_sec: Option<f64>,
}

impl DirectionReport {
    fn new(batches: u64, chunk_size: usize, elapsed_secs: f64, single: bool) -> Self {
        let samples = batches * chunk_size as u64;
        let secs = elapsed_secs.max(1e-9);
        let (operations, ops_per_sec) = if single {
            (None, None)
        } else {
            (Some(batches), Some(batches as f64 / secs))
        };
        Self {
            samples,
            elapsed_secs,
            samples_per_sec: samples as f64 / secs,
            operations,
            ops_per_sec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputReport {
    pub stream: String,
    pub channels: u32,
    pub format: ChannelFormat,
    pub chunk_size: usize,
    pub batches: u64,
    pub push: DirectionReport,
    pub pull: DirectionReport,
}

/// Publish, connect, then push and pull `max_samples / chunk_size` batches.
///
/// Failing to find or connect to the stream is [`StressError::StartupFailed`].
pub fn run_throughput(
    transport: &dyn Transport,
    config: &ThroughputConfig,
) -> StressResult<ThroughputReport> {
    config.validate()?;
    let name = config.stream_name();
    let endpoint = EndpointConfig::new(
        name.clone(),
        "Benchmark",
        config.channels,
        IRREGULAR_RATE,
        config.format,
    );

    let mut outlet = transport.publish(&endpoint, config.chunk_size as u32, MAX_BUFFERED)?;
    let found = transport.resolve(&ResolveFilter::Name(name.clone()), 1, config.resolve_wait)?;
    let Some(target) = found.into_iter().find(|c| c.source_id == endpoint.source_id) else {
        return Err(StressError::StartupFailed(format!(
            "stream {} not found within {:?}",
            name, config.resolve_wait
        )));
    };

    let mut inlet = transport
        .open(&target, MAX_BUFFERED)
        .map_err(|e| StressError::StartupFailed(format!("open {}: {}", name, e)))?;
    inlet
        .open_stream(config.connect_timeout)
        .map_err(|e| StressError::StartupFailed(format!("open stream {}: {}", name, e)))?;
    if !outlet.wait_for_consumers(config.connect_timeout) {
        return Err(StressError::StartupFailed(format!(
            "no consumer connected to {} within {:?}",
            name, config.connect_timeout
        )));
    }
    log::info!("{} connected, running {} batches", name, config.batches());

    let channels = config.channels as usize;
    let chunk = ChunkBuffer::filled(config.format, channels, config.chunk_size);
    let mut pull_buffer = ChunkBuffer::filled(config.format, channels, config.chunk_size);
    let mut push_secs = 0.0;
    let mut pull_secs = 0.0;

    for _ in 0..config.batches() {
        let t0 = transport.local_clock();
        push_batch(outlet.as_mut(), &chunk, config)?;
        let t1 = transport.local_clock();
        pull_batch(inlet.as_mut(), &mut pull_buffer, config)?;
        let t2 = transport.local_clock();
        push_secs += t1 - t0;
        pull_secs += t2 - t1;
    }

    inlet.close()?;
    outlet.close()?;

    let batches = config.batches();
    Ok(ThroughputReport {
        stream: name,
        channels: config.channels,
        format: config.format,
        chunk_size: config.chunk_size,
        batches,
        push: DirectionReport::new(batches, config.chunk_size, push_secs, config.push_single),
        pull: DirectionReport::new(batches, config.chunk_size, pull_secs, config.pull_single),
    })
}

fn push_batch(outlet: &mut dyn Outlet, chunk: &ChunkBuffer, config: &ThroughputConfig) -> StressResult<()> {
    if config.push_single {
        for i in 0..config.chunk_size {
            outlet.push_sample(chunk, i)?;
        }
        Ok(())
    } else {
        outlet.push_chunk(chunk, config.chunk_size)
    }
}

fn pull_batch(
    inlet: &mut dyn Inlet,
    buffer: &mut ChunkBuffer,
    config: &ThroughputConfig,
) -> StressResult<()> {
    if config.pull_single {
        for _ in 0..config.chunk_size {
            inlet.pull_sample(buffer, config.connect_timeout)?;
        }
    } else {
        inlet.pull_chunk(buffer, config.chunk_size)?;
    }
    Ok(())
}

//! Transport abstraction consumed by the churn engine and the throughput
//! harness.
//!
//! The transport is the system under test. Anything that can publish,
//! resolve, open and move multiplexed chunks can be stressed by plugging an
//! implementation of these traits into a [`crate::churn::ChurnSession`] or
//! [`crate::throughput::run_throughput`].

use crate::communication::types::{ChunkBuffer, EndpointConfig, ResolveFilter};
use crate::error::StressResult;
use std::time::Duration;

/// Discovery and endpoint factory of a streaming transport.
pub trait Transport: Send + Sync {
    /// Publish a stream. `chunk_size` hints the preferred transfer
    /// granularity in samples (0 = no preference); `max_buffered` bounds the
    /// backlog in seconds (or hundreds of samples for irregular streams).
    fn publish(
        &self,
        config: &EndpointConfig,
        chunk_size: u32,
        max_buffered: u32,
    ) -> StressResult<Box<dyn Outlet>>;

    /// Wait up to `wait` until at least `min_results` streams match `filter`,
    /// then return every match. May return fewer (possibly zero) on timeout.
    fn resolve(
        &self,
        filter: &ResolveFilter,
        min_results: usize,
        wait: Duration,
    ) -> StressResult<Vec<EndpointConfig>>;

    /// Open an inlet on a resolved stream.
    fn open(&self, config: &EndpointConfig, max_buffered: u32) -> StressResult<Box<dyn Inlet>>;

    /// Monotonic clock in seconds, used for elapsed-time pacing.
    fn local_clock(&self) -> f64;
}

/// Sending side of one published stream.
pub trait Outlet: Send {
    fn config(&self) -> &EndpointConfig;

    /// Push sample `index` of `chunk` on its own.
    fn push_sample(&mut self, chunk: &ChunkBuffer, index: usize) -> StressResult<()>;

    /// Push the first `samples` samples of `chunk` in one call.
    fn push_chunk(&mut self, chunk: &ChunkBuffer, samples: usize) -> StressResult<()>;

    /// Block up to `timeout` until at least one inlet is connected.
    fn wait_for_consumers(&self, timeout: Duration) -> bool;

    /// Withdraw the stream. Consumes the outlet; teardown is explicit.
    fn close(self: Box<Self>) -> StressResult<()>;
}

/// Receiving side of one opened stream.
pub trait Inlet: Send {
    /// Metadata of the connected stream, queried with a bound.
    fn info(&self, timeout: Duration) -> StressResult<EndpointConfig>;

    /// Block up to `timeout` until the connection is established.
    fn open_stream(&mut self, timeout: Duration) -> StressResult<()>;

    /// Pull one sample into slot 0 of `buffer`, waiting up to `timeout`.
    /// Returns `false` when nothing arrived in time.
    fn pull_sample(&mut self, buffer: &mut ChunkBuffer, timeout: Duration) -> StressResult<bool>;

    /// Pull up to `max_samples` samples without blocking; returns how many
    /// were written to the front of `buffer`.
    fn pull_chunk(&mut self, buffer: &mut ChunkBuffer, max_samples: usize) -> StressResult<usize>;

    /// Round-trip clock offset estimate, queried with a bound.
    fn time_correction(&self, timeout: Duration) -> StressResult<f64>;

    fn close(self: Box<Self>) -> StressResult<()>;
}

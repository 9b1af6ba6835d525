//! In-process loopback transport.
//!
//! Published streams live in a registry shared by every clone of the
//! transport. Each opened inlet owns a bounded drop-oldest queue; a push
//! fans the chunk out to every queue of the stream. Closing an outlet
//! withdraws the stream: resolution stops returning it, inlets drain what
//! is left and then read zero samples, and metadata/clock queries time out.

use crate::communication::traits::{Inlet, Outlet, Transport};
use crate::communication::types::{ChunkBuffer, EndpointConfig, ResolveFilter};
use crate::error::{StressError, StressResult};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Backlog (in samples) per buffered "second" of an irregular stream.
const IRREGULAR_SAMPLES_PER_SECOND: usize = 100;

/// Registry re-check period while a resolve is waiting.
const RESOLVE_POLL: Duration = Duration::from_millis(10);

/// Call and volume counters of one loopback transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub streams_published: u64,
    pub inlets_opened: u64,
    pub push_sample_calls: u64,
    pub push_chunk_calls: u64,
    pub pull_sample_calls: u64,
    pub pull_chunk_calls: u64,
    pub samples_pushed: u64,
    pub samples_pulled: u64,
    pub samples_dropped: u64,
}

#[derive(Default)]
struct Counters {
    streams_published: AtomicU64,
    inlets_opened: AtomicU64,
    push_sample_calls: AtomicU64,
    push_chunk_calls: AtomicU64,
    pull_sample_calls: AtomicU64,
    pull_chunk_calls: AtomicU64,
    samples_pushed: AtomicU64,
    samples_pulled: AtomicU64,
    samples_dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TransportStats {
        TransportStats {
            streams_published: self.streams_published.load(Ordering::Relaxed),
            inlets_opened: self.inlets_opened.load(Ordering::Relaxed),
            push_sample_calls: self.push_sample_calls.load(Ordering::Relaxed),
            push_chunk_calls: self.push_chunk_calls.load(Ordering::Relaxed),
            pull_sample_calls: self.pull_sample_calls.load(Ordering::Relaxed),
            pull_chunk_calls: self.pull_chunk_calls.load(Ordering::Relaxed),
            samples_pushed: self.samples_pushed.load(Ordering::Relaxed),
            samples_pulled: self.samples_pulled.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
        }
    }
}

struct Registry {
    streams: RwLock<HashMap<String, Arc<StreamShared>>>,
    counters: Counters,
}

struct StreamShared {
    config: EndpointConfig,
    open: AtomicBool,
    inlets: Mutex<Vec<Arc<InletQueue>>>,
    inlets_changed: Condvar,
}

impl StreamShared {
    fn withdraw(&self) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        for queue in self.inlets.lock().iter() {
            // taken so a puller between its open check and its wait sees this
            let _state = queue.state.lock();
            queue.ready.notify_all();
        }
        true
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

struct QueueState {
    chunks: VecDeque<ChunkBuffer>,
    /// Samples already consumed from the front chunk
    front_offset: usize,
    queued: usize,
    capacity: usize,
}

struct InletQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl InletQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                front_offset: 0,
                queued: 0,
                capacity: capacity.max(1),
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue a chunk, dropping the oldest samples beyond capacity.
    /// Returns the number of samples dropped.
    fn push(&self, chunk: ChunkBuffer) -> usize {
        let mut state = self.state.lock();
        state.queued += chunk.capacity_samples();
        state.chunks.push_back(chunk);

        let mut dropped = 0;
        while state.queued > state.capacity {
            let excess = state.queued - state.capacity;
            let front_left = match state.chunks.front() {
                Some(front) => front.capacity_samples() - state.front_offset,
                None => break,
            };
            if front_left <= excess {
                state.chunks.pop_front();
                state.front_offset = 0;
                state.queued -= front_left;
                dropped += front_left;
            } else {
                state.front_offset += excess;
                state.queued -= excess;
                dropped += excess;
            }
        }
        drop(state);
        self.ready.notify_one();
        dropped
    }

    /// Move up to `max` samples into the front of `buffer`.
    fn drain_into(
        state: &mut QueueState,
        buffer: &mut ChunkBuffer,
        max: usize,
    ) -> StressResult<usize> {
        let wanted = max.min(buffer.capacity_samples()).min(state.queued);
        let mut written = 0;
        while written < wanted {
            let Some(front) = state.chunks.front() else {
                break;
            };
            let available = front.capacity_samples() - state.front_offset;
            let n = available.min(wanted - written);
            buffer.copy_from(written, front, state.front_offset, n)?;
            written += n;
            state.queued -= n;
            if n == available {
                state.chunks.pop_front();
                state.front_offset = 0;
            } else {
                state.front_offset += n;
            }
        }
        Ok(written)
    }
}

/// In-process reference transport.
#[derive(Clone)]
pub struct LoopbackTransport {
    registry: Arc<Registry>,
    epoch: Instant,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                streams: RwLock::new(HashMap::new()),
                counters: Counters::default(),
            }),
            epoch: Instant::now(),
        }
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> TransportStats {
        self.registry.counters.snapshot()
    }

    /// Number of currently published streams.
    pub fn published_count(&self) -> usize {
        self.registry.streams.read().len()
    }

    fn backlog_capacity(config: &EndpointConfig, max_buffered: u32) -> usize {
        let seconds = max_buffered.max(1) as usize;
        if config.is_irregular() {
            seconds * IRREGULAR_SAMPLES_PER_SECOND
        } else {
            (seconds as f64 * config.nominal_srate).ceil() as usize
        }
    }
}

impl Transport for LoopbackTransport {
    fn publish(
        &self,
        config: &EndpointConfig,
        _chunk_size: u32,
        _max_buffered: u32,
    ) -> StressResult<Box<dyn Outlet>> {
        if config.channel_count == 0 {
            return Err(StressError::InvalidInput(format!(
                "stream '{}' has no channels",
                config.name
            )));
        }
        let shared = Arc::new(StreamShared {
            config: config.clone(),
            open: AtomicBool::new(true),
            inlets: Mutex::new(Vec::new()),
            inlets_changed: Condvar::new(),
        });
        {
            let mut streams = self.registry.streams.write();
            if streams.contains_key(&config.source_id) {
                return Err(StressError::transport(
                    config.label(),
                    format!("source id {} already published", config.source_id),
                ));
            }
            streams.insert(config.source_id.clone(), Arc::clone(&shared));
        }
        self.registry
            .counters
            .streams_published
            .fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(LoopbackOutlet {
            shared,
            registry: Arc::clone(&self.registry),
        }))
    }

    fn resolve(
        &self,
        filter: &ResolveFilter,
        min_results: usize,
        wait: Duration,
    ) -> StressResult<Vec<EndpointConfig>> {
        let deadline = Instant::now() + wait;
        loop {
            let matches: Vec<EndpointConfig> = self
                .registry
                .streams
                .read()
                .values()
                .filter(|s| s.is_open() && filter.matches(&s.config))
                .map(|s| s.config.clone())
                .collect();
            let now = Instant::now();
            if matches.len() >= min_results.max(1) || now >= deadline {
                return Ok(matches);
            }
            std::thread::sleep(RESOLVE_POLL.min(deadline - now));
        }
    }

    fn open(&self, config: &EndpointConfig, max_buffered: u32) -> StressResult<Box<dyn Inlet>> {
        let shared = self
            .registry
            .streams
            .read()
            .get(&config.source_id)
            .cloned()
            .ok_or_else(|| StressError::not_found(format!("stream {} vanished", config.label())))?;

        let queue = Arc::new(InletQueue::new(Self::backlog_capacity(
            &shared.config,
            max_buffered,
        )));
        shared.inlets.lock().push(Arc::clone(&queue));
        shared.inlets_changed.notify_all();
        self.registry
            .counters
            .inlets_opened
            .fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(LoopbackInlet {
            shared,
            queue,
            registry: Arc::clone(&self.registry),
            closed: false,
        }))
    }

    fn local_clock(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

struct LoopbackOutlet {
    shared: Arc<StreamShared>,
    registry: Arc<Registry>,
}

impl LoopbackOutlet {
    fn check_chunk(&self, chunk: &ChunkBuffer, samples: usize) -> StressResult<()> {
        let config = &self.shared.config;
        if !self.shared.is_open() {
            return Err(StressError::transport(config.label(), "outlet already closed"));
        }
        if chunk.format() != config.channel_format
            || chunk.channels() != config.channel_count as usize
        {
            return Err(StressError::transport(
                config.label(),
                format!(
                    "buffer is {}x{}, stream is {}x{}",
                    chunk.format(),
                    chunk.channels(),
                    config.channel_format,
                    config.channel_count
                ),
            ));
        }
        if samples > chunk.capacity_samples() {
            return Err(StressError::transport(
                config.label(),
                format!(
                    "push of {} samples exceeds buffer of {}",
                    samples,
                    chunk.capacity_samples()
                ),
            ));
        }
        Ok(())
    }

    fn fan_out(&self, chunk: &ChunkBuffer, start: usize, samples: usize) -> StressResult<()> {
        let mut dropped = 0;
        for queue in self.shared.inlets.lock().iter() {
            dropped += queue.push(chunk.slice(start, samples)?);
        }
        let counters = &self.registry.counters;
        counters
            .samples_pushed
            .fetch_add(samples as u64, Ordering::Relaxed);
        if dropped > 0 {
            counters
                .samples_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    fn withdraw(&self) {
        if self.shared.withdraw() {
            self.registry
                .streams
                .write()
                .remove(&self.shared.config.source_id);
        }
    }
}

impl Outlet for LoopbackOutlet {
    fn config(&self) -> &EndpointConfig {
        &self.shared.config
    }

    fn push_sample(&mut self, chunk: &ChunkBuffer, index: usize) -> StressResult<()> {
        self.check_chunk(chunk, index + 1)?;
        self.registry
            .counters
            .push_sample_calls
            .fetch_add(1, Ordering::Relaxed);
        self.fan_out(chunk, index, 1)
    }

    fn push_chunk(&mut self, chunk: &ChunkBuffer, samples: usize) -> StressResult<()> {
        self.check_chunk(chunk, samples)?;
        self.registry
            .counters
            .push_chunk_calls
            .fetch_add(1, Ordering::Relaxed);
        if samples == 0 {
            return Ok(());
        }
        self.fan_out(chunk, 0, samples)
    }

    fn wait_for_consumers(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inlets = self.shared.inlets.lock();
        while inlets.is_empty() {
            if self
                .shared
                .inlets_changed
                .wait_until(&mut inlets, deadline)
                .timed_out()
            {
                return !inlets.is_empty();
            }
        }
        true
    }

    fn close(self: Box<Self>) -> StressResult<()> {
        self.withdraw();
        Ok(())
    }
}

impl Drop for LoopbackOutlet {
    fn drop(&mut self) {
        self.withdraw();
    }
}

struct LoopbackInlet {
    shared: Arc<StreamShared>,
    queue: Arc<InletQueue>,
    registry: Arc<Registry>,
    closed: bool,
}

impl LoopbackInlet {
    fn check_buffer(&self, buffer: &ChunkBuffer) -> StressResult<()> {
        let config = &self.shared.config;
        if buffer.format() != config.channel_format
            || buffer.channels() != config.channel_count as usize
        {
            return Err(StressError::transport(
                config.label(),
                format!(
                    "pull buffer is {}x{}, stream is {}x{}",
                    buffer.format(),
                    buffer.channels(),
                    config.channel_format,
                    config.channel_count
                ),
            ));
        }
        Ok(())
    }

    fn detach(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut inlets = self.shared.inlets.lock();
        inlets.retain(|q| !Arc::ptr_eq(q, &self.queue));
    }

    fn record_pulled(&self, samples: usize) {
        if samples > 0 {
            self.registry
                .counters
                .samples_pulled
                .fetch_add(samples as u64, Ordering::Relaxed);
        }
    }
}

impl Inlet for LoopbackInlet {
    fn info(&self, timeout: Duration) -> StressResult<EndpointConfig> {
        if self.shared.is_open() {
            Ok(self.shared.config.clone())
        } else {
            Err(StressError::timeout(format!(
                "info query on {} after {:?}",
                self.shared.config.label(),
                timeout
            )))
        }
    }

    fn open_stream(&mut self, timeout: Duration) -> StressResult<()> {
        if self.shared.is_open() {
            Ok(())
        } else {
            Err(StressError::timeout(format!(
                "could not open {} within {:?}",
                self.shared.config.label(),
                timeout
            )))
        }
    }

    fn pull_sample(&mut self, buffer: &mut ChunkBuffer, timeout: Duration) -> StressResult<bool> {
        self.check_buffer(buffer)?;
        self.registry
            .counters
            .pull_sample_calls
            .fetch_add(1, Ordering::Relaxed);

        let deadline = Instant::now() + timeout;
        let mut state = self.queue.state.lock();
        while state.queued == 0 && self.shared.is_open() {
            if self.queue.ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let pulled = InletQueue::drain_into(&mut state, buffer, 1)?;
        drop(state);
        self.record_pulled(pulled);
        Ok(pulled == 1)
    }

    fn pull_chunk(&mut self, buffer: &mut ChunkBuffer, max_samples: usize) -> StressResult<usize> {
        self.check_buffer(buffer)?;
        self.registry
            .counters
            .pull_chunk_calls
            .fetch_add(1, Ordering::Relaxed);

        let pulled = {
            let mut state = self.queue.state.lock();
            InletQueue::drain_into(&mut state, buffer, max_samples)?
        };
        self.record_pulled(pulled);
        Ok(pulled)
    }

    fn time_correction(&self, timeout: Duration) -> StressResult<f64> {
        if self.shared.is_open() {
            // Same process, same clock.
            Ok(0.0)
        } else {
            Err(StressError::timeout(format!(
                "time correction on {} after {:?}",
                self.shared.config.label(),
                timeout
            )))
        }
    }

    fn close(mut self: Box<Self>) -> StressResult<()> {
        self.detach();
        Ok(())
    }
}

impl Drop for LoopbackInlet {
    fn drop(&mut self) {
        self.detach();
    }
}

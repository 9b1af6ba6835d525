//! Shared test utilities for stresslab_core integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};
use stresslab_core::communication::{
    ChunkBuffer, EndpointConfig, Inlet, LoopbackTransport, Outlet, ResolveFilter, Transport,
};
use stresslab_core::{ChurnConfig, StressResult};

/// Install a test logger once per process. `RUST_LOG` still applies.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Limits small enough that workers cycle many times per second.
pub fn fast_config() -> ChurnConfig {
    let mut config = ChurnConfig::default();
    let limits = &mut config.limits;
    limits.max_producers = 3;
    limits.max_consumers = 4;
    limits.producer_spawn_interval_ms = 10;
    limits.consumer_spawn_interval_ms = 10;
    limits.max_chunk_len_ms = 10;
    limits.max_poll_interval_ms = 10;
    limits.max_failure_interval_ms = 50;
    limits.cooldown_step_ms = 5;
    limits.max_cooldown_steps = 3;
    limits.resolve_wait_ms = 50;
    limits.query_timeout_ms = 50;
    config.producer.duration_secs = Some(0.3);
    config.consumer.duration_secs = Some(0.3);
    config.seed = Some(7);
    config
}

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Loopback transport whose outlets panic on push when the stream is
/// named `doomed`.
pub struct PanickyTransport {
    inner: LoopbackTransport,
    doomed: String,
}

impl PanickyTransport {
    pub fn new(doomed: &str) -> Self {
        Self {
            inner: LoopbackTransport::new(),
            doomed: doomed.to_string(),
        }
    }
}

struct PanickyOutlet {
    inner: Box<dyn Outlet>,
    doomed: bool,
}

impl Transport for PanickyTransport {
    fn publish(
        &self,
        config: &EndpointConfig,
        chunk_size: u32,
        max_buffered: u32,
    ) -> StressResult<Box<dyn Outlet>> {
        let inner = self.inner.publish(config, chunk_size, max_buffered)?;
        Ok(Box::new(PanickyOutlet {
            inner,
            doomed: config.name == self.doomed,
        }))
    }

    fn resolve(
        &self,
        filter: &ResolveFilter,
        min_results: usize,
        wait: Duration,
    ) -> StressResult<Vec<EndpointConfig>> {
        self.inner.resolve(filter, min_results, wait)
    }

    fn open(&self, config: &EndpointConfig, max_buffered: u32) -> StressResult<Box<dyn Inlet>> {
        self.inner.open(config, max_buffered)
    }

    fn local_clock(&self) -> f64 {
        self.inner.local_clock()
    }
}

impl Outlet for PanickyOutlet {
    fn config(&self) -> &EndpointConfig {
        self.inner.config()
    }

    fn push_sample(&mut self, chunk: &ChunkBuffer, index: usize) -> StressResult<()> {
        if self.doomed {
            panic!("push_sample on doomed stream");
        }
        self.inner.push_sample(chunk, index)
    }

    fn push_chunk(&mut self, chunk: &ChunkBuffer, samples: usize) -> StressResult<()> {
        if self.doomed {
            panic!("push_chunk on doomed stream");
        }
        self.inner.push_chunk(chunk, samples)
    }

    fn wait_for_consumers(&self, timeout: Duration) -> bool {
        self.inner.wait_for_consumers(timeout)
    }

    fn close(self: Box<Self>) -> StressResult<()> {
        self.inner.close()
    }
}

/// Shared handle for tests that inspect the loopback after a run.
pub fn loopback() -> (Arc<LoopbackTransport>, Arc<dyn Transport>) {
    let transport = Arc::new(LoopbackTransport::new());
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    (transport, dyn_transport)
}

//! Fault-injecting transport wrapper.
//!
//! Wraps any [`Transport`] and fails each push/pull call with a fixed
//! probability. Failures surface as [`StressError::Transport`], the same
//! category a real transport error lands in, so workers exercise their
//! early-close path under load.

use crate::communication::traits::{Inlet, Outlet, Transport};
use crate::communication::types::{ChunkBuffer, EndpointConfig, ResolveFilter};
use crate::error::{StressError, StressResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

/// Transport whose endpoints fail transfers at random.
pub struct FlakyTransport {
    inner: Arc<dyn Transport>,
    fault_rate: f64,
}

impl FlakyTransport {
    /// `fault_rate` is the per-call failure probability in `[0, 1]`.
    pub fn new(inner: Arc<dyn Transport>, fault_rate: f64) -> StressResult<Self> {
        if !(0.0..=1.0).contains(&fault_rate) {
            return Err(StressError::InvalidInput(format!(
                "fault rate {} outside [0, 1]",
                fault_rate
            )));
        }
        Ok(Self { inner, fault_rate })
    }

    pub fn fault_rate(&self) -> f64 {
        self.fault_rate
    }
}

struct Dice {
    rng: StdRng,
    rate: f64,
}

impl Dice {
    fn new(rate: f64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            rate,
        }
    }

    fn roll(&mut self, endpoint: &EndpointConfig, op: &str) -> StressResult<()> {
        if self.rate > 0.0 && self.rng.gen_bool(self.rate) {
            return Err(StressError::transport(
                endpoint.label(),
                format!("injected fault during {}", op),
            ));
        }
        Ok(())
    }
}

impl Transport for FlakyTransport {
    fn publish(
        &self,
        config: &EndpointConfig,
        chunk_size: u32,
        max_buffered: u32,
    ) -> StressResult<Box<dyn Outlet>> {
        let inner = self.inner.publish(config, chunk_size, max_buffered)?;
        Ok(Box::new(FlakyOutlet {
            inner,
            dice: Dice::new(self.fault_rate),
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
        let inner = self.inner.open(config, max_buffered)?;
        Ok(Box::new(FlakyInlet {
            inner,
            config: config.clone(),
            dice: Dice::new(self.fault_rate),
        }))
    }

    fn local_clock(&self) -> f64 {
        self.inner.local_clock()
    }
}

struct FlakyOutlet {
    inner: Box<dyn Outlet>,
    dice: Dice,
}

impl Outlet for FlakyOutlet {
    fn config(&self) -> &EndpointConfig {
        self.inner.config()
    }

    fn push_sample(&mut self, chunk: &ChunkBuffer, index: usize) -> StressResult<()> {
        self.dice.roll(self.inner.config(), "push_sample")?;
        self.inner.push_sample(chunk, index)
    }

    fn push_chunk(&mut self, chunk: &ChunkBuffer, samples: usize) -> StressResult<()> {
        self.dice.roll(self.inner.config(), "push_chunk")?;
        self.inner.push_chunk(chunk, samples)
    }

    fn wait_for_consumers(&self, timeout: Duration) -> bool {
        self.inner.wait_for_consumers(timeout)
    }

    fn close(self: Box<Self>) -> StressResult<()> {
        self.inner.close()
    }
}

struct FlakyInlet {
    inner: Box<dyn Inlet>,
    config: EndpointConfig,
    dice: Dice,
}

impl Inlet for FlakyInlet {
    fn info(&self, timeout: Duration) -> StressResult<EndpointConfig> {
        self.inner.info(timeout)
    }

    fn open_stream(&mut self, timeout: Duration) -> StressResult<()> {
        self.inner.open_stream(timeout)
    }

    fn pull_sample(&mut self, buffer: &mut ChunkBuffer, timeout: Duration) -> StressResult<bool> {
        self.dice.roll(&self.config, "pull_sample")?;
        self.inner.pull_sample(buffer, timeout)
    }

    fn pull_chunk(&mut self, buffer: &mut ChunkBuffer, max_samples: usize) -> StressResult<usize> {
        self.dice.roll(&self.config, "pull_chunk")?;
        self.inner.pull_chunk(buffer, max_samples)
    }

    fn time_correction(&self, timeout: Duration) -> StressResult<f64> {
        self.inner.time_correction(timeout)
    }

    fn close(self: Box<Self>) -> StressResult<()> {
        self.inner.close()
    }
}

//! Randomized worker parameters with optional overrides.
//!
//! Every override field is an `Option`: `Some` pins the value for the
//! worker's whole lifetime, `None` draws a fresh value from its bounded
//! range each lifecycle iteration. Nothing here touches shared state; the
//! only side effect is consuming the caller's RNG.

use crate::communication::{ChannelFormat, EndpointConfig, ResolveFilter};
use crate::config::{ChurnLimits, StreamCatalog};
use crate::error::{StressError, StressResult};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fields a caller may pin for producer workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerOverrides {
    pub duration_secs: Option<f64>,
    pub name: Option<String>,
    pub stream_type: Option<String>,
    pub channel_count: Option<u32>,
    pub format: Option<ChannelFormat>,
    /// `Some(0.0)` pins an irregular stream
    pub srate: Option<f64>,
    pub failure_interval_secs: Option<f64>,
    pub chunk_len_ms: Option<u64>,
}

impl ProducerOverrides {
    pub fn validate(&self) -> StressResult<()> {
        positive("producer.duration_secs", self.duration_secs)?;
        positive("producer.failure_interval_secs", self.failure_interval_secs)?;
        if self.channel_count == Some(0) {
            return Err(StressError::config("producer.channel_count must be > 0"));
        }
        if let Some(srate) = self.srate {
            if !(srate >= 0.0 && srate.is_finite()) {
                return Err(StressError::config("producer.srate must be >= 0"));
            }
        }
        if self.chunk_len_ms == Some(0) {
            return Err(StressError::config("producer.chunk_len_ms must be > 0"));
        }
        Ok(())
    }
}

/// Fields a caller may pin for consumer workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOverrides {
    pub duration_secs: Option<f64>,
    /// Resolve by this name instead of by type
    pub name: Option<String>,
    pub stream_type: Option<String>,
    pub request_info: Option<bool>,
    pub request_time: Option<bool>,
    pub failure_interval_secs: Option<f64>,
}

impl ConsumerOverrides {
    pub fn validate(&self) -> StressResult<()> {
        positive("consumer.duration_secs", self.duration_secs)?;
        positive("consumer.failure_interval_secs", self.failure_interval_secs)
    }
}

fn positive(name: &str, value: Option<f64>) -> StressResult<()> {
    match value {
        Some(v) if !(v > 0.0 && v.is_finite()) => {
            Err(StressError::config(format!("{} must be > 0", name)))
        }
        Some(v) if Duration::try_from_secs_f64(v).is_err() => {
            Err(StressError::config(format!("{} is out of range: {}", name, v)))
        }
        _ => Ok(()),
    }
}

/// Pinned seconds as a `Duration`, saturating instead of panicking on
/// values `validate` would have rejected.
fn pinned_secs(secs: f64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => d,
        Err(_) if secs > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

/// Parameters of one producer lifecycle iteration.
#[derive(Debug, Clone)]
pub struct ProducerParams {
    pub config: EndpointConfig,
    pub failure_interval: Duration,
    pub chunk_len: Duration,
}

/// Parameters of one consumer lifecycle iteration.
#[derive(Debug, Clone)]
pub struct ConsumerParams {
    pub filter: ResolveFilter,
    pub request_info: bool,
    pub request_time: bool,
    pub failure_interval: Duration,
}

/// Draws worker parameters from the configured ranges.
#[derive(Debug, Clone, Copy)]
pub struct ParamGenerator<'a> {
    limits: &'a ChurnLimits,
    catalog: &'a StreamCatalog,
}

impl<'a> ParamGenerator<'a> {
    pub fn new(limits: &'a ChurnLimits, catalog: &'a StreamCatalog) -> Self {
        Self { limits, catalog }
    }

    /// Total worker lifetime: whole seconds in `[1, max_duration_secs)`.
    pub fn lifetime<R: Rng + ?Sized>(&self, pinned: Option<f64>, rng: &mut R) -> Duration {
        match pinned {
            Some(secs) => pinned_secs(secs),
            None => Duration::from_secs(rng.gen_range(1..self.limits.max_duration_secs)),
        }
    }

    pub fn producer<R: Rng + ?Sized>(
        &self,
        overrides: &ProducerOverrides,
        rng: &mut R,
    ) -> ProducerParams {
        let limits = self.limits;
        let name = overrides
            .name
            .clone()
            .unwrap_or_else(|| pick(&self.catalog.names, rng));
        let stream_type = overrides
            .stream_type
            .clone()
            .unwrap_or_else(|| pick(&self.catalog.types, rng));
        let channel_count = overrides
            .channel_count
            .unwrap_or_else(|| rng.gen_range(1..limits.max_channels));
        let srate = overrides
            .srate
            .unwrap_or_else(|| rng.gen_range(1..limits.max_srate) as f64);
        let format = overrides
            .format
            .unwrap_or_else(|| ChannelFormat::ALL[rng.gen_range(0..ChannelFormat::ALL.len())]);
        let failure_interval = self.failure_interval(overrides.failure_interval_secs, rng);
        let chunk_len = Duration::from_millis(overrides.chunk_len_ms.unwrap_or_else(|| {
            rng.gen_range(limits.min_chunk_len_ms..limits.max_chunk_len_ms)
        }));

        ProducerParams {
            config: EndpointConfig::new(name, stream_type, channel_count, srate, format),
            failure_interval,
            chunk_len,
        }
    }

    pub fn consumer<R: Rng + ?Sized>(
        &self,
        overrides: &ConsumerOverrides,
        rng: &mut R,
    ) -> ConsumerParams {
        let filter = match (&overrides.name, &overrides.stream_type) {
            (Some(name), _) => ResolveFilter::Name(name.clone()),
            (None, Some(ty)) => ResolveFilter::Type(ty.clone()),
            (None, None) => ResolveFilter::Type(pick(&self.catalog.types, rng)),
        };
        let request_info = overrides
            .request_info
            .unwrap_or_else(|| rng.gen_ratio(1, 3));
        let request_time = overrides
            .request_time
            .unwrap_or_else(|| rng.gen_ratio(1, 3));
        let failure_interval = self.failure_interval(overrides.failure_interval_secs, rng);

        ConsumerParams {
            filter,
            request_info,
            request_time,
            failure_interval,
        }
    }

    fn failure_interval<R: Rng + ?Sized>(&self, pinned: Option<f64>, rng: &mut R) -> Duration {
        match pinned {
            Some(secs) => pinned_secs(secs),
            None => Duration::from_millis(
                rng.gen_range(self.limits.min_failure_interval_ms..self.limits.max_failure_interval_ms),
            ),
        }
    }

    /// Random idle time between lifecycle iterations.
    pub fn cooldown<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.limits.max_cooldown_steps == 0 {
            return Duration::ZERO;
        }
        let steps = rng.gen_range(0..self.limits.max_cooldown_steps) as u64;
        Duration::from_millis(self.limits.cooldown_step_ms * steps)
    }

    /// Random consumer poll interval in `[1, max_poll_interval_ms]`.
    pub fn poll_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_millis(rng.gen_range(1..=self.limits.max_poll_interval_ms))
    }
}

fn pick<R: Rng + ?Sized>(catalog: &[String], rng: &mut R) -> String {
    catalog.choose(rng).cloned().unwrap_or_default()
}

//! Churn configuration
//!
//! Typed configuration for a churn run, loadable from TOML or YAML. Every
//! field has a default, so a config file only needs the keys it changes.
//!
//! # Example stresslab.toml
//!
//! ```toml
//! seed = 42
//! fault_rate = 0.01
//!
//! [limits]
//! max_producers = 4
//! max_consumers = 8
//! producer_spawn_interval_ms = 250
//!
//! [catalog]
//! names = ["Cam", "Imu"]
//! types = ["Video", "Inertial"]
//!
//! [consumer]
//! request_time = true
//! ```

use crate::churn::params::{ConsumerOverrides, ProducerOverrides};
use crate::error::{StressError, StressResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Population caps, timing ranges and tuned constants of a churn run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnLimits {
    /// Max concurrently live producer workers
    pub max_producers: usize,
    /// Max concurrently live consumer workers
    pub max_consumers: usize,

    /// Producer chunk length range, `[min, max)` milliseconds
    pub min_chunk_len_ms: u64,
    pub max_chunk_len_ms: u64,

    /// Upper bound of the randomized consumer poll interval
    pub max_poll_interval_ms: u64,

    /// Voluntary failure interval range, `[min, max)` milliseconds
    pub min_failure_interval_ms: u64,
    pub max_failure_interval_ms: u64,

    /// Worker lifetime is drawn from `[1, max_duration_secs)` seconds
    pub max_duration_secs: u64,

    pub producer_spawn_interval_ms: u64,
    pub consumer_spawn_interval_ms: u64,

    /// Nominal rate is drawn from `[1, max_srate)` Hz
    pub max_srate: u32,
    /// Channel count is drawn from `[1, max_channels)`
    pub max_channels: u32,
    /// Transport-side backlog, in seconds
    pub max_buffered_secs: u32,

    /// Transfer buffers are this many times larger than one nominal chunk
    pub chunk_oversize_factor: u32,
    /// Hard cap on samples moved per endpoint lifetime
    pub max_samples: u64,

    /// Cooldown is `cooldown_step_ms * [0, max_cooldown_steps)`
    pub cooldown_step_ms: u64,
    pub max_cooldown_steps: u32,

    /// Bounded wait for consumer resolution
    pub resolve_wait_ms: u64,
    /// Bound for metadata and clock-offset queries
    pub query_timeout_ms: u64,
}

impl Default for ChurnLimits {
    fn default() -> Self {
        Self {
            max_producers: 15,
            max_consumers: 20,
            min_chunk_len_ms: 1,
            max_chunk_len_ms: 100,
            max_poll_interval_ms: 100,
            min_failure_interval_ms: 1,
            max_failure_interval_ms: 2000,
            max_duration_secs: 10,
            producer_spawn_interval_ms: 500,
            consumer_spawn_interval_ms: 500,
            max_srate: 1000,
            max_channels: 10,
            max_buffered_secs: 6,
            chunk_oversize_factor: 5,
            max_samples: 10_000_000,
            cooldown_step_ms: 100,
            max_cooldown_steps: 50,
            resolve_wait_ms: 5000,
            query_timeout_ms: 1000,
        }
    }
}

impl ChurnLimits {
    /// Reject settings that would make a random range empty or a pool
    /// unable to ever spawn.
    pub fn validate(&self) -> StressResult<()> {
        fn range(name: &str, lo: u64, hi: u64) -> StressResult<()> {
            if lo >= hi {
                return Err(StressError::config(format!(
                    "{}: empty range [{}, {})",
                    name, lo, hi
                )));
            }
            Ok(())
        }

        if self.max_producers == 0 && self.max_consumers == 0 {
            return Err(StressError::config("both population caps are zero"));
        }
        range("chunk length", self.min_chunk_len_ms, self.max_chunk_len_ms)?;
        range(
            "failure interval",
            self.min_failure_interval_ms,
            self.max_failure_interval_ms,
        )?;
        range("duration", 1, self.max_duration_secs)?;
        range("sampling rate", 1, self.max_srate as u64)?;
        range("channel count", 1, self.max_channels as u64)?;
        if self.max_poll_interval_ms == 0 {
            return Err(StressError::config("max_poll_interval_ms must be > 0"));
        }
        if self.chunk_oversize_factor == 0 {
            return Err(StressError::config("chunk_oversize_factor must be > 0"));
        }
        if self.max_samples == 0 {
            return Err(StressError::config("max_samples must be > 0"));
        }
        if self.producer_spawn_interval_ms == 0 || self.consumer_spawn_interval_ms == 0 {
            return Err(StressError::config("spawn intervals must be > 0"));
        }
        Ok(())
    }

    pub fn spawn_interval(&self, role: crate::churn::state::Role) -> Duration {
        use crate::churn::state::Role;
        match role {
            Role::Producer => Duration::from_millis(self.producer_spawn_interval_ms),
            Role::Consumer => Duration::from_millis(self.consumer_spawn_interval_ms),
        }
    }

    pub fn cap(&self, role: crate::churn::state::Role) -> usize {
        use crate::churn::state::Role;
        match role {
            Role::Producer => self.max_producers,
            Role::Consumer => self.max_consumers,
        }
    }

    pub fn resolve_wait(&self) -> Duration {
        Duration::from_millis(self.resolve_wait_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Name and type catalogs random endpoints are drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamCatalog {
    pub names: Vec<String>,
    pub types: Vec<String>,
}

impl Default for StreamCatalog {
    fn default() -> Self {
        Self {
            names: ["Test1", "Test2", "Test3", "Test4"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            types: ["EEG", "Audio", "MoCap"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Full churn run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnConfig {
    pub limits: ChurnLimits,
    pub catalog: StreamCatalog,
    /// Fields pinned for every producer worker
    pub producer: ProducerOverrides,
    /// Fields pinned for every consumer worker
    pub consumer: ConsumerOverrides,
    /// Base seed for per-worker RNGs; entropy when absent
    pub seed: Option<u64>,
    /// Per-call transfer failure probability injected into the transport
    pub fault_rate: Option<f64>,
}

impl ChurnConfig {
    /// Load config from a file (format detected by extension)
    pub fn from_file<P: AsRef<Path>>(path: P) -> StressResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StressError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_toml(&contents).or_else(|_| Self::from_yaml(&contents)),
        }
    }

    /// Parse and validate config from a TOML string
    pub fn from_toml(contents: &str) -> StressResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a YAML string
    pub fn from_yaml(contents: &str) -> StressResult<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Standard search paths, first match wins:
    /// `./stresslab.toml`, `./stresslab.yaml`, `./stresslab.yml`.
    pub fn search_paths() -> Vec<PathBuf> {
        ["stresslab.toml", "stresslab.yaml", "stresslab.yml"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }

    /// Load the first config found in [`Self::search_paths`], or defaults.
    pub fn find_or_default() -> StressResult<Self> {
        for path in Self::search_paths() {
            if path.exists() {
                log::info!("Loading churn config from {}", path.display());
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> StressResult<()> {
        self.limits.validate()?;
        if self.catalog.names.is_empty() || self.catalog.types.is_empty() {
            return Err(StressError::config("stream catalogs must not be empty"));
        }
        if let Some(rate) = self.fault_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(StressError::config(format!(
                    "fault_rate {} outside [0, 1]",
                    rate
                )));
            }
        }
        self.producer.validate()?;
        self.consumer.validate()?;
        Ok(())
    }
}

//! # stresslab core
//!
//! Churn stress engine and throughput harness for streaming publish/subscribe
//! transports.
//!
//! The transport under test is anything implementing
//! [`communication::Transport`]. On top of it this crate provides:
//!
//! - **Churn**: two population controllers that keep spawning short-lived
//!   producer and consumer workers, each of which repeatedly opens an
//!   endpoint with random parameters, paces transfers on it and tears it
//!   down again
//! - **Throughput**: a single producer/consumer pair pushing and pulling a
//!   fixed number of samples as fast as possible
//! - **Loopback**: an in-process transport for running both without a network
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stresslab_core::{ChurnConfig, ChurnSession, LoopbackTransport};
//!
//! let session = ChurnSession::start(Arc::new(LoopbackTransport::new()), ChurnConfig::default())?;
//! let report = session.run_until_stopped(Some(Duration::from_secs(5)))?;
//! println!("{} producer iterations", report.summary.producers.iterations());
//! # Ok::<(), stresslab_core::StressError>(())
//! ```

pub mod churn;
pub mod clock;
pub mod communication;
pub mod config;
pub mod core;
pub mod error;
pub mod throughput;

pub use churn::{ChurnSession, ChurnStats, ChurnSummary, Role, SessionReport, StopSignal};
pub use clock::{Clock, SystemClock};
pub use communication::{
    ChannelFormat, ChunkBuffer, EndpointConfig, FlakyTransport, Inlet, LoopbackTransport, Outlet,
    ResolveFilter, Transport, TransportStats,
};
pub use config::{ChurnConfig, ChurnLimits, StreamCatalog};
pub use error::{StressError, StressResult};
pub use throughput::{run_throughput, DirectionReport, ThroughputConfig, ThroughputReport};

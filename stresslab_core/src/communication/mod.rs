//! # Communication layer
//!
//! The transport under test is reached only through the traits in
//! [`traits`]. Two implementations ship with the crate:
//!
//! - **Loopback**: in-process registry of streams with per-inlet bounded
//!   queues, used by the binaries and the test suite
//! - **Flaky**: wraps another transport and injects transfer failures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stresslab_core::communication::{ChannelFormat, EndpointConfig, LoopbackTransport, Transport};
//!
//! let transport = LoopbackTransport::new();
//! let config = EndpointConfig::new("Test1", "EEG", 8, 250.0, ChannelFormat::Float32);
//! let outlet = transport.publish(&config, 0, 6)?;
//! ```

pub mod flaky;
pub mod loopback;
pub mod traits;
pub mod types;

pub use flaky::FlakyTransport;
pub use loopback::{LoopbackTransport, TransportStats};
pub use traits::{Inlet, Outlet, Transport};
pub use types::{ChannelFormat, ChunkBuffer, ChunkData, EndpointConfig, ResolveFilter, IRREGULAR_RATE};

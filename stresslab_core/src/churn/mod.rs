//! # Churn engine
//!
//! - **params**: randomized worker parameters and overrides
//! - **pacer**: elapsed-time transfer pacing
//! - **worker**: producer/consumer lifecycles
//! - **controller**: per-role spawn/reap loops
//! - **session**: both controllers running together
//! - **state** / **stats**: shared atomics

pub mod controller;
pub mod pacer;
pub mod params;
pub mod session;
pub mod state;
pub mod stats;
pub mod worker;

pub use controller::{ControllerStats, PopulationController, ThreadLauncher, WorkerHandle, WorkerLauncher};
pub use pacer::{PacePlan, Pacing, PacerReport, StopReason};
pub use params::{ConsumerOverrides, ConsumerParams, ParamGenerator, ProducerOverrides, ProducerParams};
pub use session::{ChurnSession, SessionReport};
pub use state::{LiveCounts, LiveSlot, Role, StopSignal};
pub use stats::{ChurnStats, ChurnSummary, IterationOutcome, RoleSummary};
pub use worker::{run_worker, WorkerContext, WorkerExit, WorkerState};

//! # Core runtime support
//!
//! - **hlog**: thread-local worker log context and the `wlog!` macro

pub mod hlog;

pub use hlog::{
    clear_stream_label, clear_worker_context, set_stream_label, set_worker_context,
    WorkerLogContext,
};

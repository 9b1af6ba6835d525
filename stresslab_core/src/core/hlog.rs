//! Thread-local worker logging context.
//!
//! This module provides the `wlog!()` macro which lets worker code log
//! without threading role and stream identity through every call. The
//! population controller sets the context when a worker thread starts and
//! the worker updates the stream label each lifecycle iteration.
//!
//! # Example
//!
//! ```ignore
//! use stresslab_core::wlog;
//!
//! wlog!(info, "opened after {} ms", elapsed_ms);
//! wlog!(warn, "pull failed: {}", err);
//! ```

use crate::churn::state::Role;
use std::cell::RefCell;

thread_local! {
    static CURRENT_WORKER: RefCell<Option<WorkerLogContext>> = const { RefCell::new(None) };
}

/// Thread-local context for worker logging.
pub struct WorkerLogContext {
    pub role: Role,
    pub worker_id: u64,
    /// Label of the endpoint the worker currently owns, if any.
    pub stream: Option<String>,
}

/// Set the worker context for this thread.
pub fn set_worker_context(role: Role, worker_id: u64) {
    CURRENT_WORKER.with(|ctx| {
        *ctx.borrow_mut() = Some(WorkerLogContext {
            role,
            worker_id,
            stream: None,
        });
    });
}

/// Record which stream the worker is currently attached to.
///
/// Reuses the existing allocation when possible.
pub fn set_stream_label(label: &str) {
    CURRENT_WORKER.with(|ctx| {
        if let Some(ref mut existing) = *ctx.borrow_mut() {
            match existing.stream {
                Some(ref mut s) => {
                    s.clear();
                    s.push_str(label);
                }
                None => existing.stream = Some(label.to_owned()),
            }
        }
    });
}

/// Forget the current stream label (endpoint closed).
pub fn clear_stream_label() {
    CURRENT_WORKER.with(|ctx| {
        if let Some(ref mut existing) = *ctx.borrow_mut() {
            existing.stream = None;
        }
    });
}

/// Drop the whole context (worker retired).
pub fn clear_worker_context() {
    CURRENT_WORKER.with(|ctx| {
        *ctx.borrow_mut() = None;
    });
}

/// Prefix describing the current worker, e.g. `consumer#12 Test2(EEG,...)`.
pub fn context_prefix() -> String {
    CURRENT_WORKER.with(|ctx| match *ctx.borrow() {
        Some(ref c) => match c.stream {
            Some(ref s) => format!("{}#{} {}", c.role, c.worker_id, s),
            None => format!("{}#{}", c.role, c.worker_id),
        },
        None => "main".to_string(),
    })
}

/// Internal function used by the wlog!() macro.
pub fn log_with_context(level: log::Level, message: std::fmt::Arguments<'_>) {
    if log::log_enabled!(target: "stresslab::worker", level) {
        let prefix = context_prefix();
        log::log!(target: "stresslab::worker", level, "[{}] {}", prefix, message);
    }
}

/// Log a message from within a worker thread.
///
/// # Syntax
///
/// ```ignore
/// wlog!(info, "Simple message");
/// wlog!(warn, "Warning with value: {}", value);
/// wlog!(error, "Error: {}", err);
/// wlog!(debug, "Debug info: {:?}", data);
/// ```
#[macro_export]
macro_rules! wlog {
    (info, $($arg:tt)*) => {
        $crate::core::hlog::log_with_context(::log::Level::Info, format_args!($($arg)*))
    };
    (warn, $($arg:tt)*) => {
        $crate::core::hlog::log_with_context(::log::Level::Warn, format_args!($($arg)*))
    };
    (error, $($arg:tt)*) => {
        $crate::core::hlog::log_with_context(::log::Level::Error, format_args!($($arg)*))
    };
    (debug, $($arg:tt)*) => {
        $crate::core::hlog::log_with_context(::log::Level::Debug, format_args!($($arg)*))
    };
    (trace, $($arg:tt)*) => {
        $crate::core::hlog::log_with_context(::log::Level::Trace, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_without_context() {
        clear_worker_context();
        assert_eq!(context_prefix(), "main");
    }

    #[test]
    fn test_prefix_tracks_stream_label() {
        set_worker_context(Role::Consumer, 7);
        assert_eq!(context_prefix(), "consumer#7");

        set_stream_label("Test2(EEG,4,int8,100)");
        assert_eq!(context_prefix(), "consumer#7 Test2(EEG,4,int8,100)");

        set_stream_label("Test3");
        assert_eq!(context_prefix(), "consumer#7 Test3");

        clear_stream_label();
        assert_eq!(context_prefix(), "consumer#7");
        clear_worker_context();
    }
}

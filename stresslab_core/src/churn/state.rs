//! Shared churn state: roles, live population counts and stop flags.
//!
//! These are the only values mutated by many workers at once, so they are
//! plain atomics. Everything else a worker touches it owns outright.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep taken by [`StopSignal::sleep`].
pub const STOP_POLL_SLICE: Duration = Duration::from_millis(50);

/// Which side of the transport a worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live producer and consumer counts.
#[derive(Debug, Default)]
pub struct LiveCounts {
    producers: AtomicUsize,
    consumers: AtomicUsize,
}

impl LiveCounts {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, role: Role) -> &AtomicUsize {
        match role {
            Role::Producer => &self.producers,
            Role::Consumer => &self.consumers,
        }
    }

    pub fn get(&self, role: Role) -> usize {
        self.counter(role).load(Ordering::Acquire)
    }

    /// Atomically claim one slot if fewer than `cap` are live.
    ///
    /// The slot is released when the returned guard drops, including during
    /// unwinding, so a panicking worker never leaks capacity.
    pub fn try_reserve(self: &Arc<Self>, role: Role, cap: usize) -> Option<LiveSlot> {
        let counter = self.counter(role);
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current >= cap {
                return None;
            }
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(LiveSlot {
                        counts: Arc::clone(self),
                        role,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// One reserved unit of population capacity.
#[derive(Debug)]
pub struct LiveSlot {
    counts: Arc<LiveCounts>,
    role: Role,
}

impl LiveSlot {
    pub fn role(&self) -> Role {
        self.role
    }
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        self.counts.counter(self.role).fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cooperative stop flags, one per role. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    producers: Arc<AtomicBool>,
    consumers: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, role: Role) -> &AtomicBool {
        match role {
            Role::Producer => &self.producers,
            Role::Consumer => &self.consumers,
        }
    }

    pub fn stop(&self, role: Role) {
        self.flag(role).store(true, Ordering::SeqCst);
    }

    pub fn stop_all(&self) {
        self.stop(Role::Producer);
        self.stop(Role::Consumer);
    }

    pub fn is_stopped(&self, role: Role) -> bool {
        self.flag(role).load(Ordering::Acquire)
    }

    /// Sleep for `duration` in slices of at most [`STOP_POLL_SLICE`],
    /// returning early (with `false`) once `role` is stopped.
    pub fn sleep(&self, role: Role, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped(role) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(STOP_POLL_SLICE.min(deadline - now));
        }
    }
}

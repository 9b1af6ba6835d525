//! Run-wide churn counters shared by every worker and controller.

use crate::churn::state::Role;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of one worker lifecycle iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Completed,
    NotFound,
    Timeout,
    Failed,
}

#[derive(Debug, Default)]
struct RoleCounters {
    spawned: AtomicU64,
    retired: AtomicU64,
    spawn_failures: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    completed: AtomicU64,
    not_found: AtomicU64,
    timeouts: AtomicU64,
    failed: AtomicU64,
    panics: AtomicU64,
    samples: AtomicU64,
}

impl RoleCounters {
    fn snapshot(&self) -> RoleSummary {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RoleSummary {
            spawned: get(&self.spawned),
            retired: get(&self.retired),
            spawn_failures: get(&self.spawn_failures),
            endpoints_opened: get(&self.opened),
            endpoints_closed: get(&self.closed),
            completed: get(&self.completed),
            not_found: get(&self.not_found),
            timeouts: get(&self.timeouts),
            failed: get(&self.failed),
            panics: get(&self.panics),
            samples: get(&self.samples),
        }
    }
}

/// Lock-free counters; every method is a single relaxed atomic add.
#[derive(Debug, Default)]
pub struct ChurnStats {
    producers: RoleCounters,
    consumers: RoleCounters,
}

impl ChurnStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn role(&self, role: Role) -> &RoleCounters {
        match role {
            Role::Producer => &self.producers,
            Role::Consumer => &self.consumers,
        }
    }

    pub fn worker_spawned(&self, role: Role) {
        self.role(role).spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_retired(&self, role: Role) {
        self.role(role).retired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn spawn_failed(&self, role: Role) {
        self.role(role).spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn endpoint_opened(&self, role: Role) {
        self.role(role).opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn endpoint_closed(&self, role: Role) {
        self.role(role).closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn panic_caught(&self, role: Role) {
        self.role(role).panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_samples(&self, role: Role, samples: u64) {
        self.role(role).samples.fetch_add(samples, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, role: Role, outcome: IterationOutcome) {
        let c = self.role(role);
        let counter = match outcome {
            IterationOutcome::Completed => &c.completed,
            IterationOutcome::NotFound => &c.not_found,
            IterationOutcome::Timeout => &c.timeouts,
            IterationOutcome::Failed => &c.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChurnSummary {
        ChurnSummary {
            producers: self.producers.snapshot(),
            consumers: self.consumers.snapshot(),
        }
    }
}

/// Point-in-time counters of one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub spawned: u64,
    pub retired: u64,
    pub spawn_failures: u64,
    pub endpoints_opened: u64,
    pub endpoints_closed: u64,
    pub completed: u64,
    pub not_found: u64,
    pub timeouts: u64,
    pub failed: u64,
    pub panics: u64,
    /// Pushed for producers, pulled for consumers
    pub samples: u64,
}

impl RoleSummary {
    pub fn iterations(&self) -> u64 {
        self.completed + self.not_found + self.timeouts + self.failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChurnSummary {
    pub producers: RoleSummary,
    pub consumers: RoleSummary,
}

impl ChurnSummary {
    pub fn role(&self, role: Role) -> &RoleSummary {
        match role {
            Role::Producer => &self.producers,
            Role::Consumer => &self.consumers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_role() {
        let stats = ChurnStats::new();
        stats.worker_spawned(Role::Producer);
        stats.worker_spawned(Role::Producer);
        stats.worker_spawned(Role::Consumer);
        stats.record_outcome(Role::Consumer, IterationOutcome::NotFound);
        stats.record_outcome(Role::Consumer, IterationOutcome::Completed);
        stats.add_samples(Role::Producer, 500);

        let summary = stats.snapshot();
        assert_eq!(summary.producers.spawned, 2);
        assert_eq!(summary.consumers.spawned, 1);
        assert_eq!(summary.consumers.not_found, 1);
        assert_eq!(summary.consumers.iterations(), 2);
        assert_eq!(summary.role(Role::Producer).samples, 500);
        assert_eq!(summary.producers.iterations(), 0);
    }

    #[test]
    fn test_summary_serializes() {
        let stats = ChurnStats::new();
        stats.panic_caught(Role::Producer);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["producers"]["panics"], 1);
        assert_eq!(json["consumers"]["spawn_failures"], 0);
    }
}

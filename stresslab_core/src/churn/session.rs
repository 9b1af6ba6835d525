//! A running churn: both population controllers on their own threads.

use crate::churn::controller::{ControllerStats, PopulationController};
use crate::churn::state::{LiveCounts, Role, StopSignal};
use crate::churn::stats::{ChurnStats, ChurnSummary};
use crate::churn::worker::WorkerContext;
use crate::clock::SystemClock;
use crate::communication::{FlakyTransport, Transport};
use crate::config::ChurnConfig;
use crate::error::{StressError, StressResult};
use crate::stress_internal;
use serde::Serialize;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Final report of a churn session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub elapsed_secs: f64,
    pub producer_controller: ControllerStats,
    pub consumer_controller: ControllerStats,
    pub summary: ChurnSummary,
}

pub struct ChurnSession {
    stop: StopSignal,
    stats: Arc<ChurnStats>,
    live: Arc<LiveCounts>,
    controllers: Vec<(Role, JoinHandle<ControllerStats>)>,
    started: Instant,
}

impl ChurnSession {
    /// Validate `config`, wrap `transport` in fault injection when a fault
    /// rate is configured, and start both controllers.
    pub fn start(transport: Arc<dyn Transport>, config: ChurnConfig) -> StressResult<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> = match config.fault_rate {
            Some(rate) if rate > 0.0 => {
                log::info!("injecting transfer faults at rate {}", rate);
                Arc::new(FlakyTransport::new(transport, rate)?)
            }
            _ => transport,
        };

        let ctx = WorkerContext {
            transport,
            config: Arc::new(config),
            stop: StopSignal::new(),
            stats: Arc::new(ChurnStats::new()),
            clock: Arc::new(SystemClock::new()),
        };
        let live = Arc::new(LiveCounts::new());
        let ids = Arc::new(AtomicU64::new(0));

        let mut controllers = Vec::with_capacity(2);
        for role in [Role::Producer, Role::Consumer] {
            let controller =
                PopulationController::new(role, &ctx, Arc::clone(&live), Arc::clone(&ids));
            let spawned = thread::Builder::new()
                .name(format!("{}-controller", role))
                .spawn(move || controller.run())
                .map_err(|e| StressError::Spawn(format!("{} controller: {}", role, e)));
            match spawned {
                Ok(handle) => controllers.push((role, handle)),
                Err(e) => {
                    // tear down whatever already started
                    ctx.stop.stop_all();
                    for (_, handle) in controllers {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            stop: ctx.stop,
            stats: ctx.stats,
            live,
            controllers,
            started: Instant::now(),
        })
    }

    /// Handle for requesting a stop from another thread (e.g. a signal handler).
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn stats(&self) -> Arc<ChurnStats> {
        Arc::clone(&self.stats)
    }

    pub fn live(&self, role: Role) -> usize {
        self.live.get(role)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Block until both stop flags are set or `limit` elapses, whichever
    /// comes first, then shut down.
    pub fn run_until_stopped(self, limit: Option<Duration>) -> StressResult<SessionReport> {
        let deadline = limit.map(|d| self.started + d);
        while !(self.stop.is_stopped(Role::Producer) && self.stop.is_stopped(Role::Consumer)) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::info!("run duration reached");
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        self.shutdown()
    }

    /// Set both stop flags and join the controllers, which in turn join
    /// every live worker.
    pub fn shutdown(self) -> StressResult<SessionReport> {
        self.stop.stop_all();
        let (producer_controller, consumer_controller) = join_controllers(self.controllers)?;
        Ok(SessionReport {
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            producer_controller,
            consumer_controller,
            summary: self.stats.snapshot(),
        })
    }
}

/// Join every controller before reporting, so one panicked controller
/// never leaves the other's workers running.
fn join_controllers(
    controllers: Vec<(Role, JoinHandle<ControllerStats>)>,
) -> StressResult<(ControllerStats, ControllerStats)> {
    let mut producer_controller = ControllerStats::default();
    let mut consumer_controller = ControllerStats::default();
    let mut first_error = None;
    for (role, handle) in controllers {
        match handle.join() {
            Ok(stats) => match role {
                Role::Producer => producer_controller = stats,
                Role::Consumer => consumer_controller = stats,
            },
            Err(_) => {
                log::error!("{} controller panicked", role);
                first_error.get_or_insert_with(|| stress_internal!("{} controller panicked", role));
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok((producer_controller, consumer_controller)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_panicked_controller_still_joins_the_other() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let producer = thread::spawn(|| -> ControllerStats { panic!("controller blew up") });
        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
            ControllerStats {
                spawned: 4,
                ..Default::default()
            }
        });

        let result = join_controllers(vec![(Role::Producer, producer), (Role::Consumer, consumer)]);

        assert!(matches!(result, Err(StressError::Internal { .. })));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_join_controllers_maps_roles() {
        let producer = thread::spawn(|| ControllerStats {
            spawned: 1,
            ..Default::default()
        });
        let consumer = thread::spawn(|| ControllerStats {
            spawned: 2,
            ..Default::default()
        });
        let (p, c) =
            join_controllers(vec![(Role::Consumer, consumer), (Role::Producer, producer)]).unwrap();
        assert_eq!(p.spawned, 1);
        assert_eq!(c.spawned, 2);
    }
}

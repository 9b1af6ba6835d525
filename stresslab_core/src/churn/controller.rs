//! Population controller: one spawn/reap loop per role.
//!
//! Each tick reserves at most one live slot and hands it to a freshly
//! spawned worker thread, then joins every worker that has already finished.
//! The controller knows nothing about run length; it loops until its role's
//! stop flag is set and then joins whatever is still alive.

use crate::churn::state::{LiveCounts, LiveSlot, Role, StopSignal};
use crate::churn::stats::ChurnStats;
use crate::churn::worker::{run_worker, WorkerContext, WorkerExit};
use crate::error::{StressError, StressResult};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Starts one worker thread that owns `slot` for its whole life.
pub trait WorkerLauncher: Send {
    fn launch(&self, id: u64, role: Role, slot: LiveSlot) -> StressResult<JoinHandle<WorkerExit>>;
}

impl<F> WorkerLauncher for F
where
    F: Fn(u64, Role, LiveSlot) -> StressResult<JoinHandle<WorkerExit>> + Send,
{
    fn launch(&self, id: u64, role: Role, slot: LiveSlot) -> StressResult<JoinHandle<WorkerExit>> {
        self(id, role, slot)
    }
}

/// Launches [`run_worker`] on a named OS thread.
pub struct ThreadLauncher {
    ctx: WorkerContext,
}

impl ThreadLauncher {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, id: u64, role: Role, slot: LiveSlot) -> StressResult<JoinHandle<WorkerExit>> {
        let ctx = self.ctx.clone();
        thread::Builder::new()
            .name(format!("{}-{}", role, id))
            .spawn(move || {
                let _slot = slot;
                run_worker(id, role, &ctx)
            })
            .map_err(|e| StressError::Spawn(format!("{} #{}: {}", role, id, e)))
    }
}

/// Controller-held record of one spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: u64,
    pub role: Role,
    pub spawned_at: Instant,
    handle: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Counters of one controller loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    pub ticks: u64,
    pub spawned: u64,
    pub reaped: u64,
    pub spawn_failures: u64,
    /// Highest live count observed at a tick
    pub peak_live: usize,
    /// Workers whose thread died from a panic outside the iteration guard
    pub panicked: u64,
}

pub struct PopulationController {
    role: Role,
    cap: usize,
    interval: Duration,
    live: Arc<LiveCounts>,
    stop: StopSignal,
    stats: Arc<ChurnStats>,
    ids: Arc<AtomicU64>,
    launcher: Box<dyn WorkerLauncher>,
    handles: Vec<WorkerHandle>,
    counters: ControllerStats,
}

impl PopulationController {
    /// Controller spawning real worker threads against `ctx.transport`.
    ///
    /// `ids` is shared between roles so worker ids are unique per run.
    pub fn new(role: Role, ctx: &WorkerContext, live: Arc<LiveCounts>, ids: Arc<AtomicU64>) -> Self {
        Self::with_launcher(role, ctx, live, ids, Box::new(ThreadLauncher::new(ctx.clone())))
    }

    pub fn with_launcher(
        role: Role,
        ctx: &WorkerContext,
        live: Arc<LiveCounts>,
        ids: Arc<AtomicU64>,
        launcher: Box<dyn WorkerLauncher>,
    ) -> Self {
        let limits = &ctx.config.limits;
        Self {
            role,
            cap: limits.cap(role),
            interval: limits.spawn_interval(role),
            live,
            stop: ctx.stop.clone(),
            stats: Arc::clone(&ctx.stats),
            ids,
            launcher,
            handles: Vec::new(),
            counters: ControllerStats::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Handles not yet reaped.
    pub fn outstanding(&self) -> usize {
        self.handles.len()
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.counters
    }

    /// Spawn at most one worker, then reap finished ones.
    pub fn tick(&mut self) {
        self.counters.ticks += 1;
        if !self.stop.is_stopped(self.role) {
            self.spawn_one();
        }
        self.counters.peak_live = self.counters.peak_live.max(self.live.get(self.role));
        self.reap_finished();
    }

    fn spawn_one(&mut self) {
        let Some(slot) = self.live.try_reserve(self.role, self.cap) else {
            return;
        };
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        match self.launcher.launch(id, self.role, slot) {
            Ok(handle) => {
                self.counters.spawned += 1;
                self.stats.worker_spawned(self.role);
                log::debug!("spawned {} #{}", self.role, id);
                self.handles.push(WorkerHandle {
                    id,
                    role: self.role,
                    spawned_at: Instant::now(),
                    handle,
                });
            }
            Err(e) => {
                self.counters.spawn_failures += 1;
                self.stats.spawn_failed(self.role);
                log::warn!("{} spawn failed, retrying next tick: {}", self.role, e);
            }
        }
    }

    /// Join every worker whose thread has already exited. Never blocks on a
    /// live worker.
    pub fn reap_finished(&mut self) -> usize {
        let mut reaped = 0;
        let mut i = 0;
        while i < self.handles.len() {
            if self.handles[i].is_finished() {
                let handle = self.handles.swap_remove(i);
                self.join(handle);
                reaped += 1;
            } else {
                i += 1;
            }
        }
        reaped
    }

    fn join(&mut self, worker: WorkerHandle) {
        self.counters.reaped += 1;
        match worker.handle.join() {
            Ok(exit) => log::trace!(
                "reaped {} #{} after {:?} ({} iterations)",
                worker.role,
                worker.id,
                worker.spawned_at.elapsed(),
                exit.iterations
            ),
            Err(_) => {
                self.counters.panicked += 1;
                log::error!("{} #{} thread panicked", worker.role, worker.id);
            }
        }
    }

    /// Join all remaining workers, blocking until each retires.
    pub fn join_all(&mut self) {
        for worker in std::mem::take(&mut self.handles) {
            self.join(worker);
        }
    }

    /// Tick on the spawn interval until stopped, then join everything.
    pub fn run(mut self) -> ControllerStats {
        log::info!(
            "{} controller started (cap {}, every {:?})",
            self.role,
            self.cap,
            self.interval
        );
        while !self.stop.is_stopped(self.role) {
            self.tick();
            if !self.stop.sleep(self.role, self.interval) {
                break;
            }
        }
        let remaining = self.handles.len();
        self.join_all();
        log::info!(
            "{} controller stopped: {} spawned, {} joined at shutdown",
            self.role,
            self.counters.spawned,
            remaining
        );
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::communication::LoopbackTransport;
    use crate::config::ChurnConfig;
    use std::sync::atomic::AtomicBool;

    fn context(max_producers: usize) -> WorkerContext {
        let mut config = ChurnConfig::default();
        config.limits.max_producers = max_producers;
        config.limits.producer_spawn_interval_ms = 1;
        WorkerContext {
            transport: Arc::new(LoopbackTransport::new()),
            config: Arc::new(config),
            stop: StopSignal::new(),
            stats: Arc::new(ChurnStats::new()),
            clock: Arc::new(SystemClock::new()),
        }
    }

    fn exit(id: u64, role: Role) -> WorkerExit {
        WorkerExit {
            id,
            role,
            iterations: 0,
            stopped: true,
        }
    }

    #[test]
    fn test_tick_stops_at_cap() {
        let ctx = context(3);
        let live = Arc::new(LiveCounts::new());
        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        let launcher = move |id: u64, role: Role, slot: LiveSlot| -> StressResult<JoinHandle<WorkerExit>> {
            let gate = Arc::clone(&gate);
            Ok(thread::spawn(move || {
                let _slot = slot;
                while !gate.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(1));
                }
                exit(id, role)
            }))
        };
        let mut controller = PopulationController::with_launcher(
            Role::Producer,
            &ctx,
            Arc::clone(&live),
            Arc::new(AtomicU64::new(0)),
            Box::new(launcher),
        );

        for _ in 0..10 {
            controller.tick();
            assert!(live.get(Role::Producer) <= 3);
        }
        assert_eq!(controller.stats().spawned, 3);
        assert_eq!(controller.stats().peak_live, 3);

        release.store(true, Ordering::Release);
        controller.join_all();
        assert_eq!(controller.stats().reaped, 3);
        assert_eq!(live.get(Role::Producer), 0);
    }

    #[test]
    fn test_spawn_failure_is_counted_and_slot_released() {
        let ctx = context(2);
        let live = Arc::new(LiveCounts::new());
        let launcher = |id: u64, role: Role, _slot: LiveSlot| -> StressResult<JoinHandle<WorkerExit>> {
            Err(StressError::Spawn(format!("{} #{}: refused", role, id)))
        };
        let mut controller = PopulationController::with_launcher(
            Role::Producer,
            &ctx,
            Arc::clone(&live),
            Arc::new(AtomicU64::new(0)),
            Box::new(launcher),
        );

        controller.tick();
        controller.tick();
        assert_eq!(controller.stats().spawn_failures, 2);
        assert_eq!(controller.stats().spawned, 0);
        assert_eq!(live.get(Role::Producer), 0);
        assert_eq!(ctx.stats.snapshot().producers.spawn_failures, 2);
    }

    #[test]
    fn test_reap_collects_finished_workers() {
        let ctx = context(5);
        let live = Arc::new(LiveCounts::new());
        let launcher = |id: u64, role: Role, slot: LiveSlot| -> StressResult<JoinHandle<WorkerExit>> {
            Ok(thread::spawn(move || {
                drop(slot);
                exit(id, role)
            }))
        };
        let mut controller = PopulationController::with_launcher(
            Role::Producer,
            &ctx,
            Arc::clone(&live),
            Arc::new(AtomicU64::new(0)),
            Box::new(launcher),
        );

        for _ in 0..4 {
            controller.tick();
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while controller.outstanding() > 0 && Instant::now() < deadline {
            controller.reap_finished();
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(controller.outstanding(), 0);
        assert_eq!(controller.stats().spawned, controller.stats().reaped);
    }

    #[test]
    fn test_panicking_thread_is_reaped() {
        let ctx = context(1);
        let live = Arc::new(LiveCounts::new());
        let launcher = |_id: u64, _role: Role, slot: LiveSlot| -> StressResult<JoinHandle<WorkerExit>> {
            Ok(thread::spawn(move || -> WorkerExit {
                let _slot = slot;
                panic!("outside the iteration guard");
            }))
        };
        let mut controller = PopulationController::with_launcher(
            Role::Consumer,
            &ctx,
            Arc::clone(&live),
            Arc::new(AtomicU64::new(0)),
            Box::new(launcher),
        );

        controller.tick();
        controller.join_all();
        assert_eq!(controller.stats().panicked, 1);
        assert_eq!(live.get(Role::Consumer), 0);
    }

    #[test]
    fn test_run_returns_after_stop() {
        let ctx = context(2);
        let stop = ctx.stop.clone();
        let controller = PopulationController::new(
            Role::Producer,
            &ctx,
            Arc::new(LiveCounts::new()),
            Arc::new(AtomicU64::new(0)),
        );
        let runner = thread::spawn(move || controller.run());
        thread::sleep(Duration::from_millis(100));
        stop.stop(Role::Producer);
        let started = Instant::now();
        let stats = runner.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(stats.spawned >= 1);
        assert_eq!(stats.spawned, stats.reaped);
    }
}

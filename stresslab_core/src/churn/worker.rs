//! Producer and consumer worker lifecycles.
//!
//! A worker repeatedly opens an endpoint with fresh random parameters,
//! paces transfers on it until its failure deadline, closes it and cools
//! down, until its own lifetime ends or its role is stopped. Every iteration
//! runs behind `catch_unwind`, so neither an error nor a panic inside one
//! endpoint's lifetime can take the worker (or anything else) down.

use crate::churn::pacer::{
    consumer_capacity, pace_consumer, pace_producer, producer_capacity, PacePlan, Pacing,
    PullOptions,
};
use crate::churn::params::ParamGenerator;
use crate::churn::state::{Role, StopSignal};
use crate::churn::stats::{ChurnStats, IterationOutcome};
use crate::clock::Clock;
use crate::communication::{ChunkBuffer, EndpointConfig, Inlet, Transport};
use crate::config::ChurnConfig;
use crate::core::hlog::{clear_stream_label, clear_worker_context, set_stream_label, set_worker_context};
use crate::error::{StressError, StressResult};
use crate::wlog;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything a worker thread needs, shared with its siblings.
#[derive(Clone)]
pub struct WorkerContext {
    pub transport: Arc<dyn Transport>,
    pub config: Arc<ChurnConfig>,
    pub stop: StopSignal,
    pub stats: Arc<ChurnStats>,
    pub clock: Arc<dyn Clock>,
}

/// Lifecycle states of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawned,
    EndpointOpen,
    Transferring,
    EndpointClosed,
    CoolingDown,
    Retired,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Spawned => "spawned",
            WorkerState::EndpointOpen => "endpoint-open",
            WorkerState::Transferring => "transferring",
            WorkerState::EndpointClosed => "endpoint-closed",
            WorkerState::CoolingDown => "cooling-down",
            WorkerState::Retired => "retired",
        };
        f.write_str(s)
    }
}

/// Tracks the current state and traces every transition.
#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
}

impl Lifecycle {
    fn enter(&mut self, next: WorkerState) {
        wlog!(trace, "{} -> {}", self.state, next);
        self.state = next;
    }
}

/// What a retired worker did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub id: u64,
    pub role: Role,
    pub iterations: u64,
    pub stopped: bool,
}

/// Per-worker RNG: entropy, or a deterministic function of the run seed
/// and the worker id.
pub fn worker_rng(seed: Option<u64>, worker_id: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ worker_id.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        None => StdRng::from_entropy(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn classify(err: &StressError) -> IterationOutcome {
    if !err.is_expected_churn() {
        return IterationOutcome::Failed;
    }
    match err {
        StressError::NotFound(_) => IterationOutcome::NotFound,
        _ => IterationOutcome::Timeout,
    }
}

/// Run one worker until it retires. Intended as the body of a worker thread.
pub fn run_worker(id: u64, role: Role, ctx: &WorkerContext) -> WorkerExit {
    set_worker_context(role, id);
    let mut life = Lifecycle {
        state: WorkerState::Spawned,
    };
    let config = &ctx.config;
    let gen = ParamGenerator::new(&config.limits, &config.catalog);
    let mut rng = worker_rng(config.seed, id);
    let pinned = match role {
        Role::Producer => config.producer.duration_secs,
        Role::Consumer => config.consumer.duration_secs,
    };
    let lifetime = gen.lifetime(pinned, &mut rng);
    let born = Instant::now();
    let mut iterations = 0;
    wlog!(debug, "started, lifetime {:.1}s", lifetime.as_secs_f64());

    while !ctx.stop.is_stopped(role) {
        let result = catch_unwind(AssertUnwindSafe(|| match role {
            Role::Producer => producer_iteration(ctx, &gen, &mut rng, &mut life),
            Role::Consumer => consumer_iteration(ctx, &gen, &mut rng, &mut life),
        }));

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                let outcome = classify(&e);
                match outcome {
                    IterationOutcome::Failed => wlog!(warn, "endpoint failed: {}", e),
                    _ => wlog!(info, "{}", e),
                }
                outcome
            }
            Err(payload) => {
                ctx.stats.panic_caught(role);
                wlog!(error, "iteration panicked: {}", panic_message(payload.as_ref()));
                IterationOutcome::Failed
            }
        };
        ctx.stats.record_outcome(role, outcome);
        iterations += 1;
        // a panic mid-transfer skips the explicit close; Drop withdrew it
        if matches!(
            life.state,
            WorkerState::EndpointOpen | WorkerState::Transferring
        ) {
            ctx.stats.endpoint_closed(role);
            life.enter(WorkerState::EndpointClosed);
        }
        clear_stream_label();

        if born.elapsed() >= lifetime {
            break;
        }
        life.enter(WorkerState::CoolingDown);
        if !ctx.stop.sleep(role, gen.cooldown(&mut rng)) || born.elapsed() >= lifetime {
            break;
        }
    }

    let stopped = ctx.stop.is_stopped(role);
    life.enter(WorkerState::Retired);
    wlog!(
        debug,
        "retired after {} iterations{}",
        iterations,
        if stopped { " (stopped)" } else { "" }
    );
    ctx.stats.worker_retired(role);
    clear_worker_context();

    WorkerExit {
        id,
        role,
        iterations,
        stopped,
    }
}

fn producer_iteration(
    ctx: &WorkerContext,
    gen: &ParamGenerator<'_>,
    rng: &mut StdRng,
    life: &mut Lifecycle,
) -> StressResult<IterationOutcome> {
    let limits = &ctx.config.limits;
    let params = gen.producer(&ctx.config.producer, rng);
    let endpoint = &params.config;
    set_stream_label(&endpoint.label());

    let rate = endpoint.nominal_srate;
    let chunk_hint = (params.chunk_len.as_millis() as f64 * rate / 1000.0) as u32;
    let mut outlet = ctx
        .transport
        .publish(endpoint, chunk_hint, limits.max_buffered_secs)?;
    ctx.stats.endpoint_opened(Role::Producer);
    life.enter(WorkerState::EndpointOpen);

    let capacity = producer_capacity(params.chunk_len, rate, limits.chunk_oversize_factor);
    let buffer = ChunkBuffer::filled(
        endpoint.channel_format,
        endpoint.channel_count as usize,
        capacity,
    );
    let plan = PacePlan {
        pacing: if endpoint.is_irregular() {
            Pacing::Irregular { per_tick: 1 }
        } else {
            Pacing::Regular(rate)
        },
        failure_interval: params.failure_interval,
        max_samples: limits.max_samples,
    };

    life.enter(WorkerState::Transferring);
    let paced = pace_producer(
        outlet.as_mut(),
        &buffer,
        &plan,
        params.chunk_len,
        ctx.clock.as_ref(),
        &ctx.stop,
    );
    let closed = outlet.close();
    ctx.stats.endpoint_closed(Role::Producer);
    life.enter(WorkerState::EndpointClosed);

    let report = paced?;
    closed?;
    ctx.stats.add_samples(Role::Producer, report.samples);
    wlog!(
        debug,
        "closed after {} pushes ({} samples, {:?})",
        report.transfer_calls,
        report.samples,
        report.stop_reason
    );
    Ok(IterationOutcome::Completed)
}

fn consumer_iteration(
    ctx: &WorkerContext,
    gen: &ParamGenerator<'_>,
    rng: &mut StdRng,
    life: &mut Lifecycle,
) -> StressResult<IterationOutcome> {
    let limits = &ctx.config.limits;
    let params = gen.consumer(&ctx.config.consumer, rng);

    let found = ctx
        .transport
        .resolve(&params.filter, 1, limits.resolve_wait())?;
    let target = match found.choose(rng) {
        Some(target) => target.clone(),
        None => {
            wlog!(
                info,
                "no stream matching {} within {} ms",
                params.filter,
                limits.resolve_wait_ms
            );
            return Ok(IterationOutcome::NotFound);
        }
    };
    set_stream_label(&target.label());

    let mut inlet = ctx.transport.open(&target, limits.max_buffered_secs)?;
    ctx.stats.endpoint_opened(Role::Consumer);
    life.enter(WorkerState::EndpointOpen);

    let consumed = consume(
        ctx,
        gen,
        rng,
        life,
        inlet.as_mut(),
        &target,
        params.request_info,
        params.request_time,
        params.failure_interval,
    );
    let closed = inlet.close();
    ctx.stats.endpoint_closed(Role::Consumer);
    life.enter(WorkerState::EndpointClosed);

    let samples = consumed?;
    closed?;
    ctx.stats.add_samples(Role::Consumer, samples);
    Ok(IterationOutcome::Completed)
}

#[allow(clippy::too_many_arguments)]
fn consume(
    ctx: &WorkerContext,
    gen: &ParamGenerator<'_>,
    rng: &mut StdRng,
    life: &mut Lifecycle,
    inlet: &mut dyn Inlet,
    target: &EndpointConfig,
    request_info: bool,
    request_time: bool,
    failure_interval: Duration,
) -> StressResult<u64> {
    let limits = &ctx.config.limits;
    if request_info {
        let info = inlet.info(limits.query_timeout())?;
        wlog!(info, "connected to {}", info.name);
    }
    inlet.open_stream(limits.query_timeout())?;

    let rate = target.nominal_srate;
    let capacity = consumer_capacity(
        limits.max_chunk_len_ms,
        rate,
        limits.max_srate as f64,
        limits.chunk_oversize_factor,
    );
    let mut buffer = ChunkBuffer::filled(
        target.channel_format,
        target.channel_count as usize,
        capacity,
    );
    let plan = PacePlan {
        pacing: if target.is_irregular() {
            Pacing::Irregular { per_tick: capacity }
        } else {
            Pacing::Regular(rate)
        },
        failure_interval,
        max_samples: limits.max_samples,
    };

    life.enter(WorkerState::Transferring);
    let mut poll = || gen.poll_interval(&mut *rng);
    let report = pace_consumer(
        inlet,
        &mut buffer,
        &plan,
        PullOptions {
            request_time,
            query_timeout: limits.query_timeout(),
            poll_interval: &mut poll,
        },
        ctx.clock.as_ref(),
        &ctx.stop,
    )?;
    wlog!(
        debug,
        "closing after {} pulls ({} samples, {:?})",
        report.transfer_calls,
        report.samples,
        report.stop_reason
    );
    Ok(report.samples)
}

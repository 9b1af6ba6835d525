//! Elapsed-time transfer pacing.
//!
//! Both pacers keep a cursor of samples already requested and, after every
//! wake-up, transfer `floor(elapsed * rate) - cursor` samples, clamped to the
//! pre-allocated buffer. Oversleeping therefore shows up as a bigger batch on
//! the next tick, never as a request the buffer cannot hold.

use crate::churn::state::{Role, StopSignal};
use crate::clock::Clock;
use crate::communication::{ChunkBuffer, Inlet, Outlet};
use crate::error::StressResult;
use serde::Serialize;
use std::time::Duration;

/// How many samples become due per unit of time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// Samples per second
    Regular(f64),
    /// Irregular stream: a fixed number of samples per wake-up
    Irregular { per_tick: usize },
}

/// Samples to transfer on this wake-up.
pub fn samples_due(pacing: Pacing, elapsed_secs: f64, requested: u64, capacity: usize) -> usize {
    let due = match pacing {
        Pacing::Regular(rate) => {
            let target = (elapsed_secs.max(0.0) * rate).floor() as u64;
            target.saturating_sub(requested) as usize
        }
        Pacing::Irregular { per_tick } => per_tick,
    };
    due.min(capacity)
}

/// Producer buffer size: `max(1, floor(chunk_ms * rate / 1000 * factor))`.
pub fn producer_capacity(chunk_len: Duration, rate: f64, oversize_factor: u32) -> usize {
    let samples = chunk_len.as_millis() as f64 * rate / 1000.0 * oversize_factor as f64;
    (samples.floor() as usize).max(1)
}

/// Consumer buffer size: `max(1, ceil(max_chunk_ms * rate / 1000 * factor))`.
/// Irregular streams are sized as if they ran at `max_rate`.
pub fn consumer_capacity(max_chunk_ms: u64, rate: f64, max_rate: f64, oversize_factor: u32) -> usize {
    let rate = if rate > 0.0 { rate } else { max_rate };
    let samples = max_chunk_ms as f64 * rate / 1000.0 * oversize_factor as f64;
    (samples.ceil() as usize).max(1)
}

/// Why a pacer returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FailureDeadline,
    Stopped,
    SampleCap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacerReport {
    pub iterations: u64,
    pub transfer_calls: u64,
    /// Samples actually moved
    pub samples: u64,
    pub largest_request: usize,
    pub stop_reason: StopReason,
}

/// Bounds shared by both pacers.
#[derive(Debug, Clone, Copy)]
pub struct PacePlan {
    pub pacing: Pacing,
    pub failure_interval: Duration,
    pub max_samples: u64,
}

struct Cursor {
    start: f64,
    requested: u64,
    report: PacerReport,
}

impl Cursor {
    fn new(start: f64) -> Self {
        Self {
            start,
            requested: 0,
            report: PacerReport {
                iterations: 0,
                transfer_calls: 0,
                samples: 0,
                largest_request: 0,
                stop_reason: StopReason::Stopped,
            },
        }
    }

    fn should_stop(
        &self,
        plan: &PacePlan,
        clock: &dyn Clock,
        stop: &StopSignal,
        role: Role,
    ) -> Option<StopReason> {
        if stop.is_stopped(role) {
            Some(StopReason::Stopped)
        } else if clock.now() - self.start >= plan.failure_interval.as_secs_f64() {
            Some(StopReason::FailureDeadline)
        } else if self.requested >= plan.max_samples {
            Some(StopReason::SampleCap)
        } else {
            None
        }
    }

    fn next_request(&mut self, plan: &PacePlan, clock: &dyn Clock, capacity: usize) -> usize {
        self.report.iterations += 1;
        let elapsed = clock.now() - self.start;
        let remaining = plan.max_samples.saturating_sub(self.requested);
        let due = samples_due(plan.pacing, elapsed, self.requested, capacity)
            .min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if due > 0 {
            self.requested += due as u64;
            self.report.transfer_calls += 1;
            self.report.largest_request = self.report.largest_request.max(due);
        }
        due
    }

    fn finish(mut self, reason: StopReason) -> PacerReport {
        self.report.stop_reason = reason;
        self.report
    }
}

/// Push `buffer` on a fixed `chunk_len` cadence until the plan says stop.
///
/// Stop conditions are checked again after every sleep, so nothing is pushed
/// once the failure deadline has passed.
pub fn pace_producer(
    outlet: &mut dyn Outlet,
    buffer: &ChunkBuffer,
    plan: &PacePlan,
    chunk_len: Duration,
    clock: &dyn Clock,
    stop: &StopSignal,
) -> StressResult<PacerReport> {
    let capacity = buffer.capacity_samples();
    let mut cursor = Cursor::new(clock.now());
    loop {
        if let Some(reason) = cursor.should_stop(plan, clock, stop, Role::Producer) {
            return Ok(cursor.finish(reason));
        }
        clock.sleep(chunk_len);
        if let Some(reason) = cursor.should_stop(plan, clock, stop, Role::Producer) {
            return Ok(cursor.finish(reason));
        }
        let due = cursor.next_request(plan, clock, capacity);
        if due > 0 {
            outlet.push_chunk(buffer, due)?;
            cursor.report.samples += due as u64;
        }
    }
}

/// Consumer-side knobs beyond the shared plan.
pub struct PullOptions<'a> {
    /// Query the clock offset after every pull
    pub request_time: bool,
    pub query_timeout: Duration,
    /// Draws the next poll interval
    pub poll_interval: &'a mut dyn FnMut() -> Duration,
}

/// Pull into `buffer` at random poll intervals until the plan says stop.
pub fn pace_consumer(
    inlet: &mut dyn Inlet,
    buffer: &mut ChunkBuffer,
    plan: &PacePlan,
    options: PullOptions<'_>,
    clock: &dyn Clock,
    stop: &StopSignal,
) -> StressResult<PacerReport> {
    let capacity = buffer.capacity_samples();
    let mut cursor = Cursor::new(clock.now());
    loop {
        if let Some(reason) = cursor.should_stop(plan, clock, stop, Role::Consumer) {
            return Ok(cursor.finish(reason));
        }
        clock.sleep((options.poll_interval)());
        if let Some(reason) = cursor.should_stop(plan, clock, stop, Role::Consumer) {
            return Ok(cursor.finish(reason));
        }
        let due = cursor.next_request(plan, clock, capacity);
        if due > 0 {
            let got = inlet.pull_chunk(buffer, due)?;
            cursor.report.samples += got as u64;
            if options.request_time {
                inlet.time_correction(options.query_timeout)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::{ChannelFormat, EndpointConfig};
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Advances by the requested duration plus a random oversleep.
    struct JitterClock {
        now: Mutex<f64>,
        rng: Mutex<StdRng>,
        max_jitter: f64,
    }

    impl JitterClock {
        fn new(seed: u64, max_jitter: f64) -> Self {
            Self {
                now: Mutex::new(0.0),
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
                max_jitter,
            }
        }
    }

    impl Clock for JitterClock {
        fn now(&self) -> f64 {
            *self.now.lock()
        }

        fn sleep(&self, duration: Duration) {
            let jitter = if self.max_jitter > 0.0 {
                self.rng.lock().gen_range(0.0..self.max_jitter)
            } else {
                0.0
            };
            *self.now.lock() += duration.as_secs_f64() + jitter;
        }
    }

    struct RecordingOutlet {
        config: EndpointConfig,
        requests: Vec<usize>,
    }

    impl RecordingOutlet {
        fn new() -> Self {
            Self {
                config: EndpointConfig::new("T", "EEG", 2, 500.0, ChannelFormat::Int16),
                requests: Vec::new(),
            }
        }
    }

    impl Outlet for RecordingOutlet {
        fn config(&self) -> &EndpointConfig {
            &self.config
        }

        fn push_sample(&mut self, _chunk: &ChunkBuffer, _index: usize) -> StressResult<()> {
            self.requests.push(1);
            Ok(())
        }

        fn push_chunk(&mut self, chunk: &ChunkBuffer, samples: usize) -> StressResult<()> {
            assert!(samples <= chunk.capacity_samples());
            self.requests.push(samples);
            Ok(())
        }

        fn wait_for_consumers(&self, _timeout: Duration) -> bool {
            true
        }

        fn close(self: Box<Self>) -> StressResult<()> {
            Ok(())
        }
    }

    /// Hands out at most `supply` samples per pull and counts clock queries.
    struct RecordingInlet {
        supply: usize,
        requests: Vec<usize>,
        corrections: AtomicUsize,
    }

    impl RecordingInlet {
        fn new(supply: usize) -> Self {
            Self {
                supply,
                requests: Vec::new(),
                corrections: AtomicUsize::new(0),
            }
        }
    }

    impl Inlet for RecordingInlet {
        fn info(&self, _timeout: Duration) -> StressResult<EndpointConfig> {
            Ok(EndpointConfig::new("T", "EEG", 2, 500.0, ChannelFormat::Int16))
        }

        fn open_stream(&mut self, _timeout: Duration) -> StressResult<()> {
            Ok(())
        }

        fn pull_sample(&mut self, _buffer: &mut ChunkBuffer, _timeout: Duration) -> StressResult<bool> {
            self.requests.push(1);
            Ok(true)
        }

        fn pull_chunk(&mut self, buffer: &mut ChunkBuffer, max_samples: usize) -> StressResult<usize> {
            assert!(max_samples <= buffer.capacity_samples());
            self.requests.push(max_samples);
            Ok(max_samples.min(self.supply))
        }

        fn time_correction(&self, _timeout: Duration) -> StressResult<f64> {
            self.corrections.fetch_add(1, Ordering::Relaxed);
            Ok(0.0)
        }

        fn close(self: Box<Self>) -> StressResult<()> {
            Ok(())
        }
    }

    fn pull_options(request_time: bool, poll: &mut dyn FnMut() -> Duration) -> PullOptions<'_> {
        PullOptions {
            request_time,
            query_timeout: Duration::from_millis(100),
            poll_interval: poll,
        }
    }

    #[test]
    fn test_samples_due() {
        assert_eq!(samples_due(Pacing::Regular(100.0), 0.5, 0, 1000), 50);
        assert_eq!(samples_due(Pacing::Regular(100.0), 0.5, 40, 1000), 10);
        assert_eq!(samples_due(Pacing::Regular(100.0), 0.5, 60, 1000), 0);
        assert_eq!(samples_due(Pacing::Regular(100.0), 10.0, 0, 25), 25);
        assert_eq!(samples_due(Pacing::Irregular { per_tick: 1 }, 3.0, 9, 8), 1);
    }

    #[test]
    fn test_capacity_formulas() {
        // 20 ms at 500 Hz is 10 samples, times 5
        assert_eq!(producer_capacity(Duration::from_millis(20), 500.0, 5), 50);
        assert_eq!(producer_capacity(Duration::from_millis(1), 1.0, 5), 1);
        assert_eq!(producer_capacity(Duration::from_millis(50), 0.0, 5), 1);
        // 100 ms at 333 Hz is 33.3 samples, times 5, rounded up
        assert_eq!(consumer_capacity(100, 333.0, 1000.0, 5), 167);
        assert_eq!(consumer_capacity(100, 0.0, 1000.0, 5), 500);
        assert_eq!(consumer_capacity(1, 1.0, 1000.0, 5), 1);
    }

    #[test]
    fn test_producer_never_exceeds_capacity_under_jitter() {
        let stop = StopSignal::new();
        for seed in 0..50 {
            let clock = JitterClock::new(seed, 0.25);
            let chunk_len = Duration::from_millis(10);
            let capacity = producer_capacity(chunk_len, 500.0, 5);
            let buffer = ChunkBuffer::filled(ChannelFormat::Int16, 2, capacity);
            let plan = PacePlan {
                pacing: Pacing::Regular(500.0),
                failure_interval: Duration::from_secs(5),
                max_samples: u64::MAX,
            };
            let mut outlet = RecordingOutlet::new();
            let report =
                pace_producer(&mut outlet, &buffer, &plan, chunk_len, &clock, &stop).unwrap();

            assert_eq!(report.stop_reason, StopReason::FailureDeadline);
            assert!(outlet.requests.iter().all(|&n| n <= capacity));
            assert!(report.largest_request <= capacity);
            assert_eq!(report.transfer_calls as usize, outlet.requests.len());
            assert_eq!(report.samples, outlet.requests.iter().sum::<usize>() as u64);
        }
    }

    #[test]
    fn test_producer_keeps_rate_without_jitter() {
        let stop = StopSignal::new();
        let clock = JitterClock::new(0, 0.0);
        let chunk_len = Duration::from_millis(10);
        let buffer = ChunkBuffer::filled(ChannelFormat::Int16, 2, 50);
        let plan = PacePlan {
            pacing: Pacing::Regular(500.0),
            failure_interval: Duration::from_millis(1000),
            max_samples: u64::MAX,
        };
        let mut outlet = RecordingOutlet::new();
        let report = pace_producer(&mut outlet, &buffer, &plan, chunk_len, &clock, &stop).unwrap();
        // one second at 500 Hz, give or take float rounding on the last tick
        assert!((490..=505).contains(&report.samples));
        assert!(report.iterations >= 98);
    }

    #[test]
    fn test_sample_cap_ends_pacing() {
        let stop = StopSignal::new();
        let clock = JitterClock::new(3, 0.0);
        let buffer = ChunkBuffer::filled(ChannelFormat::Float32, 2, 50);
        let plan = PacePlan {
            pacing: Pacing::Regular(500.0),
            failure_interval: Duration::from_secs(60),
            max_samples: 123,
        };
        let mut outlet = RecordingOutlet::new();
        let report = pace_producer(
            &mut outlet,
            &buffer,
            &plan,
            Duration::from_millis(10),
            &clock,
            &stop,
        )
        .unwrap();
        assert_eq!(report.stop_reason, StopReason::SampleCap);
        assert_eq!(report.samples, 123);
    }

    #[test]
    fn test_irregular_producer_pushes_one_per_tick() {
        let stop = StopSignal::new();
        let clock = JitterClock::new(11, 0.05);
        let buffer = ChunkBuffer::filled(ChannelFormat::String, 3, 1);
        let plan = PacePlan {
            pacing: Pacing::Irregular { per_tick: 1 },
            failure_interval: Duration::from_millis(500),
            max_samples: u64::MAX,
        };
        let mut outlet = RecordingOutlet::new();
        let report = pace_producer(
            &mut outlet,
            &buffer,
            &plan,
            Duration::from_millis(20),
            &clock,
            &stop,
        )
        .unwrap();
        assert!(outlet.requests.iter().all(|&n| n == 1));
        assert_eq!(report.iterations, report.transfer_calls);
    }

    #[test]
    fn test_stopped_before_start() {
        let stop = StopSignal::new();
        stop.stop(Role::Producer);
        let clock = JitterClock::new(0, 0.0);
        let buffer = ChunkBuffer::filled(ChannelFormat::Int8, 1, 10);
        let plan = PacePlan {
            pacing: Pacing::Regular(100.0),
            failure_interval: Duration::from_secs(1),
            max_samples: u64::MAX,
        };
        let mut outlet = RecordingOutlet::new();
        let report = pace_producer(
            &mut outlet,
            &buffer,
            &plan,
            Duration::from_millis(10),
            &clock,
            &stop,
        )
        .unwrap();
        assert_eq!(report.stop_reason, StopReason::Stopped);
        assert_eq!(report.iterations, 0);
        assert!(outlet.requests.is_empty());
    }

    #[test]
    fn test_producer_stops_at_deadline_reached_while_sleeping() {
        let stop = StopSignal::new();
        let clock = JitterClock::new(0, 0.0);
        let buffer = ChunkBuffer::filled(ChannelFormat::Float32, 2, 100);
        let plan = PacePlan {
            pacing: Pacing::Regular(1000.0),
            failure_interval: Duration::from_millis(15),
            max_samples: u64::MAX,
        };
        let mut outlet = RecordingOutlet::new();
        let report = pace_producer(
            &mut outlet,
            &buffer,
            &plan,
            Duration::from_millis(10),
            &clock,
            &stop,
        )
        .unwrap();
        // woke at 10 ms and pushed, woke again at 20 ms past the deadline
        assert_eq!(outlet.requests.len(), 1);
        assert_eq!(report.transfer_calls, 1);
        assert_eq!(report.stop_reason, StopReason::FailureDeadline);
    }

    #[test]
    fn test_consumer_stops_at_deadline_reached_while_sleeping() {
        let stop = StopSignal::new();
        let clock = JitterClock::new(0, 0.0);
        let mut buffer = ChunkBuffer::filled(ChannelFormat::Float32, 2, 100);
        let plan = PacePlan {
            pacing: Pacing::Regular(1000.0),
            failure_interval: Duration::from_millis(15),
            max_samples: u64::MAX,
        };
        let mut poll = || Duration::from_millis(10);
        let mut inlet = RecordingInlet::new(usize::MAX);
        let report = pace_consumer(
            &mut inlet,
            &mut buffer,
            &plan,
            pull_options(true, &mut poll),
            &clock,
            &stop,
        )
        .unwrap();
        assert_eq!(inlet.requests.len(), 1);
        assert_eq!(inlet.corrections.load(Ordering::Relaxed), 1);
        assert_eq!(report.stop_reason, StopReason::FailureDeadline);
    }

    #[test]
    fn test_consumer_never_exceeds_capacity_under_jitter() {
        let stop = StopSignal::new();
        let capacity = consumer_capacity(100, 500.0, 1000.0, 5);
        for seed in 0..50 {
            let clock = JitterClock::new(seed, 0.25);
            let mut poll_rng = StdRng::seed_from_u64(seed + 1000);
            let mut poll = move || Duration::from_millis(poll_rng.gen_range(1..100));
            let mut buffer = ChunkBuffer::filled(ChannelFormat::Int16, 2, capacity);
            let plan = PacePlan {
                pacing: Pacing::Regular(500.0),
                failure_interval: Duration::from_secs(5),
                max_samples: u64::MAX,
            };
            // the producer side lags: fewer samples arrive than requested
            let mut inlet = RecordingInlet::new(40);
            let report = pace_consumer(
                &mut inlet,
                &mut buffer,
                &plan,
                pull_options(true, &mut poll),
                &clock,
                &stop,
            )
            .unwrap();

            assert_eq!(report.stop_reason, StopReason::FailureDeadline);
            assert!(!inlet.requests.is_empty());
            assert!(inlet.requests.iter().all(|&n| n > 0 && n <= capacity));
            assert!(report.largest_request <= capacity);
            assert_eq!(report.transfer_calls as usize, inlet.requests.len());
            assert_eq!(inlet.corrections.load(Ordering::Relaxed), inlet.requests.len());
            let delivered: u64 = inlet.requests.iter().map(|&n| n.min(40) as u64).sum();
            assert_eq!(report.samples, delivered);
        }
    }

    #[test]
    fn test_irregular_consumer_requests_full_buffer() {
        let stop = StopSignal::new();
        let clock = JitterClock::new(5, 0.05);
        let capacity = consumer_capacity(100, 0.0, 1000.0, 5);
        let mut buffer = ChunkBuffer::filled(ChannelFormat::String, 1, capacity);
        let plan = PacePlan {
            pacing: Pacing::Irregular { per_tick: capacity },
            failure_interval: Duration::from_millis(500),
            max_samples: u64::MAX,
        };
        let mut poll = || Duration::from_millis(20);
        let mut inlet = RecordingInlet::new(3);
        let report = pace_consumer(
            &mut inlet,
            &mut buffer,
            &plan,
            pull_options(false, &mut poll),
            &clock,
            &stop,
        )
        .unwrap();
        assert!(!inlet.requests.is_empty());
        assert!(inlet.requests.iter().all(|&n| n == capacity));
        assert_eq!(report.iterations, report.transfer_calls);
        assert_eq!(inlet.corrections.load(Ordering::Relaxed), 0);
        assert_eq!(report.samples, 3 * inlet.requests.len() as u64);
    }

    #[test]
    fn test_consumer_skips_pull_when_nothing_is_due() {
        let stop = StopSignal::new();
        let clock = JitterClock::new(0, 0.0);
        let mut buffer = ChunkBuffer::filled(ChannelFormat::Int32, 1, 10);
        // 1 Hz polled every 10 ms: almost every wake-up has nothing due
        let plan = PacePlan {
            pacing: Pacing::Regular(1.0),
            failure_interval: Duration::from_millis(2500),
            max_samples: u64::MAX,
        };
        let mut poll = || Duration::from_millis(10);
        let mut inlet = RecordingInlet::new(usize::MAX);
        let report = pace_consumer(
            &mut inlet,
            &mut buffer,
            &plan,
            pull_options(true, &mut poll),
            &clock,
            &stop,
        )
        .unwrap();
        assert!(report.iterations > 200);
        assert!((1..=3).contains(&report.transfer_calls));
        assert_eq!(inlet.requests.len() as u64, report.transfer_calls);
        assert_eq!(inlet.corrections.load(Ordering::Relaxed), inlet.requests.len());
    }

    #[test]
    fn test_consumer_stop_signal() {
        let stop = StopSignal::new();
        stop.stop(Role::Consumer);
        let clock = JitterClock::new(0, 0.0);
        let mut buffer = ChunkBuffer::filled(ChannelFormat::Int8, 1, 10);
        let plan = PacePlan {
            pacing: Pacing::Regular(100.0),
            failure_interval: Duration::from_secs(1),
            max_samples: u64::MAX,
        };
        let mut poll = || Duration::from_millis(10);
        let mut inlet = RecordingInlet::new(usize::MAX);
        let report = pace_consumer(
            &mut inlet,
            &mut buffer,
            &plan,
            pull_options(false, &mut poll),
            &clock,
            &stop,
        )
        .unwrap();
        assert_eq!(report.stop_reason, StopReason::Stopped);
        assert!(inlet.requests.is_empty());
    }
}

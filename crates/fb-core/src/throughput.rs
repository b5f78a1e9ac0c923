//! Multi-threaded GEMM throughput loop.
//!
//! Every worker owns its buffers and runs the same cycle forever:
//!
//! 1. barrier (all workers share one start instant),
//! 2. timed burst of `TILE x TILE x TILE` multiply-accumulates,
//! 3. add the local operation count to the shared counter,
//! 4. barrier (the counter now holds every contribution),
//! 5. worker 0 alone reports the rate and resets the counter.
//!
//! The counter and the start instant are only touched with relaxed atomics;
//! the two barriers provide all the ordering the protocol needs.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use fb_blas::{BlasBackend, GemmOp};
use tracing::{debug, error, info};

use crate::buffers::{CacheAligned, WorkerBuffers, TILE};
use crate::config::LoopConfig;
use crate::error::{BenchError, Result};
use crate::fpmode::DenormalGuard;

/// Operations credited for one `TILE x TILE x TILE` call: `TILE^2 * (2 * TILE + 2)`.
pub const FLOP_PER_CALL: u64 = (TILE * TILE * (2 * TILE + 2)) as u64;

/// Result of one reporting cycle, produced by the aggregating worker.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Zero-based cycle index.
    pub cycle: u64,
    /// Shared counter value read after the second barrier.
    pub flop: u64,
    /// Each worker's local count for this cycle, indexed by worker id.
    pub per_worker: Vec<u64>,
    /// Wall-clock time from the cycle's start instant to the aggregation.
    pub elapsed: Duration,
}

impl CycleReport {
    /// Throughput in Gflop/s (operations per nanosecond).
    pub fn gflops(&self) -> f64 {
        let nanos = self.elapsed.as_nanos() as f64;
        if nanos == 0.0 {
            return 0.0;
        }
        self.flop as f64 / nanos
    }
}

/// Call `op` on the given buffers until `deadline` has passed.
///
/// The deadline is checked only between calls, so a burst always completes
/// at least one call and never stops mid-call. Runs under a
/// [`DenormalGuard`]. Returns the operations completed, `op.flop()` per call.
///
/// # Errors
/// Returns the backend's error from the first failing call.
pub fn timed_burst<K: BlasBackend + ?Sized>(
    backend: &K,
    op: &GemmOp,
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
    deadline: Instant,
) -> fb_blas::Result<u64> {
    let _denormals = DenormalGuard::new();
    let per_call = op.flop();
    let mut flop = 0u64;
    loop {
        backend.sgemm(op, a, b, c)?;
        flop += per_call;
        if Instant::now() >= deadline {
            return Ok(flop);
        }
    }
}

/// State shared by all workers of one run.
struct Shared {
    barrier: Barrier,
    /// The global work counter.
    flop: AtomicU64,
    /// Local counts published before the second barrier.
    contributions: Vec<CacheAligned<AtomicU64>>,
    /// Origin for `start_ns`.
    base: Instant,
    /// Current cycle's start instant, as nanoseconds after `base`.
    start_ns: CacheAligned<AtomicU64>,
}

impl Shared {
    fn new(workers: usize) -> Self {
        Shared {
            barrier: Barrier::new(workers),
            flop: AtomicU64::new(0),
            contributions: (0..workers)
                .map(|_| CacheAligned::new(AtomicU64::new(0)))
                .collect(),
            base: Instant::now(),
            start_ns: CacheAligned::new(AtomicU64::new(0)),
        }
    }

    fn mark_start(&self) {
        let ns = self.base.elapsed().as_nanos() as u64;
        self.start_ns.store(ns, Ordering::Relaxed);
    }

    fn start(&self) -> Instant {
        self.base + Duration::from_nanos(self.start_ns.load(Ordering::Relaxed))
    }
}

/// Run the throughput loop on `config.workers` threads.
///
/// Worker 0 runs on the calling thread and calls `report` once per cycle.
/// With `config.max_cycles == None` this never returns.
///
/// # Errors
/// Returns `InvalidConfig` for zero workers, or the backend's error if it
/// rejects the benchmark's GEMM shape.
pub fn run<K, R>(backend: &K, config: &LoopConfig, mut report: R) -> Result<()>
where
    K: BlasBackend + ?Sized,
    R: FnMut(CycleReport),
{
    if config.workers == 0 {
        return Err(BenchError::InvalidConfig(
            "throughput loop needs at least one worker".to_string(),
        ));
    }
    let op = GemmOp::square(TILE);
    op.check(TILE * TILE, TILE * TILE, TILE * TILE)?;

    info!(
        backend = backend.name(),
        workers = config.workers,
        window = ?config.window,
        "starting throughput loop"
    );

    let shared = Shared::new(config.workers);
    thread::scope(|scope| {
        for id in 1..config.workers {
            let (shared, op) = (&shared, &op);
            let spawned = thread::Builder::new()
                .name(format!("flopbench-{}", id))
                .spawn_scoped(scope, move || worker(id, backend, op, shared, config, None));
            if let Err(err) = spawned {
                // The barrier already counts this worker; the others could never proceed.
                error!(worker = id, %err, "failed to spawn worker thread");
                process::abort();
            }
        }
        worker(0, backend, &op, &shared, config, Some(&mut report));
    });
    Ok(())
}

/// Aborts the process if dropped while its worker is unwinding: the
/// surviving workers would otherwise wait at the barrier forever.
struct AbortOnPanic {
    worker: usize,
}

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(worker = self.worker, "worker panicked");
            process::abort();
        }
    }
}

fn worker<K: BlasBackend + ?Sized>(
    id: usize,
    backend: &K,
    op: &GemmOp,
    shared: &Shared,
    config: &LoopConfig,
    mut aggregate: Option<&mut dyn FnMut(CycleReport)>,
) {
    let _abort = AbortOnPanic { worker: id };
    let mut buffers = WorkerBuffers::randomized();
    debug!(worker = id, "buffers initialized");

    let mut cycle = 0u64;
    while config.max_cycles.map_or(true, |max| cycle < max) {
        if aggregate.is_some() {
            shared.mark_start();
        }
        shared.barrier.wait();

        let deadline = shared.start() + config.window;
        let (a, b, c) = buffers.split();
        let flop = match timed_burst(backend, op, a, b, c, deadline) {
            Ok(flop) => flop,
            Err(err) => {
                error!(worker = id, %err, "GEMM call failed during timed burst");
                process::abort();
            }
        };
        shared.contributions[id].store(flop, Ordering::Relaxed);
        shared.flop.fetch_add(flop, Ordering::Relaxed);

        shared.barrier.wait();

        if let Some(report) = aggregate.as_deref_mut() {
            let elapsed = shared.start().elapsed();
            let total = shared.flop.load(Ordering::Relaxed);
            let per_worker = shared
                .contributions
                .iter()
                .map(|slot| slot.load(Ordering::Relaxed))
                .collect();
            debug!(cycle, total, ?elapsed, "cycle aggregated");
            report(CycleReport {
                cycle,
                flop: total,
                per_worker,
                elapsed,
            });
            shared.flop.store(0, Ordering::Relaxed);
        }
        cycle += 1;
    }
}

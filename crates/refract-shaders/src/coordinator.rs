//! Background compilation coordinator.
//!
//! At most one wave is in flight. A wave is admitted with an atomic
//! test-and-set, its jobs run in parallel on a dedicated rayon pool, and the
//! finished batch is handed back to the owner thread over a channel. The
//! coordinator only returns to [`CoordinatorState::Idle`] once the owner has
//! taken the batch, so a new wave is always planned against committed
//! include sets.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use rayon::prelude::*;

use crate::compiler::{compile_program, CompileOutput, ShaderBackend};
use crate::error::{Result, ShaderError};
use crate::planner::RecompileJob;
use crate::program::ProgramId;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Compiling,
}

/// Outcome of one job.
#[derive(Debug)]
pub struct JobResult {
    pub program: ProgramId,
    pub output: CompileOutput,
}

/// Every job result of a finished wave.
#[derive(Debug)]
pub struct WaveResult {
    /// Sequence number of the wave, starting at 1.
    pub wave: u64,
    pub results: Vec<JobResult>,
    pub elapsed: Duration,
}

/// Runs compilation waves off the owner thread.
pub struct CompileCoordinator {
    pool: rayon::ThreadPool,
    backend: Arc<dyn ShaderBackend>,
    compiling: Arc<AtomicBool>,
    next_wave: AtomicU64,
    result_tx: Sender<WaveResult>,
    result_rx: Receiver<WaveResult>,
}

impl CompileCoordinator {
    /// Create a coordinator with `threads` compile workers.
    pub fn new(backend: Arc<dyn ShaderBackend>, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("shader-compile-{i}"))
            .build()
            .map_err(|e| ShaderError::ThreadPool(e.to_string()))?;
        let (result_tx, result_rx) = channel::bounded(1);

        Ok(Self {
            pool,
            backend,
            compiling: Arc::new(AtomicBool::new(false)),
            next_wave: AtomicU64::new(1),
            result_tx,
            result_rx,
        })
    }

    /// Compile backend shared with the workers.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ShaderBackend> {
        &self.backend
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        if self.compiling.load(Ordering::Acquire) {
            CoordinatorState::Compiling
        } else {
            CoordinatorState::Idle
        }
    }

    /// Try to move from `Idle` to `Compiling`.
    ///
    /// Returns `None` while a wave is in flight. Dropping the admission
    /// without dispatching returns the coordinator to `Idle`.
    #[must_use]
    pub fn try_admit(&self) -> Option<WaveAdmission<'_>> {
        self.compiling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| WaveAdmission {
                coordinator: self,
                armed: true,
            })
    }

    /// Take a finished wave without blocking.
    #[must_use]
    pub fn poll(&self) -> Option<WaveResult> {
        let wave = self.result_rx.try_recv().ok()?;
        self.compiling.store(false, Ordering::Release);
        Some(wave)
    }

    /// Block until the in-flight wave finishes. Returns `None` when idle.
    #[must_use]
    pub fn wait(&self) -> Option<WaveResult> {
        if self.state() == CoordinatorState::Idle {
            return None;
        }
        let wave = self.result_rx.recv().ok()?;
        self.compiling.store(false, Ordering::Release);
        Some(wave)
    }

    fn spawn_wave(&self, jobs: Vec<RecompileJob>) {
        let wave = self.next_wave.fetch_add(1, Ordering::Relaxed);
        let backend = Arc::clone(&self.backend);
        let result_tx = self.result_tx.clone();
        tracing::info!("Shader wave {wave}: compiling {} programs", jobs.len());

        self.pool.spawn(move || {
            let start = Instant::now();
            // Collecting is the wave barrier: every job finishes before the hand-off.
            let results: Vec<JobResult> = jobs
                .into_par_iter()
                .map(|job| run_job(backend.as_ref(), job))
                .collect();
            let elapsed = start.elapsed();
            tracing::info!("Shader wave {wave} finished in {elapsed:?}");

            if result_tx
                .send(WaveResult {
                    wave,
                    results,
                    elapsed,
                })
                .is_err()
            {
                tracing::debug!("Shader wave {wave} dropped, coordinator is gone");
            }
        });
    }
}

fn run_job(backend: &dyn ShaderBackend, job: RecompileJob) -> JobResult {
    let output = compile_program(
        backend,
        &job.sources,
        job.source,
        job.kind,
        job.group_context.as_deref(),
    );
    match &output.result {
        Ok(_) => tracing::debug!("Compiled {}", job.program),
        Err(e) => tracing::debug!("Compiling {} failed: {e}", job.program),
    }
    JobResult {
        program: job.program,
        output,
    }
}

/// Permission to run one wave. Held between planning and dispatch.
pub struct WaveAdmission<'a> {
    coordinator: &'a CompileCoordinator,
    armed: bool,
}

impl WaveAdmission<'_> {
    /// Start the wave on the worker pool.
    ///
    /// An empty job list starts nothing and returns the coordinator to `Idle`.
    /// Returns the number of jobs dispatched.
    pub fn dispatch(mut self, jobs: Vec<RecompileJob>) -> usize {
        let count = jobs.len();
        if count > 0 {
            self.coordinator.spawn_wave(jobs);
            self.armed = false;
        }
        count
    }
}

impl Drop for WaveAdmission<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.compiling.store(false, Ordering::Release);
        }
    }
}

//! Bounded worker pool with generation-scoped cancellation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::SimulationError;

/// Shared flag that aborts every not-yet-started unit of one pool generation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    generation: u64,
}

impl CancelHandle {
    fn new(generation: u64) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            generation,
        }
    }

    /// Mark the generation cancelled. Units already running finish; queued units are skipped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Outcome of a single unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitResult<R> {
    Done(R),
    /// The pool generation was cancelled before this unit started.
    Skipped,
    /// The unit panicked; the message is kept and the phase carries on.
    Faulted(String),
}

impl<R> UnitResult<R> {
    #[must_use]
    pub fn done(self) -> Option<R> {
        match self {
            Self::Done(value) => Some(value),
            Self::Skipped | Self::Faulted(_) => None,
        }
    }
}

/// Live count of units executing on a pool, readable from any thread.
///
/// Clones share one counter. A pool built with [`WorkerPool::with_gauge`]
/// reports into the gauge it was given, so one gauge can outlive several
/// pool generations.
#[derive(Debug, Clone, Default)]
pub struct WorkerGauge {
    active: Arc<AtomicUsize>,
}

impl WorkerGauge {
    #[must_use]
    pub fn get(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Decrements the active counter when a unit finishes, even by unwinding.
struct ActiveGuard<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::AcqRel) + 1;
        peak.fetch_max(now, Ordering::AcqRel);
        Self { active }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "work unit panicked".to_string()
    }
}

/// Fixed-size pool running at most `max_workers` units at once.
///
/// A pool belongs to a single generation; `reset` on the simulation
/// replaces it and cancels the old generation.
pub struct WorkerPool {
    pool: ThreadPool,
    max_workers: usize,
    cancel: CancelHandle,
    gauge: WorkerGauge,
    peak: AtomicUsize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers)
            .field("generation", &self.cancel.generation)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("active", &self.active_workers())
            .finish()
    }
}

impl WorkerPool {
    /// Build a pool for `generation` with `max_workers` threads.
    pub fn new(max_workers: usize, generation: u64) -> Result<Self, SimulationError> {
        Self::with_gauge(max_workers, generation, WorkerGauge::default())
    }

    /// Like [`WorkerPool::new`], reporting running units into `gauge`.
    pub fn with_gauge(
        max_workers: usize,
        generation: u64,
        gauge: WorkerGauge,
    ) -> Result<Self, SimulationError> {
        if max_workers == 0 {
            return Err(SimulationError::InvalidConfig("max_workers must be non-zero"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(move |index| format!("contagion-g{generation}-w{index}"))
            .build()?;
        Ok(Self {
            pool,
            max_workers,
            cancel: CancelHandle::new(generation),
            gauge,
            peak: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.cancel.generation
    }

    /// Handle that can cancel this generation from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Units currently executing.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.gauge.get()
    }

    /// Shared handle onto the active-unit counter.
    #[must_use]
    pub fn worker_gauge(&self) -> WorkerGauge {
        self.gauge.clone()
    }

    /// Most units observed running at once since the last call.
    pub fn take_peak(&self) -> usize {
        self.peak.swap(0, Ordering::AcqRel)
    }

    /// Run `work` once per item and return when every unit has finished.
    ///
    /// Results are returned in item order.
    pub fn run_phase<T, R, F>(&self, items: &mut [T], work: F) -> Vec<UnitResult<R>>
    where
        T: Send,
        R: Send,
        F: Fn(&mut T) -> R + Sync + Send,
    {
        let cancel = &self.cancel;
        let active = &*self.gauge.active;
        let peak = &self.peak;
        self.pool.install(|| {
            items
                .par_iter_mut()
                .map(|item| {
                    if cancel.is_cancelled() {
                        return UnitResult::Skipped;
                    }
                    let _guard = ActiveGuard::enter(active, peak);
                    match panic::catch_unwind(AssertUnwindSafe(|| work(item))) {
                        Ok(value) => UnitResult::Done(value),
                        Err(payload) => UnitResult::Faulted(panic_message(payload)),
                    }
                })
                .collect()
        })
    }
}

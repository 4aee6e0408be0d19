// Job system
//
// Fixed pool of worker threads pulling boxed closures off a crossbeam
// channel. Submission never blocks. Completion is tracked per job id so
// callers can wait on one job or on everything in flight.
//
// The engine installs one instance process-wide (job_system_init/term) for
// subsystems that are not handed a `JobSystem` directly.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identifies one submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

struct Queued {
    id: u64,
    job: Job,
}

#[derive(Default)]
struct State {
    next_id: u64,
    pending: HashSet<u64>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    done: Condvar,
}

impl Shared {
    fn finish(&self, id: u64) {
        let mut state = self.state.lock();
        state.pending.remove(&id);
        self.done.notify_all();
    }
}

pub struct JobSystem {
    shared: Arc<Shared>,
    sender: Option<Sender<Queued>>,
    workers: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Spawn `worker_count` workers, or one per available core when zero.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = if worker_count == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            worker_count
        };

        let shared = Arc::new(Shared::default());
        let (sender, receiver) = crossbeam_channel::unbounded::<Queued>();

        let workers = (0..worker_count)
            .filter_map(|index| {
                let receiver = receiver.clone();
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("topaz-worker-{index}"))
                    .spawn(move || worker_loop(receiver, shared))
                    .map_err(|e| log::error!("Failed to spawn job worker {}: {}", index, e))
                    .ok()
            })
            .collect::<Vec<_>>();

        log::info!("Job system started with {} workers", workers.len());

        Self {
            shared,
            sender: Some(sender),
            workers,
        }
    }

    /// Queue `job` for execution on any worker. Never blocks.
    pub fn execute<F>(&self, job: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = {
            let mut state = self.shared.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.pending.insert(id);
            id
        };

        let queued = Queued { id, job: Box::new(job) };
        match &self.sender {
            Some(sender) if !self.workers.is_empty() => {
                if let Err(err) = sender.send(queued) {
                    run_job(err.into_inner(), &self.shared);
                }
            }
            // No worker could be spawned: run on the caller's thread.
            _ => run_job(queued, &self.shared),
        }

        JobHandle(id)
    }

    pub fn complete(&self, handle: JobHandle) -> bool {
        !self.shared.state.lock().pending.contains(&handle.0)
    }

    /// Wait until `handle` has run.
    pub fn block(&self, handle: JobHandle) {
        let mut state = self.shared.state.lock();
        while state.pending.contains(&handle.0) {
            self.shared.done.wait(&mut state);
        }
    }

    /// Wait until every job submitted so far has run.
    pub fn block_all(&self) {
        let mut state = self.shared.state.lock();
        while !state.pending.is_empty() {
            self.shared.done.wait(&mut state);
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Jobs submitted but not yet finished.
    pub fn size(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        // Closing the channel lets workers drain what is queued and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Job worker exited abnormally");
            }
        }
        log::info!("Job system stopped");
    }
}

fn worker_loop(receiver: Receiver<Queued>, shared: Arc<Shared>) {
    for queued in receiver.iter() {
        run_job(queued, &shared);
    }
}

fn run_job(queued: Queued, shared: &Shared) {
    let Queued { id, job } = queued;
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::error!("Job {} panicked", id);
    }
    shared.finish(id);
}

// ============================================================================
// Process-wide instance
// ============================================================================

static GLOBAL: Mutex<Option<Arc<JobSystem>>> = parking_lot::const_mutex(None);

/// Install `system` as the process-wide job system.
///
/// Panics if one is already installed.
pub fn job_system_install(system: Arc<JobSystem>) {
    let mut global = GLOBAL.lock();
    assert!(global.is_none(), "job system is already initialised");
    *global = Some(system);
}

/// Create and install the process-wide job system.
pub fn job_system_init(worker_count: usize) -> Arc<JobSystem> {
    let system = Arc::new(JobSystem::new(worker_count));
    job_system_install(Arc::clone(&system));
    system
}

/// Drain and remove the process-wide job system. Blocks until every queued
/// job has run.
///
/// Panics if none is installed.
pub fn job_system_term() {
    let system = GLOBAL
        .lock()
        .take()
        .unwrap_or_else(|| panic!("job system terminated while not initialised"));
    system.block_all();
}

/// The process-wide job system.
///
/// Panics outside the `job_system_init` / `job_system_term` window.
pub fn job_system() -> Arc<JobSystem> {
    GLOBAL
        .lock()
        .as_ref()
        .cloned()
        .unwrap_or_else(|| panic!("job_system() called outside job_system_init/job_system_term"))
}

pub fn job_system_active() -> bool {
    GLOBAL.lock().is_some()
}

#[cfg(test)]
pub(crate) static GLOBAL_TEST_LOCK: Mutex<()> = parking_lot::const_mutex(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn every_job_runs_exactly_once() {
        const K: usize = 200;
        let jobs = JobSystem::new(4);
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..K).map(|_| AtomicUsize::new(0)).collect());

        for i in (0..K).rev() {
            let hits = Arc::clone(&hits);
            jobs.execute(move || {
                hits[i].fetch_add(1, Ordering::SeqCst);
            });
        }
        jobs.block_all();

        assert_eq!(jobs.size(), 0);
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn block_waits_for_one_job() {
        let jobs = JobSystem::new(2);
        let flag = Arc::new(AtomicUsize::new(0));
        let handle = {
            let flag = Arc::clone(&flag);
            jobs.execute(move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(1, Ordering::SeqCst);
            })
        };
        jobs.block(handle);
        assert!(jobs.complete(handle));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_job_still_completes() {
        let jobs = JobSystem::new(1);
        let handle = jobs.execute(|| panic!("job failure"));
        jobs.block(handle);
        assert!(jobs.complete(handle));

        // Worker survives.
        let after = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&after);
        jobs.block(jobs.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_drains_the_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let jobs = JobSystem::new(2);
            for _ in 0..64 {
                let counter = Arc::clone(&counter);
                jobs.execute(move || {
                    thread::sleep(Duration::from_micros(100));
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn zero_workers_means_available_parallelism() {
        let jobs = JobSystem::new(0);
        assert!(jobs.worker_count() >= 1);
    }

    #[test]
    fn global_lifecycle() {
        let _guard = GLOBAL_TEST_LOCK.lock();
        assert!(!job_system_active());

        job_system_init(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        job_system().execute(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        job_system_term();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!job_system_active());
    }

    #[test]
    #[should_panic(expected = "outside job_system_init")]
    fn access_before_init_panics() {
        let _guard = GLOBAL_TEST_LOCK.lock();
        job_system();
    }

    #[test]
    #[should_panic(expected = "outside job_system_init")]
    fn access_after_term_panics() {
        let _guard = GLOBAL_TEST_LOCK.lock();
        job_system_init(1);
        job_system_term();
        job_system();
    }
}

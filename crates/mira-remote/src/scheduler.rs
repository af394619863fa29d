//! Dependency-chained jobs on a rayon pool
//!
//! A job starts only after every handle it depends on has completed. Jobs
//! never block on each other; the only blocking call is [`JobHandle::wait`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{trace, warn};

use mira_core::{MiraError, MiraResult};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Status {
    complete: bool,
    dependents: Vec<Arc<PendingJob>>,
}

struct JobState {
    name: String,
    status: Mutex<Status>,
    done: Condvar,
}

impl JobState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: Mutex::new(Status::default()),
            done: Condvar::new(),
        }
    }

    /// Mark complete and hand back the jobs waiting on this one
    fn finish(&self) -> Vec<Arc<PendingJob>> {
        let mut status = self.status.lock();
        status.complete = true;
        let dependents = std::mem::take(&mut status.dependents);
        self.done.notify_all();
        dependents
    }
}

/// Job whose dependencies have not all completed yet
struct PendingJob {
    /// Unfinished dependencies plus one registration guard
    remaining: AtomicUsize,
    task: Mutex<Option<Task>>,
    state: Arc<JobState>,
    pool: Arc<ThreadPool>,
}

impl PendingJob {
    fn release(self: &Arc<Self>) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let job = Arc::clone(self);
            self.pool.spawn(move || job.run());
        }
    }

    fn run(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            trace!(job = %self.state.name, "job started");
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                warn!(job = %self.state.name, "job panicked");
            }
        }
        for dependent in self.state.finish() {
            dependent.release();
        }
    }
}

/// Completion handle of a scheduled job
#[derive(Clone)]
pub struct JobHandle {
    state: Arc<JobState>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.state.name)
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl JobHandle {
    /// Handle that is already complete
    pub fn completed() -> Self {
        let state = JobState::new("completed");
        state.status.lock().complete = true;
        Self {
            state: Arc::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn is_complete(&self) -> bool {
        self.state.status.lock().complete
    }

    /// Block the calling thread until the job has run
    pub fn wait(&self) {
        let mut status = self.state.status.lock();
        while !status.complete {
            self.state.done.wait(&mut status);
        }
    }
}

/// Runs jobs on a dedicated rayon pool in dependency order
pub struct JobScheduler {
    pool: Arc<ThreadPool>,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("threads", &self.threads())
            .finish()
    }
}

impl JobScheduler {
    /// Build a pool with `threads` workers (0 picks rayon's default)
    pub fn new(threads: usize) -> MiraResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("mira-worker-{i}"))
            .build()
            .map_err(|e| MiraError::Scheduler(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Schedule `job` to run once every handle in `deps` has completed
    pub fn schedule<F>(&self, name: &str, deps: &[JobHandle], job: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(JobState::new(name));
        let pending = Arc::new(PendingJob {
            remaining: AtomicUsize::new(deps.len() + 1),
            task: Mutex::new(Some(Box::new(job))),
            state: Arc::clone(&state),
            pool: Arc::clone(&self.pool),
        });

        for dep in deps {
            let registered = {
                let mut status = dep.state.status.lock();
                if status.complete {
                    false
                } else {
                    status.dependents.push(Arc::clone(&pending));
                    true
                }
            };
            if !registered {
                pending.release();
            }
        }
        // Drop the registration guard
        pending.release();

        JobHandle { state }
    }

    /// Handle that completes once all `deps` have completed
    pub fn combine(&self, deps: &[JobHandle]) -> JobHandle {
        self.schedule("combine", deps, || {})
    }

    /// Block until `handle` completes
    pub fn wait(&self, handle: &JobHandle) {
        handle.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_dependencies_run_first() {
        let scheduler = JobScheduler::new(4).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let log = Arc::clone(&log);
            scheduler.schedule("a", &[], move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                log.lock().push("a");
            })
        };
        let b = {
            let log = Arc::clone(&log);
            scheduler.schedule("b", &[], move || log.lock().push("b"))
        };
        let c = {
            let log = Arc::clone(&log);
            scheduler.schedule("c", &[a.clone(), b.clone()], move || log.lock().push("c"))
        };

        c.wait();
        assert!(a.is_complete() && b.is_complete());
        let log = log.lock();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2], "c");
    }

    #[test]
    fn test_completed_dependency_does_not_stall() {
        let scheduler = JobScheduler::new(1).unwrap();
        let done = JobHandle::completed();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let job = scheduler.schedule("after-done", &[done], move || {
            flag.store(true, Ordering::SeqCst);
        });
        scheduler.wait(&job);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_combine_waits_for_all() {
        let scheduler = JobScheduler::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let counter = Arc::clone(&counter);
                scheduler.schedule(&format!("count-{i}"), &[], move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        let all = scheduler.combine(&handles);
        all.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(all.name(), "combine");
    }

    #[test]
    fn test_panicking_job_still_completes() {
        let scheduler = JobScheduler::new(1).unwrap();
        let bad = scheduler.schedule("bad", &[], || panic!("boom"));
        let after = scheduler.schedule("after", &[bad.clone()], || {});
        after.wait();
        assert!(bad.is_complete());
    }
}

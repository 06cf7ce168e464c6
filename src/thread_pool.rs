// Copyright 2026 the parafor authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A fixed-size pool of worker threads draining a shared FIFO task queue.

use crate::macros::{log_debug, log_error, log_warn};
use crossbeam_utils::CachePadded;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;

/// A queued unit of work: a closure with all of its arguments bound.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Number of threads to spawn in a worker pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    /// Converts the given thread count, failing for zero.
    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// A builder for [`WorkerPool`].
pub struct WorkerPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
}

impl Default for WorkerPoolBuilder {
    /// A builder spawning one thread per unit of available parallelism.
    fn default() -> Self {
        Self {
            num_threads: ThreadCount::AvailableParallelism,
        }
    }
}

impl WorkerPoolBuilder {
    /// Spawns a worker pool.
    ///
    /// ```
    /// # use parafor::{ThreadCount, WorkerPoolBuilder};
    /// # use std::sync::atomic::{AtomicUsize, Ordering};
    /// # use std::sync::Arc;
    /// let pool = WorkerPoolBuilder {
    ///     num_threads: ThreadCount::try_from(4).unwrap(),
    /// }
    /// .build();
    ///
    /// let counter = Arc::new(AtomicUsize::new(0));
    /// for _ in 0..10 {
    ///     let counter = counter.clone();
    ///     pool.submit(move || {
    ///         counter.fetch_add(1, Ordering::Relaxed);
    ///     })
    ///     .unwrap();
    /// }
    /// pool.wait();
    /// assert_eq!(counter.load(Ordering::Relaxed), 10);
    /// ```
    pub fn build(&self) -> WorkerPool {
        WorkerPool::new(self)
    }
}

/// Error returned when submitting a task to a pool that has been shut down.
///
/// The task is not enqueued and will never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task submitted to a worker pool that is shut down")]
pub struct SubmitError;

/// Status of a worker thread, written only by the owning worker under the
/// pool lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerStatus {
    /// The worker is blocked waiting for a task.
    Waiting,
    /// The worker is executing a task, outside of the lock.
    Working,
}

/// Queue, worker statuses and stop flag, all guarded by a single mutex.
struct PoolState {
    /// Pending tasks, executed in insertion order.
    queue: VecDeque<Task>,
    /// One status slot per worker thread.
    statuses: Vec<WorkerStatus>,
    /// Set once at shutdown, never cleared.
    stop: bool,
}

impl PoolState {
    /// Whether any worker is currently executing a task.
    fn any_working(&self) -> bool {
        self.statuses.contains(&WorkerStatus::Working)
    }
}

/// State shared between the pool handle and the worker threads.
struct Shared {
    /// Hot state, padded to avoid false sharing with the condition variables.
    state: CachePadded<Mutex<PoolState>>,
    /// Signaled when a task is pushed or the stop flag is set.
    task_available: Condvar,
    /// Signaled whenever a worker transitions back to [`WorkerStatus::Waiting`].
    maybe_idle: Condvar,
}

/// A fixed set of persistent worker threads draining a shared FIFO task
/// queue.
///
/// The pool is created with a certain number of threads and this number
/// cannot change. Submitted tasks are appended to the queue and picked up by
/// the first available worker; [`wait()`](Self::wait) blocks until all
/// submitted work has drained. Dropping the pool joins every worker; tasks
/// still queued at that point are discarded without running.
///
/// There is no per-task failure channel: a panic in a task body unwinds its
/// worker thread and that worker is lost for the lifetime of the pool, which
/// can leave [`wait()`](Self::wait) blocked. Task bodies must not panic.
pub struct WorkerPool {
    /// Handles to the worker threads, drained on drop.
    threads: Vec<JoinHandle<()>>,
    /// State shared with the worker threads.
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Creates a new pool using the given parameters.
    fn new(builder: &WorkerPoolBuilder) -> Self {
        let num_threads: NonZeroUsize = match builder.num_threads {
            ThreadCount::AvailableParallelism => std::thread::available_parallelism()
                .expect("Getting the available parallelism failed"),
            ThreadCount::Count(count) => count,
        };
        let num_threads: usize = num_threads.into();

        let shared = Arc::new(Shared {
            state: CachePadded::new(Mutex::new(PoolState {
                queue: VecDeque::new(),
                statuses: vec![WorkerStatus::Waiting; num_threads],
                stop: false,
            })),
            task_available: Condvar::new(),
            maybe_idle: Condvar::new(),
        });

        let threads = (0..num_threads)
            .map(|id| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("parafor-worker-{id}"))
                    .spawn(move || worker_loop(&shared, id))
                    .expect("Spawning a worker thread failed")
            })
            .collect();
        log_debug!("[main thread] Spawned {num_threads} worker threads");

        Self { threads, shared }
    }

    /// Returns the number of worker threads in this pool.
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Submits a task to the pool.
    ///
    /// The task is appended at the back of the queue, preserving this
    /// caller's submission order. The order between two racing submitters is
    /// unspecified, as is the execution order across workers.
    ///
    /// Fails with [`SubmitError`] if the pool has been shut down. With the
    /// `no_unwind` feature enabled, the process aborts instead of returning
    /// the error.
    pub fn submit<F>(&self, f: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_task(Box::new(f))
    }

    /// Appends an already type-erased task to the queue and wakes one worker.
    pub(crate) fn push_task(&self, task: Task) -> Result<(), SubmitError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stop {
                #[cfg(feature = "no_unwind")]
                {
                    drop(state);
                    log_error!("task submitted to a worker pool that is shut down; aborting");
                    std::process::abort();
                }
                #[cfg(not(feature = "no_unwind"))]
                return Err(SubmitError);
            }
            state.queue.push_back(task);
        }
        self.shared.task_available.notify_one();
        Ok(())
    }

    /// Blocks until no worker is executing a task and the queue is empty.
    ///
    /// A shutdown releases the queue-empty half of the condition (queued
    /// tasks will never be dispatched once the stop flag is set), but never
    /// the other half: a task that is already running always completes
    /// before `wait()` returns. The dispatch layer relies on this to keep
    /// borrowed task captures alive until their tasks have run.
    ///
    /// This is a barrier for already-submitted work only, not a snapshot of
    /// an instantaneously idle pool: if tasks are submitted concurrently with
    /// a `wait()` expected to return, the drained state may be missed between
    /// two worker transitions. Callers must finish submitting before waiting.
    pub fn wait(&self) {
        let state = self.shared.state.lock().unwrap();
        let _state = self
            .shared
            .maybe_idle
            .wait_while(state, |state| {
                state.any_working() || !(state.queue.is_empty() || state.stop)
            })
            .unwrap();
        log_debug!("[main thread] Worker pool drained");
    }

    /// Drops every task still in the queue.
    ///
    /// Only meaningful once the stop flag is set: such tasks will never be
    /// dispatched, so discarding them early preserves the shutdown
    /// semantics.
    pub(crate) fn discard_queued(&self) {
        let mut state = self.shared.state.lock().unwrap();
        debug_assert!(state.stop);
        if !state.queue.is_empty() {
            log_warn!(
                "[main thread] Discarding {} task(s) still queued at shutdown",
                state.queue.len()
            );
            state.queue.clear();
        }
    }

    /// Sets the stop flag and wakes every worker and waiter.
    ///
    /// Workers exit once they observe the flag; tasks still queued are never
    /// dispatched and are discarded when the pool is dropped. Subsequent
    /// [`submit()`](Self::submit) calls fail with [`SubmitError`]. Idempotent.
    pub fn shutdown(&self) {
        self.shared.state.lock().unwrap().stop = true;
        self.shared.task_available.notify_all();
        self.shared.maybe_idle.notify_all();
        log_debug!("[main thread] Shutdown requested");
    }
}

impl Drop for WorkerPool {
    /// Joins all the threads in the pool and discards any task left in the
    /// queue.
    #[allow(clippy::unused_enumerate_index)]
    fn drop(&mut self) {
        self.shutdown();

        log_debug!("[main thread] Joining threads in the pool...");
        for (_i, handle) in self.threads.drain(..).enumerate() {
            match handle.join() {
                Ok(()) => log_debug!("[main thread] Worker {_i} joined"),
                Err(_) => log_error!("[main thread] Worker {_i} panicked"),
            }
        }

        self.discard_queued();
    }
}

/// Main function run by each worker thread.
fn worker_loop(shared: &Shared, id: usize) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            state.statuses[id] = WorkerStatus::Waiting;
            // A transition to Waiting is the only event that can complete a
            // drain, so report it to any waiter.
            shared.maybe_idle.notify_all();

            let mut state = shared
                .task_available
                .wait_while(state, |state| !state.stop && state.queue.is_empty())
                .unwrap();
            if state.stop {
                log_debug!("[worker {id}] Received stop signal, exiting");
                return;
            }
            // Non-empty by the wait predicate.
            let task = state.queue.pop_front().unwrap();
            state.statuses[id] = WorkerStatus::Working;
            task
        };
        // The task runs (and is dropped) outside of the lock.
        task();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};

    fn pool_with(n: usize) -> WorkerPool {
        WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(n).unwrap(),
        }
        .build()
    }

    #[test]
    fn reports_its_size() {
        let pool = pool_with(3);
        assert_eq!(pool.size(), 3);
    }

    #[test]
    fn wait_returns_on_an_idle_pool() {
        let pool = pool_with(2);
        pool.wait();
    }

    #[test]
    fn every_task_runs_exactly_once() {
        let pool = pool_with(4);
        let slots: Arc<Vec<AtomicUsize>> =
            Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect());
        for i in 0..100 {
            let slots = slots.clone();
            pool.submit(move || {
                slots[i].fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait();
        for slot in slots.iter() {
            assert_eq!(slot.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn single_worker_executes_in_submission_order() {
        let pool = pool_with(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let order = order.clone();
            pool.submit(move || order.lock().unwrap().push(i)).unwrap();
        }
        pool.wait();
        assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn pool_is_reusable_after_wait() {
        let pool = pool_with(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for round in 1..=3 {
            for _ in 0..10 {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
            pool.wait();
            assert_eq!(counter.load(Ordering::SeqCst), round * 10);
        }
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let pool = pool_with(2);
        pool.shutdown();
        assert_eq!(pool.submit(|| ()), Err(SubmitError));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = pool_with(2);
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.submit(|| ()), Err(SubmitError));
    }

    #[test]
    fn wait_returns_after_shutdown() {
        let pool = pool_with(1);
        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn wait_blocks_until_a_running_task_completes_after_shutdown() {
        let pool = pool_with(1);
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let done = Arc::new(AtomicUsize::new(0));
        {
            let entered = entered.clone();
            let release = release.clone();
            let done = done.clone();
            pool.submit(move || {
                entered.wait();
                release.wait();
                done.store(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        // The single worker is now inside the task.
        entered.wait();
        pool.shutdown();

        // Release the worker only once the main thread is (most likely)
        // already blocked in wait().
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            release.wait();
        });

        // Shutdown must not let wait() return past a still-running task.
        pool.wait();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        releaser.join().unwrap();
    }

    #[test]
    fn shutdown_discards_queued_tasks() {
        let pool = pool_with(1);
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        {
            let entered = entered.clone();
            let release = release.clone();
            pool.submit(move || {
                entered.wait();
                release.wait();
            })
            .unwrap();
        }
        // The single worker is now inside the first task.
        entered.wait();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        release.wait();
        drop(pool);

        // The worker observed the stop flag before dequeuing any of the 8
        // queued tasks.
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
